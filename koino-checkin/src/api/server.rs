//! HTTP server setup and routing
//!
//! Builds the axum router over the shared state and runs the server with the
//! background presence sweeper.

use axum::{
    routing::{get, post},
    Router,
};
use koino_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::state::SharedState;

/// Shared application context passed to all handlers
///
/// AppContext implements Clone, which gives us `FromRef<AppContext>` for free
/// via axum's blanket implementation.
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
}

/// Build the application router
pub fn router(state: Arc<SharedState>) -> Router {
    let ctx = AppContext { state };

    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))
        // Presence rooms
        .route("/rooms/:code/events", get(super::sse::room_events))
        .route("/rooms/:code/presence", get(super::handlers::room_presence))
        .route("/rooms/:code/heartbeat", post(super::handlers::room_heartbeat))
        .route("/rooms/:code/leave", post(super::handlers::room_leave))
        // Check-in
        .route("/windows", post(super::handlers::create_window))
        .route("/checkin", post(super::handlers::submit_checkin))
        .route("/attendance/manual", post(super::handlers::manual_entry))
        .route("/attendance/:id/confirm", post(super::handlers::confirm_attendance))
        // Gamification reads
        .route("/profiles/:user_id", get(super::handlers::get_profile))
        .route("/rankings/:group_id", get(super::handlers::get_ranking))
        // Service-wide SSE event stream
        .route("/events", get(super::sse::service_events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Run the HTTP API server until the shutdown future resolves
pub async fn run(
    state: Arc<SharedState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    // Presence expiry sweeper: implicit leave for silent disconnects
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(sweep_state.config.sweep_interval_secs));
        loop {
            interval.tick().await;
            sweep_state.rooms.sweep().await;
        }
    });

    let bind_addr = state.config.bind_addr.clone();
    let app = router(state);

    info!("Starting HTTP server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
