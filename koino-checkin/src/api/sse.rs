//! Server-Sent Events endpoints
//!
//! `/rooms/:code/events` is the presence room wire: connecting joins the
//! room (the first frame is the `estadoRoom` snapshot), disconnecting leaves
//! it. `/events` streams service-wide events such as level-ups.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use koino_common::events::KoinoEvent;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::api::server::AppContext;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    pub user_id: String,
    pub name: Option<String>,
}

/// Ends presence when the SSE connection goes away, however it goes away.
/// Disconnection never aborts in-flight writes; it only triggers leave.
struct LeaveGuard {
    state: Arc<SharedState>,
    window_code: String,
    user_id: String,
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let window_code = std::mem::take(&mut self.window_code);
        let user_id = std::mem::take(&mut self.user_id);
        tokio::spawn(async move {
            state.rooms.leave(&window_code, &user_id).await;
        });
    }
}

fn sse_frame(event: &KoinoEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_name()).data(json)),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

/// GET /rooms/:code/events - join the room and stream its events
pub async fn room_events(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
    Query(query): Query<JoinQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let display_name = query.name.clone().unwrap_or_else(|| query.user_id.clone());
    debug!("SSE client {} connecting to room {}", query.user_id, code);

    let join = ctx.state.rooms.join(&code, &query.user_id, &display_name).await;
    let state = ctx.state.clone();
    let user_id = query.user_id;

    let stream = async_stream::stream! {
        let _guard = LeaveGuard {
            state,
            window_code: code,
            user_id,
        };
        if let Some(frame) = sse_frame(&join.snapshot) {
            yield Ok::<Event, Infallible>(frame);
        }
        let mut events = BroadcastStream::new(join.rx);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(frame) = sse_frame(&event) {
                        yield Ok::<Event, Infallible>(frame);
                    }
                }
                Err(e) => {
                    // Lagged receiver; the next heartbeat resync covers the gap
                    warn!("Room SSE stream error: {:?}", e);
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// GET /events - service-wide SSE event stream
pub async fn service_events(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New service-wide SSE client connected");

    let rx = ctx.state.subscribe_events();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => sse_frame(&event).map(Ok),
            Err(e) => {
                warn!("Service SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
