//! HTTP request handlers
//!
//! REST endpoints for check-in submission, attendance confirmation, presence
//! housekeeping, profiles and rankings.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use koino_common::db::models::{CheckinWindow, GamificationProfile};
use koino_common::events::{AttendanceView, KoinoEvent};
use koino_common::Error;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::server::AppContext;
use crate::checkin;
use crate::ranking::{self, RankingEntry};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub window_code: String,
    pub subject_user_id: Option<String>,
    /// Defaults to the server clock when omitted (normal scan path)
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub created: bool,
    pub record: AttendanceView,
}

#[derive(Debug, Deserialize)]
pub struct ManualEntryRequest {
    pub window_code: String,
    pub subject_user_id: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWindowRequest {
    pub code: String,
    pub event_id: String,
    pub event_date: NaiveDate,
    pub open_minute: Option<i64>,
    pub late_margin_min: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub user_id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaveRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub profile: GamificationProfile,
    pub badges: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RankingQuery {
    pub period_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RankingResponse {
    pub group_id: String,
    pub period_id: String,
    pub entries: Vec<RankingEntry>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// Wraps the common error for axum response conversion
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::WindowNotFound(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::ConfigurationMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ConcurrentUpdateConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => {
                error!("Internal error: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(StatusResponse {
                status: format!("error: {}", self.0),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "checkin".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /checkin - Submit a scan against a window
pub async fn submit_checkin(
    State(ctx): State<AppContext>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let timestamp = req.timestamp.unwrap_or_else(Utc::now);
    let outcome = checkin::submit(
        &ctx.state,
        &req.window_code,
        req.subject_user_id.as_deref(),
        timestamp,
    )
    .await?;
    Ok(Json(SubmitResponse {
        created: outcome.created,
        record: outcome.view,
    }))
}

/// POST /attendance/manual - Leader-entered attendance, pending until confirmed
pub async fn manual_entry(
    State(ctx): State<AppContext>,
    Json(req): Json<ManualEntryRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let timestamp = req.timestamp.unwrap_or_else(Utc::now);
    let outcome =
        checkin::record_manual(&ctx.state, &req.window_code, &req.subject_user_id, timestamp).await?;
    Ok(Json(SubmitResponse {
        created: outcome.created,
        record: outcome.view,
    }))
}

/// POST /attendance/:id/confirm - Confirm a pending record and score it
pub async fn confirm_attendance(
    State(ctx): State<AppContext>,
    Path(record_id): Path<String>,
) -> Result<Json<AttendanceView>, ApiError> {
    let view = checkin::confirm(&ctx.state, &record_id).await?;
    Ok(Json(view))
}

/// POST /windows - Publish a new check-in window
pub async fn create_window(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateWindowRequest>,
) -> Result<Json<CheckinWindow>, ApiError> {
    let window = checkin::create_window(
        &ctx.state,
        &req.code,
        &req.event_id,
        req.event_date,
        req.open_minute,
        req.late_margin_min,
    )
    .await?;
    Ok(Json(window))
}

/// GET /rooms/:code/presence - Current presence snapshot
pub async fn room_presence(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
) -> Json<KoinoEvent> {
    Json(ctx.state.rooms.snapshot(&code).await)
}

/// POST /rooms/:code/heartbeat - Refresh liveness, get a full resync snapshot
pub async fn room_heartbeat(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<KoinoEvent> {
    let name = req.display_name.unwrap_or_else(|| req.user_id.clone());
    Json(ctx.state.rooms.heartbeat(&code, &req.user_id, &name).await)
}

/// POST /rooms/:code/leave - Explicit leave
pub async fn room_leave(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
    Json(req): Json<LeaveRequest>,
) -> Json<StatusResponse> {
    ctx.state.rooms.leave(&code, &req.user_id).await;
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

/// GET /profiles/:user_id - Gamification profile with unlocked badges
pub async fn get_profile(
    State(ctx): State<AppContext>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = ctx
        .state
        .scoring
        .profile(&user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("profile {}", user_id)))?;
    let badges: Vec<String> =
        sqlx::query_scalar("SELECT badge_code FROM badge_unlocks WHERE user_id = ? ORDER BY unlocked_at")
            .bind(&user_id)
            .fetch_all(&ctx.state.db)
            .await
            .map_err(Error::from)?;
    Ok(Json(ProfileResponse { profile, badges }))
}

/// GET /rankings/:group_id - Leaderboard for a group and period
///
/// The period defaults to the currently active one.
pub async fn get_ranking(
    State(ctx): State<AppContext>,
    Path(group_id): Path<String>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<RankingResponse>, ApiError> {
    let period_id = match query.period_id {
        Some(id) => id,
        None => ctx
            .state
            .scoring
            .active_period_id()
            .await?
            .ok_or_else(|| Error::InvalidInput("no active ranking period".to_string()))?,
    };
    let limit = query.limit.unwrap_or(10);
    let entries = ranking::get_ranking(&ctx.state.db, &group_id, &period_id, limit).await?;
    Ok(Json(RankingResponse {
        group_id,
        period_id,
        entries,
    }))
}
