//! Event types for the Koinonia real-time layer
//!
//! One central tagged enum covers every event crossing the SSE boundary, so
//! payloads are validated at the system edge instead of being duck-typed maps.
//! The wire tags (`estadoRoom`, `usuarioEntro`, ...) are the contract names
//! consumed by existing clients and must not change.

use crate::db::models::{Classification, RecordStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One present member of a check-in room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub user_id: String,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// Attendance record as broadcast to rooms: always fully scored
///
/// Clients never see a record with stale or missing point totals; the
/// ingestion path only hands records here after the scoring engine has
/// committed. Totals are None for anonymous scans, which grant nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceView {
    pub id: String,
    pub window_code: String,
    pub subject_user_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub classification: Classification,
    pub status: RecordStatus,
    pub points_granted: Option<i64>,
    pub xp_granted: Option<i64>,
    pub points_total: Option<i64>,
    pub xp_total: Option<i64>,
}

/// Koinonia real-time events
///
/// Broadcast per room (presence and attendance) or service-wide (level-ups),
/// and serialized for SSE transmission with the tag as the event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KoinoEvent {
    /// Full membership snapshot, sent to a client when it joins a room
    #[serde(rename = "estadoRoom")]
    RoomState {
        window_code: String,
        members: Vec<PresenceInfo>,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A user joined the room (sent to the rest of the room)
    #[serde(rename = "usuarioEntro")]
    UserJoined {
        window_code: String,
        user: PresenceInfo,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A user left the room, explicitly or via heartbeat expiry
    #[serde(rename = "usuarioSalio")]
    UserLeft {
        window_code: String,
        user_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A newly confirmed, fully-scored attendance record
    #[serde(rename = "nuevaAsistencia")]
    NewAttendance {
        window_code: String,
        record: AttendanceView,
        timestamp: DateTime<Utc>,
    },

    /// An existing record mutated after scoring (e.g. pending -> confirmed)
    #[serde(rename = "asistenciaActualizada")]
    AttendanceUpdated {
        window_code: String,
        record: AttendanceView,
        timestamp: DateTime<Utc>,
    },

    /// A profile crossed a tier threshold (consumed externally for
    /// celebratory UI)
    #[serde(rename = "levelUp")]
    LevelUp {
        user_id: String,
        previous_tier: Option<String>,
        new_tier: String,
        xp_total: i64,
        timestamp: DateTime<Utc>,
    },
}

impl KoinoEvent {
    /// SSE event name for this variant (matches the serde tag)
    pub fn event_name(&self) -> &'static str {
        match self {
            KoinoEvent::RoomState { .. } => "estadoRoom",
            KoinoEvent::UserJoined { .. } => "usuarioEntro",
            KoinoEvent::UserLeft { .. } => "usuarioSalio",
            KoinoEvent::NewAttendance { .. } => "nuevaAsistencia",
            KoinoEvent::AttendanceUpdated { .. } => "asistenciaActualizada",
            KoinoEvent::LevelUp { .. } => "levelUp",
        }
    }
}
