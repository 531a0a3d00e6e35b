//! Koinonia check-in microservice
//!
//! Real-time attendance check-in rooms and the scoring/leveling engine they
//! drive: presence rooms over SSE, idempotent point grants, levels, streaks,
//! badges, and per-period leaderboards.

pub mod api;
pub mod checkin;
pub mod ranking;
pub mod room;
pub mod scoring;
pub mod state;

#[cfg(test)]
pub(crate) mod test_util;
