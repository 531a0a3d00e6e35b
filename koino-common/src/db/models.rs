//! Database models
//!
//! Row types shared between the check-in service and its tests. Columns follow
//! the workspace conventions: TEXT uuid keys, RFC 3339 timestamp text, integer
//! booleans.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Timing classification of a check-in against its window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Classification {
    Early,
    OnTime,
    Late,
}

/// Lifecycle status of an attendance record
///
/// Scans against a timed window confirm immediately; manual entries stay
/// pending until a leader confirms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Confirmed,
}

/// Ranking period lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PeriodStatus {
    Active,
    Paused,
    Closed,
}

/// A single scannable check-in opportunity. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CheckinWindow {
    pub code: String,
    pub event_id: String,
    /// Local calendar date the window belongs to; submissions after this
    /// date see the window as expired.
    pub event_date: NaiveDate,
    /// Minute of the local day the window opens. None for manual-entry
    /// windows, which classify every record as on-time.
    pub open_minute: Option<i64>,
    pub late_margin_min: i64,
    pub created_at: DateTime<Utc>,
}

/// One person's attendance at one window
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub id: String,
    pub window_code: String,
    pub subject_user_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub classification: Classification,
    pub status: RecordStatus,
}

/// Rule -> points/XP mapping (read-only configuration)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoringRule {
    pub code: String,
    pub category: String,
    pub points: i64,
    pub xp: i64,
}

/// Per-user aggregate gamification state. Created lazily on first grant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GamificationProfile {
    pub user_id: String,
    pub points_total: i64,
    pub points_period: i64,
    pub xp_total: i64,
    pub current_level: Option<String>,
    pub current_streak: i64,
    pub best_streak: i64,
    /// Anchor-week start of the last attendance counted toward the streak
    pub last_week_start: Option<NaiveDate>,
    pub attendance_count: i64,
    pub participation_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one point/XP grant, uniquely tied to its source event
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PointLedgerEntry {
    pub id: String,
    pub user_id: String,
    pub rule_code: String,
    pub period_id: Option<String>,
    pub points: i64,
    pub xp: i64,
    pub source_id: String,
    pub source_type: String,
    pub created_at: DateTime<Utc>,
}

/// Level definition with an XP threshold. Active tiers must have strictly
/// increasing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LevelTier {
    pub code: String,
    pub label: String,
    pub icon: Option<String>,
    pub xp_threshold: i64,
    pub active: bool,
}

/// One-time unlockable reward tied to a profile counter threshold
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Badge {
    pub code: String,
    pub label: String,
    /// Which profile counter the condition reads: attendance_count,
    /// participation_count, best_streak or points_total
    pub condition_type: String,
    pub condition_value: i64,
    pub reward_rule_code: String,
    pub active: bool,
}

/// Bounded time range scoping period points and rankings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RankingPeriod {
    pub id: String,
    pub label: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: PeriodStatus,
}

/// Leaderboard group. System groups filter the user directory by role and
/// activity; custom groups enumerate explicit member rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub role_filter: Option<String>,
    pub active_only: bool,
}

/// Read-only row from the external user directory
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectoryUser {
    pub id: String,
    pub display_name: String,
    /// Comma-separated role names
    pub roles: String,
    pub active: bool,
}

impl DirectoryUser {
    /// Whether this user carries the given role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.split(',').any(|r| r.trim() == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_role() {
        let user = DirectoryUser {
            id: "u1".to_string(),
            display_name: "Ana".to_string(),
            roles: "member, leader".to_string(),
            active: true,
        };
        assert!(user.has_role("member"));
        assert!(user.has_role("leader"));
        assert!(!user.has_role("admin"));
    }

    #[test]
    fn test_classification_serde_names() {
        let json = serde_json::to_string(&Classification::OnTime).unwrap();
        assert_eq!(json, "\"on_time\"");
        let back: Classification = serde_json::from_str("\"late\"").unwrap();
        assert_eq!(back, Classification::Late);
    }
}
