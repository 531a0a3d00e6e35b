//! Streak tracker
//!
//! Weeks are computed against the group's anchor weekday in the configured
//! timezone, never the submitter's local clock. The caller converts the
//! attendance timestamp to an anchor-week start date at the boundary
//! (`koino_common::calendar`); this module only compares those dates.

use chrono::{Duration, NaiveDate};
use koino_common::Result;
use tracing::info;

use super::ScoringEngine;

/// Advance the streak for a confirmed attendance in the given anchor week
///
/// Exactly one week after the last counted week increments the streak; the
/// same week is a no-op (duplicate same-week attendance); anything else
/// resets to 1. Milestone bonuses go through the scoring engine keyed by
/// (user, milestone), so each milestone is awarded at most once per profile
/// even across resets.
pub async fn on_confirmed_attendance(
    engine: &ScoringEngine,
    user_id: &str,
    week_start: NaiveDate,
) -> Result<()> {
    let Some(profile) = engine.profile(user_id).await? else {
        return Ok(());
    };

    if profile.last_week_start == Some(week_start) {
        return Ok(());
    }

    let new_streak = if profile.last_week_start == Some(week_start - Duration::days(7)) {
        profile.current_streak + 1
    } else {
        1
    };
    let best_streak = profile.best_streak.max(new_streak);

    sqlx::query(
        r#"
        UPDATE gamification_profiles
        SET current_streak = ?, best_streak = ?, last_week_start = ?
        WHERE user_id = ?
        "#,
    )
    .bind(new_streak)
    .bind(best_streak)
    .bind(week_start)
    .bind(user_id)
    .execute(engine.pool())
    .await?;

    info!("User {} streak is {} (best {})", user_id, new_streak, best_streak);

    let milestone_rule: Option<String> =
        sqlx::query_scalar("SELECT rule_code FROM streak_milestones WHERE weeks = ?")
            .bind(new_streak)
            .fetch_optional(engine.pool())
            .await?;

    if let Some(rule_code) = milestone_rule {
        let period = engine.active_period_id().await?;
        let source_id = format!("{}:{}", user_id, new_streak);
        engine
            .grant(user_id, &rule_code, &source_id, "streak_milestone", period.as_deref())
            .await?;
    }

    Ok(())
}
