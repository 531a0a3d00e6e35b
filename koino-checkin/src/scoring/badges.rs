//! Badge evaluator
//!
//! Runs after every counter change and unlocks any badge whose condition the
//! profile now meets. Designed for redundant invocation: the reward grant is
//! idempotent by (user, badge) source and the unlock row is unique per
//! profile and badge, so repeat evaluation is a no-op once unlocked.

use chrono::Utc;
use koino_common::db::models::Badge;
use koino_common::Result;
use tracing::{info, warn};

use super::ScoringEngine;

/// Evaluate all active badges for a profile; returns newly unlocked codes
pub async fn evaluate(engine: &ScoringEngine, user_id: &str) -> Result<Vec<String>> {
    let Some(profile) = engine.profile(user_id).await? else {
        return Ok(Vec::new());
    };

    let badges = sqlx::query_as::<_, Badge>("SELECT * FROM badges WHERE active = 1")
        .fetch_all(engine.pool())
        .await?;

    let mut unlocked = Vec::new();
    for badge in badges {
        let counter = match badge.condition_type.as_str() {
            "attendance_count" => profile.attendance_count,
            "participation_count" => profile.participation_count,
            "best_streak" => profile.best_streak,
            "points_total" => profile.points_total,
            other => {
                warn!("Badge '{}' has unknown condition type '{}'", badge.code, other);
                continue;
            }
        };
        if counter < badge.condition_value {
            continue;
        }

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM badge_unlocks WHERE user_id = ? AND badge_code = ?)",
        )
        .bind(user_id)
        .bind(&badge.code)
        .fetch_one(engine.pool())
        .await?;
        if already {
            continue;
        }

        // Reward first: it is idempotent by source, so if the unlock insert
        // below is lost the next evaluation heals without double-granting
        let period = engine.active_period_id().await?;
        let source_id = format!("{}:{}", user_id, badge.code);
        engine
            .grant(user_id, &badge.reward_rule_code, &source_id, "badge", period.as_deref())
            .await?;

        let inserted = sqlx::query(
            "INSERT INTO badge_unlocks (user_id, badge_code, unlocked_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(&badge.code)
        .bind(Utc::now())
        .execute(engine.pool())
        .await?;

        if inserted.rows_affected() > 0 {
            info!("User {} unlocked badge '{}'", user_id, badge.code);
            unlocked.push(badge.code);
        }
    }

    Ok(unlocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{memory_pool, seed_active_period};

    async fn engine_with_counts(attendance: i64, participation: i64) -> ScoringEngine {
        let pool = memory_pool().await;
        seed_active_period(&pool).await;
        sqlx::query(
            r#"
            INSERT INTO gamification_profiles (user_id, attendance_count, participation_count, created_at)
            VALUES ('u1', ?, ?, ?)
            "#,
        )
        .bind(attendance)
        .bind(participation)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
        ScoringEngine::new(pool)
    }

    #[tokio::test]
    async fn test_below_threshold_unlocks_nothing() {
        let engine = engine_with_counts(9, 0).await;
        let unlocked = evaluate(&engine, "u1").await.unwrap();
        assert!(unlocked.is_empty());
    }

    #[tokio::test]
    async fn test_unlocks_and_rewards_at_threshold() {
        let engine = engine_with_counts(10, 0).await;
        let unlocked = evaluate(&engine, "u1").await.unwrap();
        assert_eq!(unlocked, vec!["attendance_10".to_string()]);

        let profile = engine.profile("u1").await.unwrap().unwrap();
        // badge_small reward
        assert_eq!(profile.points_total, 15);
    }

    #[tokio::test]
    async fn test_redundant_evaluation_grants_once() {
        let engine = engine_with_counts(10, 10).await;
        let first = evaluate(&engine, "u1").await.unwrap();
        assert_eq!(first.len(), 2);

        for _ in 0..5 {
            let again = evaluate(&engine, "u1").await.unwrap();
            assert!(again.is_empty());
        }

        let profile = engine.profile("u1").await.unwrap().unwrap();
        // attendance_10 + participation_10, each exactly once
        assert_eq!(profile.points_total, 30);
        let unlocks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM badge_unlocks WHERE user_id = 'u1'")
            .fetch_one(engine.pool())
            .await
            .unwrap();
        assert_eq!(unlocks, 2);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_noop() {
        let engine = engine_with_counts(10, 0).await;
        let unlocked = evaluate(&engine, "ghost").await.unwrap();
        assert!(unlocked.is_empty());
    }
}
