//! Leveling resolver
//!
//! Recomputes a profile's level from its XP total after each grant. The
//! winning tier is the highest active threshold not exceeding the XP total
//! (descending scan, first match). Misconfigured tiers (thresholds not
//! strictly increasing) fail closed: the prior level is kept and an error is
//! logged rather than guessing among ties.

use koino_common::db::models::LevelTier;
use koino_common::events::KoinoEvent;
use koino_common::{Error, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::ScoringEngine;

/// Resolve the level for one profile, emitting `levelUp` on change
pub async fn resolve(
    engine: &ScoringEngine,
    user_id: &str,
    event_tx: &broadcast::Sender<KoinoEvent>,
) -> Result<()> {
    let Some(profile) = engine.profile(user_id).await? else {
        return Ok(());
    };

    let tiers = sqlx::query_as::<_, LevelTier>(
        "SELECT * FROM level_tiers WHERE active = 1 ORDER BY xp_threshold DESC",
    )
    .fetch_all(engine.pool())
    .await?;

    // Strictly increasing thresholds among active tiers; the descending
    // fetch makes equal neighbors adjacent
    for pair in tiers.windows(2) {
        if pair[0].xp_threshold <= pair[1].xp_threshold {
            error!(
                "Level tiers '{}' and '{}' violate strictly increasing thresholds; keeping prior level",
                pair[1].code, pair[0].code
            );
            return Err(Error::ConfigurationMissing(
                "level tier thresholds are not strictly increasing".to_string(),
            ));
        }
    }

    let Some(tier) = tiers.iter().find(|t| t.xp_threshold <= profile.xp_total) else {
        return Ok(());
    };

    if profile.current_level.as_deref() == Some(tier.code.as_str()) {
        return Ok(());
    }

    sqlx::query("UPDATE gamification_profiles SET current_level = ? WHERE user_id = ?")
        .bind(&tier.code)
        .bind(user_id)
        .execute(engine.pool())
        .await?;

    info!(
        "User {} leveled {} -> {} at {} xp",
        user_id,
        profile.current_level.as_deref().unwrap_or("none"),
        tier.code,
        profile.xp_total
    );
    let _ = event_tx.send(KoinoEvent::LevelUp {
        user_id: user_id.to_string(),
        previous_tier: profile.current_level.clone(),
        new_tier: tier.code.clone(),
        xp_total: profile.xp_total,
        timestamp: Utc::now(),
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::memory_pool;

    async fn engine_with_xp(xp: i64) -> ScoringEngine {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO gamification_profiles (user_id, xp_total, created_at) VALUES ('u1', ?, ?)",
        )
        .bind(xp)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
        ScoringEngine::new(pool)
    }

    #[tokio::test]
    async fn test_resolves_highest_qualifying_tier() {
        let engine = engine_with_xp(250).await;
        let (tx, mut rx) = broadcast::channel(8);

        resolve(&engine, "u1", &tx).await.unwrap();

        let profile = engine.profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.current_level.as_deref(), Some("tree"));
        match rx.recv().await.unwrap() {
            KoinoEvent::LevelUp { new_tier, previous_tier, .. } => {
                assert_eq!(new_tier, "tree");
                assert_eq!(previous_tier, None);
            }
            other => panic!("expected LevelUp, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_event_when_level_unchanged() {
        let engine = engine_with_xp(120).await;
        let (tx, mut rx) = broadcast::channel(8);

        resolve(&engine, "u1", &tx).await.unwrap();
        resolve(&engine, "u1", &tx).await.unwrap();

        assert!(rx.try_recv().is_ok());
        // Second resolve found the level already current
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_monotonic_as_xp_grows() {
        let engine = engine_with_xp(0).await;
        let (tx, _rx) = broadcast::channel(8);

        let mut seen = Vec::new();
        for xp in [0, 50, 100, 240, 250, 600] {
            sqlx::query("UPDATE gamification_profiles SET xp_total = ? WHERE user_id = 'u1'")
                .bind(xp)
                .execute(engine.pool())
                .await
                .unwrap();
            resolve(&engine, "u1", &tx).await.unwrap();
            let profile = engine.profile("u1").await.unwrap().unwrap();
            seen.push(profile.current_level.unwrap());
        }
        assert_eq!(seen, ["seed", "seed", "sprout", "sprout", "tree", "forest"]);
    }

    #[tokio::test]
    async fn test_duplicate_thresholds_fail_closed() {
        let engine = engine_with_xp(500).await;
        let (tx, mut rx) = broadcast::channel(8);

        // Break the configuration: two active tiers at the same threshold
        sqlx::query("UPDATE level_tiers SET xp_threshold = 250 WHERE code = 'forest'")
            .execute(engine.pool())
            .await
            .unwrap();

        let err = resolve(&engine, "u1", &tx).await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing(_)));

        // Prior level kept, nothing emitted
        let profile = engine.profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.current_level, None);
        assert!(rx.try_recv().is_err());
    }
}
