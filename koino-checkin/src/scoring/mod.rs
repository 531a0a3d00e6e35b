//! Scoring engine
//!
//! Converts classified events into idempotent point/XP grants against
//! gamification profiles. Every grant is recorded as a ledger entry whose
//! (source_id, source_type) pair is unique at the storage layer, so a
//! triggering event is rewarded at most once no matter how often or how
//! concurrently it is submitted.
//!
//! Per-profile linearizability comes from atomic in-place increments
//! (`SET points_total = points_total + ?`) inside the grant transaction;
//! grants for distinct profiles share no lock.

pub mod badges;
pub mod levels;
pub mod streaks;

use chrono::Utc;
use koino_common::db::models::{GamificationProfile, PointLedgerEntry, ScoringRule};
use koino_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded backoff for storage-level write conflicts
const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE_MS: u64 = 25;

/// Idempotent point/XP grant engine
#[derive(Clone)]
pub struct ScoringEngine {
    pool: SqlitePool,
}

impl ScoringEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Grant points/XP for one source event
    ///
    /// Returns the existing ledger entry unchanged when the (source_id,
    /// source_type) pair was already rewarded. A missing rule fails with
    /// `ConfigurationMissing` and leaves the profile untouched. Storage
    /// conflicts retry with bounded backoff before surfacing as
    /// `ConcurrentUpdateConflict`.
    pub async fn grant(
        &self,
        user_id: &str,
        rule_code: &str,
        source_id: &str,
        source_type: &str,
        period_id: Option<&str>,
    ) -> Result<PointLedgerEntry> {
        if let Some(existing) = self.find_by_source(source_id, source_type).await? {
            debug!("Grant for ({}, {}) already exists, returning it", source_id, source_type);
            return Ok(existing);
        }

        let rule = self.rule(rule_code).await?;
        let active_period = self.active_period_id().await?;
        let counts_toward_period =
            matches!((active_period.as_deref(), period_id), (Some(a), Some(p)) if a == p);

        self.ensure_profile(user_id).await?;

        let mut attempt = 0;
        loop {
            match self
                .try_grant(user_id, &rule, period_id, source_id, source_type, counts_toward_period)
                .await
            {
                Ok(entry) => return Ok(entry),
                Err(e) if is_transient(&e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(Error::ConcurrentUpdateConflict(format!(
                            "grant for ({}, {}) after {} attempts: {}",
                            source_id, source_type, attempt, e
                        )));
                    }
                    let backoff = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                    warn!("Transient conflict granting ({}, {}), retrying in {:?}", source_id, source_type, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One grant attempt: ledger insert plus profile increments in a single
    /// transaction
    async fn try_grant(
        &self,
        user_id: &str,
        rule: &ScoringRule,
        period_id: Option<&str>,
        source_id: &str,
        source_type: &str,
        counts_toward_period: bool,
    ) -> Result<PointLedgerEntry> {
        let mut tx = self.pool.begin().await?;

        let entry_id = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            r#"
            INSERT INTO point_ledger (id, user_id, rule_code, period_id, points, xp, source_id, source_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, source_type) DO NOTHING
            "#,
        )
        .bind(&entry_id)
        .bind(user_id)
        .bind(&rule.code)
        .bind(period_id)
        .bind(rule.points)
        .bind(rule.xp)
        .bind(source_id)
        .bind(source_type)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // A concurrent writer granted this source first; hand back its entry
            tx.rollback().await?;
            return self
                .find_by_source(source_id, source_type)
                .await?
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "ledger entry for ({}, {}) vanished after conflict",
                        source_id, source_type
                    ))
                });
        }

        let period_points = if counts_toward_period { rule.points } else { 0 };
        sqlx::query(
            r#"
            UPDATE gamification_profiles
            SET points_total = points_total + ?,
                points_period = points_period + ?,
                xp_total = xp_total + ?
            WHERE user_id = ?
            "#,
        )
        .bind(rule.points)
        .bind(period_points)
        .bind(rule.xp)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        match rule.category.as_str() {
            "attendance" => {
                sqlx::query(
                    "UPDATE gamification_profiles SET attendance_count = attendance_count + 1 WHERE user_id = ?",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            "participation" => {
                sqlx::query(
                    "UPDATE gamification_profiles SET participation_count = participation_count + 1 WHERE user_id = ?",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            _ => {}
        }

        tx.commit().await?;
        debug!(
            "Granted {} pts / {} xp to {} for ({}, {})",
            rule.points, rule.xp, user_id, source_id, source_type
        );

        self.find_by_source(source_id, source_type)
            .await?
            .ok_or_else(|| Error::Internal(format!("ledger entry {} missing after commit", entry_id)))
    }

    /// Look up the ledger entry for a source event, if any
    pub async fn find_by_source(
        &self,
        source_id: &str,
        source_type: &str,
    ) -> Result<Option<PointLedgerEntry>> {
        let entry = sqlx::query_as::<_, PointLedgerEntry>(
            "SELECT * FROM point_ledger WHERE source_id = ? AND source_type = ?",
        )
        .bind(source_id)
        .bind(source_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Scoring rule lookup; absence is a configuration failure, never a
    /// silent zero-value grant
    async fn rule(&self, code: &str) -> Result<ScoringRule> {
        sqlx::query_as::<_, ScoringRule>("SELECT * FROM scoring_rules WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::ConfigurationMissing(format!("scoring rule '{}'", code)))
    }

    /// Id of the currently active ranking period, if one exists
    pub async fn active_period_id(&self) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM ranking_periods WHERE status = 'active' ORDER BY starts_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Create the profile row on first contact (lazy creation)
    async fn ensure_profile(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO gamification_profiles (user_id, created_at) VALUES (?, ?) ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Profile snapshot
    pub async fn profile(&self, user_id: &str) -> Result<Option<GamificationProfile>> {
        let profile = sqlx::query_as::<_, GamificationProfile>(
            "SELECT * FROM gamification_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }
}

/// SQLite write contention shows up as a database-level busy/locked error
fn is_transient(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db)) => {
            let msg = db.message();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}
