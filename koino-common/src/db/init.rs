//! Database initialization
//!
//! Creates the SQLite database on first run, applies the schema, and seeds
//! the read-only configuration tables (scoring rules, level tiers, badges,
//! streak milestones) with defaults when they are empty.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Short lock waits; contention is handled by retry with backoff in the
    // scoring engine
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_schema(&pool).await?;
    seed_defaults(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent - safe to call multiple times)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_users_table(pool).await?;
    create_checkin_windows_table(pool).await?;
    create_attendance_records_table(pool).await?;
    create_scoring_rules_table(pool).await?;
    create_gamification_profiles_table(pool).await?;
    create_point_ledger_table(pool).await?;
    create_level_tiers_table(pool).await?;
    create_badges_table(pool).await?;
    create_badge_unlocks_table(pool).await?;
    create_ranking_periods_table(pool).await?;
    create_ranking_groups_tables(pool).await?;
    create_streak_milestones_table(pool).await?;
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    // Read-only mirror of the external user directory
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            roles TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_checkin_windows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkin_windows (
            code TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            event_date TEXT NOT NULL,
            open_minute INTEGER,
            late_margin_min INTEGER NOT NULL DEFAULT 30,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_attendance_records_table(pool: &SqlitePool) -> Result<()> {
    // UNIQUE(window_code, subject_user_id) deduplicates concurrent duplicate
    // submissions at the storage layer. NULL subjects (anonymous scans) are
    // distinct per SQLite semantics and never deduplicated.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            id TEXT PRIMARY KEY,
            window_code TEXT NOT NULL REFERENCES checkin_windows(code),
            subject_user_id TEXT,
            recorded_at TEXT NOT NULL,
            classification TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(window_code, subject_user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_scoring_rules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scoring_rules (
            code TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            points INTEGER NOT NULL,
            xp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_gamification_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gamification_profiles (
            user_id TEXT PRIMARY KEY,
            points_total INTEGER NOT NULL DEFAULT 0,
            points_period INTEGER NOT NULL DEFAULT 0,
            xp_total INTEGER NOT NULL DEFAULT 0,
            current_level TEXT,
            current_streak INTEGER NOT NULL DEFAULT 0,
            best_streak INTEGER NOT NULL DEFAULT 0,
            last_week_start TEXT,
            attendance_count INTEGER NOT NULL DEFAULT 0,
            participation_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_point_ledger_table(pool: &SqlitePool) -> Result<()> {
    // UNIQUE(source_id, source_type) guarantees at-most-one grant per
    // triggering event, including across engine retries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS point_ledger (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            rule_code TEXT NOT NULL REFERENCES scoring_rules(code),
            period_id TEXT,
            points INTEGER NOT NULL,
            xp INTEGER NOT NULL,
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(source_id, source_type)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_point_ledger_user_period ON point_ledger(user_id, period_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_level_tiers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS level_tiers (
            code TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            icon TEXT,
            xp_threshold INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_badges_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS badges (
            code TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            condition_type TEXT NOT NULL,
            condition_value INTEGER NOT NULL,
            reward_rule_code TEXT NOT NULL REFERENCES scoring_rules(code),
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_badge_unlocks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS badge_unlocks (
            user_id TEXT NOT NULL,
            badge_code TEXT NOT NULL REFERENCES badges(code),
            unlocked_at TEXT NOT NULL,
            PRIMARY KEY (user_id, badge_code)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_ranking_periods_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ranking_periods (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_ranking_groups_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ranking_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            role_filter TEXT,
            active_only INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ranking_group_members (
            group_id TEXT NOT NULL REFERENCES ranking_groups(id),
            user_id TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_streak_milestones_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS streak_milestones (
            weeks INTEGER PRIMARY KEY,
            rule_code TEXT NOT NULL REFERENCES scoring_rules(code)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Seed the read-only configuration tables with defaults when empty
pub async fn seed_defaults(pool: &SqlitePool) -> Result<()> {
    seed_scoring_rules(pool).await?;
    seed_level_tiers(pool).await?;
    seed_badges(pool).await?;
    seed_streak_milestones(pool).await?;
    Ok(())
}

async fn seed_scoring_rules(pool: &SqlitePool) -> Result<()> {
    let rules = vec![
        // (code, category, points, xp)
        ("attendance_early", "attendance", 12, 12),
        ("attendance_on_time", "attendance", 10, 10),
        ("attendance_late", "attendance", 5, 5),
        ("participation", "participation", 8, 8),
        ("streak_4_weeks", "bonus", 20, 20),
        ("streak_8_weeks", "bonus", 40, 40),
        ("streak_12_weeks", "bonus", 60, 60),
        ("badge_small", "bonus", 15, 15),
        ("badge_medium", "bonus", 30, 30),
        ("badge_large", "bonus", 50, 50),
    ];

    for (code, category, points, xp) in rules {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM scoring_rules WHERE code = ?)")
                .bind(code)
                .fetch_one(pool)
                .await?;
        if !exists {
            sqlx::query("INSERT INTO scoring_rules (code, category, points, xp) VALUES (?, ?, ?, ?)")
                .bind(code)
                .bind(category)
                .bind(points)
                .bind(xp)
                .execute(pool)
                .await?;
            info!("Seeded scoring rule '{}' ({} pts / {} xp)", code, points, xp);
        }
    }

    Ok(())
}

async fn seed_level_tiers(pool: &SqlitePool) -> Result<()> {
    let tiers = vec![
        // (code, label, icon, xp_threshold)
        ("seed", "Seed", "🌱", 0),
        ("sprout", "Sprout", "🌿", 100),
        ("tree", "Tree", "🌳", 250),
        ("forest", "Forest", "🌲", 500),
    ];

    for (code, label, icon, threshold) in tiers {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM level_tiers WHERE code = ?)")
                .bind(code)
                .fetch_one(pool)
                .await?;
        if !exists {
            sqlx::query(
                "INSERT INTO level_tiers (code, label, icon, xp_threshold, active) VALUES (?, ?, ?, ?, 1)",
            )
            .bind(code)
            .bind(label)
            .bind(icon)
            .bind(threshold)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

async fn seed_badges(pool: &SqlitePool) -> Result<()> {
    let badges = vec![
        // (code, label, condition_type, condition_value, reward_rule_code)
        ("attendance_10", "10 check-ins", "attendance_count", 10, "badge_small"),
        ("attendance_25", "25 check-ins", "attendance_count", 25, "badge_medium"),
        ("participation_10", "10 participations", "participation_count", 10, "badge_small"),
        ("streak_12", "12-week streak", "best_streak", 12, "badge_large"),
    ];

    for (code, label, cond_type, cond_value, reward) in badges {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM badges WHERE code = ?)")
            .bind(code)
            .fetch_one(pool)
            .await?;
        if !exists {
            sqlx::query(
                r#"
                INSERT INTO badges (code, label, condition_type, condition_value, reward_rule_code, active)
                VALUES (?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(code)
            .bind(label)
            .bind(cond_type)
            .bind(cond_value)
            .bind(reward)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

async fn seed_streak_milestones(pool: &SqlitePool) -> Result<()> {
    let milestones = vec![
        (4i64, "streak_4_weeks"),
        (8, "streak_8_weeks"),
        (12, "streak_12_weeks"),
    ];

    for (weeks, rule_code) in milestones {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM streak_milestones WHERE weeks = ?)")
                .bind(weeks)
                .fetch_one(pool)
                .await?;
        if !exists {
            sqlx::query("INSERT INTO streak_milestones (weeks, rule_code) VALUES (?, ?)")
                .bind(weeks)
                .bind(rule_code)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
