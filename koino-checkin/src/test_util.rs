//! Shared helpers for unit tests

use chrono::{NaiveDate, Utc};
use koino_common::config::ServiceConfig;
use koino_common::db::{init_schema, seed_defaults};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::state::SharedState;

/// In-memory database with the full schema and seeded configuration.
/// Single connection so every task sees the same memory database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    seed_defaults(&pool).await.unwrap();
    pool
}

/// Shared state over an in-memory database, configured at UTC-5 with
/// Sunday meetings (the fixture timezone used across the tests)
pub async fn memory_state() -> SharedState {
    let pool = memory_pool().await;
    let config = ServiceConfig {
        utc_offset_minutes: -300,
        anchor_weekday: "sunday".to_string(),
        ..Default::default()
    };
    SharedState::new(pool, config).unwrap()
}

/// Insert the active ranking period used by grant tests; returns its id
pub async fn seed_active_period(pool: &SqlitePool) -> String {
    sqlx::query(
        r#"
        INSERT INTO ranking_periods (id, label, starts_at, ends_at, status)
        VALUES ('p1', 'Test period', ?, ?, 'active')
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(Utc::now())
    .bind(Utc::now() + chrono::Duration::days(90))
    .execute(pool)
    .await
    .unwrap();
    "p1".to_string()
}

pub async fn seed_user(pool: &SqlitePool, id: &str, name: &str, roles: &str, active: bool) {
    sqlx::query("INSERT INTO users (id, display_name, roles, active) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(roles)
        .bind(active)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_window(
    pool: &SqlitePool,
    code: &str,
    event_date: &str,
    open_minute: Option<i64>,
    late_margin_min: i64,
) {
    let date = NaiveDate::parse_from_str(event_date, "%Y-%m-%d").unwrap();
    sqlx::query(
        r#"
        INSERT INTO checkin_windows (code, event_id, event_date, open_minute, late_margin_min, created_at)
        VALUES (?, 'evt-1', ?, ?, ?, ?)
        "#,
    )
    .bind(code)
    .bind(date)
    .bind(open_minute)
    .bind(late_margin_min)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}
