//! Gamification pipeline tests: grants through rankings
//!
//! Exercises the scoring engine, badge evaluator and ranking aggregator
//! together the way the ingestion path drives them.

use chrono::Utc;
use koino_checkin::ranking::get_ranking;
use koino_checkin::scoring::{badges, ScoringEngine};
use koino_common::db::{init_schema, seed_defaults};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    seed_defaults(&pool).await.unwrap();
    sqlx::query(
        r#"
        INSERT INTO ranking_periods (id, label, starts_at, ends_at, status)
        VALUES ('p1', 'Spring', ?, ?, 'active')
        "#,
    )
    .bind(Utc::now())
    .bind(Utc::now() + chrono::Duration::days(90))
    .execute(&pool)
    .await
    .unwrap();
    pool
}

async fn seed_user(pool: &SqlitePool, id: &str, name: &str) {
    sqlx::query("INSERT INTO users (id, display_name, roles, active) VALUES (?, ?, 'member', 1)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn grants_feed_the_leaderboard() {
    let pool = memory_pool().await;
    seed_user(&pool, "u1", "Ana").await;
    seed_user(&pool, "u2", "Beto").await;
    sqlx::query(
        "INSERT INTO ranking_groups (id, name, kind, role_filter, active_only) VALUES ('members', 'Members', 'system', 'member', 1)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let engine = ScoringEngine::new(pool.clone());
    engine
        .grant("u1", "attendance_early", "r1", "attendance", Some("p1"))
        .await
        .unwrap();
    engine
        .grant("u2", "attendance_on_time", "r2", "attendance", Some("p1"))
        .await
        .unwrap();
    engine
        .grant("u2", "participation", "r3", "participation", Some("p1"))
        .await
        .unwrap();

    let ranking = get_ranking(&pool, "members", "p1", 10).await.unwrap();
    assert_eq!(ranking.len(), 2);
    // u2: 10 + 8 = 18, u1: 12
    assert_eq!(ranking[0].user_id, "u2");
    assert_eq!(ranking[0].points, 18);
    assert_eq!(ranking[0].position, 1);
    assert_eq!(ranking[1].user_id, "u1");
    assert_eq!(ranking[1].points, 12);
    assert_eq!(ranking[1].display_name, "Ana");
}

#[tokio::test]
async fn badge_pipeline_is_idempotent_across_many_grants() {
    let pool = memory_pool().await;
    let engine = ScoringEngine::new(pool.clone());

    // Ten attendances, evaluating badges after every counter change the way
    // ingestion does
    for i in 0..10 {
        engine
            .grant("u1", "attendance_on_time", &format!("rec-{}", i), "attendance", Some("p1"))
            .await
            .unwrap();
        badges::evaluate(&engine, "u1").await.unwrap();
    }

    let unlocks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM badge_unlocks WHERE user_id = 'u1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(unlocks, 1);

    let profile = engine.profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.attendance_count, 10);
    // 10 check-ins plus one badge_small reward, exactly once
    assert_eq!(profile.points_total, 10 * 10 + 15);
}

#[tokio::test]
async fn ledger_sum_matches_profile_totals() {
    let pool = memory_pool().await;
    let engine = ScoringEngine::new(pool.clone());

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let rule = if i % 2 == 0 { "attendance_on_time" } else { "participation" };
            engine
                .grant("u1", rule, &format!("s-{}", i), "mixed", Some("p1"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let profile = engine.profile("u1").await.unwrap().unwrap();
    let (points, xp): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(points), 0), COALESCE(SUM(xp), 0) FROM point_ledger WHERE user_id = 'u1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(profile.points_total, points);
    assert_eq!(profile.xp_total, xp);
}
