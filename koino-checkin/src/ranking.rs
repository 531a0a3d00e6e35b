//! Ranking aggregator
//!
//! Produces ordered per-period, per-group leaderboards. Per-period points are
//! aggregated from the ledger rather than read off the profile, so closed
//! periods rank just as correctly as the active one.

use koino_common::db::models::{DirectoryUser, Group};
use koino_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;

/// One leaderboard row (1-based position)
#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub position: usize,
    pub user_id: String,
    pub display_name: String,
    pub points: i64,
    pub xp_total: i64,
}

/// How a group decides who belongs to it
///
/// System groups apply a fixed predicate over the user directory; custom
/// groups enumerate explicit membership rows.
enum MembershipRule {
    System {
        role_filter: Option<String>,
        active_only: bool,
    },
    Custom {
        group_id: String,
    },
}

impl MembershipRule {
    fn for_group(group: &Group) -> Result<Self> {
        match group.kind.as_str() {
            "system" => Ok(Self::System {
                role_filter: group.role_filter.clone(),
                active_only: group.active_only,
            }),
            "custom" => Ok(Self::Custom {
                group_id: group.id.clone(),
            }),
            other => Err(Error::ConfigurationMissing(format!(
                "group '{}' has unknown kind '{}'",
                group.id, other
            ))),
        }
    }

    async fn resolve(&self, pool: &SqlitePool) -> Result<HashSet<String>> {
        let ids: Vec<String> = match self {
            Self::System { role_filter, active_only } => {
                let users = sqlx::query_as::<_, DirectoryUser>("SELECT * FROM users")
                    .fetch_all(pool)
                    .await?;
                users
                    .into_iter()
                    .filter(|user| {
                        if *active_only && !user.active {
                            return false;
                        }
                        match role_filter {
                            Some(role) => user.has_role(role),
                            None => true,
                        }
                    })
                    .map(|user| user.id)
                    .collect()
            }
            Self::Custom { group_id } => {
                sqlx::query_scalar("SELECT user_id FROM ranking_group_members WHERE group_id = ?")
                    .bind(group_id)
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(ids.into_iter().collect())
    }
}

/// Leaderboard for a group within a period, truncated to `limit`
///
/// Ordering is period points descending, ties broken by XP total descending,
/// then by profile creation time ascending — stable and deterministic across
/// repeated queries with no intervening writes.
pub async fn get_ranking(
    pool: &SqlitePool,
    group_id: &str,
    period_id: &str,
    limit: usize,
) -> Result<Vec<RankingEntry>> {
    let group = sqlx::query_as::<_, Group>("SELECT * FROM ranking_groups WHERE id = ?")
        .bind(group_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))?;

    let members = MembershipRule::for_group(&group)?.resolve(pool).await?;

    let rows = sqlx::query_as::<_, (String, i64, i64, DateTime<Utc>, Option<String>)>(
        r#"
        SELECT p.user_id,
               COALESCE(SUM(l.points), 0) AS period_points,
               p.xp_total,
               p.created_at,
               u.display_name
        FROM gamification_profiles p
        LEFT JOIN point_ledger l ON l.user_id = p.user_id AND l.period_id = ?
        LEFT JOIN users u ON u.id = p.user_id
        GROUP BY p.user_id
        "#,
    )
    .bind(period_id)
    .fetch_all(pool)
    .await?;

    let mut ranked: Vec<_> = rows
        .into_iter()
        .filter(|(user_id, ..)| members.contains(user_id))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1) // points desc
            .then(b.2.cmp(&a.2)) // xp desc
            .then(a.3.cmp(&b.3)) // created_at asc
    });

    Ok(ranked
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (user_id, points, xp_total, _, display_name))| RankingEntry {
            position: i + 1,
            display_name: display_name.unwrap_or_else(|| user_id.clone()),
            user_id,
            points,
            xp_total,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{memory_pool, seed_user};
    use chrono::TimeZone;

    async fn seed_profile(pool: &SqlitePool, user_id: &str, xp: i64, created_day: u32) {
        sqlx::query(
            "INSERT INTO gamification_profiles (user_id, xp_total, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(xp)
        .bind(Utc.with_ymd_and_hms(2026, 1, created_day, 0, 0, 0).unwrap())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_ledger(pool: &SqlitePool, user_id: &str, period: &str, points: i64, n: i64) {
        sqlx::query(
            r#"
            INSERT INTO point_ledger (id, user_id, rule_code, period_id, points, xp, source_id, source_type, created_at)
            VALUES (?, ?, 'attendance_on_time', ?, ?, ?, ?, 'attendance', ?)
            "#,
        )
        .bind(format!("{}-{}-{}", user_id, period, n))
        .bind(user_id)
        .bind(period)
        .bind(points)
        .bind(points)
        .bind(format!("src-{}-{}-{}", user_id, period, n))
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn ranking_pool() -> SqlitePool {
        let pool = memory_pool().await;
        seed_user(&pool, "u1", "Ana", "member", true).await;
        seed_user(&pool, "u2", "Beto", "member", true).await;
        seed_user(&pool, "u3", "Caro", "member", false).await;
        seed_user(&pool, "u4", "Dani", "leader", true).await;
        seed_profile(&pool, "u1", 50, 1).await;
        seed_profile(&pool, "u2", 80, 2).await;
        seed_profile(&pool, "u3", 10, 3).await;
        seed_profile(&pool, "u4", 99, 4).await;
        sqlx::query(
            "INSERT INTO ranking_groups (id, name, kind, role_filter, active_only) VALUES ('members', 'Members', 'system', 'member', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_orders_by_period_points() {
        let pool = ranking_pool().await;
        seed_ledger(&pool, "u1", "p1", 30, 0).await;
        seed_ledger(&pool, "u2", "p1", 10, 0).await;

        let ranking = get_ranking(&pool, "members", "p1", 10).await.unwrap();
        assert_eq!(ranking.len(), 2); // u3 inactive, u4 not a member; both u1/u2 scored
        assert_eq!(ranking[0].user_id, "u1");
        assert_eq!(ranking[0].position, 1);
        assert_eq!(ranking[0].points, 30);
        assert_eq!(ranking[1].user_id, "u2");
        assert_eq!(ranking[1].position, 2);
    }

    #[tokio::test]
    async fn test_system_group_excludes_inactive_and_other_roles() {
        let pool = ranking_pool().await;
        let ranking = get_ranking(&pool, "members", "p1", 10).await.unwrap();
        let ids: Vec<_> = ranking.iter().map(|e| e.user_id.as_str()).collect();
        assert!(ids.contains(&"u1"));
        assert!(ids.contains(&"u2"));
        assert!(!ids.contains(&"u3")); // inactive
        assert!(!ids.contains(&"u4")); // leader, not member
    }

    #[tokio::test]
    async fn test_tie_breaks_by_xp_then_creation() {
        let pool = ranking_pool().await;
        // Equal period points: u2 wins on higher xp
        seed_ledger(&pool, "u1", "p1", 20, 0).await;
        seed_ledger(&pool, "u2", "p1", 20, 0).await;

        let ranking = get_ranking(&pool, "members", "p1", 10).await.unwrap();
        assert_eq!(ranking[0].user_id, "u2");
        assert_eq!(ranking[1].user_id, "u1");
    }

    #[tokio::test]
    async fn test_custom_group_uses_member_rows() {
        let pool = ranking_pool().await;
        sqlx::query(
            "INSERT INTO ranking_groups (id, name, kind, active_only) VALUES ('cell-a', 'Cell A', 'custom', 1)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for user in ["u1", "u3"] {
            sqlx::query("INSERT INTO ranking_group_members (group_id, user_id) VALUES ('cell-a', ?)")
                .bind(user)
                .execute(&pool)
                .await
                .unwrap();
        }

        let ranking = get_ranking(&pool, "cell-a", "p1", 10).await.unwrap();
        let ids: Vec<_> = ranking.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, ["u1", "u3"]);
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let pool = ranking_pool().await;
        seed_ledger(&pool, "u1", "p1", 20, 0).await;
        seed_ledger(&pool, "u2", "p1", 20, 0).await;

        let first = get_ranking(&pool, "members", "p1", 10).await.unwrap();
        let second = get_ranking(&pool, "members", "p1", 10).await.unwrap();
        let positions = |r: &[RankingEntry]| {
            r.iter().map(|e| (e.position, e.user_id.clone())).collect::<Vec<_>>()
        };
        assert_eq!(positions(&first), positions(&second));
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let pool = ranking_pool().await;
        seed_ledger(&pool, "u1", "p1", 30, 0).await;
        seed_ledger(&pool, "u2", "p1", 10, 0).await;

        let ranking = get_ranking(&pool, "members", "p1", 1).await.unwrap();
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_closed_period_ranks_from_ledger() {
        let pool = ranking_pool().await;
        seed_ledger(&pool, "u1", "old", 40, 0).await;
        seed_ledger(&pool, "u2", "p1", 25, 0).await;

        // Querying the old period sees only its own ledger entries
        let ranking = get_ranking(&pool, "members", "old", 10).await.unwrap();
        assert_eq!(ranking[0].user_id, "u1");
        assert_eq!(ranking[0].points, 40);
        assert_eq!(ranking[1].points, 0);
    }

    #[tokio::test]
    async fn test_unknown_group_fails() {
        let pool = ranking_pool().await;
        let err = get_ranking(&pool, "nope", "p1", 10).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
