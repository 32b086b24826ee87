//! Award registry: which badges each user holds
//!
//! The `(user_id, badge_id)` primary key makes insertion idempotent.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::badges::BadgeSummary;
use super::current_timestamp;
use crate::error::{GamificationError, Result};

/// A held award, with the badge if it still exists in the catalog
#[derive(Debug, Clone, Serialize)]
pub struct AwardRow {
    pub user_id: i64,
    pub badge_id: i64,
    pub awarded_at: String,
    pub badge: Option<BadgeSummary>,
}

/// Whether the user already holds the badge
pub fn has_award(conn: &Connection, user_id: i64, badge_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM user_badges WHERE user_id = ? AND badge_id = ?)",
        params![user_id, badge_id],
        |row| row.get(0),
    )
    .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

/// Insert the award unless it is already held. Returns true if a row was added.
pub fn insert_award_if_absent(conn: &Connection, user_id: i64, badge_id: i64) -> Result<bool> {
    let changes = conn
        .execute(
            "INSERT OR IGNORE INTO user_badges (user_id, badge_id, awarded_at) VALUES (?, ?, ?)",
            params![user_id, badge_id, current_timestamp()],
        )
        .map_err(|e| GamificationError::Persistence(format!("Award insert failed: {}", e)))?;

    Ok(changes == 1)
}

/// All awards of a user, highest threshold first; orphans (deleted badges) last
pub fn list_awards_for_user(conn: &Connection, user_id: i64) -> Result<Vec<AwardRow>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT ub.user_id, ub.badge_id, ub.awarded_at, b.name, b.point_threshold
            FROM user_badges ub
            LEFT JOIN badges b ON b.id = ub.badge_id
            WHERE ub.user_id = ?
            ORDER BY b.point_threshold IS NULL, b.point_threshold DESC, ub.badge_id ASC
            "#,
        )
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            let badge_id: i64 = row.get("badge_id")?;
            let name: Option<String> = row.get("name")?;
            let threshold: Option<i64> = row.get("point_threshold")?;
            let badge = match (name, threshold) {
                (Some(name), Some(point_threshold)) => Some(BadgeSummary {
                    id: badge_id,
                    name,
                    point_threshold,
                }),
                _ => None,
            };
            Ok(AwardRow {
                user_id: row.get("user_id")?,
                badge_id,
                awarded_at: row.get("awarded_at")?,
                badge,
            })
        })
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GamificationError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}
