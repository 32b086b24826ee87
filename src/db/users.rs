//! User directory and point ledger
//!
//! `total_points` is only ever changed through [`increment_points`], a single
//! relative UPDATE evaluated by SQLite. Concurrent accruals for the same user
//! therefore compose without lost updates.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::badges::BadgeSummary;
use super::{current_timestamp, Page, PageRequest};
use crate::error::{is_unique_violation, GamificationError, Result};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Therapist,
    Patient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Therapist => "therapist",
            Role::Patient => "patient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "therapist" => Some(Role::Therapist),
            "patient" => Some(Role::Patient),
            _ => None,
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Role::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown role: {}", s).into()))
    }
}

/// User row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub total_points: i64,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            full_name: row.get("full_name")?,
            role: row.get("role")?,
            total_points: row.get("total_points")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for registering a user in the directory
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

/// Leaderboard line: a patient, their total and highest held badge
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub full_name: String,
    pub total_points: i64,
    pub highest_badge: Option<BadgeSummary>,
}

/// Register a user with a zero point total
pub fn create_user(conn: &Connection, input: &CreateUserInput) -> Result<UserRow> {
    conn.execute(
        "INSERT INTO users (username, full_name, role, total_points, created_at)
         VALUES (?, ?, ?, 0, ?)",
        params![input.username, input.full_name, input.role, current_timestamp()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            GamificationError::Conflict(format!("username '{}' already exists", input.username))
        } else {
            GamificationError::Persistence(format!("Insert failed: {}", e))
        }
    })?;

    let id = conn.last_insert_rowid();
    get_user(conn, id)?
        .ok_or_else(|| GamificationError::Persistence("User not found after insert".to_string()))
}

/// Get user by ID
pub fn get_user(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row("SELECT * FROM users WHERE id = ?", params![id], UserRow::from_row)
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

/// Atomically add `delta` to a user's total and return the new total.
///
/// Returns `None` when the user does not exist. A total that would exceed
/// `i64::MAX` is rejected as a validation failure and left unchanged.
pub fn increment_points(conn: &Connection, id: i64, delta: i64) -> Result<Option<i64>> {
    debug!(user_id = id, delta, "Incrementing point total");

    // SQLite silently promotes an overflowing sum to REAL, so guard in the WHERE
    let updated: Option<i64> = conn
        .query_row(
            r#"
            UPDATE users SET total_points = total_points + ?1
            WHERE id = ?2 AND total_points <= ?3
            RETURNING total_points
            "#,
            params![delta, id, i64::MAX.saturating_sub(delta)],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Point increment failed: {}", e)))?;

    if updated.is_none() && get_user(conn, id)?.is_some() {
        return Err(GamificationError::Validation(format!(
            "adding {} points would overflow the total of user {}",
            delta, id
        )));
    }
    Ok(updated)
}

/// Patients ordered by total points, highest first
pub fn leaderboard(conn: &Connection, page: PageRequest) -> Result<Page<LeaderboardEntry>> {
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM users WHERE role = 'patient'", [], |row| row.get(0))
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?;

    // Highest badge per user: orphan awards (deleted badge) drop out of the join
    let mut stmt = conn
        .prepare(
            r#"
            SELECT u.id, u.username, u.full_name, u.total_points,
                   b.id AS badge_id, b.name AS badge_name, b.point_threshold
            FROM users u
            LEFT JOIN badges b ON b.id = (
                SELECT b2.id FROM user_badges ub
                INNER JOIN badges b2 ON b2.id = ub.badge_id
                WHERE ub.user_id = u.id
                ORDER BY b2.point_threshold DESC, b2.id DESC
                LIMIT 1
            )
            WHERE u.role = 'patient'
            ORDER BY u.total_points DESC, u.id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    let entries = stmt
        .query_map(params![page.limit(), page.offset()], |row| {
            let badge_id: Option<i64> = row.get("badge_id")?;
            let highest_badge = match badge_id {
                Some(id) => Some(BadgeSummary {
                    id,
                    name: row.get("badge_name")?,
                    point_threshold: row.get("point_threshold")?,
                }),
                None => None,
            };
            Ok(LeaderboardEntry {
                user_id: row.get("id")?,
                username: row.get("username")?,
                full_name: row.get("full_name")?,
                total_points: row.get("total_points")?,
                highest_badge,
            })
        })
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GamificationError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(Page::new(entries, total as u64, page))
}
