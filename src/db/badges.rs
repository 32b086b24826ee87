//! Badge catalog CRUD operations
//!
//! Both `name` and `point_threshold` are UNIQUE, so the threshold ladder has a
//! strict order. Every ladder query still sorts by `(point_threshold, id)`.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::current_timestamp;
use crate::error::{is_unique_violation, GamificationError, Result};

/// Badge row from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeRow {
    pub id: i64,
    pub name: String,
    pub point_threshold: i64,
    pub description: Option<String>,
    /// Blob name issued by the media storage service
    pub image_reference: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BadgeRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            point_threshold: row.get("point_threshold")?,
            description: row.get("description")?,
            image_reference: row.get("image_reference")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn summary(&self) -> BadgeSummary {
        BadgeSummary {
            id: self.id,
            name: self.name.clone(),
            point_threshold: self.point_threshold,
        }
    }
}

/// Compact badge reference returned with accrual results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeSummary {
    pub id: i64,
    pub name: String,
    pub point_threshold: i64,
}

/// Input for creating a badge
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBadgeInput {
    pub name: String,
    pub point_threshold: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_reference: Option<String>,
}

/// Partial badge update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBadgeInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub point_threshold: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_reference: Option<String>,
    /// Remove the current image without replacing it
    #[serde(default)]
    pub clear_image: bool,
}

fn map_write_error(e: rusqlite::Error) -> GamificationError {
    if is_unique_violation(&e) {
        let msg = e.to_string();
        if msg.contains("badges.point_threshold") {
            GamificationError::Conflict("point threshold is already used by another badge".into())
        } else {
            GamificationError::Conflict("badge name already exists".into())
        }
    } else {
        GamificationError::Persistence(format!("Badge write failed: {}", e))
    }
}

/// Get badge by ID
pub fn get_badge(conn: &Connection, id: i64) -> Result<Option<BadgeRow>> {
    conn.query_row("SELECT * FROM badges WHERE id = ?", params![id], BadgeRow::from_row)
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

fn find_id_by(conn: &Connection, sql: &str, value: &dyn rusqlite::ToSql) -> Result<Option<i64>> {
    conn.query_row(sql, params![value], |row| row.get(0))
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

/// Reject a name or threshold already held by a badge other than `except_id`
fn check_unique(
    conn: &Connection,
    name: Option<&str>,
    point_threshold: Option<i64>,
    except_id: Option<i64>,
) -> Result<()> {
    if let Some(name) = name {
        let holder = find_id_by(conn, "SELECT id FROM badges WHERE name = ?", &name)?;
        if holder.is_some() && holder != except_id {
            return Err(GamificationError::Conflict("badge name already exists".into()));
        }
    }
    if let Some(threshold) = point_threshold {
        let holder =
            find_id_by(conn, "SELECT id FROM badges WHERE point_threshold = ?", &threshold)?;
        if holder.is_some() && holder != except_id {
            return Err(GamificationError::Conflict(
                "point threshold is already used by another badge".into(),
            ));
        }
    }
    Ok(())
}

/// All badges, lowest threshold first
pub fn list_badges(conn: &Connection) -> Result<Vec<BadgeRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM badges ORDER BY point_threshold ASC, id ASC")
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map([], BadgeRow::from_row)
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GamificationError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Badges unlocked at `total_points`, ascending by threshold then id
pub fn list_badges_at_or_below(conn: &Connection, total_points: i64) -> Result<Vec<BadgeRow>> {
    debug!(total_points, "Evaluating badge ladder");

    let mut stmt = conn
        .prepare(
            "SELECT * FROM badges WHERE point_threshold <= ? ORDER BY point_threshold ASC, id ASC",
        )
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![total_points], BadgeRow::from_row)
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GamificationError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Create a badge
pub fn create_badge(conn: &mut Connection, input: &CreateBadgeInput) -> Result<BadgeRow> {
    let tx = conn.transaction()
        .map_err(|e| GamificationError::Persistence(format!("Transaction failed: {}", e)))?;

    check_unique(&tx, Some(&input.name), Some(input.point_threshold), None)?;

    let now = current_timestamp();
    tx.execute(
        r#"
        INSERT INTO badges (
            name, point_threshold, description, image_reference, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.name,
            input.point_threshold,
            input.description,
            input.image_reference,
            now,
            now,
        ],
    )
    .map_err(map_write_error)?;

    let id = tx.last_insert_rowid();

    tx.commit()
        .map_err(|e| GamificationError::Persistence(format!("Commit failed: {}", e)))?;

    get_badge(conn, id)?
        .ok_or_else(|| GamificationError::Persistence("Badge not found after insert".to_string()))
}

/// Apply a partial update. Returns the previous and updated rows, or `None`
/// when the badge does not exist.
pub fn update_badge(
    conn: &mut Connection,
    id: i64,
    input: &UpdateBadgeInput,
) -> Result<Option<(BadgeRow, BadgeRow)>> {
    let tx = conn.transaction()
        .map_err(|e| GamificationError::Persistence(format!("Transaction failed: {}", e)))?;

    let Some(existing) = get_badge(&tx, id)? else {
        return Ok(None);
    };

    check_unique(&tx, input.name.as_deref(), input.point_threshold, Some(id))?;

    let image_reference = if input.image_reference.is_some() {
        input.image_reference.clone()
    } else if input.clear_image {
        None
    } else {
        existing.image_reference.clone()
    };

    tx.execute(
        r#"
        UPDATE badges
        SET name = ?, point_threshold = ?, description = ?, image_reference = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            input.name.as_ref().unwrap_or(&existing.name),
            input.point_threshold.unwrap_or(existing.point_threshold),
            input.description.as_ref().or(existing.description.as_ref()),
            image_reference,
            current_timestamp(),
            id,
        ],
    )
    .map_err(map_write_error)?;

    let updated = get_badge(&tx, id)?
        .ok_or_else(|| GamificationError::Persistence("Badge not found after update".to_string()))?;

    tx.commit()
        .map_err(|e| GamificationError::Persistence(format!("Commit failed: {}", e)))?;

    Ok(Some((existing, updated)))
}

/// Delete badge by ID. Awards referencing it are left in place.
pub fn delete_badge(conn: &Connection, id: i64) -> Result<Option<BadgeRow>> {
    conn.query_row("DELETE FROM badges WHERE id = ? RETURNING *", params![id], BadgeRow::from_row)
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Delete failed: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::GamificationDb;

    pub(crate) fn badge(conn: &mut Connection, name: &str, threshold: i64) -> BadgeRow {
        create_badge(
            conn,
            &CreateBadgeInput {
                name: name.into(),
                point_threshold: threshold,
                description: None,
                image_reference: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_rejects_duplicate_name_and_threshold() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            badge(conn, "Bronze", 100);

            let same_name = CreateBadgeInput {
                name: "Bronze".into(),
                point_threshold: 200,
                description: None,
                image_reference: None,
            };
            assert!(matches!(create_badge(conn, &same_name), Err(GamificationError::Conflict(_))));

            let same_threshold = CreateBadgeInput {
                name: "Silver".into(),
                point_threshold: 100,
                description: None,
                image_reference: None,
            };
            assert!(matches!(
                create_badge(conn, &same_threshold),
                Err(GamificationError::Conflict(_))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ladder_is_ascending_and_bounded() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            badge(conn, "Gold", 500);
            badge(conn, "Starter", 0);
            badge(conn, "Bronze", 100);

            let names: Vec<String> = list_badges_at_or_below(conn, 100)?
                .into_iter()
                .map(|b| b.name)
                .collect();
            assert_eq!(names, vec!["Starter", "Bronze"]);

            assert_eq!(list_badges(conn)?.len(), 3);
            assert_eq!(list_badges(conn)?[2].name, "Gold");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_partial_update_keeps_unset_fields() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            let created = create_badge(
                conn,
                &CreateBadgeInput {
                    name: "Bronze".into(),
                    point_threshold: 100,
                    description: Some("first steps".into()),
                    image_reference: Some("badges/bronze.png".into()),
                },
            )?;

            let (_, updated) = update_badge(
                conn,
                created.id,
                &UpdateBadgeInput {
                    point_threshold: Some(150),
                    ..Default::default()
                },
            )?
            .unwrap();
            assert_eq!(updated.name, "Bronze");
            assert_eq!(updated.point_threshold, 150);
            assert_eq!(updated.description.as_deref(), Some("first steps"));
            assert_eq!(updated.image_reference.as_deref(), Some("badges/bronze.png"));

            let (_, cleared) = update_badge(
                conn,
                created.id,
                &UpdateBadgeInput {
                    clear_image: true,
                    ..Default::default()
                },
            )?
            .unwrap();
            assert_eq!(cleared.image_reference, None);

            assert!(update_badge(conn, 999, &UpdateBadgeInput::default())?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_update_to_own_threshold_is_not_conflict() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            let bronze = badge(conn, "Bronze", 100);
            badge(conn, "Silver", 200);

            let same = UpdateBadgeInput {
                name: Some("Bronze".into()),
                point_threshold: Some(100),
                ..Default::default()
            };
            assert!(update_badge(conn, bronze.id, &same)?.is_some());

            let taken = UpdateBadgeInput {
                point_threshold: Some(200),
                ..Default::default()
            };
            assert!(matches!(
                update_badge(conn, bronze.id, &taken),
                Err(GamificationError::Conflict(_))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_returns_removed_row() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            let bronze = badge(conn, "Bronze", 100);
            assert_eq!(delete_badge(conn, bronze.id)?.map(|b| b.id), Some(bronze.id));
            assert!(delete_badge(conn, bronze.id)?.is_none());
            assert!(get_badge(conn, bronze.id)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
