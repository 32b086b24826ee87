//! Rehabilitation program instances
//!
//! Program state belongs to the program-assignment side of the backend. The
//! accrual path only reads ownership and flips the status to completed.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::current_timestamp;
use crate::error::{GamificationError, Result};

/// Lifecycle status of a program instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl ProgramStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramStatus::NotStarted => "not_started",
            ProgramStatus::InProgress => "in_progress",
            ProgramStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(ProgramStatus::NotStarted),
            "in_progress" => Some(ProgramStatus::InProgress),
            "completed" => Some(ProgramStatus::Completed),
            _ => None,
        }
    }
}

impl ToSql for ProgramStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ProgramStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        ProgramStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown program status: {}", s).into()))
    }
}

/// Program row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramRow {
    pub id: i64,
    pub name: String,
    pub patient_id: i64,
    pub therapist_id: i64,
    pub program_date: String,
    pub status: ProgramStatus,
    pub therapist_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProgramRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            patient_id: row.get("patient_id")?,
            therapist_id: row.get("therapist_id")?,
            program_date: row.get("program_date")?,
            status: row.get("status")?,
            therapist_notes: row.get("therapist_notes")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for assigning a program to a patient
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProgramInput {
    pub name: String,
    pub patient_id: i64,
    pub therapist_id: i64,
    /// ISO date; defaults to today
    #[serde(default)]
    pub program_date: Option<String>,
    #[serde(default)]
    pub status: ProgramStatus,
    #[serde(default)]
    pub therapist_notes: Option<String>,
}

/// Create a program instance
pub fn create_program(conn: &Connection, input: &CreateProgramInput) -> Result<ProgramRow> {
    let now = current_timestamp();
    let program_date = input
        .program_date
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());

    conn.execute(
        r#"
        INSERT INTO programs (
            name, patient_id, therapist_id, program_date, status, therapist_notes,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.name,
            input.patient_id,
            input.therapist_id,
            program_date,
            input.status,
            input.therapist_notes,
            now,
            now,
        ],
    )
    .map_err(|e| GamificationError::Persistence(format!("Insert failed: {}", e)))?;

    let id = conn.last_insert_rowid();
    get_program(conn, id)?
        .ok_or_else(|| GamificationError::Persistence("Program not found after insert".to_string()))
}

/// Get program by ID
pub fn get_program(conn: &Connection, id: i64) -> Result<Option<ProgramRow>> {
    conn.query_row("SELECT * FROM programs WHERE id = ?", params![id], ProgramRow::from_row)
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

/// Whether the therapist has assigned at least one program to the patient
pub fn is_assigned(conn: &Connection, therapist_id: i64, patient_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM programs WHERE patient_id = ? AND therapist_id = ?)",
        params![patient_id, therapist_id],
        |row| row.get(0),
    )
    .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

/// Transition a program to completed. Returns false if it does not exist.
pub fn mark_completed(conn: &Connection, id: i64) -> Result<bool> {
    let changes = conn
        .execute(
            "UPDATE programs SET status = ?, updated_at = ? WHERE id = ?",
            params![ProgramStatus::Completed, current_timestamp(), id],
        )
        .map_err(|e| GamificationError::Persistence(format!("Status update failed: {}", e)))?;

    Ok(changes == 1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::users::tests::{patient, therapist};
    use crate::db::GamificationDb;

    pub(crate) fn program_for(conn: &Connection, patient_id: i64, therapist_id: i64) -> ProgramRow {
        create_program(
            conn,
            &CreateProgramInput {
                name: "Shoulder mobility".into(),
                patient_id,
                therapist_id,
                program_date: Some("2026-10-01".into()),
                status: ProgramStatus::NotStarted,
                therapist_notes: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_is_assigned_follows_programs() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = patient(conn, "andi");
            let t = therapist(conn, "sari");
            let other = therapist(conn, "tono");
            assert!(!is_assigned(conn, t.id, p.id)?);

            program_for(conn, p.id, t.id);
            assert!(is_assigned(conn, t.id, p.id)?);
            assert!(!is_assigned(conn, other.id, p.id)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_status_round_trips_through_sqlite() {
        let db = GamificationDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let p = patient(conn, "andi");
            let t = therapist(conn, "sari");
            let program = program_for(conn, p.id, t.id);
            assert_eq!(program.status, ProgramStatus::NotStarted);

            assert!(mark_completed(conn, program.id)?);
            let reloaded = get_program(conn, program.id)?.unwrap();
            assert_eq!(reloaded.status, ProgramStatus::Completed);

            assert!(!mark_completed(conn, 999)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_status_serde_names() {
        let status: ProgramStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, ProgramStatus::InProgress);
        assert_eq!(ProgramStatus::parse(status.as_str()), Some(status));
        assert_eq!(ProgramStatus::parse("done"), None);
    }
}
