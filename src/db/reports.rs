//! Accrued session reports and their per-movement results

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{current_timestamp, Page, PageRequest};
use crate::error::{is_unique_violation, GamificationError, Result};
use crate::points::MovementOutcome;

/// Report row with its movement results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub id: i64,
    pub program_id: i64,
    pub patient_id: i64,
    pub therapist_id: i64,
    pub report_date: String,
    pub total_duration_secs: Option<i64>,
    pub patient_notes: Option<String>,
    pub points_earned: i64,
    pub created_at: String,
    pub movements: Vec<MovementResultRow>,
}

impl ReportRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            program_id: row.get("program_id")?,
            patient_id: row.get("patient_id")?,
            therapist_id: row.get("therapist_id")?,
            report_date: row.get("report_date")?,
            total_duration_secs: row.get("total_duration_secs")?,
            patient_notes: row.get("patient_notes")?,
            points_earned: row.get("points_earned")?,
            created_at: row.get("created_at")?,
            movements: vec![], // Loaded separately
        })
    }
}

/// Stored per-movement outcome tally
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementResultRow {
    pub position: i64,
    pub movement_id: i64,
    pub planned_detail_id: Option<i64>,
    pub perfect: i64,
    pub imperfect: i64,
    pub undetected: i64,
    pub actual_duration_secs: Option<i64>,
}

/// Values written when a report is accrued
#[derive(Debug, Clone)]
pub struct NewReport<'a> {
    pub program_id: i64,
    pub patient_id: i64,
    pub therapist_id: i64,
    pub total_duration_secs: Option<i64>,
    pub patient_notes: Option<&'a str>,
    pub points_earned: i64,
    pub movements: &'a [MovementOutcome],
}

/// Whether a report was already accrued for the program
pub fn report_exists_for_program(conn: &Connection, program_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM reports WHERE program_id = ?)",
        params![program_id],
        |row| row.get(0),
    )
    .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
}

/// Insert a report and its movement rows; caller owns the transaction.
///
/// A second report for the same program violates UNIQUE(program_id) and is
/// reported as [`GamificationError::DuplicateSubmission`].
pub fn insert_report(conn: &Connection, report: &NewReport<'_>) -> Result<i64> {
    let now = current_timestamp();
    let report_date = chrono::Utc::now().date_naive().to_string();

    conn.execute(
        r#"
        INSERT INTO reports (
            program_id, patient_id, therapist_id, report_date,
            total_duration_secs, patient_notes, points_earned, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            report.program_id,
            report.patient_id,
            report.therapist_id,
            report_date,
            report.total_duration_secs,
            report.patient_notes,
            report.points_earned,
            now,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            GamificationError::DuplicateSubmission { program_id: report.program_id }
        } else {
            GamificationError::Persistence(format!("Report insert failed: {}", e))
        }
    })?;

    let report_id = conn.last_insert_rowid();

    let mut stmt = conn
        .prepare(
            r#"
            INSERT INTO report_movements (
                report_id, position, movement_id, planned_detail_id,
                perfect, imperfect, undetected, actual_duration_secs
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    for (index, movement) in report.movements.iter().enumerate() {
        let position = movement.position.unwrap_or(index as i64 + 1);
        stmt.execute(params![
            report_id,
            position,
            movement.movement_id,
            movement.planned_detail_id,
            movement.perfect,
            movement.imperfect,
            movement.undetected,
            movement.actual_duration_secs,
        ])
        .map_err(|e| {
            if is_unique_violation(&e) {
                GamificationError::Validation(format!("duplicate movement position {}", position))
            } else {
                GamificationError::Persistence(format!("Movement insert failed: {}", e))
            }
        })?;
    }

    Ok(report_id)
}

fn load_movements(conn: &Connection, report_id: i64) -> Result<Vec<MovementResultRow>> {
    let mut stmt = conn
        .prepare("SELECT * FROM report_movements WHERE report_id = ? ORDER BY position ASC")
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![report_id], |row| {
            Ok(MovementResultRow {
                position: row.get("position")?,
                movement_id: row.get("movement_id")?,
                planned_detail_id: row.get("planned_detail_id")?,
                perfect: row.get("perfect")?,
                imperfect: row.get("imperfect")?,
                undetected: row.get("undetected")?,
                actual_duration_secs: row.get("actual_duration_secs")?,
            })
        })
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GamificationError::Persistence(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Get report by ID, including movements
pub fn get_report(conn: &Connection, id: i64) -> Result<Option<ReportRow>> {
    let report = conn
        .query_row("SELECT * FROM reports WHERE id = ?", params![id], ReportRow::from_row)
        .optional()
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?;

    match report {
        Some(mut report) => {
            report.movements = load_movements(conn, report.id)?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}

/// Reports of one patient, newest first
pub fn list_reports_for_patient(
    conn: &Connection,
    patient_id: i64,
    page: PageRequest,
) -> Result<Page<ReportRow>> {
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM reports WHERE patient_id = ?",
            params![patient_id],
            |row| row.get(0),
        )
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?;

    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM reports WHERE patient_id = ?
            ORDER BY report_date DESC, created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .map_err(|e| GamificationError::Persistence(format!("Prepare failed: {}", e)))?;

    let rows = stmt
        .query_map(params![patient_id, page.limit(), page.offset()], ReportRow::from_row)
        .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))?;

    let mut results = vec![];
    for row_result in rows {
        let mut report = row_result
            .map_err(|e| GamificationError::Persistence(format!("Row parse failed: {}", e)))?;
        report.movements = load_movements(conn, report.id)?;
        results.push(report);
    }

    Ok(Page::new(results, total as u64, page))
}
