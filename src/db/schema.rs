//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::{GamificationError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| {
        GamificationError::Persistence(format!("Failed to create schema_version table: {}", e))
    })?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .map_err(|e| {
            GamificationError::Persistence(format!("Failed to read schema_version: {}", e))
        })?;

    Ok(version.unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", []).map_err(|e| {
        GamificationError::Persistence(format!("Failed to clear schema_version: {}", e))
    })?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| {
            GamificationError::Persistence(format!("Failed to set schema_version: {}", e))
        })?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(LEDGER_SCHEMA).map_err(|e| {
        GamificationError::Persistence(format!("Failed to create ledger tables: {}", e))
    })?;

    conn.execute_batch(REPORTS_SCHEMA).map_err(|e| {
        GamificationError::Persistence(format!("Failed to create report tables: {}", e))
    })?;

    conn.execute_batch(INDEXES_SCHEMA).map_err(|e| {
        GamificationError::Persistence(format!("Failed to create indexes: {}", e))
    })?;

    Ok(())
}

/// Users, badge catalog and award registry
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('therapist', 'patient')),
    total_points INTEGER NOT NULL DEFAULT 0 CHECK (total_points >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS badges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    point_threshold INTEGER NOT NULL UNIQUE CHECK (point_threshold >= 0),
    description TEXT,
    image_reference TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Awards survive badge deletion as orphan references, so badge_id has no FK
CREATE TABLE IF NOT EXISTS user_badges (
    user_id INTEGER NOT NULL,
    badge_id INTEGER NOT NULL,
    awarded_at TEXT NOT NULL,
    PRIMARY KEY (user_id, badge_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Program instances and accrued reports
const REPORTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS programs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    patient_id INTEGER NOT NULL,
    therapist_id INTEGER NOT NULL,
    program_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'not_started'
        CHECK (status IN ('not_started', 'in_progress', 'completed')),
    therapist_notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (patient_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (therapist_id) REFERENCES users(id) ON DELETE CASCADE
);

-- UNIQUE(program_id) is the at-most-once accrual guarantee
CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    program_id INTEGER NOT NULL UNIQUE,
    patient_id INTEGER NOT NULL,
    therapist_id INTEGER NOT NULL,
    report_date TEXT NOT NULL,
    total_duration_secs INTEGER,
    patient_notes TEXT,
    points_earned INTEGER NOT NULL CHECK (points_earned >= 0),
    created_at TEXT NOT NULL,
    FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS report_movements (
    report_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    movement_id INTEGER NOT NULL,
    planned_detail_id INTEGER,
    perfect INTEGER NOT NULL CHECK (perfect >= 0),
    imperfect INTEGER NOT NULL CHECK (imperfect >= 0),
    undetected INTEGER NOT NULL CHECK (undetected >= 0),
    actual_duration_secs INTEGER,
    PRIMARY KEY (report_id, position),
    FOREIGN KEY (report_id) REFERENCES reports(id) ON DELETE CASCADE
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_users_role_points ON users(role, total_points DESC);
CREATE INDEX IF NOT EXISTS idx_user_badges_badge ON user_badges(badge_id);
CREATE INDEX IF NOT EXISTS idx_programs_patient ON programs(patient_id);
CREATE INDEX IF NOT EXISTS idx_programs_therapist ON programs(therapist_id);
CREATE INDEX IF NOT EXISTS idx_reports_patient_date ON reports(patient_id, report_date DESC);
"#;
