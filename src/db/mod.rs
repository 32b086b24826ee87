//! SQLite database module for the gamification ledger
//!
//! ## Tables
//!
//! - `users` - User directory with the `total_points` ledger column
//! - `badges` - Badge catalog (unique name, unique point threshold)
//! - `user_badges` - Award registry, one row per (user, badge)
//! - `programs` - Assigned rehabilitation program instances
//! - `reports` / `report_movements` - Accrued session reports
//!
//! Invariants that must hold across processes are enforced here (UNIQUE
//! constraints, `UPDATE ... SET total_points = total_points + ?`), never by
//! in-memory locks in the services. The mutex below only serialises use of a
//! single connection handle.

pub mod schema;
pub mod users;
pub mod badges;
pub mod awards;
pub mod programs;
pub mod reports;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{GamificationError, Result};

/// Current UTC time in the format stored in every timestamp column
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// SQLite database handle
pub struct GamificationDb {
    conn: Mutex<Connection>,
}

impl GamificationDb {
    /// Open or create the database file
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| GamificationError::Persistence(format!("Failed to open SQLite: {}", e)))?;

        // Other handles on the same file may hold the write lock
        conn.busy_timeout(busy_timeout).map_err(|e| {
            GamificationError::Persistence(format!("Failed to set busy timeout: {}", e))
        })?;

        // WAL lets readers proceed while a report is being accrued
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GamificationError::Persistence(format!("Failed to set PRAGMA: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            GamificationError::Persistence(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| GamificationError::Persistence(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.with_conn(|conn| schema::init_schema(conn))?;

        Ok(db)
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock()
            .map_err(|e| GamificationError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| GamificationError::Persistence(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| GamificationError::Persistence(format!("Query failed: {}", e)))
            };

            Ok(DbStats {
                user_count: count("SELECT COUNT(*) FROM users")?,
                badge_count: count("SELECT COUNT(*) FROM badges")?,
                award_count: count("SELECT COUNT(*) FROM user_badges")?,
                report_count: count("SELECT COUNT(*) FROM reports")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub user_count: u64,
    pub badge_count: u64,
    pub award_count: u64,
    pub report_count: u64,
}

/// One page of a paginated listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_items: u64, page: PageRequest) -> Self {
        let per_page = u64::from(page.per_page.max(1));
        Self {
            items,
            total_items,
            total_pages: total_items.div_ceil(per_page),
            current_page: page.page,
        }
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Normalise raw query values: page starts at 1, per_page is clamped
    pub fn new(page: Option<u32>, per_page: Option<u32>, default_size: u32, max_size: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(default_size).clamp(1, max_size.max(1)),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}
