//! Restro Gamification - points and badge accrual for rehab session reports
//!
//! When a patient submits the report of a completed exercise session, the
//! accrual engine turns the per-movement outcome tallies into points, adds them
//! to the patient's running total, and grants every badge whose threshold the
//! new total has reached. All of it happens in one SQLite write transaction.
//!
//! ## Architecture
//!
//! - **User ledger** (`db::users`): `total_points`, changed only by atomic increments
//! - **Badge catalog** (`db::badges`): unique names and unique thresholds
//! - **Award registry** (`db::awards`): one row per `(user, badge)`, ever
//! - **Reports** (`db::reports`): immutable, at most one per program instance
//! - **Accrual engine** (`services::accrual_service`)
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/restro-gamification/
//! ├── restro.db      # SQLite database (WAL mode)
//! └── config.toml    # Configuration
//! ```

pub mod config;
pub mod error;
pub mod points;
pub mod db;
pub mod services;
pub mod http;

// Re-exports
pub use config::Config;
pub use error::{GamificationError, Result};
pub use points::{MovementOutcome, OutcomeKind, PointsPolicy};
pub use db::GamificationDb;
pub use services::{AccrualResult, AccrualService, Actor, ReportSubmission, Services};
pub use http::HttpServer;
