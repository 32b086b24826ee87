//! Service layer
//!
//! Services hold the business rules between HTTP handlers and the
//! repository functions in `db/`:
//!
//! ```text
//! HTTP Handlers (thin, resolve the Actor)
//!     ↓
//! Service Layer (authorization, validation, transactions, events)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod accrual_service;
pub mod badge_service;
pub mod report_service;
pub mod standings_service;

pub use events::{EventBus, EventListener, GamificationEvent};
pub use accrual_service::{AccrualResult, AccrualService, ReportSubmission, SubmitReportRequest};
pub use badge_service::BadgeService;
pub use report_service::ReportService;
pub use standings_service::{StandingsService, UserStanding};

use std::sync::Arc;

use crate::db::users::Role;
use crate::db::GamificationDb;
use crate::points::PointsPolicy;

/// Authenticated caller, as resolved by the gateway in front of this service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

/// Service container shared by the HTTP handlers
pub struct Services {
    pub accrual: Arc<AccrualService>,
    pub badges: Arc<BadgeService>,
    pub reports: Arc<ReportService>,
    pub standings: Arc<StandingsService>,
    pub events: Arc<EventBus>,
    pub db: Arc<GamificationDb>,
}

impl Services {
    /// Create all services over one shared database
    pub fn new(db: Arc<GamificationDb>, policy: PointsPolicy) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            accrual: Arc::new(AccrualService::new(db.clone(), policy, events.clone())),
            badges: Arc::new(BadgeService::new(db.clone(), events.clone())),
            reports: Arc::new(ReportService::new(db.clone())),
            standings: Arc::new(StandingsService::new(db.clone())),
            events,
            db,
        }
    }
}
