//! Accrual service - turns a submitted session report into points and badges
//!
//! One accrual is one `BEGIN IMMEDIATE` transaction:
//!
//! ```text
//! duplicate check -> insert report -> total_points += earned (RETURNING)
//!   -> badge ladder <= new total -> INSERT OR IGNORE awards -> program completed
//! ```
//!
//! Any failure drops the transaction, which rolls back every step. Retrying a
//! failed call is safe: the duplicate check shares the transaction with the
//! point increment, and award insertion is idempotent.

use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::badges::BadgeSummary;
use crate::db::users::Role;
use crate::db::{awards, badges, programs, reports, users, GamificationDb};
use crate::error::{GamificationError, Result};
use crate::points::{MovementOutcome, PointsPolicy};

use super::events::{EventBus, GamificationEvent};
use super::Actor;

/// A completed session's outcome tallies for one program instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub program_instance_id: i64,
    pub patient_id: i64,
    pub movement_outcomes: Vec<MovementOutcome>,
    #[serde(default)]
    pub total_duration_secs: Option<i64>,
    #[serde(default)]
    pub patient_notes: Option<String>,
}

impl ReportSubmission {
    /// Reject malformed input before anything is written
    pub fn validate(&self) -> Result<()> {
        if self.program_instance_id <= 0 {
            return Err(GamificationError::Validation(
                "program_instance_id is required".into(),
            ));
        }
        if self.patient_id <= 0 {
            return Err(GamificationError::Validation("patient_id is required".into()));
        }
        if let Some(secs) = self.total_duration_secs {
            if secs < 0 {
                return Err(GamificationError::Validation(
                    "total_duration_secs must be >= 0".into(),
                ));
            }
        }

        let mut positions = std::collections::HashSet::new();
        for (i, outcome) in self.movement_outcomes.iter().enumerate() {
            outcome.validate().map_err(|e| match e {
                GamificationError::Validation(msg) => {
                    GamificationError::Validation(format!("movement_outcomes[{}]: {}", i, msg))
                }
                other => other,
            })?;
            let position = outcome.position.unwrap_or(i as i64 + 1);
            if !positions.insert(position) {
                return Err(GamificationError::Validation(format!(
                    "movement_outcomes[{}]: duplicate position {}",
                    i, position
                )));
            }
        }
        Ok(())
    }
}

/// Submission body as sent by a patient; the patient is the caller
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReportRequest {
    pub program_instance_id: i64,
    pub movement_outcomes: Vec<MovementOutcome>,
    #[serde(default)]
    pub total_duration_secs: Option<i64>,
    #[serde(default)]
    pub patient_notes: Option<String>,
}

/// Outcome of a committed accrual
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccrualResult {
    pub report_id: i64,
    pub program_instance_id: i64,
    pub points_earned: i64,
    pub new_total_points: i64,
    /// Badges granted by this accrual, lowest threshold first
    pub newly_awarded_badges: Vec<BadgeSummary>,
}

/// Accrual service: the only writer of point totals and awards
pub struct AccrualService {
    db: Arc<GamificationDb>,
    policy: PointsPolicy,
    events: Arc<EventBus>,
}

impl AccrualService {
    /// Create a new accrual service with a fixed points policy
    pub fn new(db: Arc<GamificationDb>, policy: PointsPolicy, events: Arc<EventBus>) -> Self {
        Self { db, policy, events }
    }

    pub fn policy(&self) -> &PointsPolicy {
        &self.policy
    }

    /// Submit a report on behalf of the calling patient
    pub fn submit(&self, actor: &Actor, request: SubmitReportRequest) -> Result<AccrualResult> {
        if actor.role != Role::Patient {
            return Err(GamificationError::Forbidden(
                "only patients can submit session reports".into(),
            ));
        }

        self.accrue_report(&ReportSubmission {
            program_instance_id: request.program_instance_id,
            patient_id: actor.user_id,
            movement_outcomes: request.movement_outcomes,
            total_duration_secs: request.total_duration_secs,
            patient_notes: request.patient_notes,
        })
    }

    /// Accrue a report: points, ledger, badges and completion in one unit of work
    pub fn accrue_report(&self, submission: &ReportSubmission) -> Result<AccrualResult> {
        submission.validate()?;
        let points_earned = self.policy.points_earned(&submission.movement_outcomes)?;

        debug!(
            program_id = submission.program_instance_id,
            patient_id = submission.patient_id,
            points_earned,
            "Accruing report"
        );

        let result = self
            .db
            .with_conn_mut(|conn| accrue_in_transaction(conn, submission, points_earned))
            .inspect_err(|e| {
                warn!(
                    program_id = submission.program_instance_id,
                    patient_id = submission.patient_id,
                    error = %e,
                    "Accrual rolled back"
                );
            })?;

        info!(
            report_id = result.report_id,
            patient_id = submission.patient_id,
            points_earned = result.points_earned,
            new_total = result.new_total_points,
            new_badges = result.newly_awarded_badges.len(),
            "Report accrued"
        );

        self.events.emit(GamificationEvent::ReportAccrued {
            report_id: result.report_id,
            program_id: result.program_instance_id,
            patient_id: submission.patient_id,
            points_earned: result.points_earned,
            new_total_points: result.new_total_points,
        });
        for badge in &result.newly_awarded_badges {
            self.events.emit(GamificationEvent::BadgeAwarded {
                user_id: submission.patient_id,
                badge_id: badge.id,
                badge_name: badge.name.clone(),
            });
        }
        self.events.emit(GamificationEvent::ProgramCompleted {
            program_id: result.program_instance_id,
        });

        Ok(result)
    }
}

fn accrue_in_transaction(
    conn: &mut Connection,
    submission: &ReportSubmission,
    points_earned: i64,
) -> Result<AccrualResult> {
    let program_id = submission.program_instance_id;
    let patient_id = submission.patient_id;

    // IMMEDIATE takes the write lock up front, so the duplicate check below
    // cannot interleave with another writer's insert.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| GamificationError::Persistence(format!("Transaction failed: {}", e)))?;

    let program = programs::get_program(&tx, program_id)?
        .ok_or_else(|| GamificationError::NotFound(format!("program {}", program_id)))?;
    if program.patient_id != patient_id {
        return Err(GamificationError::Forbidden(format!(
            "program {} is not assigned to patient {}",
            program_id, patient_id
        )));
    }

    if reports::report_exists_for_program(&tx, program_id)? {
        return Err(GamificationError::DuplicateSubmission { program_id });
    }

    let patient = users::get_user(&tx, patient_id)?
        .ok_or_else(|| GamificationError::NotFound(format!("user {}", patient_id)))?;
    if patient.role != Role::Patient {
        return Err(GamificationError::Forbidden(format!(
            "user {} is not a patient",
            patient_id
        )));
    }

    let report_id = reports::insert_report(
        &tx,
        &reports::NewReport {
            program_id,
            patient_id,
            therapist_id: program.therapist_id,
            total_duration_secs: submission.total_duration_secs,
            patient_notes: submission.patient_notes.as_deref(),
            points_earned,
            movements: &submission.movement_outcomes,
        },
    )?;

    let new_total_points = users::increment_points(&tx, patient_id, points_earned)?
        .ok_or_else(|| GamificationError::NotFound(format!("user {}", patient_id)))?;

    let mut newly_awarded_badges = vec![];
    for badge in badges::list_badges_at_or_below(&tx, new_total_points)? {
        if awards::insert_award_if_absent(&tx, patient_id, badge.id)? {
            debug!(user_id = patient_id, badge_id = badge.id, "Awarding badge");
            newly_awarded_badges.push(badge.summary());
        }
    }

    if !programs::mark_completed(&tx, program_id)? {
        return Err(GamificationError::NotFound(format!("program {}", program_id)));
    }

    tx.commit()
        .map_err(|e| GamificationError::Persistence(format!("Commit failed: {}", e)))?;

    Ok(AccrualResult {
        report_id,
        program_instance_id: program_id,
        points_earned,
        new_total_points,
        newly_awarded_badges,
    })
}
