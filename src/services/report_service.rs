//! Report service - read side of accrued session reports

use std::sync::Arc;

use crate::db::programs;
use crate::db::reports::{self, ReportRow};
use crate::db::users::Role;
use crate::db::{GamificationDb, Page, PageRequest};
use crate::error::{GamificationError, Result};

use super::Actor;

/// Report query service
pub struct ReportService {
    db: Arc<GamificationDb>,
}

impl ReportService {
    pub fn new(db: Arc<GamificationDb>) -> Self {
        Self { db }
    }

    /// Get one report. Patients see their own; therapists see reports of
    /// programs they assigned.
    pub fn get(&self, actor: &Actor, id: i64) -> Result<ReportRow> {
        self.db.with_conn(|conn| {
            let report = reports::get_report(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("report {}", id)))?;

            let allowed = match actor.role {
                Role::Patient => report.patient_id == actor.user_id,
                Role::Therapist => {
                    report.therapist_id == actor.user_id
                        || programs::get_program(conn, report.program_id)?
                            .is_some_and(|p| p.therapist_id == actor.user_id)
                }
            };

            if !allowed {
                return Err(GamificationError::Forbidden(format!(
                    "report {} is not visible to user {}",
                    id, actor.user_id
                )));
            }
            Ok(report)
        })
    }

    /// Report history of a patient, newest first.
    ///
    /// A therapist may only list patients they have assigned a program to.
    pub fn list_for_patient(
        &self,
        actor: &Actor,
        patient_id: i64,
        page: PageRequest,
    ) -> Result<Page<ReportRow>> {
        self.db.with_conn(|conn| {
            match actor.role {
                Role::Patient if actor.user_id != patient_id => {
                    return Err(GamificationError::Forbidden(
                        "patients can only list their own reports".into(),
                    ));
                }
                Role::Patient => {}
                Role::Therapist => {
                    if !programs::is_assigned(conn, actor.user_id, patient_id)? {
                        return Err(GamificationError::Forbidden(format!(
                            "no program assigned to patient {} by therapist {}",
                            patient_id, actor.user_id
                        )));
                    }
                }
            }

            reports::list_reports_for_patient(conn, patient_id, page)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::programs::tests::program_for;
    use crate::db::users::tests::{patient, therapist};
    use crate::points::PointsPolicy;
    use crate::services::accrual_service::{AccrualService, ReportSubmission};
    use crate::services::events::EventBus;

    #[test]
    fn test_visibility_rules() {
        let db = Arc::new(GamificationDb::open_in_memory().unwrap());
        let (p, other, t, stranger, program) = db
            .with_conn(|conn| {
                let p = patient(conn, "andi");
                let other = patient(conn, "budi");
                let t = therapist(conn, "sari");
                let stranger = therapist(conn, "tono");
                let program = program_for(conn, p.id, t.id);
                Ok((p.id, other.id, t.id, stranger.id, program.id))
            })
            .unwrap();

        let accrual = AccrualService::new(
            db.clone(),
            PointsPolicy::default(),
            Arc::new(EventBus::new()),
        );
        let result = accrual
            .accrue_report(&ReportSubmission {
                program_instance_id: program,
                patient_id: p,
                movement_outcomes: vec![],
                total_duration_secs: None,
                patient_notes: Some("ok".into()),
            })
            .unwrap();

        let service = ReportService::new(db);
        let owner = Actor { user_id: p, role: Role::Patient };
        let assigned = Actor { user_id: t, role: Role::Therapist };

        assert_eq!(service.get(&owner, result.report_id).unwrap().program_id, program);
        assert!(service.get(&assigned, result.report_id).is_ok());
        assert!(matches!(
            service.get(&Actor { user_id: other, role: Role::Patient }, result.report_id),
            Err(GamificationError::Forbidden(_))
        ));
        assert!(matches!(
            service.get(&Actor { user_id: stranger, role: Role::Therapist }, result.report_id),
            Err(GamificationError::Forbidden(_))
        ));
        assert!(matches!(service.get(&owner, 999), Err(GamificationError::NotFound(_))));

        let page = PageRequest { page: 1, per_page: 10 };
        assert_eq!(service.list_for_patient(&assigned, p, page).unwrap().total_items, 1);
        let stranger = Actor { user_id: stranger, role: Role::Therapist };
        assert!(service.list_for_patient(&stranger, p, page).is_err());
        let other = Actor { user_id: other, role: Role::Patient };
        assert!(service.list_for_patient(&other, p, page).is_err());
    }
}
