//! Badge service - therapist-managed badge catalog
//!
//! Enforces the two catalog invariants the accrual ladder depends on: unique
//! names and unique point thresholds.

use std::sync::Arc;

use tracing::info;

use crate::db::badges::{self, BadgeRow, CreateBadgeInput, UpdateBadgeInput};
use crate::db::users::Role;
use crate::db::GamificationDb;
use crate::error::{GamificationError, Result};

use super::events::{EventBus, GamificationEvent};
use super::Actor;

/// Badge catalog service
pub struct BadgeService {
    db: Arc<GamificationDb>,
    events: Arc<EventBus>,
}

impl BadgeService {
    /// Create a new badge service
    pub fn new(db: Arc<GamificationDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get badge by ID
    pub fn get(&self, id: i64) -> Result<Option<BadgeRow>> {
        self.db.with_conn(|conn| badges::get_badge(conn, id))
    }

    /// List the whole catalog, lowest threshold first
    pub fn list(&self) -> Result<Vec<BadgeRow>> {
        self.db.with_conn(badges::list_badges)
    }

    // =========================================================================
    // Write Operations (therapist only)
    // =========================================================================

    pub fn create(&self, actor: &Actor, input: CreateBadgeInput) -> Result<BadgeRow> {
        require_therapist(actor)?;
        validate_name(&input.name)?;
        validate_threshold(input.point_threshold)?;

        let badge = self.db.with_conn_mut(|conn| badges::create_badge(conn, &input))?;

        info!(
            id = badge.id,
            name = %badge.name,
            threshold = badge.point_threshold,
            "Badge created"
        );
        self.events.emit(GamificationEvent::BadgeCreated {
            id: badge.id,
            name: badge.name.clone(),
            point_threshold: badge.point_threshold,
        });

        Ok(badge)
    }

    pub fn update(&self, actor: &Actor, id: i64, input: UpdateBadgeInput) -> Result<BadgeRow> {
        require_therapist(actor)?;
        if let Some(ref name) = input.name {
            validate_name(name)?;
        }
        if let Some(threshold) = input.point_threshold {
            validate_threshold(threshold)?;
        }

        let (previous, updated) = self
            .db
            .with_conn_mut(|conn| badges::update_badge(conn, id, &input))?
            .ok_or_else(|| GamificationError::NotFound(format!("badge {}", id)))?;

        let stale_image = previous
            .image_reference
            .filter(|old| updated.image_reference.as_ref() != Some(old));

        info!(id, "Badge updated");
        self.events.emit(GamificationEvent::BadgeUpdated { id, stale_image });

        Ok(updated)
    }

    /// Delete a badge. Awards already granted stay in the registry.
    pub fn delete(&self, actor: &Actor, id: i64) -> Result<()> {
        require_therapist(actor)?;

        let deleted = self
            .db
            .with_conn(|conn| badges::delete_badge(conn, id))?
            .ok_or_else(|| GamificationError::NotFound(format!("badge {}", id)))?;

        info!(id, name = %deleted.name, "Badge deleted");
        self.events.emit(GamificationEvent::BadgeDeleted {
            id,
            stale_image: deleted.image_reference,
        });

        Ok(())
    }
}

fn require_therapist(actor: &Actor) -> Result<()> {
    match actor.role {
        Role::Therapist => Ok(()),
        Role::Patient => Err(GamificationError::Forbidden(
            "only therapists can manage badges".into(),
        )),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(GamificationError::Validation("badge name is required".into()));
    }
    if name.len() > 120 {
        return Err(GamificationError::Validation("badge name must be <= 120 characters".into()));
    }
    Ok(())
}

fn validate_threshold(threshold: i64) -> Result<()> {
    if threshold < 0 {
        return Err(GamificationError::Validation("point_threshold must be >= 0".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (BadgeService, Arc<EventBus>) {
        let db = Arc::new(GamificationDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        (BadgeService::new(db, events.clone()), events)
    }

    const THERAPIST: Actor = Actor { user_id: 1, role: Role::Therapist };
    const PATIENT: Actor = Actor { user_id: 2, role: Role::Patient };

    fn input(name: &str, threshold: i64) -> CreateBadgeInput {
        CreateBadgeInput {
            name: name.into(),
            point_threshold: threshold,
            description: None,
            image_reference: Some(format!("badges/{}.png", name)),
        }
    }

    #[test]
    fn test_patient_cannot_manage_badges() {
        let (service, _) = service();
        assert!(matches!(
            service.create(&PATIENT, input("Bronze", 100)),
            Err(GamificationError::Forbidden(_))
        ));
        assert!(matches!(service.delete(&PATIENT, 1), Err(GamificationError::Forbidden(_))));
    }

    #[test]
    fn test_invalid_input_rejected() {
        let (service, _) = service();
        assert!(matches!(
            service.create(&THERAPIST, input("Bronze", -5)),
            Err(GamificationError::Validation(_))
        ));
        assert!(matches!(
            service.create(&THERAPIST, input("  ", 5)),
            Err(GamificationError::Validation(_))
        ));
    }

    #[test]
    fn test_update_missing_badge_is_not_found() {
        let (service, _) = service();
        assert!(matches!(
            service.update(&THERAPIST, 9, UpdateBadgeInput::default()),
            Err(GamificationError::NotFound(_))
        ));
        assert!(matches!(service.delete(&THERAPIST, 9), Err(GamificationError::NotFound(_))));
    }

    #[test]
    fn test_replaced_image_reported_stale() {
        let (service, events) = service();
        let mut rx = events.subscribe();
        let bronze = service.create(&THERAPIST, input("Bronze", 100)).unwrap();

        service
            .update(
                &THERAPIST,
                bronze.id,
                UpdateBadgeInput {
                    image_reference: Some("badges/bronze-v2.png".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), GamificationEvent::BadgeCreated { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            GamificationEvent::BadgeUpdated {
                id: bronze.id,
                stale_image: Some("badges/Bronze.png".into()),
            }
        );
    }

    #[test]
    fn test_delete_reports_image_for_cleanup() {
        let (service, events) = service();
        let bronze = service.create(&THERAPIST, input("Bronze", 100)).unwrap();
        let mut rx = events.subscribe();

        service.delete(&THERAPIST, bronze.id).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            GamificationEvent::BadgeDeleted {
                id: bronze.id,
                stale_image: Some("badges/Bronze.png".into()),
            }
        );
        assert!(service.get(bronze.id).unwrap().is_none());
    }
}
