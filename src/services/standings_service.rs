//! Standings service - leaderboard and per-user badge collections

use std::sync::Arc;

use serde::Serialize;

use crate::db::awards::{self, AwardRow};
use crate::db::users::{self, LeaderboardEntry, Role};
use crate::db::{programs, GamificationDb, Page, PageRequest};
use crate::error::{GamificationError, Result};

use super::Actor;

/// A user's point total with the awards they hold
#[derive(Debug, Clone, Serialize)]
pub struct UserStanding {
    pub user_id: i64,
    pub total_points: i64,
    pub awards: Vec<AwardRow>,
}

/// Standings queries
pub struct StandingsService {
    db: Arc<GamificationDb>,
}

impl StandingsService {
    pub fn new(db: Arc<GamificationDb>) -> Self {
        Self { db }
    }

    /// Patients by total points, highest first
    pub fn leaderboard(&self, page: PageRequest) -> Result<Page<LeaderboardEntry>> {
        self.db.with_conn(|conn| users::leaderboard(conn, page))
    }

    /// The calling patient's own points and badges
    pub fn my_badges(&self, actor: &Actor) -> Result<UserStanding> {
        if actor.role != Role::Patient {
            return Err(GamificationError::Forbidden(
                "only patients hold badges".into(),
            ));
        }
        self.standing(actor, actor.user_id)
    }

    /// Points and badges of one user.
    ///
    /// Patients see only themselves; therapists see patients they have
    /// assigned a program to.
    pub fn standing(&self, actor: &Actor, user_id: i64) -> Result<UserStanding> {
        self.db.with_conn(|conn| {
            let allowed = match actor.role {
                Role::Patient => actor.user_id == user_id,
                Role::Therapist => programs::is_assigned(conn, actor.user_id, user_id)?,
            };
            if !allowed {
                return Err(GamificationError::Forbidden(format!(
                    "standing of user {} is not visible to user {}",
                    user_id, actor.user_id
                )));
            }

            let user = users::get_user(conn, user_id)?
                .ok_or_else(|| GamificationError::NotFound(format!("user {}", user_id)))?;
            Ok(UserStanding {
                user_id,
                total_points: user.total_points,
                awards: awards::list_awards_for_user(conn, user_id)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::badges::tests::badge;
    use crate::db::programs::tests::program_for;
    use crate::db::users::tests::{patient, therapist};

    #[test]
    fn test_leaderboard_shows_highest_badge() {
        let db = Arc::new(GamificationDb::open_in_memory().unwrap());
        let (user, silver) = db
            .with_conn_mut(|conn| {
                let user = patient(conn, "andi");
                let bronze = badge(conn, "Bronze", 10);
                let silver = badge(conn, "Silver", 20);
                users::increment_points(conn, user.id, 25)?;
                awards::insert_award_if_absent(conn, user.id, bronze.id)?;
                awards::insert_award_if_absent(conn, user.id, silver.id)?;
                Ok((user.id, silver))
            })
            .unwrap();

        let service = StandingsService::new(db);
        let board = service.leaderboard(PageRequest { page: 1, per_page: 10 }).unwrap();
        assert_eq!(board.items[0].highest_badge, Some(silver.summary()));

        let me = Actor { user_id: user, role: Role::Patient };
        let standing = service.my_badges(&me).unwrap();
        assert_eq!(standing.total_points, 25);
        assert_eq!(standing.awards.len(), 2);
    }

    #[test]
    fn test_standing_visibility() {
        let db = Arc::new(GamificationDb::open_in_memory().unwrap());
        let (p, other, t, stranger) = db
            .with_conn(|conn| {
                let p = patient(conn, "andi");
                let other = patient(conn, "budi");
                let t = therapist(conn, "sari");
                let stranger = therapist(conn, "tono");
                program_for(conn, p.id, t.id);
                Ok((p.id, other.id, t.id, stranger.id))
            })
            .unwrap();

        let service = StandingsService::new(db);
        let owner = Actor { user_id: p, role: Role::Patient };
        let assigned = Actor { user_id: t, role: Role::Therapist };
        let stranger = Actor { user_id: stranger, role: Role::Therapist };
        let other = Actor { user_id: other, role: Role::Patient };

        assert!(service.standing(&owner, p).is_ok());
        assert!(service.standing(&assigned, p).is_ok());
        assert!(matches!(service.standing(&other, p), Err(GamificationError::Forbidden(_))));
        assert!(matches!(service.standing(&stranger, p), Err(GamificationError::Forbidden(_))));
        assert!(matches!(service.my_badges(&assigned), Err(GamificationError::Forbidden(_))));
    }
}
