// Collaborators the engine consumes but does not own: the card ranking
// source, the season phase gate and team membership.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::{cards, Database};
use crate::model::{RankedCard, Season, SeasonPhase, TeamId};

/// Global desirability ordering of the undrafted pool.
pub trait CardRankingProvider: Send + Sync {
    /// Undrafted cards, most desirable first. The result may be stale by the
    /// time it is used; the resolver re-checks availability.
    fn undrafted_cards(&self) -> anyhow::Result<Vec<RankedCard>>;
}

/// Whether drafting is currently allowed for a season.
pub trait PhaseGate: Send + Sync {
    fn is_drafting_permitted(&self, season: &Season) -> bool;
}

/// Who belongs to which team, and in what role.
pub trait MembershipDirectory: Send + Sync {
    fn role_of(&self, user_id: &str, team_id: TeamId) -> Option<String>;
    fn is_admin(&self, user_id: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Built-in implementations
// ---------------------------------------------------------------------------

/// Ranks the local pool table by its stored score.
pub struct PoolRanking {
    db: Arc<Database>,
}

impl PoolRanking {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl CardRankingProvider for PoolRanking {
    fn undrafted_cards(&self) -> anyhow::Result<Vec<RankedCard>> {
        let pool = self.db.read(|conn| cards::list_undrafted_ranked(conn))?;
        Ok(pool
            .into_iter()
            .map(|card| RankedCard {
                card_id: card.id,
                cost: card.cost,
                rank: card.rank,
                colors: card.colors,
            })
            .collect())
    }
}

/// Drafting is open while the season is active and in its draft phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeasonPhaseGate;

impl PhaseGate for SeasonPhaseGate {
    fn is_drafting_permitted(&self, season: &Season) -> bool {
        season.active && season.phase == SeasonPhase::Draft
    }
}

/// Membership fixed at startup, typically from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticMembership {
    roles: HashMap<(String, TeamId), String>,
    admins: HashSet<String>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, user_id: &str, team_id: TeamId, role: &str) -> Self {
        self.roles
            .insert((user_id.to_string(), team_id), role.to_string());
        self
    }

    pub fn with_admin(mut self, user_id: &str) -> Self {
        self.admins.insert(user_id.to_string());
        self
    }
}

impl MembershipDirectory for StaticMembership {
    fn role_of(&self, user_id: &str, team_id: TeamId) -> Option<String> {
        self.roles.get(&(user_id.to_string(), team_id)).cloned()
    }

    fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_card, test_db};

    #[test]
    fn pool_ranking_excludes_drafted_and_orders_by_rank() {
        let db = Arc::new(test_db());
        let a = add_card(&db, "Sol Ring", 9, 99.0);
        let b = add_card(&db, "Counterspell", 3, 80.0);
        let c = add_card(&db, "Llanowar Elves", 2, 85.0);
        db.write(|tx| cards::set_drafted(tx, a, true)).unwrap();

        let ranking = PoolRanking::new(db.clone()).undrafted_cards().unwrap();
        let ids: Vec<_> = ranking.iter().map(|r| r.card_id).collect();
        assert_eq!(ids, vec![c, b]);
        assert_eq!(ranking[0].cost, 2);
    }

    #[test]
    fn gate_requires_active_draft_phase() {
        let mut season = Season {
            id: 1,
            name: "2026".into(),
            active: true,
            phase: SeasonPhase::Draft,
            cubucks_cap: 100,
        };
        assert!(SeasonPhaseGate.is_drafting_permitted(&season));
        season.phase = SeasonPhase::Season;
        assert!(!SeasonPhaseGate.is_drafting_permitted(&season));
        season.phase = SeasonPhase::Draft;
        season.active = false;
        assert!(!SeasonPhaseGate.is_drafting_permitted(&season));
    }

    #[test]
    fn static_membership_lookups() {
        let members = StaticMembership::new()
            .with_member("alice", 1, "captain")
            .with_member("bob", 1, "member")
            .with_admin("root");
        assert_eq!(members.role_of("alice", 1).as_deref(), Some("captain"));
        assert_eq!(members.role_of("alice", 2), None);
        assert!(members.is_admin("root"));
        assert!(!members.is_admin("bob"));
    }
}
