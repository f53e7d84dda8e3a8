// Vote bookkeeping for confirming a team's top queued pick early.
//
// Vote sets live in memory only. Each (session, team) pair holds at most one
// set, bound to a single candidate card.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::DraftError;
use crate::model::{CardId, DraftPick, SessionId, TeamId};

/// Role weights and thresholds. A role without a weight cannot vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRules {
    pub role_weights: HashMap<String, u32>,
    pub default_threshold: u32,
    pub team_thresholds: HashMap<TeamId, u32>,
}

impl Default for VoteRules {
    fn default() -> Self {
        Self {
            role_weights: HashMap::from([("captain".to_string(), 2), ("member".to_string(), 1)]),
            default_threshold: 3,
            team_thresholds: HashMap::new(),
        }
    }
}

impl VoteRules {
    pub fn weight_of(&self, role: &str) -> Option<u32> {
        self.role_weights.get(role).copied().filter(|w| *w > 0)
    }

    pub fn threshold_for(&self, team_id: TeamId) -> u32 {
        self.team_thresholds
            .get(&team_id)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.default_threshold == 0 {
            return Err(DraftError::InvalidConfiguration(
                "vote threshold must be at least 1".into(),
            ));
        }
        if let Some((team, _)) = self.team_thresholds.iter().find(|(_, t)| **t == 0) {
            return Err(DraftError::InvalidConfiguration(format!(
                "vote threshold for team {team} must be at least 1"
            )));
        }
        if self.role_weights.is_empty() {
            return Err(DraftError::InvalidConfiguration(
                "at least one role must carry a vote weight".into(),
            ));
        }
        Ok(())
    }
}

/// Voters backing one candidate card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSet {
    pub candidate: CardId,
    pub voters: BTreeSet<String>,
}

impl VoteSet {
    fn new(candidate: CardId) -> Self {
        Self {
            candidate,
            voters: BTreeSet::new(),
        }
    }

    /// Sum of voter weights, looked up at tally time so role changes apply
    /// immediately.
    pub fn tally(&self, weight: impl Fn(&str) -> u32) -> u32 {
        self.voters.iter().map(|v| weight(v)).sum()
    }
}

/// All in-flight vote sets.
#[derive(Debug, Default)]
pub struct VoteBook {
    sets: HashMap<(SessionId, TeamId), VoteSet>,
}

impl VoteBook {
    /// The set that results from `user` toggling a vote for `candidate`.
    /// A set bound to a different card is discarded first. The book itself
    /// is not modified; commit the result with [`VoteBook::store`].
    pub fn toggled(
        &self,
        session_id: SessionId,
        team_id: TeamId,
        candidate: CardId,
        user_id: &str,
    ) -> (VoteSet, bool) {
        let mut set = match self.sets.get(&(session_id, team_id)) {
            Some(existing) if existing.candidate == candidate => existing.clone(),
            _ => VoteSet::new(candidate),
        };
        let voted = if set.voters.remove(user_id) {
            false
        } else {
            set.voters.insert(user_id.to_string());
            true
        };
        (set, voted)
    }

    pub fn store(&mut self, session_id: SessionId, team_id: TeamId, set: VoteSet) {
        if set.voters.is_empty() {
            self.sets.remove(&(session_id, team_id));
        } else {
            self.sets.insert((session_id, team_id), set);
        }
    }

    pub fn get(&self, session_id: SessionId, team_id: TeamId) -> Option<&VoteSet> {
        self.sets.get(&(session_id, team_id))
    }

    pub fn clear(&mut self, session_id: SessionId, team_id: TeamId) {
        self.sets.remove(&(session_id, team_id));
    }
}

/// Result of a vote toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub card_id: CardId,
    /// Whether the caller's vote is now counted.
    pub voted: bool,
    pub tally: u32,
    pub threshold: u32,
    /// The pick executed because the threshold was reached.
    pub pick: Option<DraftPick>,
}

impl VoteOutcome {
    pub fn pick_executed(&self) -> bool {
        self.pick.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> VoteRules {
        VoteRules::default()
    }

    #[test]
    fn toggle_adds_then_removes() {
        let mut book = VoteBook::default();
        let (set, voted) = book.toggled(1, 2, 10, "alice");
        assert!(voted);
        book.store(1, 2, set);
        let (set, voted) = book.toggled(1, 2, 10, "alice");
        assert!(!voted);
        book.store(1, 2, set);
        assert!(book.get(1, 2).is_none());
    }

    #[test]
    fn candidate_change_discards_old_votes() {
        let mut book = VoteBook::default();
        let (set, _) = book.toggled(1, 2, 10, "alice");
        book.store(1, 2, set);
        let (set, _) = book.toggled(1, 2, 10, "bob");
        book.store(1, 2, set);
        assert_eq!(book.get(1, 2).unwrap().voters.len(), 2);

        let (set, voted) = book.toggled(1, 2, 11, "bob");
        assert!(voted);
        assert_eq!(set.candidate, 11);
        assert_eq!(set.voters.len(), 1);
    }

    #[test]
    fn toggled_does_not_mutate_book() {
        let book = VoteBook::default();
        let _ = book.toggled(1, 2, 10, "alice");
        assert!(book.get(1, 2).is_none());
    }

    #[test]
    fn tally_uses_role_weights() {
        let rules = rules();
        let mut set = VoteSet::new(5);
        set.voters.insert("cap".into());
        set.voters.insert("m1".into());
        let roles = HashMap::from([("cap", "captain"), ("m1", "member")]);
        let tally = set.tally(|u| {
            roles
                .get(u)
                .and_then(|r| rules.weight_of(r))
                .unwrap_or(0)
        });
        assert_eq!(tally, 3);
    }

    #[test]
    fn thresholds_fall_back_to_default() {
        let mut rules = rules();
        rules.team_thresholds.insert(4, 5);
        assert_eq!(rules.threshold_for(4), 5);
        assert_eq!(rules.threshold_for(9), 3);
        assert_eq!(rules.weight_of("spectator"), None);
    }

    #[test]
    fn zero_threshold_is_invalid() {
        let mut rules = rules();
        assert!(rules.validate().is_ok());
        rules.default_threshold = 0;
        assert!(rules.validate().is_err());
        let mut rules = VoteRules::default();
        rules.team_thresholds.insert(1, 0);
        assert!(rules.validate().is_err());
    }
}
