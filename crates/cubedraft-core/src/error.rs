// Error taxonomy returned across the engine boundary.

use thiserror::Error;

use crate::model::{CardId, SessionId, TeamId};

/// Every failure an engine operation can report. Callers receive these as
/// values; nothing in the request path panics.
#[derive(Debug, Error)]
pub enum DraftError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("team {team_id} is not on the clock (on the clock: {on_the_clock:?})")]
    NotOnClock {
        team_id: TeamId,
        on_the_clock: Option<TeamId>,
    },

    #[error("card {card_id} has already been drafted")]
    CardAlreadyDrafted { card_id: CardId },

    #[error("team {team_id} cannot afford {cost} cubucks (balance {balance})")]
    InsufficientBalance {
        team_id: TeamId,
        balance: i64,
        cost: i64,
    },

    #[error("team {team_id} is already at or above the season cap of {cap} cubucks")]
    SeasonCapExceeded { team_id: TeamId, cap: i64 },

    #[error("draft session {0} is not active")]
    SessionNotActive(SessionId),

    #[error("drafting is not permitted in the current season phase")]
    DraftingNotPermitted,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("vote is for card {got} but the team's top queued card is {expected:?}")]
    StaleVoteCandidate {
        expected: Option<CardId>,
        got: CardId,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl DraftError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            DraftError::NotAuthenticated => "NOT_AUTHENTICATED",
            DraftError::NotAuthorized(_) => "NOT_AUTHORIZED",
            DraftError::NotOnClock { .. } => "NOT_ON_CLOCK",
            DraftError::CardAlreadyDrafted { .. } => "CARD_ALREADY_DRAFTED",
            DraftError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            DraftError::SeasonCapExceeded { .. } => "SEASON_CAP_EXCEEDED",
            DraftError::SessionNotActive(_) => "SESSION_NOT_ACTIVE",
            DraftError::DraftingNotPermitted => "DRAFTING_NOT_PERMITTED",
            DraftError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            DraftError::StaleVoteCandidate { .. } => "STALE_VOTE_CANDIDATE",
            DraftError::NotFound { .. } => "NOT_FOUND",
            DraftError::InvalidRequest(_) => "INVALID_REQUEST",
            DraftError::Storage(_) => "INTERNAL",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        DraftError::NotFound { entity, id }
    }
}
