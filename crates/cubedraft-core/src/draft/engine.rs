// DraftEngine: the request/response surface over the store, the clock and
// the collaborators.
//
// Each mutating operation is one `Database::write` transaction. The ranking
// provider is always consulted before that transaction opens. Vote sets are
// guarded by their own mutex, which is always taken before the database lock
// when both are held.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::autodraft::{self, AutoSelection};
use super::clock::{self, Board, DraftStatus, TimerOutcome};
use super::order::total_picks;
use super::queue::{effective_queue, first_affordable};
use super::resolver::{self, Refund};
use super::votes::{VoteBook, VoteOutcome, VoteRules};
use crate::db::{cards, ledger as ledger_rows, picks, queue, seasons, sessions, teams, Database};
use crate::error::DraftError;
use crate::external::{
    CardRankingProvider, MembershipDirectory, PhaseGate, PoolRanking, SeasonPhaseGate,
};
use crate::ledger::{self, AllocationSummary, Allocation, LedgerAudit};
use crate::model::{
    CardId, CubucksTransaction, DraftPick, DraftSession, PickId, PickSlot, PickSource, PoolCard,
    QueueEntry, RankedCard, Season, SeasonId, SessionId, SessionStatus, Team, TeamId,
};
use crate::time::{SystemClock, TimeSource};

/// Who is calling. `System` is the server-owned timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User(String),
    System,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Actor::User(id.into())
    }
}

/// Tunables that are not vote rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Consecutive ranking failures tolerated on one expired pick before the
    /// timer stops waiting for the provider and resolves from the queue only.
    pub max_ranking_failures: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_ranking_failures: 3,
        }
    }
}

/// The services the engine consumes but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub ranking: Arc<dyn CardRankingProvider>,
    pub gate: Arc<dyn PhaseGate>,
    pub members: Arc<dyn MembershipDirectory>,
    pub clock: Arc<dyn TimeSource>,
}

impl Collaborators {
    /// Pool-backed ranking, the season phase gate and the system clock.
    pub fn standard(db: Arc<Database>, members: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            ranking: Arc::new(PoolRanking::new(db)),
            gate: Arc::new(SeasonPhaseGate),
            members,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Request to open a new draft session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub season_id: SeasonId,
    /// Seat order for round one.
    pub team_order: Vec<TeamId>,
    pub total_rounds: u32,
    pub hours_per_pick: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One entry of a queue replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct QueueItem {
    pub card_id: CardId,
    #[serde(default)]
    pub pinned: bool,
}

pub struct DraftEngine {
    db: Arc<Database>,
    ranking: Arc<dyn CardRankingProvider>,
    gate: Arc<dyn PhaseGate>,
    members: Arc<dyn MembershipDirectory>,
    clock: Arc<dyn TimeSource>,
    votes: Mutex<VoteBook>,
    rules: VoteRules,
    settings: EngineSettings,
}

impl DraftEngine {
    pub fn new(
        db: Arc<Database>,
        collaborators: Collaborators,
        rules: VoteRules,
        settings: EngineSettings,
    ) -> Result<Self, DraftError> {
        rules.validate()?;
        if settings.max_ranking_failures == 0 {
            return Err(DraftError::InvalidConfiguration(
                "max_ranking_failures must be at least 1".into(),
            ));
        }
        Ok(Self {
            db,
            ranking: collaborators.ranking,
            gate: collaborators.gate,
            members: collaborators.members,
            clock: collaborators.clock,
            votes: Mutex::new(VoteBook::default()),
            rules,
            settings,
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn vote_rules(&self) -> &VoteRules {
        &self.rules
    }

    /// Current time as the engine sees it.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn votes(&self) -> MutexGuard<'_, VoteBook> {
        self.votes.lock().expect("vote book mutex poisoned")
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    fn require_admin(&self, actor: &Actor) -> Result<(), DraftError> {
        match actor {
            Actor::System => Ok(()),
            Actor::Anonymous => Err(DraftError::NotAuthenticated),
            Actor::User(id) if self.members.is_admin(id) => Ok(()),
            Actor::User(id) => Err(DraftError::NotAuthorized(format!(
                "user {id} is not an administrator"
            ))),
        }
    }

    /// Team members (any role) and administrators may act for a team.
    fn require_team_access(&self, actor: &Actor, team_id: TeamId) -> Result<(), DraftError> {
        match actor {
            Actor::System => Ok(()),
            Actor::Anonymous => Err(DraftError::NotAuthenticated),
            Actor::User(id) => {
                if self.members.is_admin(id) || self.members.role_of(id, team_id).is_some() {
                    Ok(())
                } else {
                    Err(DraftError::NotAuthorized(format!(
                        "user {id} is not a member of team {team_id}"
                    )))
                }
            }
        }
    }

    fn vote_weight(&self, user_id: &str, team_id: TeamId) -> u32 {
        self.members
            .role_of(user_id, team_id)
            .and_then(|role| self.rules.weight_of(&role))
            .unwrap_or(0)
    }

    /// Fetch the ranking outside any transaction. Read paths degrade to an
    /// empty ranking rather than failing.
    fn ranking_or_empty(&self) -> Vec<RankedCard> {
        self.ranking.undrafted_cards().unwrap_or_else(|e| {
            warn!("Card ranking unavailable, using stored queue only: {e:#}");
            Vec::new()
        })
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub fn active_season(&self) -> Result<Option<Season>, DraftError> {
        Ok(self.db.read(|conn| seasons::active(conn))?)
    }

    pub fn create_draft_session(
        &self,
        actor: &Actor,
        request: NewSession,
    ) -> Result<DraftSession, DraftError> {
        self.require_admin(actor)?;
        if !(request.hours_per_pick.is_finite()
            && request.hours_per_pick > 0.0
            && request.hours_per_pick <= DraftSession::MAX_HOURS_PER_PICK)
        {
            return Err(DraftError::InvalidConfiguration(format!(
                "hours_per_pick must be positive and at most {}, got {}",
                DraftSession::MAX_HOURS_PER_PICK,
                request.hours_per_pick
            )));
        }
        if request.end_time.is_some_and(|end| end <= request.start_time) {
            return Err(DraftError::InvalidConfiguration(
                "end_time must be after start_time".into(),
            ));
        }
        total_picks(&request.team_order, request.total_rounds)?;

        let session = self.db.write(|tx| -> Result<DraftSession, DraftError> {
            let season = seasons::get(tx, request.season_id)?
                .ok_or_else(|| DraftError::not_found("season", request.season_id))?;
            if !season.active {
                return Err(DraftError::InvalidRequest(format!(
                    "season {} is not the active season",
                    season.id
                )));
            }
            if let Some(open) = sessions::open_for_season(tx, season.id)? {
                return Err(DraftError::InvalidRequest(format!(
                    "season {} already has draft session {} ({})",
                    season.id, open.id, open.status
                )));
            }
            for &team_id in &request.team_order {
                if teams::get(tx, team_id)?.is_none() {
                    return Err(DraftError::not_found("team", team_id));
                }
            }

            let id = sessions::insert(
                tx,
                season.id,
                request.total_rounds,
                request.hours_per_pick,
                request.start_time,
                request.end_time,
            )?;
            sessions::insert_order(tx, id, &request.team_order)?;
            sessions::get(tx, id)?.ok_or_else(|| DraftError::not_found("draft session", id))
        })?;

        info!(
            "Created draft session {} for season {}: {} teams x {} rounds, {}h per pick, starts {}",
            session.id,
            session.season_id,
            request.team_order.len(),
            session.total_rounds,
            session.hours_per_pick,
            session.start_time
        );
        Ok(session)
    }

    pub fn draft_status(&self, session_id: SessionId) -> Result<DraftStatus, DraftError> {
        let board = self.db.read(|conn| clock::load_board(conn, session_id))?;
        Ok(DraftStatus::from(&board))
    }

    /// Sessions the timer should keep polling.
    pub fn pollable_sessions(&self) -> Result<Vec<SessionId>, DraftError> {
        let sessions = self.db.read(|conn| sessions::list_pollable(conn))?;
        Ok(sessions.into_iter().map(|s| s.id).collect())
    }

    pub fn list_picks(&self, session_id: SessionId) -> Result<Vec<DraftPick>, DraftError> {
        self.db.read(|conn| -> Result<Vec<DraftPick>, DraftError> {
            if sessions::get(conn, session_id)?.is_none() {
                return Err(DraftError::not_found("draft session", session_id));
            }
            Ok(picks::list_for_session(conn, session_id)?)
        })
    }

    pub fn pause_session(&self, actor: &Actor, session_id: SessionId) -> Result<DraftSession, DraftError> {
        self.require_admin(actor)?;
        let now = self.clock.now();
        self.db.write(|tx| -> Result<DraftSession, DraftError> {
            let board = clock::load_board(tx, session_id)?;
            if board.session.status != SessionStatus::Active {
                return Err(DraftError::SessionNotActive(session_id));
            }
            clock::pause(tx, &board, now)
        })
    }

    pub fn resume_session(&self, actor: &Actor, session_id: SessionId) -> Result<DraftSession, DraftError> {
        self.require_admin(actor)?;
        let now = self.clock.now();
        self.db.write(|tx| -> Result<DraftSession, DraftError> {
            let board = clock::load_board(tx, session_id)?;
            if board.session.status != SessionStatus::Paused {
                return Err(DraftError::InvalidRequest(format!(
                    "draft session {session_id} is {}, not paused",
                    board.session.status
                )));
            }
            if board.session.end_time_passed(now) {
                return clock::complete(tx, &board, "end time passed while paused");
            }
            clock::resume(tx, &board, now)
        })
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Act on the session's clock if anything is due. Safe to call from any
    /// number of callers at any rate: every branch re-reads the session inside
    /// its transaction and does nothing if another caller got there first.
    pub fn check_draft_timer(&self, session_id: SessionId) -> Result<TimerOutcome, DraftError> {
        let now = self.clock.now();
        let board = self.db.read(|conn| clock::load_board(conn, session_id))?;

        match board.session.status {
            SessionStatus::Scheduled if now >= board.session.start_time => {
                return self.db.write(|tx| self.start_if_due(tx, session_id, now));
            }
            SessionStatus::Active => {}
            status => {
                debug!("Timer check on session {session_id}: {status}, nothing to do");
                return Ok(TimerOutcome::Idle);
            }
        }

        if !board.session.end_time_passed(now) && !deadline_passed(&board.session, now) {
            debug!(
                "Timer check on session {session_id}: deadline {:?} not reached",
                board.session.pick_deadline
            );
            return Ok(TimerOutcome::Idle);
        }

        let ranking = self.ranking.undrafted_cards();
        let outcome = self
            .db
            .write(|tx| self.resolve_expired(tx, session_id, ranking, now))?;

        if let TimerOutcome::AutoDrafted { pick } | TimerOutcome::Skipped { pick } = &outcome {
            self.votes().clear(session_id, pick.team_id);
        }
        Ok(outcome)
    }

    fn start_if_due(
        &self,
        conn: &Connection,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<TimerOutcome, DraftError> {
        let board = clock::load_board(conn, session_id)?;
        if board.session.status != SessionStatus::Scheduled || now < board.session.start_time {
            return Ok(TimerOutcome::Idle);
        }
        if board.session.end_time_passed(now) {
            clock::complete(conn, &board, "end time passed before the draft started")?;
            return Ok(TimerOutcome::Completed);
        }
        clock::activate(conn, &board, now)?;
        Ok(TimerOutcome::Activated)
    }

    fn resolve_expired(
        &self,
        conn: &Connection,
        session_id: SessionId,
        ranking: anyhow::Result<Vec<RankedCard>>,
        now: DateTime<Utc>,
    ) -> Result<TimerOutcome, DraftError> {
        let board = clock::load_board(conn, session_id)?;
        if board.session.status != SessionStatus::Active {
            return Ok(TimerOutcome::Idle);
        }
        if board.session.end_time_passed(now) {
            clock::complete(conn, &board, "hard end time reached")?;
            return Ok(TimerOutcome::Completed);
        }
        if !deadline_passed(&board.session, now) {
            return Ok(TimerOutcome::Idle);
        }
        let Some(slot) = board.current_slot() else {
            clock::complete(conn, &board, "no pick slots remain")?;
            return Ok(TimerOutcome::Completed);
        };

        let ranking = match ranking {
            Ok(ranking) => ranking,
            Err(e) => {
                let failures = board.session.ranking_failures + 1;
                if failures < self.settings.max_ranking_failures {
                    warn!(
                        "Session {session_id} pick {}: ranking unavailable ({failures} in a row), retrying on next poll: {e:#}",
                        slot.pick_number
                    );
                    clock::note_ranking_failure(conn, &board)?;
                    return Ok(TimerOutcome::RetryLater { failures });
                }
                warn!(
                    "Session {session_id} pick {}: ranking still unavailable after {failures} attempts, resolving from queue only: {e:#}",
                    slot.pick_number
                );
                Vec::new()
            }
        };

        let team = teams::get(conn, slot.team_id)?
            .ok_or_else(|| DraftError::not_found("team", slot.team_id))?;
        let stored = queue::list(conn, team.id)?;
        let pool = pool_by_id(conn)?;
        let effective = effective_queue(team.id, &stored, &ranking, &pool);

        let outcome = match autodraft::select(&effective, &ranking, &pool, team.balance) {
            AutoSelection::Card {
                card_id,
                from_queue,
                ..
            } => {
                debug!(
                    "Auto-drafting card {card_id} for team {} ({})",
                    team.id,
                    if from_queue { "queue" } else { "ranking fallback" }
                );
                let pick = resolver::claim(conn, &board.session, &slot, card_id, PickSource::Auto, now)?;
                TimerOutcome::AutoDrafted { pick }
            }
            AutoSelection::Skip => {
                let pick = resolver::skip(conn, &board.session, &slot, now)?;
                TimerOutcome::Skipped { pick }
            }
        };
        clock::advance(conn, &board, &slot, now)?;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Picks
    // -----------------------------------------------------------------------

    /// Manual pick by a member of the team on the clock.
    pub fn submit_pick(
        &self,
        actor: &Actor,
        session_id: SessionId,
        team_id: TeamId,
        card_id: CardId,
    ) -> Result<DraftPick, DraftError> {
        self.require_team_access(actor, team_id)?;
        let now = self.clock.now();

        let mut votes = self.votes();
        let result = self.db.write(|tx| -> Result<DraftPick, DraftError> {
            let board = clock::load_board(tx, session_id)?;
            resolver::available_card(tx, card_id)?;
            let slot = self.open_slot_for(tx, &board, team_id, now)?;
            let pick = resolver::claim(tx, &board.session, &slot, card_id, PickSource::Manual, now)?;
            clock::advance(tx, &board, &slot, now)?;
            Ok(pick)
        });

        match &result {
            Ok(_) => votes.clear(session_id, team_id),
            Err(e) => warn!("Rejected pick of card {card_id} by team {team_id} in session {session_id}: {e}"),
        }
        result
    }

    /// Checks shared by manual and vote picks, in the order they are reported:
    /// session live, drafting permitted, team on the clock.
    fn open_slot_for(
        &self,
        conn: &Connection,
        board: &Board,
        team_id: TeamId,
        now: DateTime<Utc>,
    ) -> Result<PickSlot, DraftError> {
        let session = &board.session;
        if session.status != SessionStatus::Active || session.end_time_passed(now) {
            return Err(DraftError::SessionNotActive(session.id));
        }
        let season = seasons::get(conn, session.season_id)?
            .ok_or_else(|| DraftError::not_found("season", session.season_id))?;
        if !self.gate.is_drafting_permitted(&season) {
            return Err(DraftError::DraftingNotPermitted);
        }
        match board.current_slot() {
            Some(slot) if slot.team_id == team_id => Ok(slot),
            _ => Err(DraftError::NotOnClock {
                team_id,
                on_the_clock: board.on_the_clock(),
            }),
        }
    }

    /// Undo a pick and credit the team what it paid.
    pub fn refund_draft_pick(
        &self,
        actor: &Actor,
        team_id: TeamId,
        pick_id: PickId,
    ) -> Result<Refund, DraftError> {
        self.require_admin(actor)?;
        let now = self.clock.now();
        self.db.write(|tx| -> Result<Refund, DraftError> {
            let pick = picks::get(tx, pick_id)?.ok_or_else(|| DraftError::not_found("draft pick", pick_id))?;
            if pick.team_id != team_id {
                return Err(DraftError::InvalidRequest(format!(
                    "pick {pick_id} belongs to team {}, not team {team_id}",
                    pick.team_id
                )));
            }
            let season_id = sessions::get(tx, pick.session_id)?.map(|s| s.season_id);
            let (refund, _) = resolver::undraft(tx, &pick, season_id, now)?;
            Ok(refund)
        })
    }

    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    /// The team's effective queue: stored entries then the ranking.
    pub fn team_queue(&self, actor: &Actor, team_id: TeamId) -> Result<Vec<QueueEntry>, DraftError> {
        self.require_team_access(actor, team_id)?;
        let ranking = self.ranking_or_empty();
        self.db.read(|conn| -> Result<Vec<QueueEntry>, DraftError> {
            ensure_team(conn, team_id)?;
            let stored = queue::list(conn, team_id)?;
            let pool = pool_by_id(conn)?;
            Ok(effective_queue(team_id, &stored, &ranking, &pool))
        })
    }

    /// Replace the team's manual entries.
    pub fn set_team_queue(
        &self,
        actor: &Actor,
        team_id: TeamId,
        items: &[QueueItem],
    ) -> Result<(), DraftError> {
        self.require_team_access(actor, team_id)?;
        let mut seen = HashSet::with_capacity(items.len());
        if let Some(dup) = items.iter().find(|i| !seen.insert(i.card_id)) {
            return Err(DraftError::InvalidRequest(format!(
                "card {} appears more than once in the queue",
                dup.card_id
            )));
        }

        // Pinned entries first; relative order is otherwise kept.
        let mut entries: Vec<(CardId, bool)> = items.iter().map(|i| (i.card_id, i.pinned)).collect();
        entries.sort_by_key(|(_, pinned)| !pinned);

        self.db.write(|tx| -> Result<(), DraftError> {
            ensure_team(tx, team_id)?;
            for (card_id, _) in &entries {
                resolver::available_card(tx, *card_id)?;
            }
            queue::replace(tx, team_id, &entries)?;
            Ok(())
        })?;
        info!("Team {team_id} queue set to {} entries", entries.len());
        Ok(())
    }

    pub fn add_to_queue(
        &self,
        actor: &Actor,
        team_id: TeamId,
        card_id: CardId,
        pinned: bool,
    ) -> Result<(), DraftError> {
        self.require_team_access(actor, team_id)?;
        self.db.write(|tx| -> Result<(), DraftError> {
            ensure_team(tx, team_id)?;
            resolver::available_card(tx, card_id)?;
            let mut entries = stored_pairs(tx, team_id)?;
            if entries.iter().any(|(id, _)| *id == card_id) {
                return Err(DraftError::InvalidRequest(format!(
                    "card {card_id} is already in team {team_id}'s queue"
                )));
            }
            let at = if pinned {
                entries.iter().take_while(|(_, p)| *p).count()
            } else {
                entries.len()
            };
            entries.insert(at, (card_id, pinned));
            queue::replace(tx, team_id, &entries)?;
            Ok(())
        })
    }

    pub fn remove_from_queue(
        &self,
        actor: &Actor,
        team_id: TeamId,
        card_id: CardId,
    ) -> Result<(), DraftError> {
        self.require_team_access(actor, team_id)?;
        self.db.write(|tx| -> Result<(), DraftError> {
            let mut entries = stored_pairs(tx, team_id)?;
            let before = entries.len();
            entries.retain(|(id, _)| *id != card_id);
            if entries.len() == before {
                return Err(DraftError::not_found("queue entry", card_id));
            }
            queue::replace(tx, team_id, &entries)?;
            Ok(())
        })
    }

    /// Pin or unpin an entry. A newly pinned entry goes to the end of the
    /// pinned group; an unpinned one to the front of the rest.
    pub fn pin_queue_entry(
        &self,
        actor: &Actor,
        team_id: TeamId,
        card_id: CardId,
        pinned: bool,
    ) -> Result<(), DraftError> {
        self.require_team_access(actor, team_id)?;
        self.db.write(|tx| -> Result<(), DraftError> {
            let mut entries = stored_pairs(tx, team_id)?;
            let entry = entries
                .iter_mut()
                .find(|(id, _)| *id == card_id)
                .ok_or_else(|| DraftError::not_found("queue entry", card_id))?;
            entry.1 = pinned;
            entries.sort_by_key(|(_, p)| !p);
            queue::replace(tx, team_id, &entries)?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Votes
    // -----------------------------------------------------------------------

    /// Toggle the caller's vote for the team's top affordable queued card and
    /// execute the pick once the weighted tally reaches the threshold.
    pub fn toggle_queue_pick_vote(
        &self,
        actor: &Actor,
        session_id: SessionId,
        team_id: TeamId,
        card_id: CardId,
    ) -> Result<VoteOutcome, DraftError> {
        let user_id = match actor {
            Actor::User(id) => id.as_str(),
            Actor::Anonymous => return Err(DraftError::NotAuthenticated),
            Actor::System => {
                return Err(DraftError::NotAuthorized("the system cannot vote".into()))
            }
        };
        let role = self.members.role_of(user_id, team_id).ok_or_else(|| {
            DraftError::NotAuthorized(format!("user {user_id} is not a member of team {team_id}"))
        })?;
        if self.rules.weight_of(&role).is_none() {
            return Err(DraftError::NotAuthorized(format!(
                "role '{role}' carries no vote weight"
            )));
        }

        let ranking = self.ranking_or_empty();
        let threshold = self.rules.threshold_for(team_id);
        let now = self.clock.now();

        let mut book = self.votes();
        let (set, voted, pick) = self.db.write(|tx| -> Result<_, DraftError> {
            let board = clock::load_board(tx, session_id)?;
            let slot = self.open_slot_for(tx, &board, team_id, now)?;

            let team = teams::get(tx, team_id)?.ok_or_else(|| DraftError::not_found("team", team_id))?;
            let stored = queue::list(tx, team_id)?;
            let pool = pool_by_id(tx)?;
            let effective = effective_queue(team_id, &stored, &ranking, &pool);
            if effective.is_empty() {
                return Err(DraftError::InvalidRequest(format!(
                    "team {team_id} has nothing queued to vote on"
                )));
            }
            let Some(candidate) = first_affordable(&effective, team.balance) else {
                let cheapest = effective.iter().map(|e| e.cost).min().unwrap_or_default();
                return Err(DraftError::InsufficientBalance {
                    team_id,
                    balance: team.balance,
                    cost: cheapest,
                });
            };
            if candidate.card_id != card_id {
                return Err(DraftError::StaleVoteCandidate {
                    expected: Some(candidate.card_id),
                    got: card_id,
                });
            }

            let (set, voted) = book.toggled(session_id, team_id, card_id, user_id);
            let tally = set.tally(|voter| self.vote_weight(voter, team_id));
            if tally < threshold {
                return Ok((set, voted, None));
            }

            let pick = resolver::claim(tx, &board.session, &slot, card_id, PickSource::Vote, now)?;
            clock::advance(tx, &board, &slot, now)?;
            Ok((set, voted, Some(pick)))
        })?;

        let tally = set.tally(|voter| self.vote_weight(voter, team_id));
        if pick.is_some() {
            book.clear(session_id, team_id);
            info!("Team {team_id} voted card {card_id} through with {tally}/{threshold}");
        } else {
            book.store(session_id, team_id, set);
            debug!(
                "Vote by {user_id} on card {card_id} for team {team_id}: {tally}/{threshold}"
            );
        }

        Ok(VoteOutcome {
            card_id,
            voted,
            tally,
            threshold,
            pick,
        })
    }

    // -----------------------------------------------------------------------
    // Economy
    // -----------------------------------------------------------------------

    pub fn allocate(
        &self,
        actor: &Actor,
        season_id: SeasonId,
        team_id: TeamId,
        amount: i64,
    ) -> Result<Allocation, DraftError> {
        self.require_admin(actor)?;
        let now = self.clock.now();
        self.db.write(|tx| -> Result<Allocation, DraftError> {
            let season = active_season_by_id(tx, season_id)?;
            ledger::allocate(tx, &season, team_id, amount, now)
        })
    }

    pub fn allocate_all(
        &self,
        actor: &Actor,
        season_id: SeasonId,
        amount: i64,
    ) -> Result<AllocationSummary, DraftError> {
        self.require_admin(actor)?;
        let now = self.clock.now();
        let summary = self.db.write(|tx| -> Result<AllocationSummary, DraftError> {
            let season = active_season_by_id(tx, season_id)?;
            ledger::allocate_all(tx, &season, amount, now)
        })?;
        info!(
            "Allocated up to {amount} cubucks to {} teams; {} already at cap",
            summary.allocations.len(),
            summary.teams_skipped
        );
        Ok(summary)
    }

    pub fn adjust_balance(
        &self,
        actor: &Actor,
        team_id: TeamId,
        delta: i64,
        season_id: Option<SeasonId>,
        note: Option<String>,
    ) -> Result<Team, DraftError> {
        self.require_admin(actor)?;
        let now = self.clock.now();
        let team = self
            .db
            .write(|tx| ledger::adjust(tx, team_id, delta, season_id, note, now))?;
        info!(
            "Adjusted team {team_id} balance by {delta} (now {})",
            team.balance
        );
        Ok(team)
    }

    pub fn ledger(&self, actor: &Actor, team_id: TeamId) -> Result<Vec<CubucksTransaction>, DraftError> {
        self.require_team_access(actor, team_id)?;
        self.db.read(|conn| -> Result<Vec<CubucksTransaction>, DraftError> {
            ensure_team(conn, team_id)?;
            Ok(ledger_rows::list_for_team(conn, team_id)?)
        })
    }

    /// Replay the team's ledger and compare with the cached balance.
    pub fn audit_ledger(&self, actor: &Actor, team_id: TeamId) -> Result<LedgerAudit, DraftError> {
        self.require_team_access(actor, team_id)?;
        let audit = self.db.read(|conn| ledger::audit(conn, team_id))?;
        if !audit.is_consistent() {
            warn!(
                "Ledger mismatch for team {team_id}: cached {} vs replayed {}",
                audit.cached_balance, audit.replayed_balance
            );
        }
        Ok(audit)
    }

    pub fn team(&self, team_id: TeamId) -> Result<Team, DraftError> {
        self.db.read(|conn| -> Result<Team, DraftError> {
            teams::get(conn, team_id)?.ok_or_else(|| DraftError::not_found("team", team_id))
        })
    }

    /// Every team, in id order.
    pub fn teams(&self) -> Result<Vec<Team>, DraftError> {
        Ok(self.db.read(|conn| teams::list(conn))?)
    }
}

fn deadline_passed(session: &DraftSession, now: DateTime<Utc>) -> bool {
    session.pick_deadline.is_some_and(|deadline| now >= deadline)
}

fn pool_by_id(conn: &Connection) -> Result<HashMap<CardId, PoolCard>, DraftError> {
    Ok(cards::list_all(conn)?.into_iter().map(|c| (c.id, c)).collect())
}

fn ensure_team(conn: &Connection, team_id: TeamId) -> Result<(), DraftError> {
    match teams::get(conn, team_id)? {
        Some(_) => Ok(()),
        None => Err(DraftError::not_found("team", team_id)),
    }
}

fn stored_pairs(conn: &Connection, team_id: TeamId) -> Result<Vec<(CardId, bool)>, DraftError> {
    Ok(queue::list(conn, team_id)?
        .into_iter()
        .map(|e| (e.card_id, e.pinned))
        .collect())
}

fn active_season_by_id(conn: &Connection, season_id: SeasonId) -> Result<Season, DraftError> {
    let season = seasons::get(conn, season_id)?.ok_or_else(|| DraftError::not_found("season", season_id))?;
    if !season.active {
        return Err(DraftError::InvalidRequest(format!(
            "season {season_id} is not the active season"
        )));
    }
    Ok(season)
}
