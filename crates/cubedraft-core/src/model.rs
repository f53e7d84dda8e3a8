// Durable records of the draft: teams, seasons, pool cards, sessions, picks,
// queue entries and ledger transactions.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DraftError;

pub type TeamId = i64;
pub type SeasonId = i64;
pub type CardId = i64;
pub type SessionId = i64;
pub type PickId = i64;
pub type TransactionId = i64;

// ---------------------------------------------------------------------------
// Teams and seasons
// ---------------------------------------------------------------------------

/// A drafting team and its cached cubucks totals. The ledger is the source
/// of truth; `balance` is kept in step with it on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonPhase {
    Preseason,
    Draft,
    Season,
    Playoffs,
    Postseason,
}

impl SeasonPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonPhase::Preseason => "preseason",
            SeasonPhase::Draft => "draft",
            SeasonPhase::Season => "season",
            SeasonPhase::Playoffs => "playoffs",
            SeasonPhase::Postseason => "postseason",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preseason" => Some(SeasonPhase::Preseason),
            "draft" => Some(SeasonPhase::Draft),
            "season" => Some(SeasonPhase::Season),
            "playoffs" => Some(SeasonPhase::Playoffs),
            "postseason" => Some(SeasonPhase::Postseason),
            _ => None,
        }
    }
}

/// A league season. At most one season is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub name: String,
    pub active: bool,
    pub phase: SeasonPhase,
    /// Maximum balance an allocation may bring a team to.
    pub cubucks_cap: i64,
}

// ---------------------------------------------------------------------------
// Card pool
// ---------------------------------------------------------------------------

/// A card in the shared draft pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCard {
    pub id: CardId,
    pub name: String,
    pub cost: i64,
    /// Desirability score; higher ranks first.
    pub rank: f64,
    pub colors: Vec<String>,
    pub drafted: bool,
}

/// One entry of the global desirability ordering supplied by the ranking
/// provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCard {
    pub card_id: CardId,
    pub cost: i64,
    pub rank: f64,
    pub colors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Sessions and order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(SessionStatus::Scheduled),
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A draft session. `current_pick` is the zero-based index of the slot on
/// the clock; it equals the slot count once the draft is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSession {
    pub id: SessionId,
    pub season_id: SeasonId,
    pub status: SessionStatus,
    pub total_rounds: u32,
    pub hours_per_pick: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_pick: u32,
    pub pick_deadline: Option<DateTime<Utc>>,
    /// Time left on the current pick when the session was paused.
    pub paused_remaining_ms: Option<i64>,
    /// Consecutive ranking-provider failures seen while resolving the
    /// current expired pick.
    pub ranking_failures: u32,
}

impl DraftSession {
    /// Longest pick window a session may be configured with, in hours.
    pub const MAX_HOURS_PER_PICK: f64 = 24.0 * 366.0;

    /// Length of one pick window.
    pub fn pick_window(&self) -> Result<TimeDelta, DraftError> {
        let millis = self.hours_per_pick * 3_600_000.0;
        if !(millis.is_finite() && millis > 0.0 && self.hours_per_pick <= Self::MAX_HOURS_PER_PICK) {
            return Err(DraftError::InvalidConfiguration(format!(
                "hours_per_pick out of range: {}",
                self.hours_per_pick
            )));
        }
        TimeDelta::try_milliseconds(millis.round() as i64).ok_or_else(|| {
            DraftError::InvalidConfiguration(format!(
                "hours_per_pick out of range: {}",
                self.hours_per_pick
            ))
        })
    }

    /// Deadline for a pick window opening at `from`, never later than the
    /// hard end time.
    pub fn deadline_from(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, DraftError> {
        let deadline = from
            .checked_add_signed(self.pick_window()?)
            .ok_or_else(|| {
                DraftError::InvalidConfiguration(format!(
                    "pick deadline overflows: {from} + {} hours",
                    self.hours_per_pick
                ))
            })?;
        Ok(clamp_to_end(deadline, self.end_time))
    }

    pub fn end_time_passed(&self, now: DateTime<Utc>) -> bool {
        self.end_time.is_some_and(|end| now >= end)
    }
}

/// `deadline`, or the hard end time if that comes first.
pub fn clamp_to_end(deadline: DateTime<Utc>, end_time: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match end_time {
        Some(end) if end < deadline => end,
        _ => deadline,
    }
}

/// A team's seat in the draft order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOrderEntry {
    pub session_id: SessionId,
    pub team_id: TeamId,
    /// Zero-based seat in round one.
    pub position: u32,
    pub picks_made: u32,
}

/// One slot of the expanded snake order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickSlot {
    /// Absolute pick number, 1-indexed.
    pub pick_number: u32,
    /// Round number, 1-indexed.
    pub round: u32,
    pub team_id: TeamId,
}

// ---------------------------------------------------------------------------
// Picks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickSource {
    Manual,
    Auto,
    Vote,
}

impl PickSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickSource::Manual => "manual",
            PickSource::Auto => "auto",
            PickSource::Vote => "vote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(PickSource::Manual),
            "auto" => Some(PickSource::Auto),
            "vote" => Some(PickSource::Vote),
            _ => None,
        }
    }
}

/// A resolved pick slot. `card_id` is `None` for a skipped (forfeited) pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPick {
    pub id: PickId,
    pub session_id: SessionId,
    pub team_id: TeamId,
    pub card_id: Option<CardId>,
    pub round: u32,
    pub pick_number: u32,
    pub source: PickSource,
    /// Cubucks debited for this pick.
    pub cost: i64,
    pub created_at: DateTime<Utc>,
}

impl DraftPick {
    pub fn is_skipped(&self) -> bool {
        self.card_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSource {
    Manual,
    Algorithmic,
}

/// A team's declared preference for a card. Only manual entries are stored;
/// algorithmic entries are merged in from the ranking at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub team_id: TeamId,
    pub card_id: CardId,
    pub position: u32,
    pub pinned: bool,
    pub source: QueueSource,
    pub cost: i64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Allocation,
    DraftPick,
    Refund,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Allocation => "allocation",
            TransactionKind::DraftPick => "draft_pick",
            TransactionKind::Refund => "refund",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allocation" => Some(TransactionKind::Allocation),
            "draft_pick" => Some(TransactionKind::DraftPick),
            "refund" => Some(TransactionKind::Refund),
            "adjustment" => Some(TransactionKind::Adjustment),
            _ => None,
        }
    }
}

/// An append-only ledger row. `amount` is signed: spends are negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubucksTransaction {
    pub id: TransactionId,
    pub team_id: TeamId,
    pub season_id: Option<SeasonId>,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_after: i64,
    pub card_id: Option<CardId>,
    pub pick_id: Option<PickId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(hours: f64, end: Option<DateTime<Utc>>) -> DraftSession {
        DraftSession {
            id: 1,
            season_id: 1,
            status: SessionStatus::Active,
            total_rounds: 3,
            hours_per_pick: hours,
            start_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            end_time: end,
            current_pick: 0,
            pick_deadline: None,
            paused_remaining_ms: None,
            ranking_failures: 0,
        }
    }

    #[test]
    fn deadline_adds_pick_window() {
        let s = session(2.0, None);
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            s.deadline_from(from).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn fractional_hours_are_supported() {
        let s = session(0.25, None);
        assert_eq!(s.pick_window().unwrap(), chrono::Duration::minutes(15));
    }

    #[test]
    fn deadline_clamped_to_end_time() {
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();
        let s = session(2.0, Some(end));
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(s.deadline_from(from).unwrap(), end);
        assert!(!s.end_time_passed(from));
        assert!(s.end_time_passed(end));
    }

    #[test]
    fn oversized_pick_window_is_an_error() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        for hours in [1.0e12, f64::INFINITY, f64::NAN, 0.0, -1.0] {
            let err = session(hours, None).deadline_from(from).unwrap_err();
            assert_eq!(err.code(), "INVALID_CONFIGURATION", "hours {hours}");
        }
        // A year-long window still fits.
        let s = session(DraftSession::MAX_HOURS_PER_PICK, None);
        assert!(s.deadline_from(from).is_ok());
    }

    #[test]
    fn deadline_near_the_end_of_time_is_an_error() {
        let s = session(2.0, None);
        let err = s.deadline_from(DateTime::<Utc>::MAX_UTC).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn enum_strings_round_trip() {
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::Active,
            SessionStatus::Paused,
            SessionStatus::Completed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        for kind in [
            TransactionKind::Allocation,
            TransactionKind::DraftPick,
            TransactionKind::Refund,
            TransactionKind::Adjustment,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SeasonPhase::parse("draft"), Some(SeasonPhase::Draft));
        assert_eq!(PickSource::parse("vote"), Some(PickSource::Vote));
        assert_eq!(PickSource::parse("bogus"), None);
    }
}
