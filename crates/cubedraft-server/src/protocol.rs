// Wire protocol: one JSON request per WebSocket text frame, one JSON reply.
//
// Request:  {"id": 7, "user_id": "captain1", "method": "submitPick",
//            "params": {"session_id": 1, "team_id": 2, "card_id": 40}}
// Reply:    {"id": 7, "ok": true, "result": {...}}
//           {"id": 7, "ok": false, "error": {"code": "NOT_ON_CLOCK", "message": "..."}}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cubedraft_core::draft::engine::{Actor, QueueItem};
use cubedraft_core::model::{CardId, PickId, SeasonId, SessionId, TeamId};
use cubedraft_core::DraftError;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// The envelope as it arrives. `params` is decoded later, against `method`.
#[derive(Debug, Clone, Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    user_id: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<u64>,
    pub actor: Actor,
    pub call: Call,
}

/// Every operation a client can invoke.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Call {
    CreateDraftSession {
        /// Defaults to the active season.
        #[serde(default)]
        season_id: Option<SeasonId>,
        /// Defaults to every team in id order.
        #[serde(default)]
        team_order: Option<Vec<TeamId>>,
        total_rounds: u32,
        hours_per_pick: f64,
        /// Defaults to now.
        #[serde(default)]
        start_time: Option<DateTime<Utc>>,
        #[serde(default)]
        end_time: Option<DateTime<Utc>>,
    },
    GetDraftStatus {
        session_id: SessionId,
    },
    CheckDraftTimer {
        session_id: SessionId,
    },
    ListDraftPicks {
        session_id: SessionId,
    },
    SubmitPick {
        session_id: SessionId,
        team_id: TeamId,
        card_id: CardId,
    },
    GetTeamDraftQueue {
        team_id: TeamId,
    },
    SetTeamDraftQueue {
        team_id: TeamId,
        entries: Vec<QueueItem>,
    },
    AddToQueue {
        team_id: TeamId,
        card_id: CardId,
        #[serde(default)]
        pinned: bool,
    },
    RemoveFromQueue {
        team_id: TeamId,
        card_id: CardId,
    },
    PinQueueEntry {
        team_id: TeamId,
        card_id: CardId,
        pinned: bool,
    },
    ToggleQueuePickVote {
        session_id: SessionId,
        team_id: TeamId,
        card_id: CardId,
    },
    RefundDraftPick {
        team_id: TeamId,
        draft_pick_id: PickId,
    },
    PauseDraftSession {
        session_id: SessionId,
    },
    ResumeDraftSession {
        session_id: SessionId,
    },
    AllocateCubucks {
        #[serde(default)]
        season_id: Option<SeasonId>,
        team_id: TeamId,
        amount: i64,
    },
    AllocateCubucksToAll {
        #[serde(default)]
        season_id: Option<SeasonId>,
        amount: i64,
    },
    AdjustBalance {
        team_id: TeamId,
        delta: i64,
        #[serde(default)]
        season_id: Option<SeasonId>,
        #[serde(default)]
        note: Option<String>,
    },
    GetLedger {
        team_id: TeamId,
    },
    VerifyLedger {
        team_id: TeamId,
    },
}

/// A frame that could not be decoded. Carries the request id when the
/// envelope itself was readable so the reply can still be correlated.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub id: Option<u64>,
    pub message: String,
}

/// Decode one text frame.
pub fn parse_request(text: &str) -> Result<Request, DecodeError> {
    let raw: RawRequest = serde_json::from_str(text).map_err(|e| DecodeError {
        id: None,
        message: format!("malformed request: {e}"),
    })?;
    let id = raw.id;

    let params = match raw.params {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let call: Call = serde_json::from_value(serde_json::json!({
        "method": raw.method,
        "params": params,
    }))
    .map_err(|e| DecodeError {
        id,
        message: format!("bad {} request: {e}", raw.method),
    })?;

    let actor = match raw.user_id {
        Some(user) if !user.trim().is_empty() => Actor::User(user),
        _ => Actor::Anonymous,
    };

    Ok(Request { id, actor, call })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn from_error(id: Option<u64>, err: &DraftError) -> Self {
        Self::failure(id, err.code(), err.to_string())
    }

    pub fn from_decode_error(err: DecodeError) -> Self {
        Self::failure(err.id, "BAD_REQUEST", err.message)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":null,"ok":false,"error":{{"code":"INTERNAL","message":"failed to encode reply: {e}"}}}}"#
            )
        })
    }
}
