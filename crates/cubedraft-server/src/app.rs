// Application layer: request dispatch and the server-owned draft timer.
//
// The event loop answers WebSocket requests and, on a fixed interval, polls
// every scheduled or active session's timer so the draft advances whether or
// not any client is connected. Engine calls block on SQLite and run on the
// blocking thread pool.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cubedraft_core::draft::clock::TimerOutcome;
use cubedraft_core::draft::engine::{DraftEngine, NewSession};
use cubedraft_core::DraftError;

use crate::protocol::{parse_request, Call, Request, Response};
use crate::ws_server::WsEvent;

/// Run the application event loop until the WebSocket side shuts down.
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    engine: Arc<DraftEngine>,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    info!(
        "Application event loop started (timer every {}s)",
        poll_interval.as_secs()
    );

    let mut timer = tokio::time::interval(poll_interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut poll_task: Option<JoinHandle<usize>> = None;
    let mut connected: usize = 0;

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(WsEvent::Connected { addr }) => {
                        connected += 1;
                        info!("Client connected from {} ({} connected)", addr, connected);
                    }
                    Some(WsEvent::Disconnected { addr }) => {
                        connected = connected.saturating_sub(1);
                        info!("Client {} disconnected ({} connected)", addr, connected);
                    }
                    Some(WsEvent::Request { addr, text, reply }) => {
                        let engine = Arc::clone(&engine);
                        tokio::task::spawn_blocking(move || {
                            let response = handle_request(&engine, &text);
                            if reply.send(response).is_err() {
                                debug!("Client {} left before its reply was ready", addr);
                            }
                        });
                    }
                    None => {
                        info!("WebSocket channel closed");
                        break;
                    }
                }
            }

            _ = timer.tick() => {
                if poll_task.as_ref().is_some_and(|task| !task.is_finished()) {
                    debug!("Previous timer poll still running; skipping this tick");
                    continue;
                }
                let engine = Arc::clone(&engine);
                poll_task = Some(tokio::task::spawn_blocking(move || poll_timers(&engine)));
            }
        }
    }

    if let Some(task) = poll_task {
        let _ = task.await;
    }
    info!("Application event loop exiting");
    Ok(())
}

/// Check every scheduled or active session once. Returns how many sessions
/// changed state. Failures are logged and left for the next poll.
pub fn poll_timers(engine: &DraftEngine) -> usize {
    let sessions = match engine.pollable_sessions() {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to list sessions for timer poll: {}", e);
            return 0;
        }
    };

    let mut acted = 0;
    for session_id in sessions {
        match engine.check_draft_timer(session_id) {
            Ok(TimerOutcome::Idle) => {}
            Ok(TimerOutcome::RetryLater { failures }) => {
                warn!(
                    "Session {}: ranking unavailable ({} consecutive failures), will retry",
                    session_id, failures
                );
            }
            Ok(outcome) => {
                debug!("Session {}: timer {:?}", session_id, outcome);
                acted += 1;
            }
            Err(e) => {
                error!("Timer check failed for session {}: {}", session_id, e);
            }
        }
    }
    acted
}

/// Decode one request frame, run it, and encode the reply.
pub fn handle_request(engine: &DraftEngine, text: &str) -> String {
    let request = match parse_request(text) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected request: {}", e.message);
            return Response::from_decode_error(e).to_json();
        }
    };

    let response = match dispatch(engine, &request) {
        Ok(result) => Response::success(request.id, result),
        Err(e) => {
            match &e {
                DraftError::Storage(inner) => error!("Request {:?} failed: {:#}", request.id, inner),
                other => debug!("Request {:?} refused: {}", request.id, other),
            }
            Response::from_error(request.id, &e)
        }
    };
    response.to_json()
}

/// Route a decoded request to the engine.
pub fn dispatch(engine: &DraftEngine, request: &Request) -> Result<Value, DraftError> {
    let actor = &request.actor;
    match request.call.clone() {
        Call::CreateDraftSession {
            season_id,
            team_order,
            total_rounds,
            hours_per_pick,
            start_time,
            end_time,
        } => {
            let season_id = match season_id {
                Some(id) => id,
                None => {
                    engine
                        .active_season()?
                        .ok_or_else(|| DraftError::InvalidRequest("no active season".into()))?
                        .id
                }
            };
            let team_order = match team_order {
                Some(order) => order,
                None => engine.teams()?.into_iter().map(|t| t.id).collect(),
            };
            let session = engine.create_draft_session(
                actor,
                NewSession {
                    season_id,
                    team_order,
                    total_rounds,
                    hours_per_pick,
                    start_time: start_time.unwrap_or_else(|| engine.now()),
                    end_time,
                },
            )?;
            json(session)
        }
        Call::GetDraftStatus { session_id } => json(engine.draft_status(session_id)?),
        Call::CheckDraftTimer { session_id } => json(engine.check_draft_timer(session_id)?),
        Call::ListDraftPicks { session_id } => json(engine.list_picks(session_id)?),
        Call::SubmitPick {
            session_id,
            team_id,
            card_id,
        } => json(engine.submit_pick(actor, session_id, team_id, card_id)?),
        Call::GetTeamDraftQueue { team_id } => json(engine.team_queue(actor, team_id)?),
        Call::SetTeamDraftQueue { team_id, entries } => {
            engine.set_team_queue(actor, team_id, &entries)?;
            json(engine.team_queue(actor, team_id)?)
        }
        Call::AddToQueue {
            team_id,
            card_id,
            pinned,
        } => {
            engine.add_to_queue(actor, team_id, card_id, pinned)?;
            json(engine.team_queue(actor, team_id)?)
        }
        Call::RemoveFromQueue { team_id, card_id } => {
            engine.remove_from_queue(actor, team_id, card_id)?;
            json(engine.team_queue(actor, team_id)?)
        }
        Call::PinQueueEntry {
            team_id,
            card_id,
            pinned,
        } => {
            engine.pin_queue_entry(actor, team_id, card_id, pinned)?;
            json(engine.team_queue(actor, team_id)?)
        }
        Call::ToggleQueuePickVote {
            session_id,
            team_id,
            card_id,
        } => {
            let outcome = engine.toggle_queue_pick_vote(actor, session_id, team_id, card_id)?;
            Ok(serde_json::json!({
                "card_id": outcome.card_id,
                "voted": outcome.voted,
                "tally": outcome.tally,
                "threshold": outcome.threshold,
                "pick_executed": outcome.pick_executed(),
                "pick": to_value(&outcome.pick)?,
            }))
        }
        Call::RefundDraftPick {
            team_id,
            draft_pick_id,
        } => json(engine.refund_draft_pick(actor, team_id, draft_pick_id)?),
        Call::PauseDraftSession { session_id } => json(engine.pause_session(actor, session_id)?),
        Call::ResumeDraftSession { session_id } => json(engine.resume_session(actor, session_id)?),
        Call::AllocateCubucks {
            season_id,
            team_id,
            amount,
        } => {
            let season_id = season_or_active(engine, season_id)?;
            json(engine.allocate(actor, season_id, team_id, amount)?)
        }
        Call::AllocateCubucksToAll { season_id, amount } => {
            let season_id = season_or_active(engine, season_id)?;
            json(engine.allocate_all(actor, season_id, amount)?)
        }
        Call::AdjustBalance {
            team_id,
            delta,
            season_id,
            note,
        } => json(engine.adjust_balance(actor, team_id, delta, season_id, note)?),
        Call::GetLedger { team_id } => json(engine.ledger(actor, team_id)?),
        Call::VerifyLedger { team_id } => {
            let audit = engine.audit_ledger(actor, team_id)?;
            Ok(serde_json::json!({
                "team_id": audit.team_id,
                "cached_balance": audit.cached_balance,
                "replayed_balance": audit.replayed_balance,
                "transactions": audit.transactions,
                "consistent": audit.is_consistent(),
            }))
        }
    }
}

fn season_or_active(engine: &DraftEngine, season_id: Option<i64>) -> Result<i64, DraftError> {
    match season_id {
        Some(id) => Ok(id),
        None => Ok(engine
            .active_season()?
            .ok_or_else(|| DraftError::InvalidRequest("no active season".into()))?
            .id),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, DraftError> {
    serde_json::to_value(value)
        .map_err(|e| DraftError::Storage(anyhow::Error::new(e).context("failed to encode result")))
}

fn json<T: Serialize>(value: T) -> Result<Value, DraftError> {
    to_value(&value)
}
