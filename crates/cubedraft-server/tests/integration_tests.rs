// Integration tests for the cubedraft server.
//
// These drive the server's public API end to end: JSON requests decoded and
// dispatched against a real engine, the server-owned timer poll, the async
// event loop answering WebSocket events, and first-start seeding from the
// shipped defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use cubedraft_core::db::{cards, teams, Database};
use cubedraft_core::draft::engine::Collaborators;
use cubedraft_core::external::StaticMembership;
use cubedraft_core::model::{CardId, SeasonPhase};
use cubedraft_core::time::ManualClock;
use cubedraft_core::DraftEngine;
use cubedraft_server::app;
use cubedraft_server::config::{self, LeagueConfig};
use cubedraft_server::seed;
use cubedraft_server::ws_server::WsEvent;

// ===========================================================================
// Test helpers
// ===========================================================================

struct Server {
    engine: Arc<DraftEngine>,
    db: Arc<Database>,
    clock: Arc<ManualClock>,
    next_id: std::cell::Cell<u64>,
}

impl Server {
    /// Two funded teams (40 cubucks each) in an active draft-phase season.
    fn new() -> Self {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let league = LeagueConfig {
            season: "Spring".into(),
            phase: SeasonPhase::Draft,
            cubucks_cap: 100,
            starting_cubucks: 40,
            teams: vec!["Selesnya".into(), "Boros".into()],
        };
        assert!(seed::bootstrap_league(&db, &league).unwrap());

        let members = StaticMembership::new()
            .with_admin("commissioner")
            .with_member("captain1", 1, "captain")
            .with_member("member1", 1, "member")
            .with_member("captain2", 2, "captain")
            .with_member("member2", 2, "member");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap(),
        ));
        let mut collaborators = Collaborators::standard(Arc::clone(&db), Arc::new(members));
        collaborators.clock = clock.clone();
        let engine = Arc::new(
            DraftEngine::new(
                Arc::clone(&db),
                collaborators,
                Default::default(),
                Default::default(),
            )
            .unwrap(),
        );
        Self {
            engine,
            db,
            clock,
            next_id: std::cell::Cell::new(1),
        }
    }

    fn card(&self, name: &str, cost: i64, rank: f64) -> CardId {
        self.db
            .write(|tx| cards::insert(tx, name, cost, rank, &[]))
            .unwrap()
    }

    /// Send one request as `user` and return the decoded reply.
    fn call(&self, user: Option<&str>, method: &str, params: Value) -> Value {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let mut request = json!({"id": id, "method": method, "params": params});
        if let Some(user) = user {
            request["user_id"] = json!(user);
        }
        let reply: Value =
            serde_json::from_str(&app::handle_request(&self.engine, &request.to_string())).unwrap();
        assert_eq!(reply["id"], id, "reply must echo the request id");
        reply
    }

    fn ok(&self, user: Option<&str>, method: &str, params: Value) -> Value {
        let reply = self.call(user, method, params);
        assert_eq!(reply["ok"], true, "{method} failed: {reply}");
        reply["result"].clone()
    }

    fn error_code(&self, user: Option<&str>, method: &str, params: Value) -> String {
        let reply = self.call(user, method, params);
        assert_eq!(reply["ok"], false, "{method} unexpectedly succeeded: {reply}");
        reply["error"]["code"].as_str().unwrap().to_string()
    }

    /// Create a two-round session starting now and let the timer open it.
    fn start_session(&self, hours_per_pick: f64) -> i64 {
        let session = self.ok(
            Some("commissioner"),
            "createDraftSession",
            json!({"total_rounds": 2, "hours_per_pick": hours_per_pick}),
        );
        assert_eq!(session["status"], "scheduled");
        assert_eq!(app::poll_timers(&self.engine), 1);
        session["id"].as_i64().unwrap()
    }

    fn status(&self, session_id: i64) -> Value {
        self.ok(None, "getDraftStatus", json!({"session_id": session_id}))
    }
}

fn crate_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

// ===========================================================================
// Request dispatch
// ===========================================================================

#[test]
fn manual_picks_follow_the_clock() {
    let server = Server::new();
    let bolt = server.card("Lightning Bolt", 5, 93.0);
    let helix = server.card("Lightning Helix", 4, 88.0);
    let session = server.start_session(24.0);

    let status = server.status(session);
    assert_eq!(status["status"], "active");
    assert_eq!(status["on_the_clock"], 1);
    assert_eq!(status["on_deck"], 2);

    assert_eq!(
        server.error_code(
            Some("captain2"),
            "submitPick",
            json!({"session_id": session, "team_id": 2, "card_id": bolt}),
        ),
        "NOT_ON_CLOCK"
    );
    assert_eq!(
        server.error_code(
            None,
            "submitPick",
            json!({"session_id": session, "team_id": 1, "card_id": bolt}),
        ),
        "NOT_AUTHENTICATED"
    );

    let pick = server.ok(
        Some("captain1"),
        "submitPick",
        json!({"session_id": session, "team_id": 1, "card_id": bolt}),
    );
    assert_eq!(pick["source"], "manual");
    assert_eq!(pick["cost"], 5);

    assert_eq!(
        server.error_code(
            Some("captain2"),
            "submitPick",
            json!({"session_id": session, "team_id": 2, "card_id": bolt}),
        ),
        "CARD_ALREADY_DRAFTED"
    );
    server.ok(
        Some("captain2"),
        "submitPick",
        json!({"session_id": session, "team_id": 2, "card_id": helix}),
    );

    // Round two reverses: team 2 picks again.
    assert_eq!(server.status(session)["on_the_clock"], 2);
    let picks = server.ok(None, "listDraftPicks", json!({"session_id": session}));
    assert_eq!(picks.as_array().unwrap().len(), 2);
    assert_eq!(server.engine.team(1).unwrap().balance, 35);
}

#[test]
fn timer_poll_auto_drafts_from_the_queue() {
    let server = Server::new();
    let top = server.card("Jace, the Mind Sculptor", 50, 99.0);
    let queued = server.card("Counterspell", 5, 80.0);
    let session = server.start_session(1.0);

    let queue = server.ok(
        Some("captain1"),
        "setTeamDraftQueue",
        json!({"team_id": 1, "entries": [{"card_id": top, "pinned": true}, {"card_id": queued}]}),
    );
    assert_eq!(queue[0]["card_id"], top);
    assert_eq!(queue[0]["source"], "manual");

    // Nothing happens before the deadline.
    server.clock.advance(Duration::minutes(30));
    assert_eq!(app::poll_timers(&server.engine), 0);

    // After it, the unaffordable top choice is passed over.
    server.clock.advance(Duration::minutes(31));
    assert_eq!(app::poll_timers(&server.engine), 1);
    assert_eq!(app::poll_timers(&server.engine), 0);

    let picks = server.ok(None, "listDraftPicks", json!({"session_id": session}));
    assert_eq!(picks[0]["card_id"], queued);
    assert_eq!(picks[0]["source"], "auto");
    assert_eq!(server.status(session)["on_the_clock"], 2);

    let queue = server.ok(Some("captain1"), "getTeamDraftQueue", json!({"team_id": 1}));
    assert!(queue
        .as_array()
        .unwrap()
        .iter()
        .all(|entry| entry["card_id"] != queued));
}

#[test]
fn votes_reach_threshold_and_pick() {
    let server = Server::new();
    let card = server.card("Path to Exile", 5, 86.5);
    let session = server.start_session(24.0);
    server.ok(
        Some("member1"),
        "addToQueue",
        json!({"team_id": 1, "card_id": card, "pinned": true}),
    );

    let params = json!({"session_id": session, "team_id": 1, "card_id": card});
    let first = server.ok(Some("member1"), "toggleQueuePickVote", params.clone());
    assert_eq!(first["tally"], 1);
    assert_eq!(first["threshold"], 3);
    assert_eq!(first["pick_executed"], false);

    let second = server.ok(Some("captain1"), "toggleQueuePickVote", params.clone());
    assert_eq!(second["tally"], 3);
    assert_eq!(second["pick_executed"], true);
    assert_eq!(second["pick"]["source"], "vote");

    assert_eq!(
        server.error_code(Some("captain2"), "toggleQueuePickVote", params),
        "NOT_AUTHORIZED"
    );
}

#[test]
fn admin_operations_round_trip() {
    let server = Server::new();
    let card = server.card("Demonic Tutor", 9, 96.0);
    let session = server.start_session(24.0);

    assert_eq!(
        server.error_code(
            Some("captain1"),
            "pauseDraftSession",
            json!({"session_id": session}),
        ),
        "NOT_AUTHORIZED"
    );
    let paused = server.ok(
        Some("commissioner"),
        "pauseDraftSession",
        json!({"session_id": session}),
    );
    assert_eq!(paused["status"], "paused");
    assert_eq!(
        server.error_code(
            Some("captain1"),
            "submitPick",
            json!({"session_id": session, "team_id": 1, "card_id": card}),
        ),
        "SESSION_NOT_ACTIVE"
    );
    let resumed = server.ok(
        Some("commissioner"),
        "resumeDraftSession",
        json!({"session_id": session}),
    );
    assert_eq!(resumed["status"], "active");

    let pick = server.ok(
        Some("captain1"),
        "submitPick",
        json!({"session_id": session, "team_id": 1, "card_id": card}),
    );
    let refund = server.ok(
        Some("commissioner"),
        "refundDraftPick",
        json!({"team_id": 1, "draft_pick_id": pick["id"]}),
    );
    assert_eq!(refund["refund_amount"], 9);
    assert_eq!(refund["balance"], 40);

    let allocation = server.ok(
        Some("commissioner"),
        "allocateCubucks",
        json!({"team_id": 2, "amount": 80}),
    );
    assert_eq!(allocation["granted"], 60);
    assert_eq!(allocation["balance"], 100);

    let summary = server.ok(
        Some("commissioner"),
        "allocateCubucksToAll",
        json!({"amount": 10}),
    );
    assert_eq!(summary["teams_skipped"], 1);

    let team = server.ok(
        Some("commissioner"),
        "adjustBalance",
        json!({"team_id": 1, "delta": -5, "note": "late fee"}),
    );
    assert_eq!(team["balance"], 45);
    assert_eq!(
        server.error_code(
            Some("commissioner"),
            "adjustBalance",
            json!({"team_id": 1, "delta": -500}),
        ),
        "INSUFFICIENT_BALANCE"
    );

    let audit = server.ok(Some("commissioner"), "verifyLedger", json!({"team_id": 1}));
    assert_eq!(audit["consistent"], true);
    assert_eq!(audit["replayed_balance"], 45);

    let ledger = server.ok(Some("captain1"), "getLedger", json!({"team_id": 1}));
    let kinds: Vec<_> = ledger
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        kinds,
        vec!["allocation", "draft_pick", "refund", "allocation", "adjustment"]
    );
}

#[test]
fn bad_frames_are_answered_not_dropped() {
    let server = Server::new();
    let reply: Value =
        serde_json::from_str(&app::handle_request(&server.engine, "\"just a string\"")).unwrap();
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "BAD_REQUEST");

    assert_eq!(
        server.error_code(None, "launchMissiles", json!({})),
        "BAD_REQUEST"
    );
}

// ===========================================================================
// Event loop
// ===========================================================================

#[tokio::test]
async fn event_loop_answers_requests_and_exits_when_server_stops() {
    let server = Server::new();
    let (ws_tx, ws_rx) = mpsc::channel(16);
    let loop_handle = tokio::spawn(app::run(
        ws_rx,
        Arc::clone(&server.engine),
        StdDuration::from_secs(3600),
    ));

    ws_tx
        .send(WsEvent::Connected {
            addr: "127.0.0.1:5000".into(),
        })
        .await
        .unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = json!({"id": 77, "method": "getTeamDraftQueue", "user_id": "captain2", "params": {"team_id": 2}});
    ws_tx
        .send(WsEvent::Request {
            addr: "127.0.0.1:5000".into(),
            text: request.to_string(),
            reply: reply_tx,
        })
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&reply_rx.await.unwrap()).unwrap();
    assert_eq!(reply["id"], 77);
    assert_eq!(reply["ok"], true);

    ws_tx
        .send(WsEvent::Disconnected {
            addr: "127.0.0.1:5000".into(),
        })
        .await
        .unwrap();
    drop(ws_tx);

    tokio::time::timeout(StdDuration::from_secs(5), loop_handle)
        .await
        .expect("event loop should exit once the channel closes")
        .unwrap()
        .unwrap();
}

// ===========================================================================
// First start
// ===========================================================================

#[test]
fn shipped_defaults_bootstrap_a_playable_league() {
    let tmp = tempfile::tempdir().unwrap();
    let defaults = tmp.path().join("defaults");
    std::fs::create_dir_all(&defaults).unwrap();
    std::fs::copy(
        crate_root().join("defaults").join("cubedraft.toml"),
        defaults.join("cubedraft.toml"),
    )
    .unwrap();

    let copied = config::ensure_config_files(tmp.path()).unwrap();
    assert_eq!(copied.len(), 1);
    let config = config::load_config_from(tmp.path()).unwrap();

    let db = Database::open(":memory:").unwrap();
    assert!(seed::bootstrap_league(&db, &config.league).unwrap());
    let pool_csv = crate_root().join(config.pool_csv.as_deref().unwrap());
    let seeded = seed::seed_pool(&db, &pool_csv).unwrap();
    assert_eq!(seeded, 20);

    let all = db.read(|c| teams::list(c)).unwrap();
    assert_eq!(all.len(), config.league.teams.len());
    assert!(all
        .iter()
        .all(|t| t.balance == config.league.starting_cubucks));

    // Every configured member points at a bootstrapped team.
    for member in &config.members {
        assert!(all.iter().any(|t| t.id == member.team_id), "{member:?}");
    }
}
