// Library root for the draft scheduling and auto-draft resolution engine.
//
// The engine advances a snake draft through picks and rounds, resolves
// expired picks automatically, lets team members vote a queued pick through
// early, and keeps every pick paired with its cubucks ledger entry.

pub mod db;
pub mod draft;
pub mod error;
pub mod external;
pub mod ledger;
pub mod model;
pub mod time;

pub use draft::engine::{DraftEngine, EngineSettings};
pub use error::DraftError;
