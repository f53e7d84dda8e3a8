// Draft scheduling: order building, the session clock, queue merging,
// auto-draft selection, votes and the pick resolver, tied together by the
// engine facade.

pub mod autodraft;
pub mod clock;
pub mod engine;
pub mod order;
pub mod queue;
pub mod resolver;
pub mod votes;
