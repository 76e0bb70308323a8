//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Multiplexer`: one upstream connection fanned out to many sinks
//! - `RankingPollLoop`: scheduled fluctuation ranking poll
//! - `NewEntrantTracker`: default change detector for the poll loop

pub mod multiplexer;
pub mod new_entrants;
pub mod ranking_poll;

pub use multiplexer::{
    APPROVAL_FAILURE_NOTICE, DispatchSummary, Multiplexer, MultiplexerConfig, Subscription,
};
pub use new_entrants::NewEntrantTracker;
pub use ranking_poll::{MarketWindow, PollTiming, RankingPollLoop};
