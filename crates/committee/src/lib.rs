//! Advisory committee: turns independent advisor opinions into one verdict.
//!
//! The aggregator is a pure function over opinions. The panel owns the
//! concurrent polling, per-call timeouts and bounded retries that produce
//! those opinions, converting every exhausted call into an abstain vote.

pub mod aggregator;
pub mod panel;
pub mod payload;
pub mod retry;

pub use aggregator::*;
pub use panel::*;
pub use payload::*;
pub use retry::*;
