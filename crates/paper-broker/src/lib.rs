//! Margin-aware paper execution.
//!
//! Orders are opened against free equity, marked against bar extremes, and
//! closed at the crossed level or at an explicit price. Closed trades are
//! immutable.

pub mod broker;
pub mod models;

pub use broker::PaperBroker;
pub use models::*;
