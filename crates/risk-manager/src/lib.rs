pub mod models;
pub mod sizer;
pub mod validation;
#[cfg(test)]
mod tests;

pub use models::*;
pub use sizer::PositionSizer;
pub use validation::{decision_from_verdict, reprice, validate_decision, MAX_RISK_REWARD};
