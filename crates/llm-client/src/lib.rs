//! OpenAI-compatible chat clients wired into the advisory, review and gate seams.

pub mod advisor;
pub mod chat;
pub mod classifier;
pub mod error;
mod prompts;
pub mod usage;

pub use advisor::ChatAdvisor;
pub use chat::{extract_content, ChatClient, ChatConfig};
pub use classifier::{labels_from_reply, ChatGateClassifier};
pub use error::{LlmError, LlmResult};
pub use usage::{BudgetInfo, BudgetLevel, DayUsage, UsageBudget, UsageCheck, UsageTracker};
