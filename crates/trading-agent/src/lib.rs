pub mod agent;
pub mod config;
pub mod failover;
pub mod guard;
pub mod metrics;
pub mod recorder;
pub mod review;
pub mod safe_mode;
pub mod state_manager;


pub use agent::{
    AgentComponents, CycleReport, ReviewReport, ReviewResult, SymbolOutcome, SymbolReport,
    TradingAgent,
};
pub use config::{AgentConfig, ChatEndpoint};
pub use failover::{FailoverConfig, FailoverEvent, FailoverState, SourceFailover, SourceRole};
pub use recorder::{DailyPerformance, NullRecorder, SqlRecorder, TradeRecorder};
pub use state_manager::StateManager;
