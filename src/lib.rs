pub mod agent;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod lock;

pub use agent::{Agent, Outcome, RunContext, RunSummary};
pub use config::AgentConfig;
pub use executor::{Execute, SnapshotExecutor};
