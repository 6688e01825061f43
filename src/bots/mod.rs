//! Automated bidding agents: decision logic, wake-up jitter, operator
//! registry and the per-agent scheduler.

pub mod decision;
pub mod jitter;
pub mod registry;
pub mod scheduler;

pub use decision::{decide, Decision, NoOpReason};
pub use registry::{AgentRegistry, AgentSettings};
pub use scheduler::{AgentScheduler, RosterDiff, WakeOutcome};
