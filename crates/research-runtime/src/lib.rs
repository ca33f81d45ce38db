//! Tokio runtime for the deep research workflow engine.
//!
//! [`Orchestrator`] drives the root agent's step machine against a
//! [`PlanningPolicy`](research_core::PlanningPolicy), dispatches actions,
//! and fans `task` calls out to isolated sub-agent runtimes through the
//! [`DelegationCoordinator`]. Runs can be driven to completion or consumed
//! as a stream of snapshots.

mod agent_loop;
pub mod config;
pub mod delegate_action;
pub mod delegation;
pub mod orchestrator;
pub mod providers;
pub mod subagent;

pub use config::{EngineSettings, RunConfig};
pub use delegate_action::{TaskAction, TASK_ACTION};
pub use delegation::DelegationCoordinator;
pub use orchestrator::{Orchestrator, RunResult, RunSnapshot, RunStatus, RunUpdate, ROOT_AGENT};
pub use providers::{ApiAuth, OpenAiConfig, OpenAiPolicy};
pub use subagent::SubAgentRuntime;
