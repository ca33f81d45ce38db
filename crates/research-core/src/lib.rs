//! Core building blocks of the deep research workflow engine.
//!
//! This crate holds the data model (conversations, messages, action
//! requests), the run-scoped virtual file store, the action contract with
//! its schema-checked registry, and the traits the runtime is driven by:
//! [`PlanningPolicy`] and [`Delegator`]. It performs no I/O of its own.

pub mod actions;
pub mod delegation;
pub mod error;
pub mod files;
pub mod messaging;
pub mod policy;
pub mod prompts;
pub mod schema;

pub use actions::{Action, ActionBox, ActionContext, ActionDefinition, ActionRegistry, Capability};
pub use delegation::{
    DelegationOutcome, DelegationTask, Delegator, SubAgentDefinition, INCOMPLETE_MARKER,
};
pub use error::{ActionError, EngineError};
pub use files::{VirtualFile, VirtualFileStore};
pub use messaging::{
    ActionOutcome, ActionRequest, ActionResult, Conversation, Message, MessageId, MessageRole,
};
pub use policy::{ActionCall, Decision, PlanningPolicy};
pub use schema::{ActionArgs, ArgumentSchema, ParamSpec, ParamType};
