use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::policy::PlanningPolicy;

/// Marker put in front of a partial sub-agent result.
pub const INCOMPLETE_MARKER: &str = "[incomplete: sub-agent step budget exhausted]";

/// Static description of a specialist agent the root can delegate to.
#[derive(Clone)]
pub struct SubAgentDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Permitted action names. `None` means every non-delegating action.
    pub actions: Option<Vec<String>>,
    /// Overrides the run's policy for this agent.
    pub policy: Option<Arc<dyn PlanningPolicy>>,
}

impl SubAgentDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            actions: None,
            policy: None,
        }
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PlanningPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl fmt::Debug for SubAgentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubAgentDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("actions", &self.actions)
            .field("custom_policy", &self.policy.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelegationTask {
    pub agent: String,
    pub description: String,
}

impl DelegationTask {
    pub fn new(agent: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            description: description.into(),
        }
    }
}

/// Aggregated result of one sub-agent run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelegationOutcome {
    pub agent: String,
    pub text: String,
    /// `false` when the sub-agent ran out of steps before a final answer.
    pub complete: bool,
    pub steps: u32,
}

impl DelegationOutcome {
    /// Text handed back to the delegating conversation.
    pub fn observation(&self) -> String {
        if self.complete {
            self.text.clone()
        } else if self.text.is_empty() {
            INCOMPLETE_MARKER.to_string()
        } else {
            format!("{INCOMPLETE_MARKER}\n{}", self.text)
        }
    }
}

/// Routes delegation requests to isolated sub-agent runtimes.
///
/// Only the root agent is ever handed a delegator; sub-agents run without
/// one, which keeps delegation depth at exactly one.
#[async_trait]
pub trait Delegator: Send + Sync {
    async fn delegate(
        &self,
        task: DelegationTask,
        parent_remaining: u32,
    ) -> Result<DelegationOutcome, ActionError>;

    /// Runs every task and returns one entry per task, in request order.
    async fn delegate_many(
        &self,
        tasks: Vec<DelegationTask>,
        parent_remaining: u32,
    ) -> Vec<Result<DelegationOutcome, ActionError>>;
}
