use std::sync::Arc;

use research_core::actions::{ActionRegistry, Capability};
use research_core::delegation::{DelegationOutcome, SubAgentDefinition};
use research_core::error::ActionError;
use research_core::files::VirtualFileStore;
use research_core::policy::PlanningPolicy;
use research_core::prompts::compose_system_prompt;

use crate::agent_loop::{AgentLoop, LoopState, RetryPolicy};

/// Everything needed to start isolated runs of one sub-agent.
///
/// Each [`run`](Self::run) gets a fresh conversation and step counter; only
/// the file store is shared with the rest of the run. No delegator is ever
/// attached, so a sub-agent cannot delegate further.
pub struct SubAgentRuntime {
    name: String,
    system_prompt: String,
    policy: Arc<dyn PlanningPolicy>,
    actions: ActionRegistry,
    files: Arc<VirtualFileStore>,
    retry: RetryPolicy,
    step_cap: u32,
}

impl SubAgentRuntime {
    pub(crate) fn new(
        definition: &SubAgentDefinition,
        policy: Arc<dyn PlanningPolicy>,
        actions: ActionRegistry,
        files: Arc<VirtualFileStore>,
        retry: RetryPolicy,
        step_cap: u32,
    ) -> Self {
        let uses_files = actions.definitions().iter().any(|d| {
            matches!(d.capability, Capability::ReadsFiles | Capability::WritesFiles)
        });
        Self {
            name: definition.name.clone(),
            system_prompt: compose_system_prompt(&definition.system_prompt, uses_files, false),
            policy: definition.policy.clone().unwrap_or(policy),
            actions,
            files,
            retry,
            step_cap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Budget for one run given what the delegating agent has left.
    pub fn budget_for(&self, parent_remaining: u32) -> u32 {
        self.step_cap.min(parent_remaining.max(1))
    }

    pub async fn run(
        &self,
        task: &str,
        parent_remaining: u32,
    ) -> Result<DelegationOutcome, ActionError> {
        let budget = self.budget_for(parent_remaining);
        tracing::info!(agent = %self.name, budget, "sub-agent started");

        let mut machine = AgentLoop::new(
            self.name.clone(),
            self.system_prompt.clone(),
            self.policy.clone(),
            self.actions.clone(),
            self.files.clone(),
            None,
            self.retry,
            budget,
        );
        machine.push_user(task);
        machine
            .run_to_end()
            .await
            .map_err(|e| ActionError::failed("task", format!("sub-agent '{}': {e}", self.name)))?;

        let complete = machine.state() == LoopState::Done;
        let text = if complete {
            machine.final_text().unwrap_or_default().to_string()
        } else {
            machine
                .conversation()
                .last_assistant_text()
                .unwrap_or_default()
                .to_string()
        };
        tracing::info!(
            agent = %self.name,
            steps = machine.steps(),
            complete,
            "sub-agent finished"
        );
        Ok(DelegationOutcome {
            agent: self.name.clone(),
            text,
            complete,
            steps: machine.steps(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use research_core::actions::{ActionContext, ActionDefinition};
    use research_core::messaging::{Conversation, MessageRole};
    use research_core::policy::{ActionCall, Decision};
    use research_core::schema::{ActionArgs, ArgumentSchema};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Acts until it has seen `acts` results, then answers with what it saw.
    struct Counting {
        acts: usize,
        seen_actions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlanningPolicy for Counting {
        async fn decide(
            &self,
            conversation: &Conversation,
            actions: &[ActionDefinition],
        ) -> anyhow::Result<Decision> {
            *self.seen_actions.lock().unwrap() = actions.iter().map(|a| a.name.clone()).collect();
            let results = conversation
                .messages()
                .iter()
                .filter(|m| m.role == MessageRole::ActionResult)
                .count();
            if results < self.acts {
                Ok(Decision::actions(vec![ActionCall::new("ping", json!({}))]))
            } else {
                Ok(Decision::final_answer(format!("saw {results}")))
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl PlanningPolicy for Broken {
        async fn decide(
            &self,
            _conversation: &Conversation,
            _actions: &[ActionDefinition],
        ) -> anyhow::Result<Decision> {
            anyhow::bail!("model offline")
        }
    }

    fn runtime(policy: Arc<dyn PlanningPolicy>, cap: u32) -> SubAgentRuntime {
        let mut actions = ActionRegistry::new();
        actions.register_fn(
            "ping",
            "",
            Capability::Pure,
            ArgumentSchema::new(),
            |_args: ActionArgs, _ctx: ActionContext| async move {
                Ok::<_, anyhow::Error>("pong".to_string())
            },
        );
        SubAgentRuntime::new(
            &SubAgentDefinition::new("research-agent", "researches", "You research."),
            policy,
            actions,
            Arc::new(VirtualFileStore::new()),
            RetryPolicy {
                max_retries: 0,
                backoff: Duration::from_millis(1),
            },
            cap,
        )
    }

    #[test]
    fn budget_is_capped_and_never_zero() {
        let rt = runtime(Arc::new(Broken), 25);
        assert_eq!(rt.budget_for(100), 25);
        assert_eq!(rt.budget_for(3), 3);
        assert_eq!(rt.budget_for(0), 1);
    }

    #[tokio::test]
    async fn returns_only_the_final_message() {
        let policy = Arc::new(Counting {
            acts: 2,
            seen_actions: Mutex::new(Vec::new()),
        });
        let outcome = runtime(policy.clone(), 10).run("look around", 10).await.unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.text, "saw 2");
        assert_eq!(outcome.steps, 2);
        assert_eq!(*policy.seen_actions.lock().unwrap(), vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_budget_yields_incomplete_outcome() {
        let policy = Arc::new(Counting {
            acts: 100,
            seen_actions: Mutex::new(Vec::new()),
        });
        let outcome = runtime(policy, 2).run("never stop", 50).await.unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.steps, 2);
        assert!(outcome.observation().starts_with(research_core::INCOMPLETE_MARKER));
    }

    #[tokio::test]
    async fn policy_failure_is_an_action_failure() {
        let err = runtime(Arc::new(Broken), 5).run("x", 5).await.unwrap_err();
        assert!(matches!(err, ActionError::Failed { .. }));
        assert!(err.to_string().contains("model offline"));
    }
}
