//! The step machine shared by the root agent and every sub-agent.
//!
//! One call to [`AgentLoop::step`] consults the policy once and, for an
//! action decision, dispatches the whole batch before returning. Every
//! message appended on the way is handed back so callers can stream it.

use std::sync::Arc;
use std::time::Duration;

use research_core::actions::{
    ActionBox, ActionContext, ActionDefinition, ActionRegistry, Capability,
};
use research_core::delegation::{DelegationTask, Delegator};
use research_core::error::{ActionError, EngineError};
use research_core::files::VirtualFileStore;
use research_core::messaging::{
    ActionOutcome, ActionRequest, ActionResult, Conversation, Message,
};
use research_core::policy::{Decision, PlanningPolicy};
use research_core::schema::ActionArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopState {
    AwaitingPolicy,
    Done,
    BudgetExceeded,
    Failed,
}

/// Retry behaviour around the policy call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

pub(crate) struct AgentLoop {
    agent: String,
    conversation: Conversation,
    policy: Arc<dyn PlanningPolicy>,
    actions: ActionRegistry,
    definitions: Vec<ActionDefinition>,
    files: Arc<VirtualFileStore>,
    delegator: Option<Arc<dyn Delegator>>,
    retry: RetryPolicy,
    step_budget: u32,
    steps: u32,
    state: LoopState,
    final_text: Option<String>,
    failure: Option<String>,
}

enum Planned {
    Run(ActionBox, ActionArgs),
    Delegate(DelegationTask),
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent: impl Into<String>,
        system_prompt: impl Into<String>,
        policy: Arc<dyn PlanningPolicy>,
        actions: ActionRegistry,
        files: Arc<VirtualFileStore>,
        delegator: Option<Arc<dyn Delegator>>,
        retry: RetryPolicy,
        step_budget: u32,
    ) -> Self {
        let agent = agent.into();
        let definitions = actions.definitions();
        Self {
            conversation: Conversation::new(agent.clone(), system_prompt),
            agent,
            policy,
            actions,
            definitions,
            files,
            delegator,
            retry,
            step_budget,
            steps: 0,
            state: LoopState::AwaitingPolicy,
            final_text: None,
            failure: None,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Message {
        self.conversation.push_user(content).clone()
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::AwaitingPolicy
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn step_budget(&self) -> u32 {
        self.step_budget
    }

    pub fn remaining(&self) -> u32 {
        self.step_budget.saturating_sub(self.steps)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    /// Runs steps until the machine reaches a terminal state.
    pub async fn run_to_end(&mut self) -> Result<(), EngineError> {
        while self.is_running() {
            self.step().await?;
        }
        Ok(())
    }

    /// Advances the machine by one policy decision.
    ///
    /// Returns the messages appended during the step, in order. An error
    /// means the policy stayed unavailable and the machine is now `Failed`.
    pub async fn step(&mut self) -> Result<Vec<Message>, EngineError> {
        if !self.is_running() {
            return Ok(Vec::new());
        }

        let decision = match self.consult_policy().await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(agent = %self.agent, error = %err, "policy unavailable");
                self.state = LoopState::Failed;
                self.failure = Some(err.to_string());
                return Err(err);
            }
        };

        let (calls, text) = match decision {
            Decision::FinalAnswer { text } => return Ok(vec![self.finish(text)]),
            Decision::Actions { calls, .. } if calls.is_empty() => {
                return Ok(vec![self.finish(String::new())])
            }
            Decision::Actions { calls, text } => (calls, text),
        };

        if self.steps >= self.step_budget {
            tracing::warn!(
                agent = %self.agent,
                steps = self.steps,
                budget = self.step_budget,
                "step budget exhausted"
            );
            self.state = LoopState::BudgetExceeded;
            return Ok(Vec::new());
        }
        self.steps += 1;

        let assistant = self.conversation.push_assistant(text, calls).clone();
        tracing::debug!(
            agent = %self.agent,
            step = self.steps,
            actions = assistant.action_requests.len(),
            "dispatching"
        );

        let results = self.dispatch(&assistant.action_requests).await;
        let mut appended = Vec::with_capacity(results.len() + 1);
        appended.push(assistant);
        for result in results {
            appended.push(self.conversation.push_result(result).clone());
        }
        Ok(appended)
    }

    fn finish(&mut self, text: String) -> Message {
        tracing::debug!(agent = %self.agent, steps = self.steps, "final answer");
        self.state = LoopState::Done;
        self.final_text = Some(text.clone());
        self.conversation.push_assistant(text, Vec::new()).clone()
    }

    async fn consult_policy(&self) -> Result<Decision, EngineError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .policy
                .decide(&self.conversation, &self.definitions)
                .await
            {
                Ok(decision) => return Ok(decision),
                Err(err) if attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        agent = %self.agent,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %format!("{err:#}"),
                        "policy call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(EngineError::PolicyUnavailable {
                        attempts: attempt,
                        message: format!("{err:#}"),
                    })
                }
            }
        }
    }

    /// Validates and runs one batch. Results come back in request order.
    async fn dispatch(&self, requests: &[ActionRequest]) -> Vec<ActionResult> {
        let mut outcomes: Vec<Option<Result<String, ActionError>>> =
            Vec::with_capacity(requests.len());
        let mut planned = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            match self.plan(request) {
                Ok(plan) => {
                    outcomes.push(None);
                    planned.push((index, plan));
                }
                Err(err) => outcomes.push(Some(Err(err))),
            }
        }

        let mut delegations = Vec::new();
        for (index, plan) in planned {
            match plan {
                Planned::Run(action, args) => {
                    let ctx = self.context(&requests[index].id);
                    outcomes[index] = Some(action.execute(args, ctx).await);
                }
                Planned::Delegate(task) => delegations.push((index, task)),
            }
        }

        if !delegations.is_empty() {
            let (indices, tasks): (Vec<usize>, Vec<DelegationTask>) =
                delegations.into_iter().unzip();
            let delegated = match &self.delegator {
                Some(delegator) => delegator.delegate_many(tasks, self.remaining()).await,
                None => tasks
                    .iter()
                    .map(|_| Err(no_delegation()))
                    .collect(),
            };
            for (index, result) in indices.into_iter().zip(delegated) {
                outcomes[index] = Some(result.map(|outcome| outcome.observation()));
            }
        }

        requests
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| {
                let outcome = match outcome {
                    Some(Ok(text)) => ActionOutcome::Success(text),
                    Some(Err(err)) => {
                        tracing::warn!(
                            agent = %self.agent,
                            action = %request.name,
                            kind = err.kind(),
                            error = %err,
                            "action failed"
                        );
                        ActionOutcome::Failure(err.to_string())
                    }
                    None => ActionOutcome::Failure(
                        ActionError::failed(&request.name, "action produced no result")
                            .to_string(),
                    ),
                };
                ActionResult {
                    request_id: request.id.clone(),
                    action: request.name.clone(),
                    outcome,
                }
            })
            .collect()
    }

    fn plan(&self, request: &ActionRequest) -> Result<Planned, ActionError> {
        if !self.actions.has(&request.name) {
            return Err(ActionError::validation(
                &request.name,
                format!(
                    "action is not permitted for agent '{}'. Permitted: {}",
                    self.agent,
                    self.actions.names().join(", ")
                ),
            ));
        }
        let (action, args) = self.actions.prepare(&request.name, &request.args)?;
        if action.definition().capability == Capability::Delegates {
            if self.delegator.is_none() {
                return Err(no_delegation());
            }
            if let Some(task) = action.delegation_task(&args) {
                return task.map(Planned::Delegate);
            }
        }
        Ok(Planned::Run(action, args))
    }

    fn context(&self, request_id: &str) -> ActionContext {
        ActionContext::new(self.agent.clone(), self.files.clone())
            .with_delegator(self.delegator.clone())
            .with_remaining_steps(self.remaining())
            .with_request_id(request_id)
    }
}

fn no_delegation() -> ActionError {
    ActionError::validation("task", "delegation is not available to sub-agents")
}
