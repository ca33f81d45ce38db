//! Top-level driver of one run: blocking via [`Orchestrator::run`] or
//! incremental via [`Orchestrator::stream`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use research_core::actions::{ActionRegistry, Capability};
use research_core::delegation::{Delegator, SubAgentDefinition};
use research_core::error::{ActionError, EngineError};
use research_core::files::VirtualFileStore;
use research_core::messaging::{Conversation, Message};
use research_core::policy::PlanningPolicy;
use research_core::prompts::compose_system_prompt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_loop::{AgentLoop, LoopState, RetryPolicy};
use crate::config::{EngineSettings, RunConfig};
use crate::delegate_action::TaskAction;
use crate::delegation::DelegationCoordinator;
use crate::subagent::SubAgentRuntime;

pub const ROOT_AGENT: &str = "root";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    BudgetExceeded,
}

fn status_of(state: LoopState) -> RunStatus {
    match state {
        LoopState::AwaitingPolicy => RunStatus::Running,
        LoopState::Done => RunStatus::Completed,
        LoopState::BudgetExceeded => RunStatus::BudgetExceeded,
        LoopState::Failed => RunStatus::Failed,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// The root agent's final answer; `None` unless the run completed.
    pub final_text: Option<String>,
    pub files: BTreeMap<String, String>,
    pub steps: u32,
    pub step_budget: u32,
    pub conversation: Conversation,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// State of the run right after `message` was appended to the root
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub step: u32,
    pub step_budget: u32,
    pub status: RunStatus,
    pub message: Message,
    pub file_revisions: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunUpdate {
    Step(RunSnapshot),
    Finished(RunResult),
}

pub struct Orchestrator {
    run_id: Uuid,
    initial_request: String,
    files: Arc<VirtualFileStore>,
    root: AgentLoop,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let RunConfig {
            initial_request,
            policy_prompt,
            policy,
            actions,
            sub_agents,
            settings,
            seed_files,
        } = config;

        let run_id = Uuid::new_v4();
        let files = Arc::new(VirtualFileStore::new());
        for (key, content) in seed_files {
            files
                .write(&key, content)
                .map_err(|e| EngineError::Config(format!("seed file: {e}")))?;
        }

        let retry = RetryPolicy {
            max_retries: settings.policy_max_retries,
            backoff: settings.retry_backoff(),
        };

        let mut root_actions = actions.clone();
        let delegator: Option<Arc<dyn Delegator>> = if sub_agents.is_empty() {
            None
        } else {
            let coordinator =
                build_coordinator(&sub_agents, &actions, &policy, &files, retry, &settings)?;
            root_actions.register(Arc::new(TaskAction::new(&sub_agents)));
            Some(Arc::new(coordinator))
        };

        let system_prompt = compose_system_prompt(
            &policy_prompt,
            touches_files(&root_actions),
            delegator.is_some(),
        );
        let root = AgentLoop::new(
            ROOT_AGENT,
            system_prompt,
            policy,
            root_actions,
            files.clone(),
            delegator,
            retry,
            settings.step_budget,
        );

        tracing::info!(
            run_id = %run_id,
            budget = settings.step_budget,
            sub_agents = sub_agents.len(),
            "run configured"
        );
        Ok(Self {
            run_id,
            initial_request,
            files,
            root,
            started_at: Utc::now(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Shared handle on the run's file store.
    pub fn files(&self) -> Arc<VirtualFileStore> {
        self.files.clone()
    }

    /// Drives the run to a terminal status.
    pub async fn run(mut self) -> RunResult {
        self.begin();
        while self.root.is_running() {
            if let Err(err) = self.root.step().await {
                tracing::error!(run_id = %self.run_id, error = %err, "run failed");
            }
        }
        self.finish()
    }

    /// Lazily drives the run, yielding a snapshot for every message appended
    /// to the root conversation and finally the [`RunResult`].
    ///
    /// Dropping the stream stops the run after the step in progress.
    pub fn stream(mut self) -> impl Stream<Item = RunUpdate> {
        stream! {
            let first = self.begin();
            yield RunUpdate::Step(self.snapshot(first));

            while self.root.is_running() {
                match self.root.step().await {
                    Ok(messages) => {
                        for message in messages {
                            yield RunUpdate::Step(self.snapshot(message));
                        }
                    }
                    Err(err) => {
                        tracing::error!(run_id = %self.run_id, error = %err, "run failed");
                    }
                }
            }
            yield RunUpdate::Finished(self.finish());
        }
    }

    fn begin(&mut self) -> Message {
        tracing::info!(run_id = %self.run_id, "run started");
        self.started_at = Utc::now();
        let request = std::mem::take(&mut self.initial_request);
        self.root.push_user(request)
    }

    fn snapshot(&self, message: Message) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id,
            step: self.root.steps(),
            step_budget: self.root.step_budget(),
            status: status_of(self.root.state()),
            message,
            file_revisions: self.files.revisions(),
        }
    }

    fn finish(self) -> RunResult {
        let status = status_of(self.root.state());
        let steps = self.root.steps();
        let step_budget = self.root.step_budget();
        let final_text = self.root.final_text().map(str::to_string);
        let error = self.root.failure().map(str::to_string);
        tracing::info!(
            run_id = %self.run_id,
            status = ?status,
            steps,
            files = self.files.len(),
            "run finished"
        );
        RunResult {
            run_id: self.run_id,
            status,
            final_text,
            files: self.files.snapshot(),
            steps,
            step_budget,
            conversation: self.root.into_conversation(),
            error,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

fn touches_files(actions: &ActionRegistry) -> bool {
    actions
        .definitions()
        .iter()
        .any(|d| matches!(d.capability, Capability::ReadsFiles | Capability::WritesFiles))
}

fn build_coordinator(
    definitions: &[SubAgentDefinition],
    actions: &ActionRegistry,
    policy: &Arc<dyn PlanningPolicy>,
    files: &Arc<VirtualFileStore>,
    retry: RetryPolicy,
    settings: &EngineSettings,
) -> Result<DelegationCoordinator, EngineError> {
    let mut runtimes = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let permitted = match &definition.actions {
            Some(names) => actions
                .restricted(names)
                .map_err(|e: ActionError| EngineError::Config(format!("sub-agent '{}': {e}", definition.name)))?,
            None => actions.non_delegating(),
        };
        tracing::debug!(
            agent = %definition.name,
            actions = ?permitted.names(),
            "sub-agent registered"
        );
        runtimes.push(SubAgentRuntime::new(
            definition,
            policy.clone(),
            permitted,
            files.clone(),
            retry,
            settings.sub_agent_step_cap,
        ));
    }
    Ok(DelegationCoordinator::new(
        runtimes,
        settings.max_concurrent_delegations,
    ))
}
