use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use research_core::delegation::{DelegationOutcome, DelegationTask, Delegator};
use research_core::error::ActionError;
use tokio::sync::Semaphore;

use crate::subagent::SubAgentRuntime;

/// Routes `task` calls of the root agent to sub-agent runtimes.
///
/// Batches run as separate tokio tasks, at most `max_concurrent` at a time.
pub struct DelegationCoordinator {
    agents: BTreeMap<String, Arc<SubAgentRuntime>>,
    permits: Arc<Semaphore>,
}

impl DelegationCoordinator {
    pub fn new(agents: Vec<SubAgentRuntime>, max_concurrent: usize) -> Self {
        Self {
            agents: agents
                .into_iter()
                .map(|a| (a.name().to_string(), Arc::new(a)))
                .collect(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    fn resolve(&self, name: &str) -> Result<Arc<SubAgentRuntime>, ActionError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::UnknownSubAgent {
                name: name.to_string(),
                available: self.agents.keys().cloned().collect(),
            })
    }
}

#[async_trait]
impl Delegator for DelegationCoordinator {
    async fn delegate(
        &self,
        task: DelegationTask,
        parent_remaining: u32,
    ) -> Result<DelegationOutcome, ActionError> {
        let runtime = self.resolve(&task.agent)?;
        runtime.run(&task.description, parent_remaining).await
    }

    async fn delegate_many(
        &self,
        tasks: Vec<DelegationTask>,
        parent_remaining: u32,
    ) -> Vec<Result<DelegationOutcome, ActionError>> {
        tracing::info!(count = tasks.len(), parent_remaining, "delegating batch");

        let handles = tasks.into_iter().map(|task| {
            let resolved = self.resolve(&task.agent);
            let permits = self.permits.clone();
            async move {
                let runtime = resolved?;
                let agent = task.agent.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| ActionError::failed("task", e))?;
                    runtime.run(&task.description, parent_remaining).await
                });
                match handle.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        tracing::error!(agent = %agent, error = %join_err, "sub-agent task aborted");
                        Err(ActionError::failed(
                            "task",
                            format!("sub-agent '{agent}' aborted: {join_err}"),
                        ))
                    }
                }
            }
        });

        join_all(handles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::RetryPolicy;
    use research_core::actions::{ActionDefinition, ActionRegistry};
    use research_core::delegation::SubAgentDefinition;
    use research_core::files::VirtualFileStore;
    use research_core::messaging::Conversation;
    use research_core::policy::{Decision, PlanningPolicy};
    use std::time::Duration;

    /// Answers with its own name after a delay.
    struct Slow {
        name: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl PlanningPolicy for Slow {
        async fn decide(
            &self,
            _conversation: &Conversation,
            _actions: &[ActionDefinition],
        ) -> anyhow::Result<Decision> {
            tokio::time::sleep(self.delay).await;
            Ok(Decision::final_answer(self.name))
        }
    }

    fn coordinator() -> DelegationCoordinator {
        let files = Arc::new(VirtualFileStore::new());
        let retry = RetryPolicy {
            max_retries: 0,
            backoff: Duration::from_millis(1),
        };
        let make = |name: &'static str, delay_ms: u64| {
            SubAgentRuntime::new(
                &SubAgentDefinition::new(name, "", ""),
                Arc::new(Slow {
                    name,
                    delay: Duration::from_millis(delay_ms),
                }),
                ActionRegistry::new(),
                files.clone(),
                retry,
                5,
            )
        };
        DelegationCoordinator::new(vec![make("alpha", 80), make("beta", 5)], 4)
    }

    #[tokio::test]
    async fn results_keep_request_order() {
        let results = coordinator()
            .delegate_many(
                vec![
                    DelegationTask::new("alpha", "slow one"),
                    DelegationTask::new("beta", "fast one"),
                ],
                10,
            )
            .await;
        let texts: Vec<String> = results.into_iter().map(|r| r.unwrap().text).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn unknown_agents_fail_alone() {
        let results = coordinator()
            .delegate_many(
                vec![
                    DelegationTask::new("gamma", "?"),
                    DelegationTask::new("beta", "fast one"),
                ],
                10,
            )
            .await;
        assert_eq!(
            results[0],
            Err(ActionError::UnknownSubAgent {
                name: "gamma".into(),
                available: vec!["alpha".into(), "beta".into()],
            })
        );
        assert_eq!(results[1].as_ref().unwrap().text, "beta");
    }

    #[tokio::test]
    async fn single_delegation_runs_inline() {
        let outcome = coordinator()
            .delegate(DelegationTask::new("beta", "go"), 3)
            .await
            .unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.steps, 0);
        assert_eq!(outcome.agent, "beta");
    }
}
