use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use research_core::{
    ActionCall, ActionDefinition, Conversation, Decision, MessageRole, PlanningPolicy,
    SubAgentDefinition, INCOMPLETE_MARKER,
};
use research_runtime::{EngineSettings, Orchestrator, RunConfig, RunStatus, RunUpdate, ROOT_AGENT};
use research_toolkit::{
    filesystem_actions, research_instructions, research_sub_agents, InternetSearchAction,
    StaticSearch,
};
use serde_json::json;

type Script = dyn Fn(&Conversation) -> anyhow::Result<Decision> + Send + Sync;

/// Decides from the conversation alone, optionally sleeping per agent first.
struct ScriptedPolicy {
    script: Box<Script>,
    delays: HashMap<String, Duration>,
}

impl ScriptedPolicy {
    fn new<F>(script: F) -> Self
    where
        F: Fn(&Conversation) -> anyhow::Result<Decision> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delays: HashMap::new(),
        }
    }

    fn with_delay(mut self, agent: &str, delay: Duration) -> Self {
        self.delays.insert(agent.to_string(), delay);
        self
    }
}

#[async_trait]
impl PlanningPolicy for ScriptedPolicy {
    async fn decide(
        &self,
        conversation: &Conversation,
        _actions: &[ActionDefinition],
    ) -> anyhow::Result<Decision> {
        if let Some(delay) = self.delays.get(conversation.agent()) {
            tokio::time::sleep(*delay).await;
        }
        (self.script)(conversation)
    }
}

fn results_seen(conversation: &Conversation) -> usize {
    conversation
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::ActionResult)
        .count()
}

fn batches(conversation: &Conversation) -> usize {
    conversation
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::Assistant && !m.action_requests.is_empty())
        .count()
}

fn last_result_text(conversation: &Conversation) -> String {
    conversation
        .messages()
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::ActionResult)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn task(agent: &str, description: &str) -> ActionCall {
    ActionCall::new(
        "task",
        json!({"description": description, "subagent_type": agent}),
    )
}

fn fast_settings() -> EngineSettings {
    EngineSettings {
        policy_retry_backoff_ms: 1,
        ..EngineSettings::default()
    }
}

#[tokio::test]
async fn always_acting_policy_exhausts_budget_after_three_batches() {
    let policy = ScriptedPolicy::new(|_| Ok(Decision::single("ls", json!({}))));
    let config = RunConfig::new("loop", "You loop.", Arc::new(policy))
        .with_actions(filesystem_actions())
        .with_settings(fast_settings())
        .with_step_budget(3);

    let updates: Vec<RunUpdate> = Orchestrator::new(config).unwrap().stream().collect().await;

    let mut result = None;
    for update in updates {
        match update {
            RunUpdate::Step(snapshot) => assert!(snapshot.step <= snapshot.step_budget),
            RunUpdate::Finished(r) => result = Some(r),
        }
    }
    let result = result.expect("stream ends with the result");
    assert_eq!(result.status, RunStatus::BudgetExceeded);
    assert_eq!(result.steps, 3);
    assert_eq!(batches(&result.conversation), 3);
    // The fourth, undispatched decision is not recorded.
    assert_eq!(
        result.conversation.last().unwrap().role,
        MessageRole::ActionResult
    );
    assert!(result.final_text.is_none());
}

#[tokio::test]
async fn file_writes_round_trip_and_last_write_wins() {
    let policy = ScriptedPolicy::new(|c| {
        Ok(match results_seen(c) {
            0 => Decision::actions(vec![
                ActionCall::new("write_file", json!({"file_path": "q.txt", "content": "What is X?"})),
                ActionCall::new("read_file", json!({"file_path": "q.txt"})),
            ]),
            2 => Decision::single("write_file", json!({"file_path": "report.md", "content": "v1"})),
            3 => Decision::single("write_file", json!({"file_path": "report.md", "content": "v2"})),
            4 => Decision::single("read_file", json!({"file_path": "report.md"})),
            _ => Decision::final_answer(last_result_text(c)),
        })
    });
    let config = RunConfig::new("What is X?", "You write.", Arc::new(policy))
        .with_actions(filesystem_actions())
        .with_settings(fast_settings());
    let orchestrator = Orchestrator::new(config).unwrap();
    let files = orchestrator.files();
    let result = orchestrator.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    let read_back = &result.conversation.messages()[3];
    assert_eq!(read_back.content, "     1\tWhat is X?");
    assert_eq!(result.files["q.txt"], "What is X?");
    assert_eq!(result.files["report.md"], "v2");
    assert_eq!(files.revision("report.md"), Some(2));
    assert_eq!(result.final_text.as_deref(), Some("     1\tv2"));
}

#[tokio::test]
async fn parallel_delegations_return_in_request_order() {
    let policy = ScriptedPolicy::new(|c| {
        if c.agent() != ROOT_AGENT {
            return Ok(Decision::final_answer(format!("from {}", c.agent())));
        }
        Ok(match results_seen(c) {
            0 => Decision::actions(vec![task("slow", "take your time"), task("fast", "hurry")]),
            _ => Decision::final_answer("done"),
        })
    })
    .with_delay("slow", Duration::from_millis(150));

    let config = RunConfig::new("compare", "You delegate.", Arc::new(policy))
        .with_sub_agent(SubAgentDefinition::new("slow", "slow helper", "Be slow."))
        .with_sub_agent(SubAgentDefinition::new("fast", "fast helper", "Be fast."))
        .with_settings(fast_settings());
    let result = Orchestrator::new(config).unwrap().run().await;

    assert_eq!(result.status, RunStatus::Completed);
    let messages = result.conversation.messages();
    let requests = &messages[1].action_requests;
    assert_eq!(messages[2].content, "from slow");
    assert_eq!(messages[3].content, "from fast");
    assert_eq!(
        messages[2].result.as_ref().unwrap().request_id,
        requests[0].id
    );
    assert_eq!(
        messages[3].result.as_ref().unwrap().request_id,
        requests[1].id
    );
}

#[tokio::test]
async fn concurrent_sub_agent_writers_get_one_revision_each() {
    let writers = ["a", "b", "c", "d"];
    let policy = ScriptedPolicy::new(move |c| {
        if c.agent() == ROOT_AGENT {
            return Ok(match results_seen(c) {
                0 => Decision::actions(writers.iter().map(|w| task("writer", w)).collect()),
                _ => Decision::final_answer("written"),
            });
        }
        if results_seen(c) == 0 {
            let marker = c.messages()[0].content.clone();
            return Ok(Decision::single(
                "write_file",
                json!({"file_path": "shared.md", "content": marker.repeat(2048)}),
            ));
        }
        Ok(Decision::final_answer("ok"))
    });

    let config = RunConfig::new("write", "You coordinate.", Arc::new(policy))
        .with_actions(filesystem_actions())
        .with_sub_agent(SubAgentDefinition::new("writer", "writes", "You write."))
        .with_settings(fast_settings());
    let orchestrator = Orchestrator::new(config).unwrap();
    let files = orchestrator.files();
    let result = orchestrator.run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(files.revision("shared.md"), Some(writers.len() as u64));
    let content = &result.files["shared.md"];
    assert_eq!(content.len(), 2048);
    let first = content.chars().next().unwrap();
    assert!(content.chars().all(|ch| ch == first));
}

#[tokio::test]
async fn unpermitted_actions_are_rejected_without_dispatch() {
    let policy = ScriptedPolicy::new(|c| {
        if c.agent() == "research-agent" {
            return Ok(match results_seen(c) {
                0 => Decision::actions(vec![
                    ActionCall::new(
                        "write_file",
                        json!({"file_path": "notes.md", "content": "sneaky"}),
                    ),
                    task("research-agent", "recurse"),
                ]),
                _ => {
                    let rejected: Vec<String> = c
                        .messages()
                        .iter()
                        .filter_map(|m| m.result.as_ref())
                        .map(|r| r.outcome.text().to_string())
                        .collect();
                    Decision::final_answer(rejected.join("\n"))
                }
            });
        }
        Ok(match results_seen(c) {
            0 => Decision::actions(vec![task("research-agent", "find things")]),
            _ => Decision::final_answer(last_result_text(c)),
        })
    });

    let config = RunConfig::new("q", "You delegate.", Arc::new(policy))
        .with_actions(filesystem_actions())
        .with_action(Arc::new(InternetSearchAction::new(Arc::new(StaticSearch::sample()))))
        .with_sub_agent(
            SubAgentDefinition::new("research-agent", "researches", "You research.")
                .with_actions(["internet_search"]),
        )
        .with_settings(fast_settings());
    let result = Orchestrator::new(config).unwrap().run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.files.is_empty());
    let report = result.final_text.unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("'write_file'") && lines[0].contains("not permitted"));
    assert!(lines[1].contains("'task'") && lines[1].contains("not permitted"));
}

#[tokio::test]
async fn unknown_sub_agent_is_a_recoverable_failure() {
    let policy = ScriptedPolicy::new(|c| {
        Ok(match results_seen(c) {
            0 => Decision::actions(vec![task("writer", "draft")]),
            _ => Decision::final_answer(last_result_text(c)),
        })
    });
    let config = RunConfig::new("q", "You delegate.", Arc::new(policy))
        .with_sub_agent(SubAgentDefinition::new("research-agent", "researches", "You research."))
        .with_settings(fast_settings());
    let result = Orchestrator::new(config).unwrap().run().await;

    assert_eq!(result.status, RunStatus::Completed);
    let text = result.final_text.unwrap();
    assert!(text.starts_with("Error: unknown sub-agent 'writer'"));
    assert!(text.contains("research-agent"));
}

#[tokio::test]
async fn exhausted_sub_agent_yields_partial_result_and_root_completes() {
    let policy = ScriptedPolicy::new(|c| {
        if c.agent() == "research-agent" {
            return Ok(Decision::single("internet_search", json!({"query": "more"})));
        }
        Ok(match results_seen(c) {
            0 => Decision::actions(vec![task("research-agent", "never stop")]),
            _ => Decision::final_answer(last_result_text(c)),
        })
    });
    let settings = EngineSettings {
        sub_agent_step_cap: 2,
        ..fast_settings()
    };
    let config = RunConfig::new("q", "You delegate.", Arc::new(policy))
        .with_action(Arc::new(InternetSearchAction::new(Arc::new(StaticSearch::sample()))))
        .with_sub_agent(
            SubAgentDefinition::new("research-agent", "researches", "You research.")
                .with_actions(["internet_search"]),
        )
        .with_settings(settings);
    let result = Orchestrator::new(config).unwrap().run().await;

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.final_text.unwrap().starts_with(INCOMPLETE_MARKER));
    assert_eq!(result.steps, 1);
}

#[tokio::test]
async fn unavailable_policy_fails_the_run_but_keeps_artifacts() {
    let policy = ScriptedPolicy::new(|c| match results_seen(c) {
        0 => Ok(Decision::single(
            "write_file",
            json!({"file_path": "draft.md", "content": "partial"}),
        )),
        _ => Err(anyhow::anyhow!("503 Service Unavailable")),
    });
    let settings = EngineSettings {
        policy_max_retries: 1,
        ..fast_settings()
    };
    let config = RunConfig::new("q", "You write.", Arc::new(policy))
        .with_actions(filesystem_actions())
        .with_settings(settings);
    let result = Orchestrator::new(config).unwrap().run().await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.files["draft.md"], "partial");
    let error = result.error.unwrap();
    assert!(error.contains("after 2 attempt(s)"));
    assert!(error.contains("503"));
}

#[tokio::test]
async fn research_preset_runs_end_to_end_offline() {
    let prefix = "20250129_143052_";
    let question = format!("{prefix}question.txt");
    let report = format!("{prefix}report.md");

    let (q, r) = (question.clone(), report.clone());
    let policy = ScriptedPolicy::new(move |c| {
        let seen = results_seen(c);
        match c.agent() {
            "research-agent" => Ok(match seen {
                0 => Decision::single("internet_search", json!({"query": c.messages()[0].content})),
                _ => Decision::final_answer("Findings: AI is improving [1]."),
            }),
            "critique-agent" => Ok(match seen {
                0 => Decision::single("read_file", json!({"file_path": r})),
                _ => Decision::final_answer("Critique: add a Sources section."),
            }),
            _ => Ok(match seen {
                0 => Decision::single(
                    "write_file",
                    json!({"file_path": q, "content": "Latest developments in AI?"}),
                ),
                1 => Decision::actions(vec![
                    task("research-agent", "AI models"),
                    task("research-agent", "AI in healthcare"),
                ]),
                3 => Decision::single(
                    "write_file",
                    json!({"file_path": r, "content": "# AI\n\nFindings."}),
                ),
                4 => Decision::actions(vec![task("critique-agent", "critique the report")]),
                5 => Decision::single(
                    "edit_file",
                    json!({"file_path": r, "old_string": "Findings.", "new_string": "Findings.\n\n### Sources\n[1] Latest AI Developments 2024: https://example.com/ai-2024"}),
                ),
                _ => Decision::final_answer("Report written."),
            }),
        }
    });

    let config = RunConfig::new(
        "Research the latest developments in AI",
        research_instructions(prefix),
        Arc::new(policy),
    )
    .with_actions(filesystem_actions())
    .with_action(Arc::new(InternetSearchAction::new(Arc::new(StaticSearch::sample()))))
    .with_sub_agents(research_sub_agents())
    .with_settings(fast_settings());

    let result = Orchestrator::new(config).unwrap().run().await;

    assert_eq!(result.status, RunStatus::Completed, "{:?}", result.error);
    assert_eq!(result.final_text.as_deref(), Some("Report written."));
    assert_eq!(result.files[&question], "Latest developments in AI?");
    assert!(result.files[&report].contains("### Sources"));
    assert_eq!(result.steps, 5);

    let results: Vec<&str> = result
        .conversation
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::ActionResult)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(results[1], "Findings: AI is improving [1].");
    assert_eq!(results[2], "Findings: AI is improving [1].");
    assert_eq!(results[4], "Critique: add a Sources section.");
}
