//! Engine settings and the per-run configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use research_core::actions::{ActionBox, ActionRegistry, Capability};
use research_core::delegation::SubAgentDefinition;
use research_core::error::EngineError;
use research_core::policy::PlanningPolicy;
use serde::{Deserialize, Serialize};

use crate::delegate_action::TASK_ACTION;

/// Tunables shared by every run of an engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum number of dispatch batches of the root agent.
    pub step_budget: u32,
    /// Upper bound for any single sub-agent run.
    pub sub_agent_step_cap: u32,
    /// Retries after the first failed policy call.
    pub policy_max_retries: u32,
    pub policy_retry_backoff_ms: u64,
    pub max_concurrent_delegations: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_budget: 50,
            sub_agent_step_cap: 25,
            policy_max_retries: 2,
            policy_retry_backoff_ms: 500,
            max_concurrent_delegations: 4,
        }
    }
}

impl EngineSettings {
    /// Defaults overlaid with the `RESEARCH_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays values found through `lookup`; missing keys keep their value.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "RESEARCH_STEP_BUDGET")? {
            self.step_budget = v;
        }
        if let Some(v) = parse_var(&lookup, "RESEARCH_SUB_AGENT_STEP_CAP")? {
            self.sub_agent_step_cap = v;
        }
        if let Some(v) = parse_var(&lookup, "RESEARCH_POLICY_MAX_RETRIES")? {
            self.policy_max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "RESEARCH_POLICY_RETRY_BACKOFF_MS")? {
            self.policy_retry_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "RESEARCH_MAX_CONCURRENT_DELEGATIONS")? {
            self.max_concurrent_delegations = v;
        }
        Ok(self)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.policy_retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.step_budget == 0 {
            return Err(EngineError::Config("step_budget must be at least 1".into()));
        }
        if self.sub_agent_step_cap == 0 {
            return Err(EngineError::Config(
                "sub_agent_step_cap must be at least 1".into(),
            ));
        }
        if self.max_concurrent_delegations == 0 {
            return Err(EngineError::Config(
                "max_concurrent_delegations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, EngineError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

/// Everything one run needs. Built fluently, validated by the orchestrator.
pub struct RunConfig {
    pub initial_request: String,
    pub policy_prompt: String,
    pub policy: Arc<dyn PlanningPolicy>,
    pub actions: ActionRegistry,
    pub sub_agents: Vec<SubAgentDefinition>,
    pub settings: EngineSettings,
    /// Files present in the store before the first step.
    pub seed_files: Vec<(String, String)>,
}

impl RunConfig {
    pub fn new(
        initial_request: impl Into<String>,
        policy_prompt: impl Into<String>,
        policy: Arc<dyn PlanningPolicy>,
    ) -> Self {
        Self {
            initial_request: initial_request.into(),
            policy_prompt: policy_prompt.into(),
            policy,
            actions: ActionRegistry::new(),
            sub_agents: Vec::new(),
            settings: EngineSettings::default(),
            seed_files: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ActionBox) -> Self {
        self.actions.register(action);
        self
    }

    pub fn with_actions<I>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = ActionBox>,
    {
        self.actions.register_all(actions);
        self
    }

    pub fn with_registry(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_sub_agent(mut self, agent: SubAgentDefinition) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn with_sub_agents<I>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = SubAgentDefinition>,
    {
        self.sub_agents.extend(agents);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_step_budget(mut self, budget: u32) -> Self {
        self.settings.step_budget = budget;
        self
    }

    pub fn with_file(mut self, key: impl Into<String>, content: impl Into<String>) -> Self {
        self.seed_files.push((key.into(), content.into()));
        self
    }

    /// Checks the configuration before any step runs.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.settings.validate()?;

        if let Some(delegating) = self
            .actions
            .definitions()
            .into_iter()
            .find(|d| d.capability == Capability::Delegates)
        {
            return Err(EngineError::Config(format!(
                "action '{}' delegates; delegation is provided by the engine",
                delegating.name
            )));
        }

        if self.sub_agents.is_empty() {
            return Ok(());
        }
        if self.actions.has(TASK_ACTION) {
            return Err(EngineError::Config(format!(
                "'{TASK_ACTION}' is reserved for delegation when sub-agents are configured"
            )));
        }

        let mut seen = BTreeSet::new();
        for agent in &self.sub_agents {
            if agent.name.trim().is_empty() {
                return Err(EngineError::Config("sub-agent name must not be empty".into()));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "duplicate sub-agent '{}'",
                    agent.name
                )));
            }
            if let Some(names) = &agent.actions {
                for name in names {
                    if name == TASK_ACTION {
                        return Err(EngineError::Config(format!(
                            "sub-agent '{}' cannot be given '{TASK_ACTION}': sub-agents do not delegate",
                            agent.name
                        )));
                    }
                    if !self.actions.has(name) {
                        return Err(EngineError::Config(format!(
                            "sub-agent '{}' permits unknown action '{name}'",
                            agent.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("initial_request", &self.initial_request)
            .field("actions", &self.actions)
            .field("sub_agents", &self.sub_agents)
            .field("settings", &self.settings)
            .field("seed_files", &self.seed_files.len())
            .finish()
    }
}
