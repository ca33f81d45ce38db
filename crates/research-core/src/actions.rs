//! Named, schema-checked actions an agent can call, and the registry that
//! holds them.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delegation::{DelegationTask, Delegator};
use crate::error::ActionError;
use crate::files::VirtualFileStore;
use crate::schema::{ActionArgs, ArgumentSchema};

/// What an action may touch. Sub-agents never see `Delegates` actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Pure,
    ReadsFiles,
    WritesFiles,
    Delegates,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub capability: Capability,
    pub schema: ArgumentSchema,
}

impl ActionDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        capability: Capability,
        schema: ArgumentSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capability,
            schema,
        }
    }
}

/// Per-call view handed to an action. Built fresh for every dispatch.
#[derive(Clone)]
pub struct ActionContext {
    pub agent: String,
    pub files: Arc<VirtualFileStore>,
    /// Present only for the root agent.
    pub delegator: Option<Arc<dyn Delegator>>,
    pub remaining_steps: u32,
    pub request_id: String,
}

impl ActionContext {
    pub fn new(agent: impl Into<String>, files: Arc<VirtualFileStore>) -> Self {
        Self {
            agent: agent.into(),
            files,
            delegator: None,
            remaining_steps: 0,
            request_id: String::new(),
        }
    }

    pub fn with_delegator(mut self, delegator: Option<Arc<dyn Delegator>>) -> Self {
        self.delegator = delegator;
        self
    }

    pub fn with_remaining_steps(mut self, remaining: u32) -> Self {
        self.remaining_steps = remaining;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn definition(&self) -> ActionDefinition;

    /// Runs the action against already validated arguments.
    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError>;

    /// For delegating actions: the task this call stands for, so the engine
    /// can fan several delegations of one batch out together.
    fn delegation_task(&self, _args: &ActionArgs) -> Option<Result<DelegationTask, ActionError>> {
        None
    }
}

pub type ActionBox = Arc<dyn Action>;

/// Action backed by an async closure.
struct FnAction<F> {
    definition: ActionDefinition,
    handler: F,
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionArgs, ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    fn definition(&self) -> ActionDefinition {
        self.definition.clone()
    }

    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        (self.handler)(args, ctx)
            .await
            .map_err(|e| ActionError::failed(&self.definition.name, format!("{e:#}")))
    }
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, ActionBox>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: ActionBox) -> &mut Self {
        let name = action.definition().name;
        if self.actions.insert(name.clone(), action).is_some() {
            tracing::warn!(action = %name, "replacing previously registered action");
        }
        self
    }

    pub fn register_all<I>(&mut self, actions: I) -> &mut Self
    where
        I: IntoIterator<Item = ActionBox>,
    {
        for action in actions {
            self.register(action);
        }
        self
    }

    /// Registers an action whose body is an async closure. Errors returned by
    /// the closure surface as [`ActionError::Failed`].
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        capability: Capability,
        schema: ArgumentSchema,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(ActionArgs, ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let definition = ActionDefinition::new(name, description, capability, schema);
        self.register(Arc::new(FnAction {
            definition,
            handler,
        }))
    }

    pub fn resolve(&self, name: &str) -> Result<&ActionBox, ActionError> {
        self.actions
            .get(name)
            .ok_or_else(|| ActionError::Unregistered(name.to_string()))
    }

    /// A registry holding only `names`. Every name must already be registered.
    pub fn restricted<I, S>(&self, names: I) -> Result<ActionRegistry, ActionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut subset = ActionRegistry::new();
        for name in names {
            let action = self.resolve(name.as_ref())?;
            subset.register(action.clone());
        }
        Ok(subset)
    }

    /// Every action except the delegating ones.
    pub fn non_delegating(&self) -> ActionRegistry {
        ActionRegistry {
            actions: self
                .actions
                .iter()
                .filter(|(_, a)| a.definition().capability != Capability::Delegates)
                .map(|(k, a)| (k.clone(), a.clone()))
                .collect(),
        }
    }

    pub fn definitions(&self) -> Vec<ActionDefinition> {
        self.actions.values().map(|a| a.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Resolves and validates a raw call in one go.
    pub fn prepare(&self, name: &str, args: &Value) -> Result<(ActionBox, ActionArgs), ActionError> {
        let action = self.resolve(name)?;
        let args = action.definition().schema.validate(name, args)?;
        Ok((action.clone(), args))
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.actions.keys()).finish()
    }
}
