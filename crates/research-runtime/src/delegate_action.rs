use async_trait::async_trait;
use research_core::actions::{Action, ActionContext, ActionDefinition, Capability};
use research_core::delegation::{DelegationTask, SubAgentDefinition};
use research_core::error::ActionError;
use research_core::prompts::task_action_description;
use research_core::schema::{ActionArgs, ArgumentSchema, ParamType};

pub const TASK_ACTION: &str = "task";

/// The `task` action: hands a description to a named sub-agent.
///
/// Within a dispatch batch the engine collects every `task` call and fans
/// them out together; `execute` covers a lone call made outside that path.
pub struct TaskAction {
    description: String,
}

impl TaskAction {
    pub fn new(agents: &[SubAgentDefinition]) -> Self {
        Self {
            description: task_action_description(agents),
        }
    }
}

#[async_trait]
impl Action for TaskAction {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(
            TASK_ACTION,
            self.description.clone(),
            Capability::Delegates,
            ArgumentSchema::new()
                .required(
                    "description",
                    ParamType::String,
                    "The complete task for the sub-agent",
                )
                .required(
                    "subagent_type",
                    ParamType::String,
                    "Name of the sub-agent to use",
                ),
        )
    }

    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        let task = task_from_args(&args)?;
        let delegator = ctx.delegator.ok_or_else(|| {
            ActionError::validation(TASK_ACTION, "delegation is not available to sub-agents")
        })?;
        let outcome = delegator.delegate(task, ctx.remaining_steps).await?;
        Ok(outcome.observation())
    }

    fn delegation_task(&self, args: &ActionArgs) -> Option<Result<DelegationTask, ActionError>> {
        Some(task_from_args(args))
    }
}

fn task_from_args(args: &ActionArgs) -> Result<DelegationTask, ActionError> {
    Ok(DelegationTask::new(
        args.require_str(TASK_ACTION, "subagent_type")?,
        args.require_str(TASK_ACTION, "description")?,
    ))
}
