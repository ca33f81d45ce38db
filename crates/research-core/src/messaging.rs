use serde::{Deserialize, Serialize};

/// Position of a message inside its conversation.
pub type MessageId = usize;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ActionResult,
}

/// A request, issued by an assistant turn, to run one named action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub issued_by: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success(String),
    Failure(String),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ActionOutcome::Success(text) | ActionOutcome::Failure(text) => text,
        }
    }
}

/// Outcome of one dispatched action, tied back to the request that caused it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResult {
    pub request_id: String,
    pub action: String,
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_requests: Vec<ActionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

impl Message {
    pub fn is_final_answer(&self) -> bool {
        self.role == MessageRole::Assistant && self.action_requests.is_empty()
    }
}

/// Ordered, append-only message log of one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    agent: String,
    system_prompt: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(agent: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &Message {
        self.push(MessageRole::User, content.into(), Vec::new(), None)
    }

    /// Appends an assistant turn. Each call is given an issuing id and, when
    /// the policy did not supply one, a generated request id.
    pub fn push_assistant(
        &mut self,
        content: impl Into<String>,
        calls: Vec<crate::policy::ActionCall>,
    ) -> &Message {
        let id = self.messages.len();
        let requests = calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| ActionRequest {
                id: call.id.unwrap_or_else(|| format!("call-{id}-{index}")),
                name: call.name,
                args: call.args,
                issued_by: id,
            })
            .collect();
        self.push(MessageRole::Assistant, content.into(), requests, None)
    }

    pub fn push_result(&mut self, result: ActionResult) -> &Message {
        let content = match &result.outcome {
            ActionOutcome::Success(text) => text.clone(),
            ActionOutcome::Failure(text) => format!("Error: {text}"),
        };
        self.push(MessageRole::ActionResult, content, Vec::new(), Some(result))
    }

    /// Content of the most recent assistant turn, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }

    fn push(
        &mut self,
        role: MessageRole,
        content: String,
        action_requests: Vec<ActionRequest>,
        result: Option<ActionResult>,
    ) -> &Message {
        let id = self.messages.len();
        self.messages.push(Message {
            id,
            role,
            content,
            action_requests,
            result,
        });
        &self.messages[id]
    }
}
