use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::ActionDefinition;
use crate::messaging::Conversation;

/// One action the policy wants to run next.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionCall {
    /// Provider-assigned call id, when the model supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    FinalAnswer { text: String },
    /// `text` is whatever the model said alongside its calls.
    Actions {
        calls: Vec<ActionCall>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        text: String,
    },
}

impl Decision {
    pub fn final_answer(text: impl Into<String>) -> Self {
        Decision::FinalAnswer { text: text.into() }
    }

    pub fn actions(calls: Vec<ActionCall>) -> Self {
        Decision::Actions {
            calls,
            text: String::new(),
        }
    }

    pub fn actions_with_text(calls: Vec<ActionCall>, text: impl Into<String>) -> Self {
        Decision::Actions {
            calls,
            text: text.into(),
        }
    }

    pub fn single(name: impl Into<String>, args: Value) -> Self {
        Decision::Actions {
            calls: vec![ActionCall::new(name, args)],
            text: String::new(),
        }
    }
}

/// The language-model side of the loop: given everything an agent has seen
/// so far and the actions it may call, decide what happens next.
///
/// Implementations must not mutate the conversation; the engine owns it.
#[async_trait]
pub trait PlanningPolicy: Send + Sync {
    async fn decide(
        &self,
        conversation: &Conversation,
        actions: &[ActionDefinition],
    ) -> anyhow::Result<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decisions_serialize_with_kind_tag() {
        let decision = Decision::single("ls", json!({}));
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["kind"], "actions");
        assert_eq!(value["calls"][0]["name"], "ls");
        assert!(value["calls"][0].get("id").is_none());

        let parsed: Decision =
            serde_json::from_value(json!({"kind": "final_answer", "text": "done"})).unwrap();
        assert_eq!(parsed, Decision::final_answer("done"));
    }
}
