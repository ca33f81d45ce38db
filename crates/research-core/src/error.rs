//! Error taxonomy shared by the engine, the built-in actions and the runtime.
//!
//! Everything in [`ActionError`] is recoverable: the engine turns it into a
//! failed action result and hands it back to the issuing conversation.
//! [`EngineError`] covers the conditions that stop a run (or prevent it from
//! starting at all).

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("invalid call to '{action}': {reason}")]
    Validation { action: String, reason: String },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("unknown sub-agent '{name}'. Available: {}", .available.join(", "))]
    UnknownSubAgent {
        name: String,
        available: Vec<String>,
    },

    #[error("action '{0}' is not registered")]
    Unregistered(String),

    #[error("revision conflict on '{key}': expected revision {expected}, found {found}")]
    RevisionConflict { key: String, expected: u64, found: u64 },

    #[error("{action} failed: {message}")]
    Failed { action: String, message: String },
}

impl ActionError {
    pub fn validation(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(action: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Failed {
            action: action.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-friendly label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Validation { .. } => "validation",
            ActionError::NotFound(_) => "not_found",
            ActionError::UnknownSubAgent { .. } => "unknown_sub_agent",
            ActionError::Unregistered(_) => "unregistered",
            ActionError::RevisionConflict { .. } => "revision_conflict",
            ActionError::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("planning policy unavailable after {attempts} attempt(s): {message}")]
    PolicyUnavailable { attempts: u32, message: String },

    #[error("invalid run configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sub_agent_lists_available_names() {
        let err = ActionError::UnknownSubAgent {
            name: "writer".into(),
            available: vec!["research-agent".into(), "critique-agent".into()],
        };
        let text = err.to_string();
        assert!(text.contains("writer"));
        assert!(text.contains("research-agent, critique-agent"));
        assert_eq!(err.kind(), "unknown_sub_agent");
    }

    #[test]
    fn failed_wraps_display_values() {
        let err = ActionError::failed("internet_search", anyhow::anyhow!("timeout"));
        assert_eq!(err.to_string(), "internet_search failed: timeout");
    }
}
