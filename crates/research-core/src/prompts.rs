use crate::delegation::SubAgentDefinition;

pub const FILESYSTEM_SYSTEM_PROMPT: &str = r#"You share an in-memory file store with every other agent of this run. Available file actions:
- ls: list every file key
- read_file: read a file, optionally a window of lines
- write_file: create or replace a whole file
- edit_file: replace an exact string inside an existing file

Guidelines:
- Read a file before you edit it.
- Write complete content; a write replaces the previous revision.
- Edit one file at a time. Parallel writes to the same key overwrite each other.
- Report missing files instead of guessing their content."#;

pub const TASK_SYSTEM_PROMPT: &str = r#"You can hand work to specialist sub-agents with the `task` action.

Delegation guidelines:
- Put everything the sub-agent needs into the description; it sees nothing else.
- Only the sub-agent's final message comes back to you.
- Several `task` calls in the same turn run in parallel.
- Sub-agents cannot delegate further."#;

pub const TASK_ACTION_DESCRIPTION: &str = r#"Launch a specialist sub-agent to work on one task and return its final answer.

Arguments:
- description: the complete task for the sub-agent
- subagent_type: which sub-agent to use

Available sub-agents:
{other_agents}"#;

/// Description of the `task` action with the configured agents filled in.
pub fn task_action_description(agents: &[SubAgentDefinition]) -> String {
    let listing = agents
        .iter()
        .map(|a| format!("- {}: {}", a.name, a.description))
        .collect::<Vec<_>>()
        .join("\n");
    TASK_ACTION_DESCRIPTION.replace("{other_agents}", &listing)
}

/// Appends the file and delegation guidance the agent's actions call for.
pub fn compose_system_prompt(base: &str, files: bool, delegation: bool) -> String {
    let mut prompt = base.trim_end().to_string();
    if files {
        prompt.push_str("\n\n");
        prompt.push_str(FILESYSTEM_SYSTEM_PROMPT);
    }
    if delegation {
        prompt.push_str("\n\n");
        prompt.push_str(TASK_SYSTEM_PROMPT);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_description_lists_agents() {
        let agents = vec![
            SubAgentDefinition::new("research-agent", "Researches one topic", "..."),
            SubAgentDefinition::new("critique-agent", "Critiques the report", "..."),
        ];
        let text = task_action_description(&agents);
        assert!(text.contains("- research-agent: Researches one topic"));
        assert!(text.contains("- critique-agent: Critiques the report"));
        assert!(!text.contains("{other_agents}"));
    }

    #[test]
    fn compose_only_adds_relevant_sections() {
        let bare = compose_system_prompt("Be brief.\n", false, false);
        assert_eq!(bare, "Be brief.");

        let full = compose_system_prompt("Be brief.", true, true);
        assert!(full.starts_with("Be brief.\n\n"));
        assert!(full.contains("`task` action"));
        assert!(full.contains("edit_file"));
    }
}
