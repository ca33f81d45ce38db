//! Built-in actions over the run's shared virtual file store.

use std::sync::Arc;

use async_trait::async_trait;
use research_core::actions::{Action, ActionBox, ActionContext, ActionDefinition, Capability};
use research_core::error::ActionError;
use research_core::schema::{ActionArgs, ArgumentSchema, ParamType};
use serde::Deserialize;
use serde_json::json;

/// Lists every file key in the store.
pub struct LsAction;

#[async_trait]
impl Action for LsAction {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(
            "ls",
            "List all files in the shared file store",
            Capability::ReadsFiles,
            ArgumentSchema::new(),
        )
    }

    async fn execute(&self, _args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        Ok(json!(ctx.files.list()).to_string())
    }
}

pub struct ReadFileAction;

#[derive(Deserialize)]
struct ReadFileArgs {
    file_path: String,
    offset: usize,
    limit: usize,
}

const DEFAULT_READ_LIMIT: u64 = 2000;
// Longest line returned before truncation.
const MAX_LINE_CHARS: usize = 2000;

#[async_trait]
impl Action for ReadFileAction {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(
            "read_file",
            "Read a file, with optional line offset and limit. Lines are numbered.",
            Capability::ReadsFiles,
            ArgumentSchema::new()
                .required("file_path", ParamType::String, "Key of the file to read")
                .with_default(
                    "offset",
                    ParamType::Integer,
                    "Line number to start reading from (0-based)",
                    json!(0),
                )
                .with_default(
                    "limit",
                    ParamType::Integer,
                    "Maximum number of lines to read",
                    json!(DEFAULT_READ_LIMIT),
                ),
        )
    }

    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        let args: ReadFileArgs = args.parse("read_file")?;
        let contents = ctx.files.read(&args.file_path)?;

        if contents.trim().is_empty() {
            return Ok("System reminder: File exists but has empty contents".into());
        }

        let lines: Vec<&str> = contents.lines().collect();
        if args.offset >= lines.len() {
            return Err(ActionError::validation(
                "read_file",
                format!(
                    "line offset {} exceeds file length ({} lines)",
                    args.offset,
                    lines.len()
                ),
            ));
        }

        let end = args.offset.saturating_add(args.limit).min(lines.len());
        let formatted = lines[args.offset..end]
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let line: String = line.chars().take(MAX_LINE_CHARS).collect();
                format!("{:6}\t{}", args.offset + idx + 1, line)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(formatted)
    }
}

/// Creates or replaces a whole file.
pub struct WriteFileAction;

#[async_trait]
impl Action for WriteFileAction {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(
            "write_file",
            "Write content to a file, creating it or replacing its previous content",
            Capability::WritesFiles,
            ArgumentSchema::new()
                .required("file_path", ParamType::String, "Key of the file to write")
                .required("content", ParamType::String, "Full content of the file")
                .optional(
                    "expected_revision",
                    ParamType::Integer,
                    "Only write if the file is still at this revision (0 = must not exist)",
                ),
        )
    }

    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        let path = args.require_str("write_file", "file_path")?;
        let content = args.require_str("write_file", "content")?;

        let expected = args
            .get("expected_revision")
            .map(|v| {
                v.as_u64().ok_or_else(|| {
                    ActionError::validation("write_file", "expected_revision must be >= 0")
                })
            })
            .transpose()?;
        let revision = match expected {
            Some(expected) => ctx.files.write_if_revision(path, content, expected)?,
            None => ctx.files.write(path, content)?,
        };
        tracing::debug!(
            agent = %ctx.agent,
            request = %ctx.request_id,
            key = path,
            revision,
            "write_file"
        );
        Ok(format!("Updated file {path} (revision {revision})"))
    }
}

pub struct EditFileAction;

#[derive(Deserialize)]
struct EditFileArgs {
    file_path: String,
    old_string: String,
    new_string: String,
    replace_all: bool,
}

#[async_trait]
impl Action for EditFileAction {
    fn definition(&self) -> ActionDefinition {
        ActionDefinition::new(
            "edit_file",
            "Edit a file by replacing old_string with new_string",
            Capability::WritesFiles,
            ArgumentSchema::new()
                .required("file_path", ParamType::String, "Key of the file to edit")
                .required("old_string", ParamType::String, "Exact text to replace")
                .required("new_string", ParamType::String, "Replacement text")
                .with_default(
                    "replace_all",
                    ParamType::Boolean,
                    "Replace every occurrence instead of requiring a unique match",
                    json!(false),
                ),
        )
    }

    async fn execute(&self, args: ActionArgs, ctx: ActionContext) -> Result<String, ActionError> {
        let args: EditFileArgs = args.parse("edit_file")?;
        let (revision, replaced) = ctx.files.edit(
            &args.file_path,
            &args.old_string,
            &args.new_string,
            args.replace_all,
        )?;
        tracing::debug!(
            agent = %ctx.agent,
            request = %ctx.request_id,
            key = %args.file_path,
            revision,
            replaced,
            "edit_file"
        );

        Ok(if args.replace_all {
            format!(
                "Replaced {replaced} instance(s) in '{}' (revision {revision})",
                args.file_path
            )
        } else {
            format!("Replaced string in '{}' (revision {revision})", args.file_path)
        })
    }
}

pub fn filesystem_actions() -> Vec<ActionBox> {
    vec![
        Arc::new(LsAction),
        Arc::new(ReadFileAction),
        Arc::new(WriteFileAction),
        Arc::new(EditFileAction),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::actions::ActionRegistry;
    use research_core::files::VirtualFileStore;
    use serde_json::{json, Value};

    async fn call(
        files: &Arc<VirtualFileStore>,
        name: &str,
        args: Value,
    ) -> Result<String, ActionError> {
        let mut registry = ActionRegistry::new();
        registry.register_all(filesystem_actions());
        let (action, args) = registry.prepare(name, &args)?;
        action
            .execute(args, ActionContext::new("root", files.clone()))
            .await
    }

    #[tokio::test]
    async fn ls_lists_sorted_keys() {
        let files = Arc::new(VirtualFileStore::new());
        files.write("b.md", "x").unwrap();
        files.write("a.txt", "y").unwrap();

        let out = call(&files, "ls", json!({})).await.unwrap();
        let keys: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(keys, vec!["a.txt", "b.md"]);
    }

    #[tokio::test]
    async fn read_file_numbers_lines_and_honours_window() {
        let files = Arc::new(VirtualFileStore::new());
        files.write("notes.md", "one\ntwo\nthree").unwrap();

        let all = call(&files, "read_file", json!({"file_path": "notes.md"}))
            .await
            .unwrap();
        assert_eq!(all, "     1\tone\n     2\ttwo\n     3\tthree");

        let window = call(
            &files,
            "read_file",
            json!({"file_path": "notes.md", "offset": 1, "limit": 1}),
        )
        .await
        .unwrap();
        assert_eq!(window, "     2\ttwo");

        let past_end = call(
            &files,
            "read_file",
            json!({"file_path": "notes.md", "offset": 9}),
        )
        .await
        .unwrap_err();
        assert!(matches!(past_end, ActionError::Validation { .. }));
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let files = Arc::new(VirtualFileStore::new());
        let err = call(&files, "read_file", json!({"file_path": "q.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::NotFound("q.txt".into()));
    }

    #[tokio::test]
    async fn write_file_reports_revision_and_checks_expected() {
        let files = Arc::new(VirtualFileStore::new());
        let out = call(
            &files,
            "write_file",
            json!({"file_path": "q.txt", "content": "What is X?"}),
        )
        .await
        .unwrap();
        assert_eq!(out, "Updated file q.txt (revision 1)");
        assert_eq!(files.read("q.txt").unwrap(), "What is X?");

        let conflict = call(
            &files,
            "write_file",
            json!({"file_path": "q.txt", "content": "other", "expected_revision": 0}),
        )
        .await
        .unwrap_err();
        assert!(matches!(conflict, ActionError::RevisionConflict { found: 1, .. }));
        assert_eq!(files.read("q.txt").unwrap(), "What is X?");
    }

    #[tokio::test]
    async fn negative_expected_revision_is_rejected_without_writing() {
        let files = Arc::new(VirtualFileStore::new());
        files.write("report.md", "draft").unwrap();

        let err = call(
            &files,
            "write_file",
            json!({"file_path": "report.md", "content": "clobbered", "expected_revision": -1}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ActionError::Validation { .. }));
        assert!(err.to_string().contains("expected_revision"));
        assert_eq!(files.read("report.md").unwrap(), "draft");
        assert_eq!(files.revision("report.md"), Some(1));
    }

    #[tokio::test]
    async fn edit_file_replaces_text() {
        let files = Arc::new(VirtualFileStore::new());
        files.write("report.md", "hello world").unwrap();

        let out = call(
            &files,
            "edit_file",
            json!({"file_path": "report.md", "old_string": "world", "new_string": "rust"}),
        )
        .await
        .unwrap();
        assert_eq!(out, "Replaced string in 'report.md' (revision 2)");
        assert_eq!(files.read("report.md").unwrap(), "hello rust");
    }
}
