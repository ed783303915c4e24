//! File operation tools — workspace-rooted, traversal-safe file I/O.
//!
//! Every tool is constrained to a workspace root: absolute paths and any
//! `..` component are rejected before touching the filesystem. Reads are
//! read-only (parallel-eligible); writes carry local effect and require
//! confirmation.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;

use wh_domain::error::ErrorKind;
use wh_domain::tool::{Sensitivity, ToolOutcome};
use wh_engine::{Tool, ToolContext, ToolDescriptor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a relative path inside the workspace root. Rejects absolute
/// paths and parent traversal.
fn validate_path(root: &Path, raw: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return Err("absolute paths are not allowed".into());
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path may not contain '..'".into());
        }
    }
    Ok(root.join(candidate))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file-read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct FileReadRequest {
    path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    offset: Option<usize>,
    /// Maximum number of lines to return.
    #[serde(default)]
    limit: Option<usize>,
}

pub struct FileReadTool {
    descriptor: ToolDescriptor,
    root: PathBuf,
}

impl FileReadTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "file-read",
                "Read a text file from the workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Workspace-relative path" },
                        "offset": { "type": "integer", "minimum": 0, "description": "First line to return (0-indexed)" },
                        "limit": { "type": "integer", "minimum": 1, "description": "Maximum number of lines" }
                    },
                    "required": ["path"]
                }),
                Sensitivity::ReadOnly,
            ),
            root: root.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FileReadTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext<'_>) -> ToolOutcome {
        let req: FileReadRequest = match serde_json::from_value(arguments) {
            Ok(req) => req,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::ValidationError,
                    format!("invalid file-read arguments: {e}"),
                )
            }
        };
        let path = match validate_path(&self.root, &req.path) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(ErrorKind::ValidationError, e),
        };

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::SystemError,
                    format!("cannot read '{}': {e}", req.path),
                )
            }
        };

        let selected = match (req.offset, req.limit) {
            (None, None) => content,
            (offset, limit) => {
                let offset = offset.unwrap_or(0);
                let lines = content.lines().skip(offset);
                match limit {
                    Some(limit) => lines.take(limit).collect::<Vec<_>>().join("\n"),
                    None => lines.collect::<Vec<_>>().join("\n"),
                }
            }
        };
        ToolOutcome::ok(selected)
    }

    fn subtext(&self, arguments: &Value) -> Option<String> {
        arguments.get("path").and_then(Value::as_str).map(str::to_owned)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file-write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct FileWriteRequest {
    path: String,
    content: String,
}

pub struct FileWriteTool {
    descriptor: ToolDescriptor,
    root: PathBuf,
}

impl FileWriteTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "file-write",
                "Write a text file inside the workspace, creating parent directories.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Workspace-relative path" },
                        "content": { "type": "string", "description": "Full file content" }
                    },
                    "required": ["path", "content"]
                }),
                Sensitivity::LocalEffect,
            ),
            root: root.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FileWriteTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext<'_>) -> ToolOutcome {
        let req: FileWriteRequest = match serde_json::from_value(arguments) {
            Ok(req) => req,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::ValidationError,
                    format!("invalid file-write arguments: {e}"),
                )
            }
        };
        let path = match validate_path(&self.root, &req.path) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(ErrorKind::ValidationError, e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolOutcome::err(
                    ErrorKind::SystemError,
                    format!("cannot create parent directories: {e}"),
                );
            }
        }
        match fs::write(&path, req.content.as_bytes()).await {
            Ok(()) => ToolOutcome::ok(format!(
                "wrote {} bytes to {}",
                req.content.len(),
                req.path
            )),
            Err(e) => ToolOutcome::err(
                ErrorKind::SystemError,
                format!("cannot write '{}': {e}", req.path),
            ),
        }
    }

    fn subtext(&self, arguments: &Value) -> Option<String> {
        arguments.get("path").and_then(Value::as_str).map(str::to_owned)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file-list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct FileListRequest {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct FileListTool {
    descriptor: ToolDescriptor,
    root: PathBuf,
}

impl FileListTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "file-list",
                "List directory entries in the workspace.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Workspace-relative directory (default '.')" }
                    }
                }),
                Sensitivity::ReadOnly,
            ),
            root: root.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FileListTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext<'_>) -> ToolOutcome {
        let req: FileListRequest = match serde_json::from_value(arguments) {
            Ok(req) => req,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::ValidationError,
                    format!("invalid file-list arguments: {e}"),
                )
            }
        };
        let path = match validate_path(&self.root, &req.path) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(ErrorKind::ValidationError, e),
        };

        let mut reader = match fs::read_dir(&path).await {
            Ok(reader) => reader,
            Err(e) => {
                return ToolOutcome::err(
                    ErrorKind::SystemError,
                    format!("cannot list '{}': {e}", req.path),
                )
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().await.ok();
            entries.push(json!({
                "name": name,
                "is_dir": meta.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                "size": meta.map(|m| m.len()).unwrap_or(0),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let body = json!({ "path": req.path, "entries": entries, "count": entries.len() });
        match serde_json::to_string_pretty(&body) {
            Ok(text) => ToolOutcome::ok(text),
            Err(e) => ToolOutcome::err(ErrorKind::SystemError, format!("serialize: {e}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wh_engine::{InterruptToken, NullOutput};

    fn ws() -> TempDir {
        TempDir::new().expect("failed to create temp dir")
    }

    async fn run(tool: &dyn Tool, args: Value) -> ToolOutcome {
        let output = NullOutput;
        let interrupt = InterruptToken::new();
        tool.execute(
            args,
            ToolContext {
                output: &output,
                interrupt: &interrupt,
            },
        )
        .await
    }

    #[test]
    fn validate_path_rejects_traversal_and_absolute() {
        let ws = ws();
        assert!(validate_path(ws.path(), "../etc/passwd").is_err());
        assert!(validate_path(ws.path(), "/etc/passwd").is_err());
        assert!(validate_path(ws.path(), "nested/ok.txt").is_ok());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let ws = ws();
        let write = FileWriteTool::new(ws.path());
        let read = FileReadTool::new(ws.path());

        let outcome = run(
            &write,
            json!({ "path": "notes/hello.txt", "content": "line one\nline two\n" }),
        )
        .await;
        assert!(outcome.success, "{:?}", outcome.error);

        let outcome = run(&read, json!({ "path": "notes/hello.txt" })).await;
        assert!(outcome.success);
        assert_eq!(outcome.output.as_deref(), Some("line one\nline two\n"));
    }

    #[tokio::test]
    async fn read_honors_offset_and_limit() {
        let ws = ws();
        std::fs::write(ws.path().join("f.txt"), "l0\nl1\nl2\nl3\n").unwrap();
        let read = FileReadTool::new(ws.path());

        let outcome = run(&read, json!({ "path": "f.txt", "offset": 1, "limit": 2 })).await;
        assert_eq!(outcome.output.as_deref(), Some("l1\nl2"));
    }

    #[tokio::test]
    async fn read_missing_file_is_a_system_error() {
        let ws = ws();
        let read = FileReadTool::new(ws.path());
        let outcome = run(&read, json!({ "path": "ghost.txt" })).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::SystemError));
    }

    #[tokio::test]
    async fn traversal_is_rejected_as_validation_error() {
        let ws = ws();
        let read = FileReadTool::new(ws.path());
        let outcome = run(&read, json!({ "path": "../secrets" })).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn list_returns_sorted_entries() {
        let ws = ws();
        std::fs::write(ws.path().join("b.txt"), "b").unwrap();
        std::fs::write(ws.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();

        let list = FileListTool::new(ws.path());
        let outcome = run(&list, json!({})).await;
        assert!(outcome.success);

        let body: Value = serde_json::from_str(&outcome.output.unwrap()).unwrap();
        assert_eq!(body["count"], 3);
        assert_eq!(body["entries"][0]["name"], "a.txt");
        assert_eq!(body["entries"][2]["name"], "sub");
        assert_eq!(body["entries"][2]["is_dir"], true);
    }

    #[test]
    fn sensitivities_split_reads_from_writes() {
        let ws = ws();
        assert!(FileReadTool::new(ws.path()).descriptor().sensitivity.is_read_only());
        assert!(!FileReadTool::new(ws.path()).descriptor().requires_confirmation);
        assert!(!FileWriteTool::new(ws.path()).descriptor().sensitivity.is_read_only());
        assert!(FileWriteTool::new(ws.path()).descriptor().requires_confirmation);
    }
}
