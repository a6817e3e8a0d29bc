//! File tools - read, list, write, create, move, delete inside the workspace

use crate::{Tool, ToolContext, ToolDef, ToolResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use warden_foundation::{Error, FileOperation, Result, RiskSubject};

/// Maximum file size to read (1MB)
const MAX_READ_SIZE: u64 = 1024 * 1024;

/// Maximum directory entries returned
const MAX_LIST_ENTRIES: usize = 500;

fn parse<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| Error::InvalidInput(format!("{}: invalid parameters: {}", tool, e)))
}

fn path_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: String,
}

// ============================================================================
// read_file
// ============================================================================

pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("read_file", "Read a text file inside the workspace")
            .string_param("path", "Path relative to the workspace root", true)
            .integer_param("offset", "First line to return (1-based)", false)
            .integer_param("limit", "Maximum number of lines", false)
            .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::File {
            path: path_arg(args, "path"),
            op: FileOperation::Read,
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: ReadParams = parse("read_file", args)?;
        let path = ctx.resolve(&params.path)?;

        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Ok(ToolResult::error(format!("Not a file: {}", params.path)));
        }
        if meta.len() > MAX_READ_SIZE {
            return Ok(ToolResult::error(format!(
                "File too large ({} bytes, max {})",
                meta.len(),
                MAX_READ_SIZE
            )));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let offset = params.offset.unwrap_or(1).max(1) - 1;
        let lines: Vec<&str> = content.lines().skip(offset).collect();
        let lines = match params.limit {
            Some(limit) => &lines[..limit.min(lines.len())],
            None => &lines[..],
        };

        Ok(ToolResult::success_with_metadata(
            lines.join("\n"),
            serde_json::json!({ "path": params.path, "bytes": meta.len() }),
        ))
    }
}

// ============================================================================
// list_dir
// ============================================================================

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("list_dir", "List the entries of a workspace directory")
            .string_param("path", "Directory relative to the workspace root", true)
            .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::File {
            path: path_arg(args, "path"),
            op: FileOperation::Read,
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: PathParams = parse("list_dir", args)?;
        let path = ctx.resolve(&params.path)?;

        let mut reader = tokio::fs::read_dir(&path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
            if entries.len() >= MAX_LIST_ENTRIES {
                break;
            }
        }
        entries.sort();

        Ok(ToolResult::success_with_metadata(
            entries.join("\n"),
            serde_json::json!({ "count": entries.len() }),
        ))
    }
}

// ============================================================================
// write_file
// ============================================================================

pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("write_file", "Write text to a workspace file, creating it if needed")
            .string_param("path", "Path relative to the workspace root", true)
            .string_param("content", "Text to write", true)
            .boolean_param("append", "Append instead of overwriting", false)
            .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::File {
            path: path_arg(args, "path"),
            op: FileOperation::Write,
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: WriteParams = parse("write_file", args)?;
        let path = ctx.resolve(&params.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if params.append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(params.content.as_bytes()).await?;
            file.flush().await?;
        } else {
            tokio::fs::write(&path, params.content.as_bytes()).await?;
        }

        Ok(ToolResult::success(format!(
            "Wrote {} bytes to {}",
            params.content.len(),
            params.path
        )))
    }
}

// ============================================================================
// create_dir
// ============================================================================

pub struct CreateDirTool;

#[async_trait]
impl Tool for CreateDirTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("create_dir", "Create a directory (and parents) in the workspace")
            .string_param("path", "Directory relative to the workspace root", true)
            .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::File {
            path: path_arg(args, "path"),
            op: FileOperation::Create,
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: PathParams = parse("create_dir", args)?;
        let path = ctx.resolve(&params.path)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(ToolResult::success(format!("Created {}", params.path)))
    }
}

// ============================================================================
// move_file
// ============================================================================

pub struct MoveFileTool;

#[derive(Debug, Deserialize)]
struct MoveParams {
    from: String,
    to: String,
}

#[async_trait]
impl Tool for MoveFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("move_file", "Move or rename a file inside the workspace")
            .string_param("from", "Source path", true)
            .string_param("to", "Destination path", true)
            .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::Files(vec![
            (path_arg(args, "from"), FileOperation::Move),
            (path_arg(args, "to"), FileOperation::Write),
        ])
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: MoveParams = parse("move_file", args)?;
        let from = ctx.resolve(&params.from)?;
        let to = ctx.resolve(&params.to)?;

        if tokio::fs::try_exists(&to).await? {
            return Ok(ToolResult::error(format!("Destination exists: {}", params.to)));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&from, &to).await?;

        Ok(ToolResult::success(format!("Moved {} -> {}", params.from, params.to)))
    }
}

// ============================================================================
// delete_file
// ============================================================================

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn definition(&self) -> ToolDef {
        ToolDef::builder("delete_file", "Delete a single file inside the workspace")
            .string_param("path", "Path relative to the workspace root", true)
            .build()
    }

    fn risk_subject(&self, args: &Value) -> RiskSubject {
        RiskSubject::File {
            path: path_arg(args, "path"),
            op: FileOperation::Delete,
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolResult> {
        let params: PathParams = parse("delete_file", args)?;
        let path = ctx.resolve(&params.path)?;

        let meta = tokio::fs::metadata(&path).await?;
        if meta.is_dir() {
            return Ok(ToolResult::error(format!(
                "{} is a directory; delete_file removes files only",
                params.path
            )));
        }
        tokio::fs::remove_file(&path).await?;

        Ok(ToolResult::success(format!("Deleted {}", params.path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use warden_foundation::WorkspaceBoundary;

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(
            Arc::new(WorkspaceBoundary::new(dir.path())),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);

        let written = WriteFileTool
            .execute(&ctx, json!({ "path": "notes/a.txt", "content": "one\ntwo\nthree" }))
            .await
            .unwrap();
        assert!(written.success);

        let read = ReadFileTool
            .execute(&ctx, json!({ "path": "notes/a.txt", "offset": 2, "limit": 1 }))
            .await
            .unwrap();
        assert_eq!(read.content, "two");

        let listed = ListDirTool.execute(&ctx, json!({ "path": "notes" })).await.unwrap();
        assert_eq!(listed.content, "a.txt");

        DeleteFileTool
            .execute(&ctx, json!({ "path": "notes/a.txt" }))
            .await
            .unwrap();
        assert!(!dir.path().join("notes/a.txt").exists());
    }

    #[tokio::test]
    async fn test_move_and_create_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        CreateDirTool.execute(&ctx, json!({ "path": "out" })).await.unwrap();
        let moved = MoveFileTool
            .execute(&ctx, json!({ "from": "a.txt", "to": "out/b.txt" }))
            .await
            .unwrap();
        assert!(moved.success);
        assert!(dir.path().join("out/b.txt").exists());
    }

    #[tokio::test]
    async fn test_escape_is_rejected_by_handler() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(&ctx(&dir), json!({ "path": "../../etc/passwd" }))
            .await
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_risk_subjects() {
        assert_eq!(
            DeleteFileTool.risk_subject(&json!({ "path": "temp.txt" })),
            RiskSubject::File {
                path: "temp.txt".into(),
                op: FileOperation::Delete
            }
        );
        assert!(matches!(
            MoveFileTool.risk_subject(&json!({ "from": "a", "to": "b" })),
            RiskSubject::Files(ref files) if files.len() == 2
        ));
    }
}
