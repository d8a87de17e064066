//! Sandboxed file tools: list, read, write, apply patch.
//!
//! Every operation resolves its path through the workspace sandbox
//! before touching the filesystem, so traversal and symlink escapes fail
//! with no side effects.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;
use crate::patch;
use crate::sandbox::WorkspaceRoot;

/// List one directory level inside the workspace.
pub struct FsList;

#[async_trait]
impl Tool for FsList {
    fn name(&self) -> &str {
        "fs_list"
    }

    fn description(&self) -> &str {
        "List files and directories at a workspace-relative path. Lists one level; defaults to the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace. Defaults to '.'"
                }
            }
        })
    }

    async fn execute(&self, args: Value, workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let path = args["path"].as_str().unwrap_or(".");
        let resolved = workspace.resolve(path)?;

        let mut dir = tokio::fs::read_dir(&resolved.absolute).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await?;
            let relative_path = if resolved.relative.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", resolved.relative, name)
            };
            let mut record = json!({
                "name": name,
                "relative_path": relative_path,
                "type": if metadata.is_dir() { "dir" } else { "file" },
            });
            if metadata.is_file() {
                record["size"] = json!(metadata.len());
            }
            entries.push(record);
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(json!({ "path": path, "entries": entries }))
    }
}

/// Read a file as UTF-8.
pub struct FsRead;

#[async_trait]
impl Tool for FsRead {
    fn name(&self) -> &str {
        "fs_read"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file at a workspace-relative path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to read, relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' argument"))?;
        let resolved = workspace.resolve(path)?;

        if !resolved.absolute.is_file() {
            anyhow::bail!("File not found: {}", resolved.relative);
        }

        let bytes = tokio::fs::read(&resolved.absolute).await?;
        let content = String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("Not a UTF-8 text file: {}", resolved.relative))?;

        Ok(json!({
            "relative_path": resolved.relative,
            "content": content,
        }))
    }
}

/// Write a file, creating missing ancestor directories.
pub struct FsWrite;

#[async_trait]
impl Tool for FsWrite {
    fn name(&self) -> &str {
        "fs_write"
    }

    fn description(&self) -> &str {
        "Write content to a workspace-relative path. Fails if the file exists unless overwrite is true. Creates parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to write, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing file (default false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let path = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' argument"))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'content' argument"))?;
        let overwrite = args["overwrite"].as_bool().unwrap_or(false);

        let resolved = workspace.resolve(path)?;

        if resolved.absolute.exists() && !overwrite {
            anyhow::bail!(
                "File already exists: {} (pass overwrite=true to replace)",
                resolved.relative
            );
        }

        if let Some(parent) = resolved.absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved.absolute, content).await?;

        Ok(json!({
            "relative_path": resolved.relative,
            "bytes_written": content.len(),
        }))
    }
}

/// Apply an envelope or unified-diff patch inside the workspace.
pub struct FsApplyPatch;

#[async_trait]
impl Tool for FsApplyPatch {
    fn name(&self) -> &str {
        "fs_apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a patch to workspace files. Accepts the '*** Begin Patch' envelope format or a unified diff. Multi-file patches apply in order and stop at the first failure."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patch": {
                    "type": "string",
                    "description": "The patch text"
                }
            },
            "required": ["patch"]
        })
    }

    async fn execute(&self, args: Value, workspace: &WorkspaceRoot) -> anyhow::Result<Value> {
        let patch_text = args["patch"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'patch' argument"))?
            .to_string();

        let root = workspace.clone();
        let outcome =
            tokio::task::spawn_blocking(move || patch::apply_patch(&root, &patch_text)).await?;

        Ok(json!({
            "applied": outcome.applied,
            "summary": outcome.summary,
            "changed_files": outcome.changed_files,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ensure_root;

    fn workspace() -> (tempfile::TempDir, WorkspaceRoot) {
        let dir = tempfile::tempdir().unwrap();
        let root = ensure_root(dir.path()).unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn list_reports_types_and_sizes() {
        let (_dir, root) = workspace();
        std::fs::write(root.path().join("a.txt"), "12345").unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();

        let result = FsList.execute(json!({}), &root).await.unwrap();
        let entries = result["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "a.txt");
        assert_eq!(entries[0]["type"], "file");
        assert_eq!(entries[0]["size"], 5);
        assert_eq!(entries[1]["name"], "sub");
        assert_eq!(entries[1]["type"], "dir");
        assert!(entries[1].get("size").is_none());
    }

    #[tokio::test]
    async fn read_round_trips_utf8() {
        let (_dir, root) = workspace();
        std::fs::create_dir(root.path().join("docs")).unwrap();
        std::fs::write(root.path().join("docs/note.md"), "héllo").unwrap();

        let result = FsRead
            .execute(json!({"path": "docs/note.md"}), &root)
            .await
            .unwrap();
        assert_eq!(result["relative_path"], "docs/note.md");
        assert_eq!(result["content"], "héllo");
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let (_dir, root) = workspace();
        let err = FsRead
            .execute(json!({"path": "nope.txt"}), &root)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn write_refuses_overwrite_by_default() {
        let (_dir, root) = workspace();
        std::fs::write(root.path().join("keep.txt"), "original").unwrap();

        let err = FsWrite
            .execute(json!({"path": "keep.txt", "content": "new"}), &root)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(
            std::fs::read_to_string(root.path().join("keep.txt")).unwrap(),
            "original"
        );

        let result = FsWrite
            .execute(
                json!({"path": "keep.txt", "content": "new", "overwrite": true}),
                &root,
            )
            .await
            .unwrap();
        assert_eq!(result["bytes_written"], 3);
        assert_eq!(
            std::fs::read_to_string(root.path().join("keep.txt")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn write_creates_ancestors() {
        let (_dir, root) = workspace();
        let result = FsWrite
            .execute(json!({"path": "notes/plan.txt", "content": "x"}), &root)
            .await
            .unwrap();
        assert_eq!(result["relative_path"], "notes/plan.txt");
        assert!(root.path().join("notes/plan.txt").is_file());
    }

    #[tokio::test]
    async fn write_outside_sandbox_fails() {
        let (_dir, root) = workspace();
        let err = FsWrite
            .execute(json!({"path": "../evil.txt", "content": "x"}), &root)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[tokio::test]
    async fn apply_patch_tool_reports_outcome() {
        let (_dir, root) = workspace();
        let patch = "*** Begin Patch\n*** Add File: p.txt\npayload\n*** End Patch\n";

        let result = FsApplyPatch
            .execute(json!({"patch": patch}), &root)
            .await
            .unwrap();
        assert_eq!(result["applied"], true);
        assert_eq!(result["changed_files"][0], "p.txt");
        assert!(root.path().join("p.txt").exists());
    }
}
