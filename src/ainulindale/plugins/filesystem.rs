//! Filesystem Plugin
//!
//! Sandboxed file access for agents. All operations are restricted to a
//! workspace root: paths are normalized, absolute paths are rejected, and
//! resolved paths (including symlink targets) must stay inside the root.
//!
//! # Operations
//!
//! | operation | permission |
//! |-----------|------------|
//! | `read_file` | read |
//! | `write_file` | write |
//! | `list_directory` | read |
//! | `search_files` | read |
//! | `codebase_search` | read |
//!
//! The workspace root comes from the tool entity's `root` config key,
//! falling back to the plugin-wide default. Successful writes emit
//! `filesystem.changed` on the event bus.

use crate::ainulindale::event_bus::EventPayload;
use crate::ainulindale::plugin::{
    ExecutionContext, ToolDef, ToolError, ToolParameter, ToolParameterType, ToolPlugin,
    ToolResult,
};
use crate::ainulindale::rbac::Permission;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Files larger than this are skipped by `codebase_search`.
const SEARCH_FILE_CAP: u64 = 1_048_576;

/// Sandboxed filesystem tool plugin.
pub struct FilesystemPlugin {
    default_root: PathBuf,
}

impl FilesystemPlugin {
    /// Create a plugin rooted at the given default workspace directory.
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: default_root.into(),
        }
    }

    fn root_from(&self, params: &JsonValue) -> PathBuf {
        params
            .get("root")
            .and_then(JsonValue::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_root.clone())
    }

    /// Normalize a relative path and verify it stays inside `root`.
    ///
    /// Symlinks are resolved before the containment check; for paths that
    /// do not exist yet, the nearest existing ancestor is resolved and the
    /// missing suffix re-attached.
    fn resolve(&self, root: &Path, path: &str) -> Result<PathBuf, ToolError> {
        let raw = PathBuf::from(path);
        if raw.is_absolute() {
            return Err(ToolError::InvalidParams(
                "Absolute paths are not allowed".to_string(),
            ));
        }

        let mut normalized = PathBuf::new();
        for component in raw.components() {
            match component {
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::Normal(c) => normalized.push(c),
                Component::CurDir => {}
                _ => {}
            }
        }
        let effective = root.join(&normalized);

        let root_canonical = root
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed(format!("Cannot resolve root: {}", e)))?;
        let resolved = if effective.exists() {
            effective
                .canonicalize()
                .map_err(|e| ToolError::ExecutionFailed(format!("Cannot resolve path: {}", e)))?
        } else {
            // Resolve the nearest existing ancestor so symlinked parents
            // cannot smuggle the path outside the root.
            let mut existing = effective.parent().ok_or_else(|| {
                ToolError::InvalidParams(format!("Path has no parent: {}", path))
            })?;
            while !existing.exists() {
                existing = existing.parent().ok_or_else(|| {
                    ToolError::InvalidParams(format!("No existing ancestor for: {}", path))
                })?;
            }
            let canonical_ancestor = existing.canonicalize().map_err(|e| {
                ToolError::ExecutionFailed(format!("Cannot resolve ancestor: {}", e))
            })?;
            let suffix = effective.strip_prefix(existing).unwrap_or(&effective);
            canonical_ancestor.join(suffix)
        };

        if !resolved.starts_with(&root_canonical) {
            return Err(ToolError::InvalidParams(format!(
                "Path escapes workspace root: {}",
                path
            )));
        }
        Ok(resolved)
    }

    fn read_file(&self, root: &Path, path: &str) -> Result<ToolResult, ToolError> {
        let resolved = self.resolve(root, path)?;
        if !resolved.exists() {
            return Err(ToolError::ExecutionFailed(format!("File not found: {}", path)));
        }
        if resolved.is_dir() {
            return Err(ToolError::ExecutionFailed(format!("Is a directory: {}", path)));
        }
        let content = fs::read_to_string(&resolved)
            .map_err(|e| ToolError::ExecutionFailed(format!("Read failed: {}", e)))?;
        Ok(ToolResult::success(json!({
            "path": path,
            "content": content,
        })))
    }

    fn write_file(&self, root: &Path, path: &str, content: &str) -> Result<ToolResult, ToolError> {
        let resolved = self.resolve(root, path)?;
        if resolved.exists() && resolved.is_dir() {
            return Err(ToolError::ExecutionFailed(format!("Is a directory: {}", path)));
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ToolError::ExecutionFailed(format!("Cannot create parents: {}", e)))?;
        }
        fs::write(&resolved, content)
            .map_err(|e| ToolError::ExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(ToolResult::success(json!({
            "path": path,
            "bytesWritten": content.len(),
        })))
    }

    fn list_directory(
        &self,
        root: &Path,
        path: &str,
        recursive: bool,
    ) -> Result<ToolResult, ToolError> {
        let resolved = self.resolve(root, path)?;
        if !resolved.is_dir() {
            return Err(ToolError::ExecutionFailed(format!("Not a directory: {}", path)));
        }
        let mut entries = Vec::new();
        self.collect_entries(root, &resolved, "", recursive, &mut entries)?;
        Ok(ToolResult::success(json!({ "path": path, "entries": entries })))
    }

    fn collect_entries(
        &self,
        root: &Path,
        dir: &Path,
        prefix: &str,
        recursive: bool,
        out: &mut Vec<JsonValue>,
    ) -> Result<(), ToolError> {
        let read_dir = fs::read_dir(dir)
            .map_err(|e| ToolError::ExecutionFailed(format!("List failed: {}", e)))?;
        let mut names: Vec<_> = read_dir
            .filter_map(|e| e.ok())
            .collect();
        names.sort_by_key(|e| e.file_name());
        for entry in names {
            let name = entry.file_name().to_string_lossy().to_string();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            out.push(json!({
                "name": rel,
                "isDirectory": metadata.is_dir(),
                "size": if metadata.is_dir() { 0 } else { metadata.len() },
            }));
            if recursive && metadata.is_dir() {
                // Skip subtrees whose resolved location leaves the root.
                if let (Ok(root_canonical), Ok(canonical)) =
                    (root.canonicalize(), entry.path().canonicalize())
                {
                    if !canonical.starts_with(&root_canonical) {
                        continue;
                    }
                }
                self.collect_entries(root, &entry.path(), &rel, true, out)?;
            }
        }
        Ok(())
    }

    fn search_files(
        &self,
        root: &Path,
        directory: &str,
        pattern: &str,
    ) -> Result<ToolResult, ToolError> {
        let listing = self.list_directory(root, directory, true)?;
        let matches: Vec<JsonValue> = listing.output["entries"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| {
                        e["name"]
                            .as_str()
                            .map(|n| n.contains(pattern))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(ToolResult::success(json!({
            "pattern": pattern,
            "matches": matches,
        })))
    }

    fn codebase_search(
        &self,
        root: &Path,
        directory: &str,
        query: &str,
        max_results: usize,
    ) -> Result<ToolResult, ToolError> {
        let listing = self.list_directory(root, directory, true)?;
        let mut hits = Vec::new();
        if let Some(entries) = listing.output["entries"].as_array() {
            'files: for entry in entries {
                if entry["isDirectory"].as_bool().unwrap_or(false) {
                    continue;
                }
                if entry["size"].as_u64().unwrap_or(0) > SEARCH_FILE_CAP {
                    continue;
                }
                let rel = match entry["name"].as_str() {
                    Some(name) => name,
                    None => continue,
                };
                let joined = if directory == "." || directory.is_empty() {
                    rel.to_string()
                } else {
                    format!("{}/{}", directory, rel)
                };
                let resolved = match self.resolve(root, &joined) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let content = match fs::read_to_string(&resolved) {
                    Ok(c) => c,
                    Err(_) => continue, // binary or unreadable
                };
                for (number, line) in content.lines().enumerate() {
                    if line.contains(query) {
                        hits.push(json!({
                            "path": joined,
                            "line": number + 1,
                            "text": line.trim_end(),
                        }));
                        if hits.len() >= max_results {
                            break 'files;
                        }
                    }
                }
            }
        }
        Ok(ToolResult::success(json!({
            "query": query,
            "hits": hits,
        })))
    }
}

#[async_trait]
impl ToolPlugin for FilesystemPlugin {
    fn id(&self) -> &str {
        "filesystem"
    }

    fn name(&self) -> &str {
        "File System"
    }

    fn description(&self) -> &str {
        "Read, write, and search files inside the workspace"
    }

    fn category(&self) -> &str {
        "storage"
    }

    fn icon(&self) -> &str {
        "folder"
    }

    fn config_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "root": {
                    "type": "string",
                    "description": "Workspace root for this tool entity"
                }
            }
        })
    }

    fn validate_config(
        &self,
        config: &serde_json::Map<String, JsonValue>,
    ) -> Result<(), ToolError> {
        if let Some(root) = config.get("root") {
            if !root.is_string() {
                return Err(ToolError::InvalidParams(
                    "'root' must be a string path".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn tools(&self) -> Vec<ToolDef> {
        vec![
            ToolDef::new("read_file", "Read a file's full content", Permission::Read)
                .with_parameter(
                    ToolParameter::new("path", ToolParameterType::String)
                        .with_description("Path relative to the workspace root")
                        .required(),
                ),
            ToolDef::new("write_file", "Create or overwrite a file", Permission::Write)
                .with_parameter(
                    ToolParameter::new("path", ToolParameterType::String)
                        .with_description("Path relative to the workspace root")
                        .required(),
                )
                .with_parameter(
                    ToolParameter::new("content", ToolParameterType::String)
                        .with_description("Full file content")
                        .required(),
                ),
            ToolDef::new("list_directory", "List a directory", Permission::Read)
                .with_parameter(
                    ToolParameter::new("path", ToolParameterType::String)
                        .with_description("Directory relative to the workspace root")
                        .with_default(json!(".")),
                )
                .with_parameter(
                    ToolParameter::new("recursive", ToolParameterType::Boolean)
                        .with_default(json!(false)),
                ),
            ToolDef::new("search_files", "Find files by name substring", Permission::Read)
                .with_parameter(
                    ToolParameter::new("pattern", ToolParameterType::String)
                        .with_description("Substring to match against file names")
                        .required(),
                )
                .with_parameter(
                    ToolParameter::new("directory", ToolParameterType::String)
                        .with_default(json!(".")),
                ),
            ToolDef::new(
                "codebase_search",
                "Search file contents for a query string",
                Permission::Read,
            )
            .with_parameter(
                ToolParameter::new("query", ToolParameterType::String)
                    .with_description("Text to look for")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("directory", ToolParameterType::String)
                    .with_default(json!(".")),
            )
            .with_parameter(
                ToolParameter::new("max_results", ToolParameterType::Integer)
                    .with_default(json!(20)),
            ),
        ]
    }

    async fn execute(
        &self,
        tool_name: &str,
        params: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let root = self.root_from(&params);
        let str_param = |key: &str| -> Result<String, ToolError> {
            params
                .get(key)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidParams(format!("'{}' must be a string", key)))
        };

        match tool_name {
            "read_file" => self.read_file(&root, &str_param("path")?),
            "write_file" => {
                let path = str_param("path")?;
                let content = str_param("content")?;
                let result = self.write_file(&root, &path, &content)?;
                ctx.emit(EventPayload::FilesystemChanged { path: path.clone() })
                    .await;
                Ok(result)
            }
            "list_directory" => {
                let path = params
                    .get("path")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(".");
                let recursive = params
                    .get("recursive")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false);
                self.list_directory(&root, path, recursive)
            }
            "search_files" => {
                let directory = params
                    .get("directory")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(".");
                self.search_files(&root, directory, &str_param("pattern")?)
            }
            "codebase_search" => {
                let directory = params
                    .get("directory")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(".");
                let max_results = params
                    .get("max_results")
                    .and_then(JsonValue::as_u64)
                    .unwrap_or(20) as usize;
                self.codebase_search(&root, directory, &str_param("query")?, max_results)
            }
            other => Err(ToolError::NotFound(format!(
                "filesystem has no operation '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ainulindale::event_bus::EventBus;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            board_id: "b".to_string(),
            hex_key: "1,0".to_string(),
            entity_id: "fs".to_string(),
            agent_id: None,
            bus: Arc::new(EventBus::new()),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let plugin = FilesystemPlugin::new(dir.path());
        let context = ctx();

        let written = plugin
            .execute(
                "write_file",
                json!({"path": "notes/hello.txt", "content": "Hello"}),
                &context,
            )
            .await
            .unwrap();
        assert!(written.success);

        let read = plugin
            .execute("read_file", json!({"path": "notes/hello.txt"}), &context)
            .await
            .unwrap();
        assert_eq!(read.output["content"], "Hello");
    }

    #[tokio::test]
    async fn test_path_traversal_is_blocked() {
        let dir = TempDir::new().unwrap();
        let plugin = FilesystemPlugin::new(dir.path());
        let err = plugin
            .execute(
                "read_file",
                json!({"path": "../../../etc/passwd"}),
                &ctx(),
            )
            .await;
        // `..` components collapse inside the root, so either the lookup
        // misses or an absolute rejection fires; both are errors.
        assert!(err.is_err() || !err.unwrap().success);

        let absolute = plugin
            .execute("read_file", json!({"path": "/etc/passwd"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(absolute.kind(), "tool.invalid_params");
    }

    #[tokio::test]
    async fn test_list_directory_recursive() {
        let dir = TempDir::new().unwrap();
        let plugin = FilesystemPlugin::new(dir.path());
        let context = ctx();
        for (path, content) in [("a.txt", "1"), ("sub/b.txt", "2")].iter() {
            plugin
                .execute(
                    "write_file",
                    json!({"path": path, "content": content}),
                    &context,
                )
                .await
                .unwrap();
        }
        let flat = plugin
            .execute("list_directory", json!({}), &context)
            .await
            .unwrap();
        assert_eq!(flat.output["entries"].as_array().unwrap().len(), 2);

        let deep = plugin
            .execute("list_directory", json!({"recursive": true}), &context)
            .await
            .unwrap();
        assert_eq!(deep.output["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_search_files_by_name() {
        let dir = TempDir::new().unwrap();
        let plugin = FilesystemPlugin::new(dir.path());
        let context = ctx();
        for path in ["report_a.txt", "report_b.txt", "other.md"].iter() {
            plugin
                .execute(
                    "write_file",
                    json!({"path": path, "content": "x"}),
                    &context,
                )
                .await
                .unwrap();
        }
        let found = plugin
            .execute("search_files", json!({"pattern": "report"}), &context)
            .await
            .unwrap();
        assert_eq!(found.output["matches"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_codebase_search_finds_lines() {
        let dir = TempDir::new().unwrap();
        let plugin = FilesystemPlugin::new(dir.path());
        let context = ctx();
        plugin
            .execute(
                "write_file",
                json!({"path": "src/main.rs", "content": "fn main() {\n    start_engine();\n}\n"}),
                &context,
            )
            .await
            .unwrap();
        let hits = plugin
            .execute("codebase_search", json!({"query": "start_engine"}), &context)
            .await
            .unwrap();
        let hits = hits.output["hits"].as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["path"], "src/main.rs");
        assert_eq!(hits[0]["line"], 2);
    }

    #[tokio::test]
    async fn test_root_override_from_config() {
        let default_dir = TempDir::new().unwrap();
        let override_dir = TempDir::new().unwrap();
        std::fs::write(override_dir.path().join("only_here.txt"), "found").unwrap();

        let plugin = FilesystemPlugin::new(default_dir.path());
        let read = plugin
            .execute(
                "read_file",
                json!({
                    "path": "only_here.txt",
                    "root": override_dir.path().to_string_lossy(),
                }),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(read.output["content"], "found");
    }
}
