//! 沙箱文件系统与 file_editor 能力
//!
//! SafeFs 绑定根目录，所有路径先做词法规范化（处理 `.` 与 `..`），结果必须仍在根目录下；
//! FileEditor 基于 SafeFs 提供 view / create / copy / delete / str_replace / insert。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::tools::{Capability, InvocationContext};

/// 沙箱文件系统：绑定根目录，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析到根目录下的绝对路径；不要求路径已存在
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let raw = Path::new(path.trim());
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root_dir.join(raw)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(format!("Path escapes workspace: {}", path));
                    }
                }
                other => normalized.push(other.as_os_str()),
            }
        }

        if normalized.starts_with(&self.root_dir) {
            Ok(normalized)
        } else {
            Err(format!("Path escapes workspace: {}", path))
        }
    }

    fn existing(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = self.resolve(path)?;
        if resolved.exists() {
            Ok(resolved)
        } else {
            Err(format!("Path does not exist: {}", path))
        }
    }

    pub fn view(&self, path: &str, range: Option<(usize, i64)>) -> Result<String, String> {
        let resolved = self.existing(path)?;
        if resolved.is_dir() {
            let mut names: Vec<String> = std::fs::read_dir(&resolved)
                .map_err(|e| format!("List failed: {}", e))?
                .filter_map(|e| e.ok())
                .map(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        format!("{}/", name)
                    } else {
                        name
                    }
                })
                .collect();
            names.sort();
            let mut out = format!("Directory: {}", path);
            for name in names {
                out.push_str("\n  ");
                out.push_str(&name);
            }
            return Ok(out);
        }

        let content =
            std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {}", e))?;
        let lines: Vec<&str> = content.lines().collect();
        let (start, end) = match range {
            None => (1, lines.len()),
            Some((start, end)) => {
                let start = start.max(1);
                let end = if end < 0 {
                    lines.len()
                } else {
                    (end as usize).min(lines.len())
                };
                (start, end)
            }
        };
        if start > end {
            return Ok(String::new());
        }
        Ok(lines[start - 1..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:6}\t{}", start + i, line))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub fn create(&self, path: &str, content: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        if resolved.exists() {
            return Err(format!("File already exists: {}", path));
        }
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("Create failed: {}", e))?;
        }
        std::fs::write(&resolved, content).map_err(|e| format!("Create failed: {}", e))?;
        Ok(format!("File created: {}", path))
    }

    pub fn copy(&self, src: &str, target: &str) -> Result<String, String> {
        let from = self.existing(src)?;
        let to = self.resolve(target)?;
        if from.is_dir() {
            if to.exists() {
                return Err(format!("Target already exists: {}", target));
            }
            for entry in WalkDir::new(&from) {
                let entry = entry.map_err(|e| format!("Copy failed: {}", e))?;
                let rel = entry
                    .path()
                    .strip_prefix(&from)
                    .map_err(|e| format!("Copy failed: {}", e))?;
                let dest = to.join(rel);
                if entry.file_type().is_dir() {
                    std::fs::create_dir_all(&dest).map_err(|e| format!("Copy failed: {}", e))?;
                } else {
                    std::fs::copy(entry.path(), &dest)
                        .map_err(|e| format!("Copy failed: {}", e))?;
                }
            }
        } else {
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent).map_err(|e| format!("Copy failed: {}", e))?;
            }
            std::fs::copy(&from, &to).map_err(|e| format!("Copy failed: {}", e))?;
        }
        Ok(format!("Copied from {} to {}", src, target))
    }

    pub fn delete(&self, path: &str) -> Result<String, String> {
        let resolved = self.existing(path)?;
        if resolved == self.root_dir {
            return Err("Refusing to delete the workspace root".to_string());
        }
        if resolved.is_dir() {
            std::fs::remove_dir_all(&resolved)
        } else {
            std::fs::remove_file(&resolved)
        }
        .map_err(|e| format!("Delete failed: {}", e))?;
        Ok(format!("Deleted: {}", path))
    }

    /// old_str 必须恰好出现一次
    pub fn str_replace(&self, path: &str, old_str: &str, new_str: &str) -> Result<String, String> {
        if old_str.is_empty() {
            return Err("old_str is required".to_string());
        }
        let resolved = self.existing(path)?;
        let content =
            std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {}", e))?;
        match content.matches(old_str).count() {
            0 => return Err(format!("String not found: {}", old_str)),
            1 => {}
            n => return Err(format!("String appears {} times, must be unique", n)),
        }
        std::fs::write(&resolved, content.replacen(old_str, new_str, 1))
            .map_err(|e| format!("Write failed: {}", e))?;
        Ok(format!("Replaced in {}", path))
    }

    /// 在第 line 行之后插入（0 表示文件开头），超出行数时追加到末尾
    pub fn insert(&self, path: &str, line: usize, content: &str) -> Result<String, String> {
        if content.is_empty() {
            return Err("content is required".to_string());
        }
        let resolved = self.existing(path)?;
        let original =
            std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {}", e))?;
        let mut lines: Vec<String> = original.split_inclusive('\n').map(String::from).collect();
        if let Some(last) = lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
        let at = line.min(lines.len());
        lines.insert(at, format!("{}\n", content));
        std::fs::write(&resolved, lines.concat()).map_err(|e| format!("Write failed: {}", e))?;
        Ok(format!("Inserted at line {} in {}", line, path))
    }
}

/// file_editor 的参数
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum EditCommand {
    View {
        path: String,
        #[serde(default)]
        view_range: Option<(usize, i64)>,
    },
    Create {
        path: String,
        #[serde(default)]
        content: String,
    },
    Copy {
        path: String,
        target_path: String,
    },
    Delete {
        path: String,
    },
    StrReplace {
        path: String,
        old_str: String,
        #[serde(default)]
        new_str: String,
    },
    Insert {
        path: String,
        insert_line: usize,
        content: String,
    },
}

/// file_editor：沙箱内的文件查看与编辑
pub struct FileEditor {
    fs: SafeFs,
}

impl FileEditor {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Capability for FileEditor {
    fn name(&self) -> &str {
        "file_editor"
    }

    fn description(&self) -> &str {
        "View, create, copy, delete and edit files inside the workspace. Commands: view, create, copy, delete, str_replace, insert."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["view", "create", "copy", "delete", "str_replace", "insert"]
                },
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "content": {"type": "string", "description": "Content for create / insert"},
                "target_path": {"type": "string", "description": "Target path for copy"},
                "old_str": {"type": "string", "description": "Exact text to replace (must be unique)"},
                "new_str": {"type": "string", "description": "Replacement text"},
                "insert_line": {"type": "integer", "description": "Insert after this line (0 = top)"},
                "view_range": {"type": "array", "items": {"type": "integer"}, "description": "[start, end], end -1 = to end of file"}
            },
            "required": ["command", "path"]
        })
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, String> {
        let command: EditCommand =
            serde_json::from_value(params).map_err(|e| format!("Invalid parameters: {}", e))?;
        tracing::info!(step_id = ctx.step_id, command = ?command, "file_editor invoke");

        let output = match command {
            EditCommand::View { path, view_range } => self.fs.view(&path, view_range),
            EditCommand::Create { path, content } => self.fs.create(&path, &content),
            EditCommand::Copy { path, target_path } => self.fs.copy(&path, &target_path),
            EditCommand::Delete { path } => self.fs.delete(&path),
            EditCommand::StrReplace {
                path,
                old_str,
                new_str,
            } => self.fs.str_replace(&path, &old_str, &new_str),
            EditCommand::Insert {
                path,
                insert_line,
                content,
            } => self.fs.insert(&path, insert_line, &content),
        }?;
        Ok(Value::String(output))
    }
}
