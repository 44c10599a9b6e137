//! Bash 执行能力：白名单命令，禁止危险操作
//!
//! 仅允许配置中的命令名（首词，如 ls、grep、cargo）；命令中出现禁止子串一律拒绝。
//! 命令串联（`;`、`&&`、`|`、反引号、`$(`、换行、后台 `&`）、绝对路径与 `..` 路径段都会被拒绝，
//! 使命令只能作用于工作目录之内。执行通过 `sh -c`，工作目录为沙箱根，带单次超时；运行被取消时结束子进程并如实返回错误。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::tools::{Capability, InvocationContext};

/// 无论配置如何都禁止的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "dd if=",
];

/// 会让 `sh -c` 执行第二条命令的写法
const CHAINING: &[&str] = &[";", "&", "|", "`", "$(", "\n", "\r"];

/// bash_executor：在工作目录中执行白名单命令
pub struct BashExecutor {
    allowed_commands: HashSet<String>,
    forbidden: Vec<String>,
    workdir: PathBuf,
    default_timeout_secs: u64,
}

impl BashExecutor {
    pub fn new(
        workdir: impl AsRef<Path>,
        allowed_commands: Vec<String>,
        forbidden_patterns: Vec<String>,
        default_timeout_secs: u64,
    ) -> Self {
        let mut forbidden: Vec<String> = FORBIDDEN_SUBSTR.iter().map(|s| s.to_string()).collect();
        forbidden.extend(forbidden_patterns.into_iter().map(|s| s.to_lowercase()));
        Self {
            allowed_commands: allowed_commands
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            forbidden,
            workdir: workdir.as_ref().to_path_buf(),
            default_timeout_secs,
        }
    }

    fn check(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(pattern) = self.forbidden.iter().find(|p| lower.contains(p.as_str())) {
            return Err(format!("Forbidden pattern: {}", pattern));
        }
        if let Some(op) = CHAINING.iter().find(|op| raw.contains(**op)) {
            return Err(format!("Command chaining not allowed: {:?}", op));
        }
        let name = lower.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Err("Empty command".to_string());
        }
        if !self.allowed_commands.contains(name) {
            return Err(format!("Command '{}' not in allowlist", name));
        }
        for token in raw.split_whitespace().skip(1) {
            check_path_token(token)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for BashExecutor {
    fn name(&self) -> &str {
        "bash_executor"
    }

    fn description(&self) -> &str {
        "Execute a whitelisted bash command in the workspace and return its output."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Bash command to execute"},
                "timeout": {"type": "integer", "description": "Execution timeout in seconds", "default": self.default_timeout_secs}
            },
            "required": ["command"]
        })
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, String> {
        let command = params
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.check(command)?;
        let secs = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_timeout_secs);

        tracing::info!(step_id = ctx.step_id, command = %command, "bash_executor invoke");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        let output = run_process(cmd, Duration::from_secs(secs), &ctx.cancel).await?;
        output_to_result(output)
    }
}

/// 参数中的路径必须留在工作目录内：不允许绝对路径、`~` 与 `..` 段
fn check_path_token(token: &str) -> Result<(), String> {
    let token = token
        .trim_start_matches(['<', '>'])
        .trim_matches(['"', '\'']);
    for piece in token.split('=') {
        if piece.starts_with('/') || piece.starts_with('~') {
            return Err(format!("Path outside workspace: {}", piece));
        }
        if piece.split('/').any(|seg| seg == "..") {
            return Err(format!("Path escapes workspace: {}", piece));
        }
    }
    Ok(())
}

/// 运行子进程：超时或取消时结束进程（kill_on_drop）并返回错误
pub(crate) async fn run_process(
    mut cmd: Command,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Output, String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().map_err(|e| format!("Execution failed: {}", e))?;

    tokio::select! {
        res = tokio::time::timeout(limit, child.wait_with_output()) => match res {
            Ok(output) => output.map_err(|e| format!("Execution failed: {}", e)),
            Err(_) => Err(format!("Command timeout after {} seconds", limit.as_secs())),
        },
        _ = cancel.cancelled() => Err("Execution cancelled".to_string()),
    }
}

/// 退出码为 0 返回 stdout（附带 stderr），否则错误中携带两者
pub(crate) fn output_to_result(output: Output) -> Result<Value, String> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        return Err(format!(
            "Exit {}\nstdout: {}\nstderr: {}",
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stdout.trim(),
            stderr.trim()
        ));
    }
    Ok(Value::String(if stderr.trim().is_empty() {
        stdout
    } else {
        format!("{}\nstderr: {}", stdout.trim_end(), stderr.trim())
    }))
}
