//! Python 执行能力：`python3 -c <code>`，只捕获标准输出
//!
//! 以工作目录为当前目录运行；代码本身不受沙箱限制。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::shell::{output_to_result, run_process};
use crate::tools::{Capability, InvocationContext};

pub struct PythonExecutor {
    interpreter: String,
    workdir: PathBuf,
    default_timeout_secs: u64,
}

impl PythonExecutor {
    pub fn new(workdir: impl AsRef<Path>, default_timeout_secs: u64) -> Self {
        Self {
            interpreter: "python3".to_string(),
            workdir: workdir.as_ref().to_path_buf(),
            default_timeout_secs,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

#[async_trait]
impl Capability for PythonExecutor {
    fn name(&self) -> &str {
        "python_executor"
    }

    fn description(&self) -> &str {
        "Execute Python code and return output. Only print outputs are captured."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Python code to execute"},
                "timeout": {"type": "integer", "description": "Execution timeout in seconds", "default": self.default_timeout_secs}
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, String> {
        let code = params
            .get("code")
            .and_then(|v| v.as_str())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| "code is required".to_string())?;
        let secs = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_timeout_secs);

        tracing::info!(step_id = ctx.step_id, code_len = code.len(), "python_executor invoke");

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c").arg(code).current_dir(&self.workdir);
        let output = run_process(cmd, Duration::from_secs(secs), &ctx.cancel).await?;
        output_to_result(output)
    }
}
