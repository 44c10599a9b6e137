//! Planner：向模型索取计划，并在摄取失败时带反馈重试
//!
//! 每次失败后，下一轮 User 提示追加 `Previous attempt failed with error: ...`；
//! 尝试次数达到上限后返回 IngestionError::Exhausted。

use std::sync::Arc;

use crate::core::IngestionError;
use crate::llm::{LlmClient, Message};
use crate::plan::{preview, Plan};
use crate::planning::ingest_for;
use crate::tools::CapabilityRegistry;

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    /// 提示词中的能力目录
    catalog: String,
    max_attempts: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: &CapabilityRegistry) -> Self {
        Self {
            llm,
            catalog: registry.catalog(),
            max_attempts: 3,
        }
    }

    /// 至少 1 次
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn system_prompt(&self) -> String {
        format!(
            r#"You are a planning assistant. Given a user request, create a detailed step-by-step plan.

Available capabilities:
{catalog}

Return a JSON array of steps, each with:
- id: step number (starting from 1)
- description: what to do
- capability: which capability to use (one of the names above; use "echo" for thinking steps)
- params: JSON object of parameters for the capability
- dependencies: list of step ids that must complete first (or empty list)

Example:
[
  {{
    "id": 1,
    "description": "View the current directory structure",
    "capability": "bash_executor",
    "params": {{"command": "ls -la"}},
    "dependencies": []
  }},
  {{
    "id": 2,
    "description": "Create a new Python file",
    "capability": "file_editor",
    "params": {{"command": "create", "path": "hello.py", "content": "print('hello')"}},
    "dependencies": [1]
  }}
]

IMPORTANT: Return ONLY valid JSON. Do not include any explanatory text before or after the JSON array. Ensure proper JSON formatting with correct commas and no trailing commas."#,
            catalog = self.catalog
        )
    }

    /// 生成并摄取计划，最多尝试 max_attempts 次
    pub async fn create_plan(&self, request: &str) -> Result<Plan, IngestionError> {
        let system = self.system_prompt();
        let mut user_prompt = format!("User request: {request}\n\nCreate a detailed execution plan.");
        let mut last = IngestionError::Query("no attempt made".to_string());

        for attempt in 1..=self.max_attempts {
            let messages = [Message::system(system.clone()), Message::user(user_prompt.clone())];
            let outcome = match self.llm.complete(&messages).await {
                Ok(raw) => {
                    tracing::debug!(attempt, reply = %preview(&raw, 2000), "planner reply");
                    ingest_for(request, &raw)
                }
                Err(e) => Err(IngestionError::Query(e)),
            };
            match outcome {
                Ok(plan) => {
                    tracing::info!(attempt, steps = plan.steps().len(), "plan created");
                    return Ok(plan);
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = self.max_attempts, error = %e, "plan attempt failed");
                    if attempt < self.max_attempts {
                        user_prompt = format!(
                            "{user_prompt}\n\nPrevious attempt failed with error: {e}\nPlease ensure you return valid JSON with proper formatting."
                        );
                    }
                    last = e;
                }
            }
        }

        let err = IngestionError::Exhausted {
            attempts: self.max_attempts,
            last: last.to_string(),
        };
        tracing::error!(error = %err, "plan creation failed");
        Err(err)
    }
}
