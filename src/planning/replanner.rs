//! 模型驱动的诊断方：把失败上下文交给模型，解析其恢复指令
//!
//! 期望模型返回 `{"action": "modify" | "add_steps" | "skip" | "alternative", ...}`。
//! 早期格式把字段嵌在 `steps[0]` 里，这里会把它们提到顶层再解析，但从不补全缺失字段。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{DiagnosisContext, DiagnosisError, Diagnoser, RecoveryAction};
use crate::llm::{LlmClient, Message};
use crate::plan::preview;
use crate::planning::extract::{extract, JsonShape};
use crate::tools::CapabilityRegistry;

pub struct LlmDiagnoser {
    llm: Arc<dyn LlmClient>,
    catalog: String,
}

impl LlmDiagnoser {
    pub fn new(llm: Arc<dyn LlmClient>, registry: &CapabilityRegistry) -> Self {
        Self {
            llm,
            catalog: registry.catalog(),
        }
    }

    pub fn system_prompt(&self) -> String {
        format!(
            r#"You are a replanning assistant. A step of an execution plan failed. Choose ONE recovery directive.

Directives (return exactly one JSON object):
1. Modify the failed step with corrected parameters:
   {{"action": "modify", "params": {{...}}, "description": "optional new description"}}
2. Add new steps before or after the failed step to supply a missing precondition:
   {{"action": "add_steps", "position": "before" | "after", "steps": [{{"id": 1, "description": "...", "capability": "...", "params": {{...}}, "dependencies": []}}]}}
   Step ids inside "steps" are local labels; dependencies may use these labels or ids of existing steps.
   "before": the failed step is retried after the new steps. "after": the failed step is skipped and its dependents wait for the new steps.
3. Skip the failed step if it is not critical:
   {{"action": "skip", "reason": "..."}}
4. Replace the failed step with an alternative approach:
   {{"action": "alternative", "capability": "...", "params": {{...}}, "description": "..."}}

Available capabilities:
{catalog}

Return ONLY the JSON object."#,
            catalog = self.catalog
        )
    }

    pub fn user_prompt(ctx: &DiagnosisContext<'_>) -> String {
        let f = ctx.failure;
        let mut prompt = format!(
            "Original request: {}\n\nCurrent plan status:\n{}\n\nRecent execution:\n{}\n\nFailed step:\nStep {}: {}\nCapability: {}\nParams: {}\nError: {}\nAttempts: {}\n",
            ctx.request,
            ctx.snapshot.render(),
            ctx.summary,
            f.step_id,
            f.description,
            f.capability,
            Value::Object(f.params.clone()),
            f.error,
            f.attempts,
        );
        if !f.completed.is_empty() {
            prompt.push_str("\nCompleted step outputs:\n");
            for c in &f.completed {
                prompt.push_str(&format!("- Step {} ({}): {}\n", c.id, c.description, c.output_preview));
            }
        }
        prompt.push_str("\nProvide a recovery directive for this failure.");
        prompt
    }
}

/// 早期格式 `{"action": "modify", "steps": [{"tool_params": ...}]}` -> 顶层字段
fn lift_legacy_fields(mut value: Value) -> Value {
    let action = value.get("action").and_then(|a| a.as_str()).unwrap_or_default();
    if !matches!(action, "modify" | "alternative") {
        return value;
    }
    let first = value
        .get("steps")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .and_then(|s| s.as_object())
        .cloned();
    if let (Some(first), Some(obj)) = (first, value.as_object_mut()) {
        for key in ["params", "tool_params", "description", "capability", "tool"] {
            if let Some(v) = first.get(key) {
                obj.entry(key.to_string()).or_insert_with(|| v.clone());
            }
        }
        obj.remove("steps");
    }
    value
}

#[async_trait]
impl Diagnoser for LlmDiagnoser {
    async fn diagnose(&self, ctx: &DiagnosisContext<'_>) -> Result<RecoveryAction, DiagnosisError> {
        let messages = [
            Message::system(self.system_prompt()),
            Message::user(Self::user_prompt(ctx)),
        ];
        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(DiagnosisError::Query)?;
        tracing::debug!(step_id = ctx.failure.step_id, reply = %preview(&raw, 2000), "diagnosis reply");
        let value = extract(&raw, JsonShape::Object)
            .map_err(|e| DiagnosisError::InvalidDirective(e.to_string()))?;
        let action: RecoveryAction = serde_json::from_value(lift_legacy_fields(value))
            .map_err(|e| DiagnosisError::InvalidDirective(e.to_string()))?;
        tracing::debug!(step_id = ctx.failure.step_id, action = action.label(), "diagnosis received");
        Ok(action)
    }
}
