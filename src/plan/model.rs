//! Plan：一次运行的有序步骤集合与运行级计数
//!
//! 步骤顺序即创建顺序（不是执行顺序）。只有持有控制权的组件（Scheduler 或 RecoveryEngine）
//! 通过 `&mut Plan` 修改它；对外观察只经由 [`PlanSnapshot`]。

use serde::{Deserialize, Serialize};

use crate::core::{IngestionError, PlanSnapshot, PlanValidationError, StepView};
use crate::plan::{validate_steps, Step, StepId, StepStatus};

/// 一次运行的计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    request: String,
    steps: Vec<Step>,
    #[serde(default)]
    iteration_count: u32,
    #[serde(default)]
    needs_recovery: bool,
}

impl Plan {
    /// 校验后创建；失败时不产生任何 Plan
    pub fn new(request: impl Into<String>, steps: Vec<Step>) -> Result<Self, PlanValidationError> {
        validate_steps(&steps)?;
        Ok(Self {
            request: request.into(),
            steps,
            iteration_count: 0,
            needs_recovery: false,
        })
    }

    /// 从持久化文档恢复，重新校验依赖完整性
    pub fn from_document(json: &str) -> Result<Self, IngestionError> {
        let plan: Plan = serde_json::from_str(json)
            .map_err(|e| crate::core::ExtractError::Parse(e.to_string()))?;
        validate_steps(&plan.steps)?;
        Ok(plan)
    }

    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn position(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub(crate) fn bump_iteration(&mut self) {
        self.iteration_count += 1;
    }

    pub fn needs_recovery(&self) -> bool {
        self.needs_recovery
    }

    pub(crate) fn set_needs_recovery(&mut self, value: bool) {
        self.needs_recovery = value;
    }

    /// 所有步骤均为 Completed 或 Skipped
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status().is_finished())
    }

    /// Pending 且所有依赖都满足
    pub fn is_eligible(&self, step: &Step) -> bool {
        step.status() == StepStatus::Pending
            && step.dependencies.iter().all(|dep| {
                self.step(*dep)
                    .map(|d| d.status().satisfies_dependency())
                    .unwrap_or(false)
            })
    }

    /// 按创建顺序扫描，返回第一个可执行步骤
    pub fn next_eligible(&self) -> Option<StepId> {
        self.steps
            .iter()
            .find(|s| self.is_eligible(s))
            .map(|s| s.id)
    }

    /// 仍为 Pending 但依赖无法满足的步骤
    pub fn blocked_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Pending && !self.is_eligible(s))
            .map(|s| s.id)
            .collect()
    }

    pub fn failed_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Failed)
            .map(|s| s.id)
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Completed)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Skipped)
            .count()
    }

    pub fn max_id(&self) -> StepId {
        self.steps.iter().map(|s| s.id).max().unwrap_or(0)
    }

    /// 只读投影（拥有所有权的数据，不暴露可变引用）
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            steps: self
                .steps
                .iter()
                .map(|s| StepView {
                    id: s.id,
                    description: s.description.clone(),
                    status: s.status(),
                })
                .collect(),
            completed: self.completed_count(),
            total: self.steps.len(),
            iteration: self.iteration_count,
        }
    }

    /// 执行摘要：较早的步骤只统计数量，最近 max_steps 个步骤附带结果预览
    pub fn execution_summary(&self, max_steps: usize, preview_chars: usize) -> String {
        let executed: Vec<&Step> = self
            .steps
            .iter()
            .filter(|s| s.status() != StepStatus::Pending)
            .collect();
        if executed.is_empty() {
            return "No steps executed yet.".to_string();
        }

        let mut lines = Vec::new();
        let split = executed.len().saturating_sub(max_steps);
        if split > 0 {
            let older = &executed[..split];
            let done = older
                .iter()
                .filter(|s| s.status() == StepStatus::Completed)
                .count();
            lines.push(format!(
                "Earlier: {} steps ({} completed, {} other)",
                older.len(),
                done,
                older.len() - done
            ));
        }
        for step in &executed[split..] {
            let detail = match (step.output(), step.error()) {
                (Some(out), _) => format!("result: {}", preview(&value_text(out), preview_chars)),
                (_, Some(err)) => format!("error: {}", preview(&err.message, preview_chars)),
                _ => String::new(),
            };
            lines.push(format!(
                "{} {}. {} ({}) {}",
                step.status().marker(),
                step.id,
                step.description,
                step.capability,
                detail
            ));
        }
        lines.join("\n")
    }

    /// 以新步骤序列整体替换；先校验，失败时计划保持原样
    pub(crate) fn replace_steps(&mut self, steps: Vec<Step>) -> Result<(), PlanValidationError> {
        validate_steps(&steps)?;
        self.steps = steps;
        Ok(())
    }
}

/// 输出转文本：字符串原样，其余用 JSON
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 按字符截断并追加省略号
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn step(id: StepId, deps: &[StepId]) -> Step {
        Step::new(id, format!("step {id}"), "echo", Map::new(), deps.iter().copied())
    }

    fn finish(plan: &mut Plan, id: StepId, ok: bool) {
        let s = plan.step_mut(id).unwrap();
        s.transition(StepStatus::InProgress).unwrap();
        if ok {
            s.complete(json!(format!("out {id}"))).unwrap();
        } else {
            s.fail(crate::plan::StepError {
                kind: crate::plan::FailureKind::Handler,
                message: "boom".into(),
            })
            .unwrap();
        }
    }

    #[test]
    fn test_invalid_plan_is_never_created() {
        let err = Plan::new("r", vec![step(1, &[]), step(2, &[99])]).unwrap_err();
        assert!(matches!(
            err,
            PlanValidationError::UnknownDependency { step: 2, dependency: 99 }
        ));
    }

    #[test]
    fn test_eligibility_follows_creation_order_and_dependencies() {
        let mut plan = Plan::new("r", vec![step(2, &[1]), step(1, &[]), step(3, &[])]).unwrap();
        assert_eq!(plan.next_eligible(), Some(1));
        finish(&mut plan, 1, true);
        assert_eq!(plan.next_eligible(), Some(2));
    }

    #[test]
    fn test_failed_dependency_blocks_and_skip_unblocks() {
        let mut plan = Plan::new("r", vec![step(1, &[]), step(2, &[1])]).unwrap();
        finish(&mut plan, 1, false);
        assert_eq!(plan.next_eligible(), None);
        assert_eq!(plan.blocked_steps(), vec![2]);
        assert_eq!(plan.failed_steps(), vec![1]);

        plan.step_mut(1).unwrap().skip().unwrap();
        assert_eq!(plan.next_eligible(), Some(2));
    }

    #[test]
    fn test_replace_steps_rejects_cycle_without_partial_apply() {
        let mut plan = Plan::new("r", vec![step(1, &[]), step(2, &[1])]).unwrap();
        let before = plan.steps().to_vec();
        let bad = vec![step(1, &[2]), step(2, &[1])];
        assert!(plan.replace_steps(bad).is_err());
        assert_eq!(plan.steps(), before.as_slice());
    }

    #[test]
    fn test_snapshot_and_completion() {
        let mut plan = Plan::new("r", vec![step(1, &[]), step(2, &[])]).unwrap();
        finish(&mut plan, 1, true);
        plan.step_mut(2).unwrap().skip().unwrap();
        assert!(plan.is_complete());
        let snap = plan.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.total, 2);
        assert_eq!(snap.steps[1].status, StepStatus::Skipped);
    }

    #[test]
    fn test_document_roundtrip_revalidates() {
        let mut plan = Plan::new("list files", vec![step(1, &[]), step(2, &[1])]).unwrap();
        finish(&mut plan, 1, true);
        let doc = plan.to_document().unwrap();
        let loaded = Plan::from_document(&doc).unwrap();
        assert_eq!(loaded.request(), "list files");
        assert_eq!(loaded.step(1).unwrap().status(), StepStatus::Completed);

        let mut tampered: serde_json::Value = serde_json::from_str(&doc).unwrap();
        tampered["steps"][1]["dependencies"] = json!([42]);
        assert!(Plan::from_document(&tampered.to_string()).is_err());
    }

    #[test]
    fn test_execution_summary_aggregates_older_steps() {
        let steps = (1..=4).map(|id| step(id, &[])).collect();
        let mut plan = Plan::new("r", steps).unwrap();
        for id in 1..=4 {
            finish(&mut plan, id, id != 4);
        }
        let summary = plan.execution_summary(2, 50);
        assert!(summary.starts_with("Earlier: 2 steps (2 completed, 0 other)"));
        assert!(summary.contains("[x] 3. step 3 (echo) result: out 3"));
        assert!(summary.contains("[!] 4. step 4 (echo) error: boom"));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("你好世界", 2), "你好...");
        assert_eq!(preview("abc", 5), "abc");
    }
}
