//! Step：单个可调度的工作单元及其状态机
//!
//! 状态只能经由 transition 改变：Scheduler 负责 Pending -> InProgress -> {Completed, Failed}，
//! RecoveryEngine 负责 {Pending, InProgress, Failed} -> Skipped 与 Failed -> Pending。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{OrchestratorError, TransitionError};

/// 步骤 ID：计划内唯一的正整数，创建后不变
pub type StepId = u32;

/// 步骤生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Completed / Failed / Skipped；Failed 仅对调度而言是终态，恢复引擎仍可将其拉回 Pending
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// 计入 Plan 完成度的状态
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// 依赖满足策略：Skipped 与 Completed 同样视为满足，被跳过步骤的下游仍会执行。
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn can_transition_to(self, to: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Pending, Skipped)
                | (InProgress, Skipped)
                | (Failed, Skipped)
                | (Failed, Pending)
        )
    }

    /// 待办清单中的状态标记
    pub fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
            Self::Failed => "[!]",
            Self::Skipped => "[-]",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// 失败类别（与 OrchestratorError 中可恢复的部分一一对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CapabilityNotFound,
    Handler,
    Timeout,
    Cancelled,
}

/// 步骤失败详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&OrchestratorError> for StepError {
    fn from(err: &OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::CapabilityNotFound(_) => FailureKind::CapabilityNotFound,
            OrchestratorError::Timeout { .. } => FailureKind::Timeout,
            OrchestratorError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Handler,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// 执行结果：成功载荷与错误详情互斥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    Success { output: Value, finished_at: i64 },
    Failure { error: StepError, finished_at: i64 },
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 计划中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub description: String,
    /// 执行该步骤的能力名
    pub capability: String,
    /// 传给能力的命名参数，对调度器不透明
    pub params: Map<String, Value>,
    pub dependencies: BTreeSet<StepId>,
    status: StepStatus,
    #[serde(default)]
    result: Option<StepResult>,
    /// 被派发执行的次数
    #[serde(default)]
    attempts: u32,
    /// 被恢复引擎拉回 Pending 的次数
    #[serde(default)]
    retries: u32,
}

impl Step {
    pub fn new(
        id: StepId,
        description: impl Into<String>,
        capability: impl Into<String>,
        params: Map<String, Value>,
        dependencies: impl IntoIterator<Item = StepId>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            capability: capability.into(),
            params,
            dependencies: dependencies.into_iter().collect(),
            status: StepStatus::Pending,
            result: None,
            attempts: 0,
            retries: 0,
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.result {
            Some(StepResult::Success { output, .. }) => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&StepError> {
        match &self.result {
            Some(StepResult::Failure { error, .. }) => Some(error),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// 唯一的状态迁移入口；非法迁移返回 TransitionError
    pub(crate) fn transition(&mut self, to: StepStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                step_id: self.id,
                from: self.status,
                to,
            });
        }
        match to {
            StepStatus::InProgress => self.attempts += 1,
            StepStatus::Pending => {
                self.result = None;
                self.retries += 1;
            }
            _ => {}
        }
        tracing::debug!(step_id = self.id, from = %self.status, to = %to, "step transition");
        self.status = to;
        Ok(())
    }

    pub(crate) fn complete(&mut self, output: Value) -> Result<(), TransitionError> {
        self.transition(StepStatus::Completed)?;
        self.result = Some(StepResult::Success {
            output,
            finished_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: StepError) -> Result<(), TransitionError> {
        self.transition(StepStatus::Failed)?;
        self.result = Some(StepResult::Failure {
            error,
            finished_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    /// 跳过；若此前已失败，保留失败详情供诊断
    pub(crate) fn skip(&mut self) -> Result<(), TransitionError> {
        self.transition(StepStatus::Skipped)
    }

    /// Failed -> Pending，清空结果，重新开始生命周期
    pub(crate) fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        self.transition(StepStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> Step {
        Step::new(1, "list files", "bash_executor", Map::new(), [])
    }

    fn handler_error(msg: &str) -> StepError {
        StepError {
            kind: FailureKind::Handler,
            message: msg.to_string(),
        }
    }

    #[test]
    fn test_happy_path_records_output_and_attempt() {
        let mut s = step();
        s.transition(StepStatus::InProgress).unwrap();
        s.complete(json!("ok")).unwrap();
        assert_eq!(s.status(), StepStatus::Completed);
        assert_eq!(s.output(), Some(&json!("ok")));
        assert!(s.error().is_none());
        assert_eq!(s.attempts(), 1);
    }

    #[test]
    fn test_completed_step_rejects_further_transitions() {
        let mut s = step();
        s.transition(StepStatus::InProgress).unwrap();
        s.complete(json!(null)).unwrap();
        for to in [
            StepStatus::Pending,
            StepStatus::InProgress,
            StepStatus::Failed,
            StepStatus::Skipped,
        ] {
            let err = s.transition(to).unwrap_err();
            assert_eq!(err.from, StepStatus::Completed);
            assert_eq!(err.to, to);
        }
    }

    #[test]
    fn test_pending_cannot_complete_without_dispatch() {
        let mut s = step();
        assert!(s.complete(json!("x")).is_err());
        assert_eq!(s.status(), StepStatus::Pending);
        assert!(s.result().is_none());
    }

    #[test]
    fn test_failed_step_can_be_retried_and_clears_result() {
        let mut s = step();
        s.transition(StepStatus::InProgress).unwrap();
        s.fail(handler_error("boom")).unwrap();
        assert_eq!(s.error().map(|e| e.message.as_str()), Some("boom"));

        s.reset_for_retry().unwrap();
        assert_eq!(s.status(), StepStatus::Pending);
        assert!(s.result().is_none());
        assert_eq!(s.retries(), 1);
    }

    #[test]
    fn test_skip_keeps_failure_detail() {
        let mut s = step();
        s.transition(StepStatus::InProgress).unwrap();
        s.fail(handler_error("missing file")).unwrap();
        s.skip().unwrap();
        assert_eq!(s.status(), StepStatus::Skipped);
        assert!(s.error().is_some());
        assert!(s.skip().is_err());
    }

    #[test]
    fn test_skipped_satisfies_dependency_but_failed_does_not() {
        assert!(StepStatus::Skipped.satisfies_dependency());
        assert!(StepStatus::Completed.satisfies_dependency());
        assert!(!StepStatus::Failed.satisfies_dependency());
        assert!(!StepStatus::InProgress.satisfies_dependency());
    }

    #[test]
    fn test_step_error_kind_from_orchestrator_error() {
        let timeout = OrchestratorError::Timeout {
            capability: "bash_executor".into(),
            limit: std::time::Duration::from_millis(500),
        };
        let err = StepError::from(&timeout);
        assert_eq!(err.kind, FailureKind::Timeout);
        assert!(err.message.contains("500ms"));
        let missing = OrchestratorError::CapabilityNotFound("nope".into());
        let err = StepError::from(&missing);
        assert_eq!(err.kind, FailureKind::CapabilityNotFound);
        assert!(err.message.contains("nope"));
    }
}
