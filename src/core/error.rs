//! 编排错误类型
//!
//! OrchestratorError 覆盖运行期的完整错误谱系：HandlerError / TimeoutError 在本地恢复（进入 RecoveryEngine），
//! IngestionError / DeadlockError / InvalidTransition 为致命错误，RecoveryExhausted 降级为 Skip。

use std::time::Duration;

use thiserror::Error;

use crate::plan::{StepId, StepStatus};

/// 运行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("Plan ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Capability '{capability}' timed out after {limit:?}")]
    Timeout { capability: String, limit: Duration },

    /// 计划未完成但没有任何可执行步骤（缺失依赖或依赖链断裂）
    #[error("Deadlock: no eligible step while plan is incomplete (blocked: {blocked:?})")]
    Deadlock { blocked: Vec<StepId> },

    #[error("Recovery exhausted for step {step_id}: {reason}")]
    RecoveryExhausted { step_id: StepId, reason: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Unknown step: {0}")]
    UnknownStep(StepId),

    #[error("Cancelled")]
    Cancelled,
}

/// 非法状态迁移（编程契约违例，必须显式失败）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("step {step_id}: {from} -> {to} is not a legal transition")]
pub struct TransitionError {
    pub step_id: StepId,
    pub from: StepStatus,
    pub to: StepStatus,
}

/// 计划结构校验错误：描述符形状、id、依赖完整性与无环性
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("Plan has no steps")]
    Empty,

    #[error("Expected a JSON array of step descriptors")]
    NotAnArray,

    #[error("Invalid step descriptor at index {index}: {reason}")]
    InvalidDescriptor { index: usize, reason: String },

    #[error("Invalid step id {0}: ids must be positive")]
    InvalidId(StepId),

    #[error("Duplicate step id: {0}")]
    DuplicateId(StepId),

    #[error("Step {step} depends on undefined step {dependency}")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("Dependency cycle involving step {0}")]
    CycleDetected(StepId),
}

/// 从模型回复中提取 JSON 失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("No JSON {0} found")]
    NotFound(&'static str),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("Expected a non-empty JSON {0}")]
    UnexpectedShape(&'static str),
}

/// 计划摄取错误
#[derive(Error, Debug, Clone)]
pub enum IngestionError {
    #[error("{0}")]
    Extract(#[from] ExtractError),

    #[error("{0}")]
    Invalid(#[from] PlanValidationError),

    #[error("LLM query failed: {0}")]
    Query(String),

    #[error("Failed to create plan after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// 诊断（恢复策略生成）失败；RecoveryEngine 将其降级为 Skip
#[derive(Error, Debug, Clone)]
pub enum DiagnosisError {
    #[error("Diagnosis query failed: {0}")]
    Query(String),

    #[error("Invalid recovery directive: {0}")]
    InvalidDirective(String),
}
