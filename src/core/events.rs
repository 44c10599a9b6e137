//! 运行事件：可序列化为 JSON，供宿主（CLI / UI）观察编排过程

use serde::Serialize;

use crate::core::{PlanSnapshot, RunPhase, RunStatus};
use crate::plan::{StepId, StepStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseChanged { phase: RunPhase },
    PlanCreated { snapshot: PlanSnapshot },
    StepStarted {
        step_id: StepId,
        capability: String,
        attempt: u32,
    },
    StepFinished {
        step_id: StepId,
        status: StepStatus,
        /// 输出或错误的预览
        preview: String,
    },
    RecoveryApplied {
        step_id: StepId,
        action: String,
        detail: String,
    },
    /// 恢复失败，降级为跳过
    RecoveryFallback { step_id: StepId, reason: String },
    RunFinished {
        status: RunStatus,
        snapshot: PlanSnapshot,
    },
}
