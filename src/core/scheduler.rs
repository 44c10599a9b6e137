//! 调度器：顺序、依赖感知的单步推进
//!
//! 每次 advance：迭代计数加一；计划已完成返回 PlanComplete；否则按创建顺序取第一个可执行步骤，
//! 标记 InProgress，经 CapabilityExecutor 调用能力，再迁移为 Completed 或 Failed。
//! 每次调用至多改变一个步骤的状态。独立步骤也逐个执行，不做并行派发。

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;
use crate::plan::{Plan, StepError, StepId, StepStatus};
use crate::tools::{CapabilityExecutor, InvocationContext};

/// 单次 advance 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 派发了一个步骤；result 为能力的输出或归一化后的错误
    Dispatched {
        step_id: StepId,
        result: Result<Value, StepError>,
    },
    /// 计划未完成，但没有可执行步骤
    NoEligibleStep,
    PlanComplete,
}

pub struct Scheduler {
    executor: CapabilityExecutor,
}

impl Scheduler {
    pub fn new(executor: CapabilityExecutor) -> Self {
        Self { executor }
    }

    /// 推进一步。非法状态迁移是唯一的错误返回。
    pub async fn advance(
        &self,
        plan: &mut Plan,
        cancel: &CancellationToken,
    ) -> Result<Outcome, OrchestratorError> {
        plan.bump_iteration();

        if plan.is_complete() {
            return Ok(Outcome::PlanComplete);
        }
        let Some(step_id) = plan.next_eligible() else {
            return Ok(Outcome::NoEligibleStep);
        };

        let step = plan
            .step_mut(step_id)
            .ok_or(OrchestratorError::UnknownStep(step_id))?;
        step.transition(StepStatus::InProgress)?;
        let capability = step.capability.clone();
        let params = Value::Object(step.params.clone());
        let ctx = InvocationContext {
            step_id,
            attempt: step.attempts(),
            cancel: cancel.child_token(),
        };

        tracing::info!(
            step_id,
            capability = %capability,
            attempt = ctx.attempt,
            iteration = plan.iteration_count(),
            "dispatching step"
        );
        let started = std::time::Instant::now();
        let invoked = self.executor.invoke(&capability, params, &ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let step = plan
            .step_mut(step_id)
            .ok_or(OrchestratorError::UnknownStep(step_id))?;
        let result = match invoked {
            Ok(output) => {
                step.complete(output.clone())?;
                tracing::info!(step_id, outcome = "completed", duration_ms, "step finished");
                Ok(output)
            }
            Err(err) => {
                let error = StepError::from(&err);
                step.fail(error.clone())?;
                plan.set_needs_recovery(true);
                tracing::warn!(
                    step_id,
                    outcome = "failed",
                    duration_ms,
                    error = %error,
                    "step finished"
                );
                Err(error)
            }
        };

        Ok(Outcome::Dispatched { step_id, result })
    }
}
