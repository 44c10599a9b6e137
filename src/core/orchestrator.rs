//! 编排器：主控循环
//!
//! 阶段流转：Planning -> Executing <-> Recovering -> Done。
//! - Planning：Planner 生成并摄取计划，失败即 Aborted
//! - Executing：每轮先检查取消与迭代上限，再调用 Scheduler::advance
//! - Recovering：计划标记 needs_recovery 时，对全部 Failed 步骤执行恢复
//! - Done：计划完成、迭代上限、取消、死锁或致命错误
//!
//! 取消是协作式的：只在轮次边界检查，正在执行的能力通过子令牌自行响应。

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{
    AppliedRecovery, FallbackRecord, OrchestratorError, Outcome, PlanSnapshot, RecoveryEngine,
    RunEvent, RunPhase, Scheduler,
};
use crate::plan::{preview, value_text, Plan};
use crate::planning::Planner;

/// 一次运行的最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// 所有步骤 Completed
    Completed,
    /// 所有步骤终态，但至少一个被跳过
    CompletedWithSkips,
    IterationLimit,
    Cancelled,
    /// 摄取失败、死锁或非法状态迁移
    Aborted,
}

impl RunStatus {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::CompletedWithSkips => "completed_with_skips",
            Self::IterationLimit => "iteration_limit",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// 运行结果：状态、致命错误（如有）、最终计划与恢复记录
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub error: Option<OrchestratorError>,
    pub snapshot: PlanSnapshot,
    /// 规划阶段失败时为 None
    pub plan: Option<Plan>,
    pub recoveries: Vec<AppliedRecovery>,
    pub fallbacks: Vec<FallbackRecord>,
}

pub struct Orchestrator {
    planner: Planner,
    scheduler: Scheduler,
    recovery: RecoveryEngine,
    max_iterations: u32,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

/// 单次运行中累积的恢复记录
#[derive(Default)]
struct RunLedger {
    recoveries: Vec<AppliedRecovery>,
    fallbacks: Vec<FallbackRecord>,
}

impl Orchestrator {
    pub fn new(planner: Planner, scheduler: Scheduler, recovery: RecoveryEngine) -> Self {
        Self {
            planner,
            scheduler,
            recovery,
            max_iterations: 20,
            events: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// 订阅运行事件；接收端关闭后事件被静默丢弃
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn phase(&self, phase: RunPhase) {
        tracing::debug!(?phase, "phase changed");
        self.emit(RunEvent::PhaseChanged { phase });
    }

    /// 从用户请求开始的完整运行
    pub async fn run(&self, request: &str, cancel: &CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);
        async {
            tracing::info!(request = %preview(request, 120), "run started");
            self.phase(RunPhase::Planning);
            if cancel.is_cancelled() {
                return self.finish(run_id, None, RunStatus::Cancelled, None, RunLedger::default());
            }

            let planned = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                planned = self.planner.create_plan(request) => Some(planned),
            };
            match planned {
                None => self.finish(run_id, None, RunStatus::Cancelled, None, RunLedger::default()),
                Some(Ok(plan)) => self.drive(run_id, plan, cancel).await,
                Some(Err(e)) => self.finish(
                    run_id,
                    None,
                    RunStatus::Aborted,
                    Some(OrchestratorError::Ingestion(e)),
                    RunLedger::default(),
                ),
            }
        }
        .instrument(span)
        .await
    }

    /// 跳过规划，直接执行给定计划（恢复先前保存的计划时使用）
    pub async fn run_plan(&self, plan: Plan, cancel: &CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);
        async {
            tracing::info!(steps = plan.steps().len(), "run started from existing plan");
            self.drive(run_id, plan, cancel).await
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run_id: Uuid, mut plan: Plan, cancel: &CancellationToken) -> RunOutcome {
        let mut ledger = RunLedger::default();
        self.emit(RunEvent::PlanCreated {
            snapshot: plan.snapshot(),
        });
        self.phase(RunPhase::Executing);

        loop {
            if cancel.is_cancelled() {
                return self.finish(run_id, Some(plan), RunStatus::Cancelled, None, ledger);
            }

            if plan.needs_recovery() {
                self.phase(RunPhase::Recovering);
                let failures = self.recovery.collect_failures(&plan);
                match self.recovery.recover(&mut plan, &failures).await {
                    Ok(report) => {
                        for applied in &report.applied {
                            self.emit(RunEvent::RecoveryApplied {
                                step_id: applied.step_id,
                                action: applied.action.to_string(),
                                detail: applied.detail.clone(),
                            });
                        }
                        for fallback in &report.fallbacks {
                            self.emit(RunEvent::RecoveryFallback {
                                step_id: fallback.step_id,
                                reason: fallback.reason.clone(),
                            });
                        }
                        ledger.recoveries.extend(report.applied);
                        ledger.fallbacks.extend(report.fallbacks);
                    }
                    Err(e) => {
                        return self.finish(run_id, Some(plan), RunStatus::Aborted, Some(e), ledger);
                    }
                }
                self.phase(RunPhase::Executing);
                continue;
            }

            // 已完成的计划不受迭代上限影响
            if plan.iteration_count() >= self.max_iterations && !plan.is_complete() {
                tracing::warn!(
                    max_iterations = self.max_iterations,
                    completed = plan.completed_count(),
                    total = plan.steps().len(),
                    "iteration limit reached"
                );
                return self.finish(run_id, Some(plan), RunStatus::IterationLimit, None, ledger);
            }

            if let Some(step) = plan.next_eligible().and_then(|id| plan.step(id)) {
                self.emit(RunEvent::StepStarted {
                    step_id: step.id,
                    capability: step.capability.clone(),
                    attempt: step.attempts() + 1,
                });
            }

            match self.scheduler.advance(&mut plan, cancel).await {
                Ok(Outcome::PlanComplete) => {
                    let status = if plan.skipped_count() > 0 {
                        RunStatus::CompletedWithSkips
                    } else {
                        RunStatus::Completed
                    };
                    return self.finish(run_id, Some(plan), status, None, ledger);
                }
                Ok(Outcome::NoEligibleStep) => {
                    if plan.needs_recovery() {
                        continue;
                    }
                    let err = OrchestratorError::Deadlock {
                        blocked: plan.blocked_steps(),
                    };
                    return self.finish(run_id, Some(plan), RunStatus::Aborted, Some(err), ledger);
                }
                Ok(Outcome::Dispatched { step_id, result }) => {
                    let text = match &result {
                        Ok(output) => value_text(output),
                        Err(e) => e.to_string(),
                    };
                    if let Some(step) = plan.step(step_id) {
                        self.emit(RunEvent::StepFinished {
                            step_id,
                            status: step.status(),
                            preview: preview(&text, 200),
                        });
                    }
                }
                Err(e) => {
                    return self.finish(run_id, Some(plan), RunStatus::Aborted, Some(e), ledger);
                }
            }
        }
    }

    fn finish(
        &self,
        run_id: Uuid,
        plan: Option<Plan>,
        status: RunStatus,
        error: Option<OrchestratorError>,
        ledger: RunLedger,
    ) -> RunOutcome {
        let snapshot = plan.as_ref().map(Plan::snapshot).unwrap_or_default();
        match &error {
            Some(e) => tracing::error!(%status, error = %e, "run finished"),
            None => tracing::info!(
                %status,
                completed = snapshot.completed,
                total = snapshot.total,
                iterations = snapshot.iteration,
                "run finished"
            ),
        }
        self.phase(RunPhase::Done);
        self.emit(RunEvent::RunFinished {
            status,
            snapshot: snapshot.clone(),
        });
        RunOutcome {
            run_id,
            status,
            error,
            snapshot,
            plan,
            recoveries: ledger.recoveries,
            fallbacks: ledger.fallbacks,
        }
    }
}
