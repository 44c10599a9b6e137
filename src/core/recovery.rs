//! 错误恢复引擎
//!
//! 对每个失败步骤：检查恢复预算 -> 请求外部诊断（通常是模型）得到 RecoveryAction ->
//! 在步骤副本上应用并重新校验（id 唯一、依赖存在、无环）-> 通过才整体提交。
//! 诊断失败、指令非法或变更被校验拒绝时，该步骤降级为 Skip 并留下 FallbackRecord。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{DiagnosisError, OrchestratorError, PlanSnapshot};
use crate::plan::{preview, value_text, Plan, Step, StepDescriptor, StepError, StepId, StepStatus};

/// 新步骤插入到失败步骤之前还是之后
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    #[default]
    Before,
    After,
}

/// 恢复指令（诊断结果），JSON 形如 `{"action": "modify", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// 修正参数后重试；依赖不变
    #[serde(rename = "modify", alias = "modify_and_retry")]
    ModifyAndRetry {
        #[serde(alias = "tool_params")]
        params: Map<String, Value>,
        #[serde(default)]
        description: Option<String>,
    },
    /// 插入新步骤补足前置条件；steps 中的 id 只是本地标签
    #[serde(rename = "add_steps", alias = "insert_steps")]
    InsertSteps {
        #[serde(default)]
        position: InsertPosition,
        steps: Vec<StepDescriptor>,
    },
    /// 判定非关键，跳过
    Skip {
        #[serde(default)]
        reason: Option<String>,
    },
    /// 换一种做法：整体替换 capability / params，保留 id 与下游引用
    Alternative {
        #[serde(alias = "tool")]
        capability: String,
        #[serde(alias = "tool_params")]
        params: Map<String, Value>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl RecoveryAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ModifyAndRetry { .. } => "modify",
            Self::InsertSteps { .. } => "add_steps",
            Self::Skip { .. } => "skip",
            Self::Alternative { .. } => "alternative",
        }
    }
}

/// 已完成步骤的输出预览（诊断上下文）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedOutput {
    pub id: StepId,
    pub description: String,
    pub output_preview: String,
}

/// 失败记录：每次恢复时临时构造
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub step_id: StepId,
    pub description: String,
    pub capability: String,
    pub params: Map<String, Value>,
    pub error: StepError,
    pub attempts: u32,
    /// 最近若干个已完成步骤的输出
    pub completed: Vec<CompletedOutput>,
}

/// 交给诊断方的上下文
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisContext<'a> {
    pub request: &'a str,
    pub snapshot: &'a PlanSnapshot,
    /// 最近步骤的执行摘要
    pub summary: &'a str,
    pub failure: &'a FailureRecord,
}

/// 诊断方：给定失败上下文，产出一条恢复指令
#[async_trait]
pub trait Diagnoser: Send + Sync {
    async fn diagnose(&self, ctx: &DiagnosisContext<'_>) -> Result<RecoveryAction, DiagnosisError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRecovery {
    pub step_id: StepId,
    pub action: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// 诊断调用失败或返回无法解析的指令
    DiagnosisFailed,
    /// 指令可解析，但应用后的计划未通过校验
    InvalidMutation,
    /// 单步恢复预算已用尽
    Exhausted,
}

/// 降级为 Skip 的记录（供观测）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackRecord {
    pub step_id: StepId,
    pub kind: FallbackKind,
    pub reason: String,
}

/// 一次恢复轮次的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub applied: Vec<AppliedRecovery>,
    pub fallbacks: Vec<FallbackRecord>,
}

/// 恢复引擎：持有诊断方与预算
pub struct RecoveryEngine {
    diagnoser: Arc<dyn Diagnoser>,
    max_recoveries_per_step: u32,
    context_steps: usize,
    preview_chars: usize,
}

impl RecoveryEngine {
    pub fn new(diagnoser: Arc<dyn Diagnoser>) -> Self {
        Self {
            diagnoser,
            max_recoveries_per_step: 5,
            context_steps: 5,
            preview_chars: 200,
        }
    }

    pub fn with_budget(mut self, max_recoveries_per_step: u32) -> Self {
        self.max_recoveries_per_step = max_recoveries_per_step;
        self
    }

    pub fn with_context(mut self, context_steps: usize, preview_chars: usize) -> Self {
        self.context_steps = context_steps;
        self.preview_chars = preview_chars;
        self
    }

    /// 为当前所有 Failed 步骤构造失败记录
    pub fn collect_failures(&self, plan: &Plan) -> Vec<FailureRecord> {
        let completed: Vec<CompletedOutput> = {
            let done: Vec<&Step> = plan
                .steps()
                .iter()
                .filter(|s| s.status() == StepStatus::Completed)
                .collect();
            let skip = done.len().saturating_sub(self.context_steps);
            done[skip..]
                .iter()
                .map(|s| CompletedOutput {
                    id: s.id,
                    description: s.description.clone(),
                    output_preview: s
                        .output()
                        .map(|v| preview(&value_text(v), self.preview_chars))
                        .unwrap_or_default(),
                })
                .collect()
        };

        plan.steps()
            .iter()
            .filter(|s| s.status() == StepStatus::Failed)
            .map(|s| FailureRecord {
                step_id: s.id,
                description: s.description.clone(),
                capability: s.capability.clone(),
                params: s.params.clone(),
                error: s.error().cloned().unwrap_or(StepError {
                    kind: crate::plan::FailureKind::Handler,
                    message: "unknown error".to_string(),
                }),
                attempts: s.attempts(),
                completed: completed.clone(),
            })
            .collect()
    }

    /// 对每个失败记录应用恢复；完成后清除 needs_recovery。
    /// 只有非法状态迁移（编程契约违例）会返回错误。
    pub async fn recover(
        &self,
        plan: &mut Plan,
        failures: &[FailureRecord],
    ) -> Result<RecoveryReport, OrchestratorError> {
        let mut report = RecoveryReport::default();

        for failure in failures {
            let step_id = failure.step_id;
            let step = plan
                .step(step_id)
                .ok_or(OrchestratorError::UnknownStep(step_id))?;
            if step.status() != StepStatus::Failed {
                continue;
            }

            if step.retries() >= self.max_recoveries_per_step {
                let reason = OrchestratorError::RecoveryExhausted {
                    step_id,
                    reason: format!("{} recoveries already applied", step.retries()),
                }
                .to_string();
                self.fallback_skip(plan, step_id, FallbackKind::Exhausted, reason, &mut report)?;
                continue;
            }

            let snapshot = plan.snapshot();
            let summary = plan.execution_summary(self.context_steps, self.preview_chars);
            let ctx = DiagnosisContext {
                request: plan.request(),
                snapshot: &snapshot,
                summary: &summary,
                failure,
            };
            let diagnosis = self.diagnoser.diagnose(&ctx).await;
            let action = match diagnosis {
                Ok(action) => action,
                Err(e) => {
                    self.fallback_skip(
                        plan,
                        step_id,
                        FallbackKind::DiagnosisFailed,
                        e.to_string(),
                        &mut report,
                    )?;
                    continue;
                }
            };

            match apply_action(plan, step_id, &action) {
                Ok(detail) => {
                    tracing::info!(
                        step_id,
                        action = action.label(),
                        detail = %detail,
                        "recovery applied"
                    );
                    report.applied.push(AppliedRecovery {
                        step_id,
                        action: action.label(),
                        detail,
                    });
                }
                Err(reason) => {
                    self.fallback_skip(
                        plan,
                        step_id,
                        FallbackKind::InvalidMutation,
                        format!("{} rejected: {}", action.label(), reason),
                        &mut report,
                    )?;
                }
            }
        }

        plan.set_needs_recovery(false);
        Ok(report)
    }

    fn fallback_skip(
        &self,
        plan: &mut Plan,
        step_id: StepId,
        kind: FallbackKind,
        reason: String,
        report: &mut RecoveryReport,
    ) -> Result<(), OrchestratorError> {
        tracing::warn!(step_id, kind = ?kind, reason = %reason, "recovery fallback: skipping step");
        plan.step_mut(step_id)
            .ok_or(OrchestratorError::UnknownStep(step_id))?
            .skip()?;
        report.fallbacks.push(FallbackRecord {
            step_id,
            kind,
            reason,
        });
        Ok(())
    }
}

/// 在步骤副本上应用指令，校验通过后提交；返回变更说明或拒绝原因
fn apply_action(plan: &mut Plan, step_id: StepId, action: &RecoveryAction) -> Result<String, String> {
    let mut steps = plan.steps().to_vec();
    let idx = plan
        .position(step_id)
        .ok_or_else(|| format!("step {step_id} not found"))?;

    let detail = match action {
        RecoveryAction::ModifyAndRetry {
            params,
            description,
        } => {
            let step = &mut steps[idx];
            step.params = params.clone();
            if let Some(d) = description.as_ref().filter(|d| !d.trim().is_empty()) {
                step.description = d.clone();
            }
            step.reset_for_retry().map_err(|e| e.to_string())?;
            format!("params revised for step {step_id}")
        }
        RecoveryAction::Alternative {
            capability,
            params,
            description,
        } => {
            if capability.trim().is_empty() {
                return Err("alternative capability must not be empty".to_string());
            }
            let step = &mut steps[idx];
            step.capability = capability.trim().to_string();
            step.params = params.clone();
            if let Some(d) = description.as_ref().filter(|d| !d.trim().is_empty()) {
                step.description = d.clone();
            }
            step.reset_for_retry().map_err(|e| e.to_string())?;
            format!("step {step_id} now uses {}", step.capability)
        }
        RecoveryAction::Skip { reason } => {
            steps[idx].skip().map_err(|e| e.to_string())?;
            format!(
                "step {step_id} skipped: {}",
                reason.as_deref().unwrap_or("judged non-critical")
            )
        }
        RecoveryAction::InsertSteps {
            position,
            steps: descriptors,
        } => {
            let new_steps = materialize(descriptors, plan.max_id())?;
            let new_ids: Vec<StepId> = new_steps.iter().map(|s| s.id).collect();
            match position {
                InsertPosition::Before => {
                    let failed = &mut steps[idx];
                    failed.dependencies.extend(new_ids.iter().copied());
                    failed.reset_for_retry().map_err(|e| e.to_string())?;
                    steps.splice(idx..idx, new_steps);
                }
                InsertPosition::After => {
                    steps[idx].skip().map_err(|e| e.to_string())?;
                    for s in steps.iter_mut() {
                        if s.dependencies.contains(&step_id) {
                            s.dependencies.extend(new_ids.iter().copied());
                        }
                    }
                    steps.splice(idx + 1..idx + 1, new_steps);
                }
            }
            format!(
                "inserted steps {:?} {} step {step_id}",
                new_ids,
                match position {
                    InsertPosition::Before => "before",
                    InsertPosition::After => "after",
                }
            )
        }
    };

    plan.replace_steps(steps).map_err(|e| e.to_string())?;
    Ok(detail)
}

/// 把插入指令中的描述符变成新步骤：从 max_id + 1 起分配新 id，并把本地标签重映射为新 id
fn materialize(descriptors: &[StepDescriptor], max_id: StepId) -> Result<Vec<Step>, String> {
    if descriptors.is_empty() {
        return Err("add_steps requires at least one step".to_string());
    }

    let mut fresh_ids = Vec::with_capacity(descriptors.len());
    let mut labels: BTreeMap<StepId, StepId> = BTreeMap::new();
    for (i, d) in descriptors.iter().enumerate() {
        d.check(i).map_err(|e| e.to_string())?;
        let fresh = StepId::try_from(i + 1)
            .ok()
            .and_then(|offset| max_id.checked_add(offset))
            .ok_or_else(|| "step id space exhausted".to_string())?;
        fresh_ids.push(fresh);
        if let Some(label) = d.id {
            if labels.insert(label, fresh).is_some() {
                return Err(format!("duplicate local label {label} in inserted steps"));
            }
        }
    }

    Ok(descriptors
        .iter()
        .zip(fresh_ids)
        .map(|(d, id)| {
            let deps: BTreeSet<StepId> = d
                .dependencies
                .iter()
                .map(|dep| labels.get(dep).copied().unwrap_or(*dep))
                .collect();
            let mut step = d.clone().into_step(id);
            step.dependencies = deps;
            step
        })
        .collect())
}
