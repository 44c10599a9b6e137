//! 计划摄取：原始模型文本 -> 已校验的 Plan
//!
//! 第一个能产出结构合法描述符数组的提取策略胜出；之后的语义校验（id、依赖、无环）失败即为最终结果。
//! 缺失的必填字段从不补全。

use crate::core::{ExtractError, IngestionError};
use crate::plan::{build_steps, descriptors_from_value, Plan};
use crate::planning::extract::{ExtractionStrategy, JsonShape};

/// 无请求上下文的摄取
pub fn ingest(raw: &str) -> Result<Plan, IngestionError> {
    ingest_for("", raw)
}

/// 摄取并记录原始请求
pub fn ingest_for(request: &str, raw: &str) -> Result<Plan, IngestionError> {
    let mut last: Option<IngestionError> = None;

    for strategy in ExtractionStrategy::ALL {
        let value = match strategy.apply(raw, JsonShape::Array) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(?strategy, error = %e, "plan extraction strategy failed");
                if !matches!(last, Some(IngestionError::Invalid(_))) {
                    last = Some(e.into());
                }
                continue;
            }
        };
        match descriptors_from_value(&value) {
            Ok(descriptors) => {
                let steps = build_steps(descriptors)?;
                let plan = Plan::new(request, steps)?;
                tracing::info!(?strategy, steps = plan.steps().len(), "plan ingested");
                return Ok(plan);
            }
            Err(e) => {
                tracing::debug!(?strategy, error = %e, "descriptor validation failed");
                last = Some(e.into());
            }
        }
    }

    Err(last.unwrap_or_else(|| ExtractError::NotFound("array").into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlanValidationError;
    use crate::plan::StepStatus;

    const WELL_FORMED: &str = r#"[
        {"id": 1, "description": "list", "capability": "bash_executor", "params": {"command": "ls"}, "dependencies": []},
        {"id": 2, "description": "count", "capability": "bash_executor", "params": {"command": "wc -l a.txt"}, "dependencies": [1]}
    ]"#;

    #[test]
    fn test_trailing_separator_repaired_to_same_steps() {
        let broken = r#"[
        {"id": 1, "description": "list", "capability": "bash_executor", "params": {"command": "ls"}, "dependencies": [],},
        {"id": 2, "description": "count", "capability": "bash_executor", "params": {"command": "wc -l a.txt"}, "dependencies": [1]},
    ]"#;
        let a = ingest(WELL_FORMED).unwrap();
        let b = ingest(broken).unwrap();
        assert_eq!(a.steps(), b.steps());
        assert!(b.steps().iter().all(|s| s.status() == StepStatus::Pending));
    }

    #[test]
    fn test_repair_keeps_separators_inside_params() {
        let raw = r#"[{"id": 1, "description": "d", "capability": "bash_executor", "params": {"command": "echo a,]"}, "dependencies": [],}]"#;
        let plan = ingest(raw).unwrap();
        assert_eq!(plan.steps()[0].params["command"], "echo a,]");
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let raw = r#"[
            {"id": 1, "description": "a", "capability": "echo", "params": {}, "dependencies": []},
            {"id": 2, "description": "b", "capability": "echo", "params": {}, "dependencies": [99]}
        ]"#;
        match ingest(raw) {
            Err(IngestionError::Invalid(PlanValidationError::UnknownDependency {
                step: 2,
                dependency: 99,
            })) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_descriptor_rejected_not_completed() {
        let raw = r#"Plan: [{"id": 1, "description": "a", "params": {}, "dependencies": []}]"#;
        assert!(matches!(
            ingest(raw),
            Err(IngestionError::Invalid(PlanValidationError::InvalidDescriptor { index: 0, .. }))
        ));
    }

    #[test]
    fn test_aliases_and_fenced_block() {
        let raw = "```json\n[{\"id\": 1, \"description\": \"say hi\", \"tool\": \"echo\", \"tool_params\": {\"text\": \"hi\"}, \"depends_on\": []}]\n```";
        let plan = ingest_for("greet", raw).unwrap();
        assert_eq!(plan.request(), "greet");
        assert_eq!(plan.steps()[0].capability, "echo");
    }

    #[test]
    fn test_prose_is_extract_error() {
        assert!(matches!(
            ingest("I could not make a plan."),
            Err(IngestionError::Extract(_))
        ));
    }
}
