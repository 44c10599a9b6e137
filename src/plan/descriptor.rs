//! 步骤描述符：模型输出中单个步骤的结构化形式
//!
//! 只接受字段别名（tool / tool_params / depends_on），从不补全缺失的必填字段。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::PlanValidationError;
use crate::plan::{validate_steps, Step, StepId};

/// 模型给出的步骤描述；id 可省略（按 1 起的位置编号）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    #[serde(default)]
    pub id: Option<StepId>,
    pub description: String,
    #[serde(alias = "tool")]
    pub capability: String,
    #[serde(alias = "tool_params")]
    pub params: Map<String, Value>,
    #[serde(alias = "depends_on")]
    pub dependencies: Vec<StepId>,
}

impl StepDescriptor {
    /// 从单个 JSON 值解析并检查必填文本字段非空
    pub fn from_value(index: usize, value: &Value) -> Result<Self, PlanValidationError> {
        if !value.is_object() {
            return Err(PlanValidationError::InvalidDescriptor {
                index,
                reason: "expected an object".to_string(),
            });
        }
        let descriptor: StepDescriptor =
            serde_json::from_value(value.clone()).map_err(|e| {
                PlanValidationError::InvalidDescriptor {
                    index,
                    reason: e.to_string(),
                }
            })?;
        descriptor.check(index)?;
        Ok(descriptor)
    }

    pub(crate) fn check(&self, index: usize) -> Result<(), PlanValidationError> {
        if self.description.trim().is_empty() {
            return Err(PlanValidationError::InvalidDescriptor {
                index,
                reason: "description must not be empty".to_string(),
            });
        }
        if self.capability.trim().is_empty() {
            return Err(PlanValidationError::InvalidDescriptor {
                index,
                reason: "capability must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn into_step(self, id: StepId) -> Step {
        Step::new(
            id,
            self.description,
            self.capability.trim(),
            self.params,
            self.dependencies,
        )
    }
}

/// 将 JSON 数组解析为描述符序列（仅结构校验）
pub fn descriptors_from_value(value: &Value) -> Result<Vec<StepDescriptor>, PlanValidationError> {
    let items = value.as_array().ok_or(PlanValidationError::NotAnArray)?;
    if items.is_empty() {
        return Err(PlanValidationError::Empty);
    }
    items
        .iter()
        .enumerate()
        .map(|(index, item)| StepDescriptor::from_value(index, item))
        .collect()
}

/// 描述符 -> 步骤，并做 id / 依赖 / 无环校验；任一失败则不产生任何步骤
pub fn build_steps(descriptors: Vec<StepDescriptor>) -> Result<Vec<Step>, PlanValidationError> {
    let steps: Vec<Step> = descriptors
        .into_iter()
        .enumerate()
        .map(|(index, d)| {
            let id = d.id.unwrap_or(index as StepId + 1);
            d.into_step(id)
        })
        .collect();
    validate_steps(&steps)?;
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aliases_are_accepted() {
        let value = json!([{
            "id": 1,
            "description": "list",
            "tool": "bash_executor",
            "tool_params": {"command": "ls"},
            "depends_on": []
        }]);
        let descriptors = descriptors_from_value(&value).unwrap();
        assert_eq!(descriptors[0].capability, "bash_executor");
        assert_eq!(descriptors[0].params["command"], "ls");
    }

    #[test]
    fn test_missing_capability_is_not_guessed() {
        let value = json!([{
            "id": 1,
            "description": "list",
            "params": {},
            "dependencies": []
        }]);
        let err = descriptors_from_value(&value).unwrap_err();
        match err {
            PlanValidationError::InvalidDescriptor { index, reason } => {
                assert_eq!(index, 0);
                assert!(reason.contains("capability"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_null_params_and_null_capability_rejected() {
        let null_params = json!([{
            "description": "think", "capability": "echo", "params": null, "dependencies": []
        }]);
        assert!(descriptors_from_value(&null_params).is_err());

        let null_capability = json!([{
            "description": "think", "capability": null, "params": {}, "dependencies": []
        }]);
        assert!(descriptors_from_value(&null_capability).is_err());
    }

    #[test]
    fn test_negative_dependency_rejected() {
        let value = json!([{
            "description": "x", "capability": "echo", "params": {}, "dependencies": [-1]
        }]);
        assert!(descriptors_from_value(&value).is_err());
    }

    #[test]
    fn test_ids_default_to_position() {
        let value = json!([
            {"description": "a", "capability": "echo", "params": {}, "dependencies": []},
            {"description": "b", "capability": "echo", "params": {}, "dependencies": [1]}
        ]);
        let steps = build_steps(descriptors_from_value(&value).unwrap()).unwrap();
        assert_eq!(steps.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(steps[1].dependencies.contains(&1));
    }

    #[test]
    fn test_non_array_and_empty_rejected() {
        assert_eq!(
            descriptors_from_value(&json!({"steps": []})),
            Err(PlanValidationError::NotAnArray)
        );
        assert_eq!(
            descriptors_from_value(&json!([])),
            Err(PlanValidationError::Empty)
        );
    }
}
