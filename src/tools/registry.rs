//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / description / parameters_schema / invoke），由 CapabilityRegistry
//! 按名注册与查找。注册表在构造后只读，可通过 Arc 在组件间自由共享。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::plan::StepId;

/// 单次调用的上下文：所属步骤、第几次派发、取消信号
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub step_id: StepId,
    pub attempt: u32,
    /// 运行被取消时触发；能力可据此提前结束并如实返回错误
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn detached(step_id: StepId) -> Self {
        Self {
            step_id,
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }
}

/// 能力 trait：名称、描述（供 LLM 理解）、参数 schema、异步调用（params 为 JSON 对象）
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名（计划中 `capability` 字段的取值）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 成功返回结构化或文本输出，失败返回错误详情
    async fn invoke(&self, params: Value, ctx: &InvocationContext) -> Result<Value, String>;
}

/// 能力注册表：按名称存储 Arc<dyn Capability>
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册；同名能力后注册者覆盖先注册者
    pub fn register(&mut self, capability: impl Capability + 'static) {
        self.register_arc(Arc::new(capability));
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::warn!(capability = %name, "capability re-registered, previous handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// 按名称排序
    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// 提示词中的能力目录：每个能力一段，含描述与参数 schema
    pub fn catalog(&self) -> String {
        self.capabilities
            .iter()
            .enumerate()
            .map(|(i, (name, cap))| {
                format!(
                    "{}. {} - {}\n   parameters: {}",
                    i + 1,
                    name,
                    cap.description(),
                    cap.parameters_schema()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoCapability;

    #[test]
    fn test_register_lookup_and_catalog() {
        let mut registry = CapabilityRegistry::new();
        assert!(registry.is_empty());
        registry.register(EchoCapability);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
        let catalog = registry.catalog();
        assert!(catalog.starts_with("1. echo - "));
        assert!(catalog.contains("\"text\""));
    }
}
