//! 能力执行器
//!
//! 持有只读注册表与缺省的单次调用超时；params 中的 `timeout`（秒）大于缺省值时以它为准。
//! invoke 把所有结局（返回值、返回错误、panic、超时、能力缺失）
//! 统一归一为 `Result<Value, OrchestratorError>`，并为每次调用输出一条结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::OrchestratorError;
use crate::plan::preview;
use crate::tools::{CapabilityRegistry, InvocationContext};

/// 能力执行器：对每次调用施加超时，并将结果映射为 OrchestratorError
#[derive(Clone)]
pub struct CapabilityExecutor {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl CapabilityExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 本次调用的超时：缺省值与步骤自带 `timeout` 中较大者
    fn limit_for(&self, params: &Value) -> Duration {
        params
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .map_or(self.timeout, |requested| requested.max(self.timeout))
    }

    /// 调用指定能力；能力不存在时不派发，直接返回 CapabilityNotFound
    pub async fn invoke(
        &self,
        name: &str,
        params: Value,
        ctx: &InvocationContext,
    ) -> Result<Value, OrchestratorError> {
        let start = Instant::now();
        let args_preview = preview(&params.to_string(), 200);
        let limit = self.limit_for(&params);

        let result = match self.registry.get(name) {
            None => Err(OrchestratorError::CapabilityNotFound(name.to_string())),
            Some(capability) => {
                let call = AssertUnwindSafe(capability.invoke(params, ctx)).catch_unwind();
                match timeout(limit, call).await {
                    Ok(Ok(Ok(output))) => Ok(output),
                    Ok(Ok(Err(_))) if ctx.cancel.is_cancelled() => Err(OrchestratorError::Cancelled),
                    Ok(Ok(Err(e))) => Err(OrchestratorError::Handler(e)),
                    Ok(Err(panic)) => Err(OrchestratorError::Handler(format!(
                        "capability panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Err(_) => Err(OrchestratorError::Timeout {
                        capability: name.to_string(),
                        limit,
                    }),
                }
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(OrchestratorError::CapabilityNotFound(_)) => "not_found",
            Err(OrchestratorError::Timeout { .. }) => "timeout",
            Err(OrchestratorError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": name,
            "step_id": ctx.step_id,
            "attempt": ctx.attempt,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "timeout_ms": limit.as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::tools::{Capability, EchoCapability};

    struct Panicky;

    #[async_trait]
    impl Capability for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        async fn invoke(&self, _params: Value, _ctx: &InvocationContext) -> Result<Value, String> {
            panic!("handler blew up");
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Capability for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps, or gives up when cancelled"
        }
        async fn invoke(&self, _params: Value, ctx: &InvocationContext) -> Result<Value, String> {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(json!("woke")),
                _ = ctx.cancel.cancelled() => Err("interrupted".to_string()),
            }
        }
    }

    /// 睡 300ms 后返回
    struct Nap;

    #[async_trait]
    impl Capability for Nap {
        fn name(&self) -> &str {
            "nap"
        }
        fn description(&self) -> &str {
            "short sleep"
        }
        async fn invoke(&self, _params: Value, _ctx: &InvocationContext) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(json!("rested"))
        }
    }

    fn executor(timeout_ms: u64) -> CapabilityExecutor {
        let mut registry = CapabilityRegistry::new();
        registry.register(EchoCapability);
        registry.register(Panicky);
        registry.register(Sleepy);
        registry.register(Nap);
        CapabilityExecutor::new(Arc::new(registry), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_success_and_not_found() {
        let exec = executor(1000);
        let ctx = InvocationContext::detached(1);
        let out = exec.invoke("echo", json!({"text": "hi"}), &ctx).await.unwrap();
        assert_eq!(out, json!("hi"));
        let err = exec.invoke("nope", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::CapabilityNotFound(n) if n == "nope"));
    }

    #[tokio::test]
    async fn test_panic_is_normalized_to_handler_error() {
        let exec = executor(1000);
        let err = exec
            .invoke("panicky", json!({}), &InvocationContext::detached(1))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Handler(msg) => assert!(msg.contains("handler blew up")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = executor(50);
        let err = exec
            .invoke("sleepy", json!({}), &InvocationContext::detached(1))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Timeout { capability, limit } => {
                assert_eq!(capability, "sleepy");
                assert_eq!(limit, Duration::from_millis(50));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(exec
            .invoke("sleepy", json!({}), &InvocationContext::detached(1))
            .await
            .unwrap_err()
            .to_string()
            .contains("50ms"));
    }

    #[tokio::test]
    async fn test_step_timeout_extends_default_limit() {
        let exec = executor(50);
        let ctx = InvocationContext::detached(1);
        let err = exec.invoke("nap", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));

        let out = exec.invoke("nap", json!({"timeout": 5}), &ctx).await.unwrap();
        assert_eq!(out, json!("rested"));
    }

    #[tokio::test]
    async fn test_smaller_step_timeout_keeps_default_limit() {
        let exec = executor(1000);
        let out = exec
            .invoke("nap", json!({"timeout": 0}), &InvocationContext::detached(1))
            .await
            .unwrap();
        assert_eq!(out, json!("rested"));
    }

    #[tokio::test]
    async fn test_cancellation_is_reported_honestly() {
        let exec = executor(5000);
        let ctx = InvocationContext::detached(1);
        ctx.cancel.cancel();
        let err = exec.invoke("sleepy", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }
}
