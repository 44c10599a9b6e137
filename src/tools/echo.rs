//! Echo 能力（测试与离线演示用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Capability, InvocationContext};

/// Echo：回显 text 参数
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing and thinking steps)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Text to echo"}
            },
            "required": ["text"]
        })
    }

    async fn invoke(&self, params: Value, _ctx: &InvocationContext) -> Result<Value, String> {
        let text = params
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or("Missing required parameter: text")?;
        Ok(Value::String(text.to_string()))
    }
}
