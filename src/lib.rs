//! Stepwise - 依赖感知的步骤编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、调度器、恢复引擎、运行事件、主控循环
//! - **plan**: Step 状态机、依赖图、Plan 模型
//! - **planning**: 模型回复的 JSON 提取、计划摄取、Planner 与诊断方
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **tools**: 能力注册表、执行器与内置能力（echo、bash、python、file_editor）
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod planning;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, RunOutcome, RunStatus};
pub use crate::plan::{Plan, Step, StepStatus};
