//! 规划层：模型回复的 JSON 提取、计划摄取、Planner 重试循环与模型驱动的诊断方

pub mod extract;
pub mod ingest;
pub mod planner;
pub mod replanner;

pub use extract::{extract, ExtractionStrategy, JsonShape};
pub use ingest::{ingest, ingest_for};
pub use planner::Planner;
pub use replanner::LlmDiagnoser;
