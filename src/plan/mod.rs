//! 计划数据模型：Step 状态机、依赖图校验、Plan 聚合与模型描述符

pub mod descriptor;
pub mod graph;
pub mod model;
pub mod step;

pub use descriptor::{build_steps, descriptors_from_value, StepDescriptor};
pub use graph::{validate_steps, DependencyGraph};
pub use model::{preview, value_text, Plan};
pub use step::{FailureKind, Step, StepError, StepId, StepResult, StepStatus};
