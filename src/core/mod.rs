//! 核心编排层：错误、调度、恢复、状态投影、运行事件、会话监管与主控循环

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod scheduler;
pub mod session_supervisor;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::{
    DiagnosisError, ExtractError, IngestionError, OrchestratorError, PlanValidationError,
    TransitionError,
};
pub use events::RunEvent;
pub use orchestrator::{Orchestrator, RunOutcome, RunStatus};
pub use recovery::{
    AppliedRecovery, CompletedOutput, DiagnosisContext, Diagnoser, FailureRecord, FallbackKind,
    FallbackRecord, InsertPosition, RecoveryAction, RecoveryEngine, RecoveryReport,
};
pub use scheduler::{Outcome, Scheduler};
pub use session_supervisor::SessionSupervisor;
pub use state::{PlanSnapshot, RunPhase, StepView};
