//! 端到端编排测试：脚本化 LLM + 真实内置能力（工作目录为临时目录）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use stepwise::config::AppConfig;
use stepwise::core::{
    FallbackKind, IngestionError, OrchestratorBuilder, OrchestratorError, RunEvent, RunPhase,
    RunStatus, SessionSupervisor,
};
use stepwise::llm::ScriptedLlmClient;
use stepwise::plan::{Plan, StepStatus};
use stepwise::tools::{Capability, CapabilityRegistry, EchoCapability, InvocationContext};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn plan_reply(steps: Value) -> String {
    format!("Here is the plan:\n```json\n{}\n```", steps)
}

/// 步骤 1 读取文件，步骤 2 依赖步骤 1
fn view_then_echo(path: &str) -> String {
    plan_reply(json!([
        {"id": 1, "description": "read input", "capability": "file_editor",
         "params": {"command": "view", "path": path}, "dependencies": []},
        {"id": 2, "description": "report", "capability": "echo",
         "params": {"text": "done"}, "dependencies": [1]}
    ]))
}

fn setup(replies: Vec<String>) -> (TempDir, Arc<ScriptedLlmClient>, OrchestratorBuilder) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.txt"), "alpha\nbeta\n").unwrap();
    let llm = Arc::new(ScriptedLlmClient::new(replies));
    let builder = OrchestratorBuilder::new(AppConfig::default(), dir.path()).with_llm(llm.clone());
    (dir, llm, builder)
}

#[tokio::test]
async fn test_modify_and_retry_on_third_diagnosis() {
    let (_dir, llm, builder) = setup(vec![
        view_then_echo("input.txt"),
        r#"{"action": "modify", "params": {"command": "view", "path": "inputs.txt"}}"#.to_string(),
        r#"{"action": "modify", "params": {"command": "view", "path": "in/data.txt"}}"#.to_string(),
        r#"Try this: {"action": "modify", "params": {"command": "view", "path": "data.txt"}}"#.to_string(),
    ]);
    let orch = builder.build();
    let outcome = orch.run("summarize the input file", &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let plan = outcome.plan.unwrap();
    assert!(plan.is_complete());
    let step1 = plan.step(1).unwrap();
    assert_eq!(step1.status(), StepStatus::Completed);
    assert_eq!(step1.attempts(), 4);
    assert_eq!(step1.params["path"], "data.txt");
    assert!(step1.output().unwrap().as_str().unwrap().contains("beta"));
    assert_eq!(plan.step(2).unwrap().status(), StepStatus::Completed);
    assert_eq!(outcome.recoveries.len(), 3);
    assert!(outcome.fallbacks.is_empty());

    // 每次诊断都看到了上一次的错误
    let prompts = llm.user_prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[3].contains("in/data.txt"));
    assert!(prompts[3].contains("Attempts: 3"));
}

#[tokio::test]
async fn test_skip_lets_dependent_run() {
    let (_dir, _llm, builder) = setup(vec![
        view_then_echo("missing.txt"),
        r#"{"action": "skip", "reason": "input is optional"}"#.to_string(),
    ]);
    let outcome = builder.build().run("report", &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::CompletedWithSkips);
    let plan = outcome.plan.unwrap();
    assert_eq!(plan.step(1).unwrap().status(), StepStatus::Skipped);
    assert_eq!(plan.step(2).unwrap().status(), StepStatus::Completed);
    assert_eq!(outcome.snapshot.count(StepStatus::Skipped), 1);
    assert_eq!(outcome.snapshot.count(StepStatus::Completed), 1);
}

#[tokio::test]
async fn test_add_steps_before_supplies_precondition() {
    let (dir, _llm, builder) = setup(vec![
        view_then_echo("notes.txt"),
        json!({
            "action": "add_steps",
            "position": "before",
            "steps": [{"id": 1, "description": "create notes", "capability": "file_editor",
                       "params": {"command": "create", "path": "notes.txt", "content": "hello\n"},
                       "dependencies": []}]
        })
        .to_string(),
    ]);
    let outcome = builder.build().run("read notes", &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    let plan = outcome.plan.unwrap();
    let ids: Vec<u32> = plan.steps().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
    assert!(plan.step(1).unwrap().dependencies.contains(&3));
    assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "hello\n");
}

#[tokio::test]
async fn test_unparseable_diagnosis_falls_back_to_skip() {
    let (_dir, _llm, builder) = setup(vec![
        view_then_echo("missing.txt"),
        "I would rather not say.".to_string(),
    ]);
    let outcome = builder.build().run("report", &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::CompletedWithSkips);
    assert_eq!(outcome.fallbacks.len(), 1);
    assert_eq!(outcome.fallbacks[0].step_id, 1);
    assert_eq!(outcome.fallbacks[0].kind, FallbackKind::DiagnosisFailed);
}

#[tokio::test]
async fn test_recovery_budget_exhaustion_skips() {
    let wrong = r#"{"action": "modify", "params": {"command": "view", "path": "nope.txt"}}"#;
    let mut replies = vec![view_then_echo("missing.txt")];
    replies.extend(std::iter::repeat(wrong.to_string()).take(2));
    let (_dir, llm, builder) = setup(replies);
    let mut config = AppConfig::default();
    config.recovery.max_recoveries_per_step = 2;
    let builder = OrchestratorBuilder::new(config, builder.workspace()).with_llm(llm.clone());

    let outcome = builder.build().run("report", &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::CompletedWithSkips);
    assert_eq!(outcome.recoveries.len(), 2);
    assert_eq!(outcome.fallbacks.len(), 1);
    assert_eq!(outcome.fallbacks[0].kind, FallbackKind::Exhausted);
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn test_unusable_plan_aborts_after_three_attempts() {
    let (_dir, llm, builder) = setup(vec![
        "Sorry, I cannot plan that.".to_string(),
        "[]".to_string(),
        plan_reply(json!([{"id": 1, "description": "x", "capability": "echo",
                           "params": {}, "dependencies": [99]}])),
    ]);
    let outcome = builder.build().run("impossible", &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert!(outcome.plan.is_none());
    match outcome.error {
        Some(OrchestratorError::Ingestion(IngestionError::Exhausted { attempts: 3, last })) => {
            assert!(last.contains("99"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn test_stuck_step_in_saved_plan_is_deadlock() {
    let doc = json!({
        "request": "resume",
        "steps": [
            {"id": 1, "description": "interrupted", "capability": "echo", "params": {},
             "dependencies": [], "status": "in_progress"},
            {"id": 2, "description": "after", "capability": "echo", "params": {},
             "dependencies": [1], "status": "pending"}
        ]
    })
    .to_string();
    let plan = Plan::from_document(&doc).unwrap();
    let (_dir, _llm, builder) = setup(vec![]);
    let outcome = builder.build().run_plan(plan, &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    match outcome.error {
        Some(OrchestratorError::Deadlock { blocked }) => assert_eq!(blocked, vec![2]),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_saved_plan_resumes_to_completion() {
    let (_dir, llm, builder) = setup(vec![plan_reply(json!([
        {"id": 1, "description": "a", "capability": "echo", "params": {"text": "a"}, "dependencies": []},
        {"id": 2, "description": "b", "capability": "echo", "params": {"text": "b"}, "dependencies": [1]},
        {"id": 3, "description": "c", "capability": "echo", "params": {"text": "c"}, "dependencies": [2]}
    ]))]);
    let mut config = AppConfig::default();
    config.app.max_iterations = 2;
    let interrupted = OrchestratorBuilder::new(config, builder.workspace())
        .with_llm(llm)
        .build()
        .run("abc", &CancellationToken::new())
        .await;
    assert_eq!(interrupted.status, RunStatus::IterationLimit);
    assert_eq!(interrupted.snapshot.completed, 2);

    // 保存后从文档继续，迭代计数随计划一起恢复
    let doc = interrupted.plan.unwrap().to_document().unwrap();
    let restored = Plan::from_document(&doc).unwrap();
    assert_eq!(restored.iteration_count(), 2);
    assert_eq!(restored.step(3).unwrap().status(), StepStatus::Pending);
    let resumed = builder.build().run_plan(restored, &CancellationToken::new()).await;
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.plan.unwrap().step(3).unwrap().output(), Some(&json!("c")));
}

/// 执行时触发运行级取消的能力
struct CancelRun(CancellationToken);

#[async_trait]
impl Capability for CancelRun {
    fn name(&self) -> &str {
        "cancel_run"
    }

    fn description(&self) -> &str {
        "Cancel the surrounding run"
    }

    async fn invoke(&self, _params: Value, _ctx: &InvocationContext) -> Result<Value, String> {
        self.0.cancel();
        Ok(json!("cancel requested"))
    }
}

#[tokio::test]
async fn test_cancellation_stops_at_iteration_boundary() {
    let supervisor = SessionSupervisor::new();
    let mut registry = CapabilityRegistry::new();
    registry.register(EchoCapability);
    registry.register(CancelRun(supervisor.cancel_token()));

    let (_dir, _llm, builder) = setup(vec![plan_reply(json!([
        {"id": 1, "description": "stop", "capability": "cancel_run", "params": {}, "dependencies": []},
        {"id": 2, "description": "never", "capability": "echo", "params": {"text": "x"}, "dependencies": [1]}
    ]))]);
    let outcome = builder
        .with_registry(registry)
        .build()
        .run("stop early", &supervisor.cancel_token())
        .await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    let plan = outcome.plan.unwrap();
    // 正在执行的调用如实完成，后续步骤保持 Pending
    assert_eq!(plan.step(1).unwrap().status(), StepStatus::Completed);
    assert_eq!(plan.step(2).unwrap().status(), StepStatus::Pending);
}

#[tokio::test]
async fn test_events_follow_phases() {
    let (_dir, _llm, builder) = setup(vec![
        view_then_echo("missing.txt"),
        r#"{"action": "skip"}"#.to_string(),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = builder
        .build()
        .with_events(tx)
        .run("report", &CancellationToken::new())
        .await;
    assert_eq!(outcome.status, RunStatus::CompletedWithSkips);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(RunEvent::PhaseChanged { phase: RunPhase::Planning })
    ));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished { status: RunStatus::CompletedWithSkips, .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::PhaseChanged { phase: RunPhase::Recovering })));
    let failed_then_skipped = events.iter().any(|e| {
        matches!(e, RunEvent::StepFinished { step_id: 1, status: StepStatus::Failed, .. })
    }) && events
        .iter()
        .any(|e| matches!(e, RunEvent::RecoveryApplied { step_id: 1, .. }));
    assert!(failed_then_skipped);
    // 事件可序列化为 JSON 行
    assert!(serde_json::to_string(&events[0]).unwrap().contains("\"type\":\"phase_changed\""));
}
