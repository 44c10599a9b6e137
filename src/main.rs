//! Stepwise 命令行入口
//!
//! 用法：
//! - `stepwise <请求文本>`：规划并执行
//! - `stepwise --resume <plan.json>`：继续执行先前保存的计划
//! - 无参数时从 stdin 读取请求
//!
//! 配置文件路径可由 `STEPWISE_CONFIG` 指定，运行结束后计划写入 `<workspace>/last_plan.json`。

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use stepwise::config::{load_config, AppConfig};
use stepwise::core::{OrchestratorBuilder, RunEvent, SessionSupervisor};
use stepwise::plan::Plan;
use tokio::sync::mpsc;

enum Input {
    Request(String),
    Resume(PathBuf),
}

fn parse_input() -> anyhow::Result<Input> {
    let mut args = std::env::args().skip(1).peekable();
    if args.peek().map(String::as_str) == Some("--resume") {
        args.next();
        let path = args.next().context("--resume requires a plan file")?;
        return Ok(Input::Resume(PathBuf::from(path)));
    }
    let joined = args.collect::<Vec<_>>().join(" ");
    if !joined.trim().is_empty() {
        return Ok(Input::Request(joined));
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read request from stdin")?;
    if buf.trim().is_empty() {
        bail!("empty request; pass it as arguments or on stdin");
    }
    Ok(Input::Request(buf.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stepwise::observability::init();

    let input = parse_input()?;
    let config_path = std::env::var("STEPWISE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    // 工作目录：配置 > 当前目录下的 workspace
    let workspace = match cfg.app.workspace_root.clone() {
        Some(root) => root,
        None => std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join("workspace"),
    };
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let orchestrator = OrchestratorBuilder::new(cfg, &workspace)
        .build()
        .with_events(event_tx);

    // 事件以 JSON 行形式进入 debug 日志
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let RunEvent::StepFinished { step_id, status, preview } = &event {
                println!("{} step {step_id}: {preview}", status.marker());
            }
            if let Ok(line) = serde_json::to_string(&event) {
                tracing::debug!(event = %line, "run event");
            }
        }
    });

    let supervisor = SessionSupervisor::new();
    supervisor.cancel_on_ctrl_c();
    let cancel = supervisor.cancel_token();

    let outcome = match input {
        Input::Request(request) => orchestrator.run(&request, &cancel).await,
        Input::Resume(path) => {
            let doc = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read plan {}", path.display()))?;
            let plan = Plan::from_document(&doc).context("Invalid plan document")?;
            orchestrator.run_plan(plan, &cancel).await
        }
    };
    drop(orchestrator);
    let _ = printer.await;

    println!("\n{}", outcome.snapshot.render());
    if let Some(plan) = &outcome.plan {
        for step in plan.steps() {
            if let Some(output) = step.output() {
                println!("\n[{}] {}\n{}", step.id, step.description, stepwise::plan::value_text(output));
            }
        }
        let path = workspace.join("last_plan.json");
        let doc = plan.to_document().context("Failed to serialize plan")?;
        std::fs::write(&path, doc).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "plan saved");
    }
    for fallback in &outcome.fallbacks {
        println!("skipped step {} ({:?}): {}", fallback.step_id, fallback.kind, fallback.reason);
    }
    println!("\nRun {} finished: {}", outcome.run_id, outcome.status);

    if let Some(err) = outcome.error {
        if outcome.status.is_fatal() {
            bail!(err);
        }
    }
    Ok(())
}
