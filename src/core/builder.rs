//! 编排器构建器：统一的初始化逻辑
//!
//! CLI 与测试共享同一套能力注册与参数来源（AppConfig）。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{Diagnoser, Orchestrator, RecoveryEngine, Scheduler};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::planning::{LlmDiagnoser, Planner};
use crate::tools::{
    BashExecutor, CapabilityExecutor, CapabilityRegistry, EchoCapability, FileEditor,
    PythonExecutor,
};

pub struct OrchestratorBuilder {
    config: AppConfig,
    workspace: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
    diagnoser: Option<Arc<dyn Diagnoser>>,
    registry: Option<CapabilityRegistry>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            llm: None,
            diagnoser: None,
            registry: None,
        }
    }

    /// 覆盖按配置选择的 LLM 客户端
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 覆盖默认的模型驱动诊断方
    pub fn with_diagnoser(mut self, diagnoser: Arc<dyn Diagnoser>) -> Self {
        self.diagnoser = Some(diagnoser);
        self
    }

    /// 替换内置能力集合
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 内置能力：echo、bash_executor、python_executor、file_editor，均限定在工作目录内
    pub fn build_registry(&self) -> CapabilityRegistry {
        let tools = &self.config.tools;
        let mut registry = CapabilityRegistry::new();
        registry.register(EchoCapability);
        registry.register(BashExecutor::new(
            &self.workspace,
            tools.shell.allowed_commands.clone(),
            tools.shell.forbidden_patterns.clone(),
            tools.tool_timeout_secs,
        ));
        registry.register(PythonExecutor::new(&self.workspace, tools.tool_timeout_secs));
        registry.register(FileEditor::new(&self.workspace));
        registry
    }

    pub fn build(mut self) -> Orchestrator {
        let llm = self
            .llm
            .take()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let registry = match self.registry.take() {
            Some(custom) => custom,
            None => self.build_registry(),
        };

        let planner = Planner::new(llm.clone(), &registry)
            .with_max_attempts(self.config.planning.max_attempts);
        let diagnoser = self
            .diagnoser
            .take()
            .unwrap_or_else(|| Arc::new(LlmDiagnoser::new(llm, &registry)));
        let recovery_cfg = &self.config.recovery;
        let recovery = RecoveryEngine::new(diagnoser)
            .with_budget(recovery_cfg.max_recoveries_per_step)
            .with_context(recovery_cfg.context_steps, recovery_cfg.preview_chars);

        tracing::info!(
            capabilities = ?registry.names(),
            workspace = %self.workspace.display(),
            max_iterations = self.config.app.max_iterations,
            "orchestrator built"
        );
        let executor = CapabilityExecutor::new(
            Arc::new(registry),
            Duration::from_secs(self.config.tools.tool_timeout_secs),
        );
        Orchestrator::new(planner, Scheduler::new(executor), recovery)
            .with_max_iterations(self.config.app.max_iterations)
    }
}
