//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STEPWISE__*` 覆盖（双下划线表示嵌套，如 `STEPWISE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planning: PlanningSection,
    pub recovery: RecoverySection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录、迭代上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 能力沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 单次运行中 Scheduler 的最大 advance 次数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> u32 {
    20
}

/// [llm] 段：后端选择与采样参数
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；实际选择由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub deepseek: LlmModelOverride,
    #[serde(default)]
    pub openai: LlmModelOverride,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: None,
            deepseek: LlmModelOverride::default(),
            openai: LlmModelOverride::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelOverride {
    pub model: Option<String>,
}

/// [planning] 段：计划摄取的重试上限
#[derive(Debug, Clone, Deserialize)]
pub struct PlanningSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> usize {
    3
}

/// [recovery] 段：单步恢复预算与诊断上下文大小
#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_max_recoveries_per_step")]
    pub max_recoveries_per_step: u32,
    /// 诊断提示中携带的最近已完成步骤数
    #[serde(default = "default_context_steps")]
    pub context_steps: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_recoveries_per_step: default_max_recoveries_per_step(),
            context_steps: default_context_steps(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_max_recoveries_per_step() -> u32 {
    5
}

fn default_context_steps() -> usize {
    5
}

fn default_preview_chars() -> usize {
    200
}

/// [tools] 段：单次能力调用超时、Shell 白名单
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次能力调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            shell: ShellSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.shell] 段：允许执行的命令名（仅首词）与禁止出现的子串
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_forbidden_patterns")]
    pub forbidden_patterns: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            forbidden_patterns: default_forbidden_patterns(),
        }
    }
}

fn default_forbidden_patterns() -> Vec<String> {
    ["rm -rf /", "sudo ", "mkfs", ":(){", "> /dev/sd", "shutdown", "reboot"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "echo", "grep", "head", "tail", "wc", "find", "pwd", "mkdir", "touch",
        "python3", "cargo", "rustc", "git",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// 从 config 目录加载配置，环境变量 STEPWISE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STEPWISE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STEPWISE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
