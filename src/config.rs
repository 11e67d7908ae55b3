//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FABULA__*` 覆盖（双下划线表示嵌套，如 `FABULA__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub story: StorySection,
}

/// [llm] 段：后端、模型、凭据与生成参数
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ mock（离线演示）
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时回退到环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 是否发送「以 JSON 回复」提示（后端不支持时只能靠指令强化）
    #[serde(default = "default_true")]
    pub json_mode: bool,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_true() -> bool {
    true
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            json_mode: true,
        }
    }
}

impl LlmSection {
    /// 模型与凭据是否齐备（mock 后端不需要凭据）
    pub fn is_configured(&self) -> bool {
        if self.provider == "mock" {
            return true;
        }
        let has_key = self
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
            || std::env::var("OPENAI_API_KEY")
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false);
        !self.model.trim().is_empty() && has_key
    }
}

/// [session] 段：历史上限与摘要节奏
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 历史消息上限（超出即剪枝，system 消息永不淘汰）
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// 每累计多少条 assistant 回复触发一次摘要
    #[serde(default = "default_summary_interval")]
    pub summary_interval: usize,
    /// 摘要时原样保留的最近消息条数
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// 摘要序列化后的字节上限，超出则压缩
    #[serde(default = "default_digest_byte_budget")]
    pub digest_byte_budget: usize,
}

fn default_max_history() -> usize {
    20
}

fn default_summary_interval() -> usize {
    6
}

fn default_recent_window() -> usize {
    8
}

fn default_digest_byte_budget() -> usize {
    4096
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            summary_interval: default_summary_interval(),
            recent_window: default_recent_window(),
            digest_byte_budget: default_digest_byte_budget(),
        }
    }
}

/// [retry] 段：结构化生成的最大尝试次数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_max_attempts() -> usize {
    3
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// [story] 段：篇幅、选项数量与结局触发概率
#[derive(Debug, Clone, Deserialize)]
pub struct StorySection {
    /// 达到该场景数后开始按概率触发结局
    #[serde(default = "default_target_scenes")]
    pub target_scenes: usize,
    #[serde(default = "default_min_choices")]
    pub min_choices: usize,
    #[serde(default = "default_max_choices")]
    pub max_choices: usize,
    /// 达到 target_scenes 后每幕触发结局的概率
    #[serde(default = "default_ending_chance_at_target")]
    pub ending_chance_at_target: f64,
    /// 紧张度 >= 8 且过半篇幅时触发结局的概率
    #[serde(default = "default_ending_chance_high_tension")]
    pub ending_chance_high_tension: f64,
    /// 选项数量 ±1 扰动的概率
    #[serde(default = "default_choice_count_jitter")]
    pub choice_count_jitter: f64,
    /// 会话快照文件；设置后启动时恢复、每幕后保存
    pub snapshot_path: Option<PathBuf>,
}

fn default_target_scenes() -> usize {
    12
}

fn default_min_choices() -> usize {
    2
}

fn default_max_choices() -> usize {
    4
}

fn default_ending_chance_at_target() -> f64 {
    0.5
}

fn default_ending_chance_high_tension() -> f64 {
    0.4
}

fn default_choice_count_jitter() -> f64 {
    0.1
}

impl Default for StorySection {
    fn default() -> Self {
        Self {
            target_scenes: default_target_scenes(),
            min_choices: default_min_choices(),
            max_choices: default_max_choices(),
            ending_chance_at_target: default_ending_chance_at_target(),
            ending_chance_high_tension: default_ending_chance_high_tension(),
            choice_count_jitter: default_choice_count_jitter(),
            snapshot_path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 FABULA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FABULA__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("FABULA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
