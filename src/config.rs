//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FRESHTRACK__*` 覆盖（双下划线表示嵌套，如 `FRESHTRACK__ORACLE__MODEL=gpt-4o`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub vision: VisionSection,
}

/// [store] 段：SQLite 文件路径与单次存储操作超时
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_store_timeout_secs")]
    pub op_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("freshtrack.db")
}

fn default_store_timeout_secs() -> u64 {
    10
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            op_timeout_secs: default_store_timeout_secs(),
        }
    }
}

/// [oracle] 段：决策模型端点（OpenAI 兼容）、模型名、采样参数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct OracleSection {
    pub base_url: Option<String>,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_oracle_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_p() -> f32 {
    0.9
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_oracle_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_oracle_timeout_secs(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl OracleSection {
    /// 从 api_key_env 指定的环境变量读取 Key；未设置时返回 None
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// [reconcile] 段：轮数上限、每轮动作上限、单个动作超时
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSection {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_max_actions_per_round")]
    pub max_actions_per_round: usize,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

fn default_max_rounds() -> usize {
    10
}

fn default_max_actions_per_round() -> usize {
    32
}

fn default_action_timeout_secs() -> u64 {
    15
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_actions_per_round: default_max_actions_per_round(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

/// [vision] 段：识别模型（OpenAI 兼容视觉模型）
#[derive(Debug, Clone, Deserialize)]
pub struct VisionSection {
    pub base_url: Option<String>,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_vision_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

fn default_vision_timeout_secs() -> u64 {
    120
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_vision_model(),
            request_timeout_secs: default_vision_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 FRESHTRACK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FRESHTRACK__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("FRESHTRACK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
