use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File};
pub use config::FileFormat;
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_CONFIG_MANAGER: RwLock<Option<Arc<ConfigManager>>> = RwLock::new(None);
}

/// 环境变量前缀 / Environment variable prefix (VCHAT_SERVER__WS_PORT -> server.ws_port)
pub const ENV_PREFIX: &str = "VCHAT";

/// 配置错误类型 / Config error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置项 '{key}' 不存在 / config key '{key}' not found")]
    KeyNotFound { key: String },
    #[error("配置项 '{key}' 类型转换失败 / config key '{key}' has wrong type: {message}")]
    TypeConversionError { key: String, message: String },
    #[error("配置初始化失败 / config initialization failed: {message}")]
    InitializationError { message: String },
}

/// 配置数据源信息 / Config source info
#[derive(Debug, Clone)]
pub struct ConfigSourceInfo {
    pub source_type: &'static str,
    pub description: String,
    pub priority: u8,
    pub loaded: bool,
}

/// 配置源类型 / Config source kind
pub enum ConfigSource {
    /// 文件配置源 / File source
    File { path: String, format: Option<FileFormat>, required: bool },
    /// 环境变量配置源 / Environment source
    Env { prefix: String, separator: &'static str },
    /// 内存配置源 / In-memory source
    Memory(HashMap<String, serde_json::Value>),
    /// 字符串配置源 / Inline string source
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    /// 默认配置源（优先级从低到高）/ Default sources, lowest priority first
    fn defaults() -> Vec<ConfigSource> {
        ["config/development.toml", "config/default.toml", "config/production.toml"]
            .into_iter()
            .map(|path| ConfigSource::File { path: path.to_string(), format: Some(FileFormat::Toml), required: false })
            .collect()
    }

    fn info(&self, priority: u8) -> ConfigSourceInfo {
        let (source_type, description) = match self {
            ConfigSource::File { path, required, .. } => ("File", format!("{} (required: {})", path, required)),
            ConfigSource::Env { prefix, separator } => ("Environment", format!("prefix={} separator={}", prefix, separator)),
            ConfigSource::Memory(map) => ("Memory", format!("{} keys", map.len())),
            ConfigSource::String { .. } => ("String", "inline".to_string()),
        };
        ConfigSourceInfo { source_type, description, priority, loaded: false }
    }

    fn add_to_builder(
        self,
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        match self {
            ConfigSource::File { path, format, required } => {
                let file = match format {
                    Some(format) => File::with_name(&path).format(format),
                    None => File::with_name(&path),
                };
                Ok(builder.add_source(file.required(required)))
            }
            ConfigSource::Env { prefix, separator } => Ok(builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("_")
                    .separator(separator)
                    .try_parsing(true)
                    .ignore_empty(true),
            )),
            ConfigSource::Memory(map) => {
                let json = serde_json::to_string(&map).map_err(|e| anyhow!("序列化内存配置失败 / serialize memory config: {}", e))?;
                Ok(builder.add_source(File::from_str(&json, FileFormat::Json)))
            }
            ConfigSource::String { content, format } => Ok(builder.add_source(File::from_str(&content, format))),
        }
    }
}

/// 配置管理器 / Config manager
pub struct ConfigManager {
    config: Config,
    sources_info: Vec<ConfigSourceInfo>,
}

impl ConfigManager {
    /// 仅使用默认配置源 / Default sources only
    pub fn new() -> Result<Self> {
        Self::with_sources(vec![])
    }

    /// 默认源 + 额外源，环境变量最后叠加 / Defaults + extra sources, environment applied last
    pub fn with_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        let env = ConfigSource::Env { prefix: ENV_PREFIX.to_string(), separator: "__" };
        Self::build(ConfigSource::defaults().into_iter().chain(sources).chain(std::iter::once(env)))
    }

    /// 仅使用给定源（测试用）/ Only the given sources (no files, no env)
    pub fn isolated(sources: Vec<ConfigSource>) -> Result<Self> {
        Self::build(sources.into_iter())
    }

    fn build(sources: impl Iterator<Item = ConfigSource>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut sources_info = Vec::new();
        for (idx, source) in sources.enumerate() {
            let mut info = source.info(idx as u8 + 1);
            if let ConfigSource::File { path, required, .. } = &source {
                let exists = std::path::Path::new(path).exists();
                if !exists && *required {
                    return Err(anyhow!("必需的配置文件不存在 / required config file missing: {}", path));
                }
                if !exists {
                    sources_info.push(info);
                    continue;
                }
            }
            builder = source.add_to_builder(builder)?;
            info.loaded = true;
            sources_info.push(info);
        }
        let config = builder.build().map_err(|e| anyhow!("构建配置失败 / build config: {}", e))?;
        Ok(Self { config, sources_info })
    }

    /// 获取指定 key 的配置值 / Get a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config.get(key).map_err(|e| anyhow!("获取配置 '{}' 失败 / get config: {}", key, e))
    }

    /// 不存在时返回默认值 / Get a typed value or a default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// 区分缺失与类型错误 / Distinguish missing keys from type errors
    pub fn get_safe<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, ConfigError> {
        self.config.get(key).map_err(|e| match e {
            config::ConfigError::NotFound(_) => ConfigError::KeyNotFound { key: key.to_string() },
            other => ConfigError::TypeConversionError { key: key.to_string(), message: other.to_string() },
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.config.get::<serde_json::Value>(key).is_ok()
    }

    pub fn sources_info(&self) -> &[ConfigSourceInfo] {
        &self.sources_info
    }

    /// 记录已加载的配置源 / Log which sources were loaded
    pub fn log_sources(&self) {
        for info in &self.sources_info {
            tracing::info!(source = info.source_type, priority = info.priority, loaded = info.loaded, "config source {}", info.description);
        }
    }
}

/// 安装全局配置管理器（启动时调用一次）/ Install the process-wide manager (call once at startup)
pub fn init_global_config_manager(extra_file: Option<&str>) -> Result<Arc<ConfigManager>> {
    let sources = extra_file
        .map(|path| vec![ConfigSource::File { path: path.to_string(), format: None, required: true }])
        .unwrap_or_default();
    let manager = Arc::new(ConfigManager::with_sources(sources)?);
    let mut slot = GLOBAL_CONFIG_MANAGER.write().map_err(|e| anyhow!("获取全局配置管理器写锁失败 / config lock poisoned: {}", e))?;
    *slot = Some(manager.clone());
    Ok(manager)
}

/// 获取全局配置管理器实例，未初始化时按默认源创建 / Get the global manager, creating a default one if needed
pub fn get_global_config_manager() -> Result<Arc<ConfigManager>> {
    {
        let slot = GLOBAL_CONFIG_MANAGER.read().map_err(|e| anyhow!("读取全局配置管理器锁失败 / config lock poisoned: {}", e))?;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }
    }
    let mut slot = GLOBAL_CONFIG_MANAGER.write().map_err(|e| anyhow!("获取全局配置管理器写锁失败 / config lock poisoned: {}", e))?;
    match slot.as_ref() {
        Some(manager) => Ok(manager.clone()),
        None => {
            let manager = Arc::new(ConfigManager::new()?);
            *slot = Some(manager.clone());
            Ok(manager)
        }
    }
}
