/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和启动时验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub mod arena;
pub mod dispatch;

pub use arena::ArenaConfig;
pub use dispatch::DispatchConfig;

pub use crate::core::error::{ConfigError, ConfigResult};
use crate::{impl_default, impl_default_and_new};

/// 运行时主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Arena配置
    #[serde(default)]
    pub arena: ArenaConfig,

    /// 分发层配置
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl_default_and_new!(RuntimeConfig {
    arena: ArenaConfig::default(),
    dispatch: DispatchConfig::default(),
    logging: LoggingConfig::default(),
});

impl RuntimeConfig {
    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// 按键查找覆盖值；无法解析的值被忽略
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("BINDINGS_MAX_CALL_DEPTH") {
            if let Ok(depth) = val.parse() {
                self.dispatch.max_call_depth = depth;
            }
        }
        if let Some(val) = lookup("BINDINGS_CALL_ARENA_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.arena.call_arena_limit = limit;
            }
        }
        if let Some(val) = lookup("BINDINGS_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.arena.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出 target
    pub with_targets: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    with_targets: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arena.call_limit(), None);
    }

    #[test]
    fn test_toml_serialization() {
        let config = RuntimeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_json_serialization() {
        let config = RuntimeConfig::default();
        let json_str = serde_json::to_string(&config).unwrap();
        let parsed = RuntimeConfig::from_json_str(&json_str).unwrap();
        assert_eq!(config.dispatch.max_call_depth, parsed.dispatch.max_call_depth);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("[dispatch]\nmax_call_depth = 8\nstrict_setters = false\n").unwrap();
        assert_eq!(config.dispatch.max_call_depth, 8);
        assert!(!config.dispatch.strict_setters);
        assert_eq!(config.arena, ArenaConfig::default());
    }

    #[test]
    fn test_overrides() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| match key {
            "BINDINGS_MAX_CALL_DEPTH" => Some("12".to_string()),
            "BINDINGS_CALL_ARENA_LIMIT" => Some("not a number".to_string()),
            "BINDINGS_LOG_LEVEL" => Some("DEBUG".to_string()),
            _ => None,
        });
        assert_eq!(config.dispatch.max_call_depth, 12);
        assert_eq!(config.arena.call_arena_limit, 0);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_validation() {
        let mut config = RuntimeConfig::default();
        config.dispatch.max_call_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = RuntimeConfig::default();
        config.arena.call_arena_limit = 1024;
        config.arena.call_arena_retain = 4096;
        assert!(config.validate().is_err());
    }
}
