//! 日志初始化
//!
//! 绑定层各模块使用固定的 tracing target：
//! `bindings::registry`、`bindings::class`、`bindings::context`、
//! `bindings::dispatch`、`bindings::module`、`bindings::js`。

use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, LoggingConfig};

pub const TARGET_REGISTRY: &str = "bindings::registry";
pub const TARGET_CLASS: &str = "bindings::class";
pub const TARGET_CONTEXT: &str = "bindings::context";
pub const TARGET_DISPATCH: &str = "bindings::dispatch";
pub const TARGET_MODULE: &str = "bindings::module";
pub const TARGET_JS: &str = "bindings::js";

/// 安装全局 fmt 订阅者
///
/// `RUST_LOG` 优先，否则使用配置中的级别。重复调用无副作用。
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(config.level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_targets)
        .try_init();
    tracing::debug!(target: TARGET_CONTEXT, level = ?config.level, "logging initialized");
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}
