//! 核心模块
//!
//! 包含绑定运行时的基础设施：
//! - `error` - 错误类型定义
//! - `logging` - tracing 订阅者初始化
//! - `macros` - 配置结构体样板宏

pub mod error;
pub mod logging;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{
    ArenaError, ArgError, BindingError, CallError, CallResult, ConfigError, ConfigResult,
    ContextError, ContextResult, ErrorSet, ModuleError, ModuleResult, NativeError,
};
