//! 统一错误处理模块
//!
//! 绑定运行时各层的错误类型定义
//!
//! ## 错误类型分层
//!
//! - **启动期错误** (`ConfigError`): 类型注册表/类描述表构建失败、配置文件错误，启动时致命
//! - **上下文错误** (`ContextError`, `ModuleError`): 上下文创建、模块加载
//! - **调用期错误** (`CallError`): 一次 script→native 调用的所有失败方式，由分发层翻译为脚本异常
//!
//! `CallError` 可以由 `ArgError`、`BindingError`、`ArenaError` 以及任何实现了
//! [`ErrorSet`] 的原生错误类型转换而来。

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::engine::Exception;

/// 启动期配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Duplicate type registration: {0}")]
    DuplicateType(String),

    #[error("Duplicate script name '{name}' (used by {first} and {second})")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },

    #[error("Type '{ty}' declares unregistered prototype '{prototype}'")]
    UnresolvedPrototype { ty: String, prototype: String },

    #[error("Type '{0}' declares itself as its prototype")]
    SelfPrototype(String),

    #[error("Prototype cycle through '{0}'")]
    PrototypeCycle(String),

    #[error("Member '{member}' of '{ty}' has no '_', 'get_' or 'set_' marker")]
    UnmarkedMember { ty: String, member: String },

    #[error("Setter '{member}' of '{ty}' has no matching getter")]
    SetterWithoutGetter { ty: String, member: String },

    #[error("Type '{ty}' throws unregistered exception type '{exception}'")]
    UnregisteredException { ty: String, exception: String },

    #[error("Marker type '{ty}' is not empty ({size} bytes of state without a handle)")]
    EmptyTypeWithState { ty: String, size: usize },

    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),

    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),

    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

/// 上下文错误
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("The outer execution scope is already held by context {0}")]
    ScopeHeld(u64),

    #[error("Global type '{0}' is not registered")]
    UnregisteredGlobal(String),

    #[error("Context has been destroyed")]
    Destroyed,

    #[error("Context is inside {0} native call(s)")]
    Busy(u32),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Script exception: {0}")]
    Script(String),
}

/// 模块加载错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("No module loader installed (requested '{0}')")]
    NoLoader(String),

    #[error("Failed to fetch module '{specifier}': {reason}")]
    Fetch { specifier: String, reason: String },

    #[error("Failed to compile module '{specifier}': {reason}")]
    Compile { specifier: String, reason: String },

    #[error("Cannot resolve '{request}' from '{referrer}'")]
    Unresolved { request: String, referrer: String },

    #[error("Unknown module {0}")]
    UnknownModule(String),
}

/// 原生句柄借用/投影错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    #[error("native object is already mutably borrowed")]
    AlreadyMutablyBorrowed,

    #[error("native object is already borrowed")]
    AlreadyBorrowed,

    #[error("native object is not a {expected}")]
    Downcast { expected: &'static str },

    #[error("prototype projection failed")]
    Projection,

    #[error("type '{0}' is not registered")]
    Unregistered(&'static str),

    #[error("'{found}' cannot be used as '{expected}'")]
    TypeMismatch { found: String, expected: String },
}

impl BindingError {
    /// 异常中使用的符号名
    pub fn name(&self) -> &'static str {
        match self {
            BindingError::AlreadyMutablyBorrowed | BindingError::AlreadyBorrowed => "InvalidState",
            BindingError::Unregistered(_) => "NotSupported",
            BindingError::Downcast { .. }
            | BindingError::Projection
            | BindingError::TypeMismatch { .. } => "InvalidArgument",
        }
    }
}

/// 参数转换错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgError {
    #[error("{required} argument(s) required, but only {given} present")]
    Arity { required: usize, given: usize },

    #[error("is not of type '{expected}'")]
    Type { expected: &'static str },

    #[error("is outside the range of '{expected}'")]
    Range { expected: &'static str },

    #[error("matches no member of '{union}'")]
    NoVariant { union: &'static str },

    #[error("is not a valid record: {0}")]
    Json(String),
}

/// Arena 分配错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArenaError {
    #[error("arena '{label}' exhausted: {requested} bytes requested, {used}/{limit} used")]
    OutOfMemory {
        label: &'static str,
        requested: usize,
        used: usize,
        limit: usize,
    },
}

/// 原生错误集合
///
/// 原生函数返回的错误枚举实现该 trait，`name()` 为不带消息的符号名
/// （如 `"IndexSizeError"`），用作通用异常的消息。
pub trait ErrorSet: fmt::Display + 'static {
    fn name(&self) -> &'static str;
}

/// 已擦除类型的原生错误，保留原始值以便匹配自定义异常类型
#[derive(Clone)]
pub struct NativeError {
    name: &'static str,
    message: String,
    payload: Rc<dyn Any>,
}

impl NativeError {
    pub fn new<E: ErrorSet>(error: E) -> Self {
        Self {
            name: error.name(),
            message: error.to_string(),
            payload: Rc::new(error),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn downcast_ref<E: ErrorSet>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    pub fn is<E: ErrorSet>(&self) -> bool {
        self.payload.is::<E>()
    }
}

impl fmt::Debug for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeError")
            .field("name", &self.name)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// 一次原生调用的失败方式
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("parameter {position} {error}")]
    Argument { position: usize, error: ArgError },

    #[error("receiver is not a valid instance")]
    InvalidReceiver,

    #[error("{0}")]
    Native(NativeError),

    #[error("script exception")]
    Thrown(Exception),

    #[error("maximum call depth exceeded")]
    StackOverflow,

    #[error("{0}")]
    Binding(#[from] BindingError),

    #[error("context has been destroyed")]
    Destroyed,
}

impl CallError {
    /// 参数错误（位置从 1 开始）
    pub fn argument(position: usize, error: ArgError) -> Self {
        CallError::Argument { position, error }
    }
}

impl<E: ErrorSet> From<E> for CallError {
    fn from(error: E) -> Self {
        CallError::Native(NativeError::new(error))
    }
}

impl From<ArenaError> for CallError {
    fn from(_: ArenaError) -> Self {
        CallError::OutOfMemory
    }
}

impl From<Exception> for CallError {
    fn from(exception: Exception) -> Self {
        CallError::Thrown(exception)
    }
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ContextResult<T> = Result<T, ContextError>;
pub type ModuleResult<T> = Result<T, ModuleError>;
pub type CallResult<T> = Result<T, CallError>;
