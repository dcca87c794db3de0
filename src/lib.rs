//! # Script Bindings
//!
//! A binding runtime that exposes native Rust types to a script engine as
//! script classes.
//!
//! ## Features
//!
//! - **Type Registry**: dense type indices, prototype links checked at startup
//! - **Class Descriptors**: constructors, methods, accessors, statics, constants and hooks per type
//! - **Script Context**: identity map, call and context arenas, destructors, modules, callbacks
//! - **Tagged Handles**: script objects resolve back to native data through checked upcasts
//! - **Dispatch**: typed parameter binding, call depth limits, exception translation
//! - **Marshaling**: primitives, optionals, sequences, typed buffers, unions, callables, records
//!
//! ## Example
//!
//! ```ignore
//! use script_bindings::prelude::*;
//!
//! let bindings = Bindings::build(vec![
//!     TypeBuilder::<(), Window>::marker("Window").build(),
//!     TypeBuilder::<(), List>::new("List")
//!         .constructor(|items: Vec<i32>| List { items })
//!         .member("_first", List::first)
//!         .build(),
//! ])?;
//! let runtime = Runtime::new(bindings, RuntimeConfig::default())?;
//! let ctx = Context::create(&runtime, Window, (), ContextOptions::main())?;
//! let list = ctx.construct("List", vec![Value::Int(1), Value::Int(2)])?;
//! let first = ctx.invoke(&list, "first", vec![])?;
//! ```
//!
//! ## Modules
//!
//! - [`core`]: errors, logging, shared macros
//! - [`config`]: runtime configuration
//! - [`engine`]: embedding surface of the script engine
//! - [`registry`]: native type declarations and the type registry
//! - [`class`]: class descriptor table
//! - [`handle`]: tagged handles and the reverse resolver
//! - [`context`]: script contexts
//! - [`dispatch`]: native call dispatch
//! - [`marshal`]: value conversion
//! - [`bindings`]: bridges to foreign script engines

/// Errors, logging and shared macros
pub mod core;
/// Runtime configuration
pub mod config;
/// Embedding surface of the script engine
pub mod engine;
/// Native type declarations and the type registry
pub mod registry;
/// Class descriptor table
pub mod class;
/// Tagged handles and the reverse resolver
pub mod handle;
/// Script contexts
pub mod context;
/// Native call dispatch
pub mod dispatch;
/// Value conversion between script and native
pub mod marshal;
/// Bridges to foreign script engines
pub mod bindings;

/// Commonly used items.
pub mod prelude {
    pub use crate::class::Bindings;
    pub use crate::config::RuntimeConfig;
    pub use crate::context::{CallbackId, Context, ContextOptions, HostState, Runtime, World};
    pub use crate::core::error::{ArgError, CallError, ContextError, ErrorSet};
    pub use crate::dispatch::{NativeException, State, ThisObject};
    pub use crate::engine::{ObjectId, Value};
    pub use crate::handle::Native;
    pub use crate::marshal::{Fit, FromValue, Function, Json, Owned, ToValue, TypedBuffer};
    pub use crate::native_union;
    pub use crate::registry::{Delegates, Embeds, TypeBuilder};
}
