//! Dispatch Layer
//!
//! Every script→native call (constructor, method, accessor, static,
//! indexed/named hook) goes through [`run`]: a [`CallScope`] is entered,
//! the erased native entry binds its parameters and resolves its receiver,
//! and any [`CallError`] is translated into a thrown script value.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::context::{Context, HostState};
use crate::core::error::{ArgError, CallError, NativeError};
use crate::core::logging::TARGET_DISPATCH;
use crate::engine::{CallInfo, ErrorKind, Exception, ObjectId, Value};
use crate::handle::NativePtr;
use crate::registry::{Projection, TypeIndex};

pub mod exception;
pub mod native_fn;
pub mod params;

pub use exception::NativeException;
pub use native_fn::{Exclusive, IntoConstructor, IntoFunction, IntoMethod, IntoTryConstructor, Shared};
pub use params::{FromParam, ParamKind, Params, State, ThisObject};

/// Erased method, accessor or static function.
pub type HostFn<S> = Arc<dyn Fn(&mut Params<'_, S>) -> Result<Value, CallError> + Send + Sync>;
/// Erased constructor: produces the native allocation to bind to `this`.
pub type CtorFn<S> = Arc<dyn Fn(&mut Params<'_, S>) -> Result<NativePtr, CallError> + Send + Sync>;

pub type IndexedGetFn<S> =
    Arc<dyn Fn(&Context<S>, ObjectId, u32) -> Result<Option<Value>, CallError> + Send + Sync>;
pub type IndexedSetFn<S> =
    Arc<dyn Fn(&Context<S>, ObjectId, u32, &Value) -> Result<bool, CallError> + Send + Sync>;
pub type NamedGetFn<S> =
    Arc<dyn Fn(&Context<S>, ObjectId, &str) -> Result<Option<Value>, CallError> + Send + Sync>;
pub type NamedSetFn<S> =
    Arc<dyn Fn(&Context<S>, ObjectId, &str, &Value) -> Result<bool, CallError> + Send + Sync>;
pub type NamedDeleteFn<S> =
    Arc<dyn Fn(&Context<S>, ObjectId, &str) -> Result<Option<bool>, CallError> + Send + Sync>;

pub type AttachFn<S> =
    Arc<dyn Fn(&Context<S>, NativePtr, Rc<[Projection]>) -> Result<(), CallError> + Send + Sync>;
pub type DestructorFn<S> = Arc<dyn Fn(&Context<S>, NativePtr, Rc<[Projection]>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Constructor,
    Method,
    Getter,
    Setter,
    Static,
    IndexedGet,
    IndexedSet,
    NamedGet,
    NamedSet,
    NamedDelete,
}

/// Where a call landed: the declaring type and member.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub declaring: TypeIndex,
    pub class: &'static str,
    pub name: &'static str,
    pub kind: CallKind,
}

impl CallSite {
    pub fn new(declaring: TypeIndex, class: &'static str, name: &'static str, kind: CallKind) -> Self {
        Self {
            declaring,
            class,
            name,
            kind,
        }
    }

    /// The verb phrase used in browser-style messages.
    fn action(&self) -> String {
        let (name, class) = (self.name, self.class);
        match self.kind {
            CallKind::Constructor => format!("construct '{class}'"),
            CallKind::Method | CallKind::Static => format!("execute '{name}' on '{class}'"),
            CallKind::Getter => format!("read the '{name}' property from '{class}'"),
            CallKind::Setter => format!("set the '{name}' property on '{class}'"),
            CallKind::IndexedGet => format!("read an indexed property from '{class}'"),
            CallKind::IndexedSet => format!("set an indexed property on '{class}'"),
            CallKind::NamedGet => format!("read a named property from '{class}'"),
            CallKind::NamedSet => format!("set a named property on '{class}'"),
            CallKind::NamedDelete => format!("delete a named property from '{class}'"),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CallKind::Constructor => f.write_str(self.class),
            CallKind::IndexedGet | CallKind::IndexedSet => write!(f, "{}[index]", self.class),
            CallKind::NamedGet | CallKind::NamedSet | CallKind::NamedDelete => {
                write!(f, "{}[name]", self.class)
            }
            _ => write!(f, "{}.{}", self.class, self.name),
        }
    }
}

/// Depth guard for one dispatched call.
///
/// Entering fills the state's arena slot and bumps the depth; leaving the
/// outermost scope resets the call arena. Nested scopes never reset it, so
/// scratch data of an enclosing call survives re-entrant calls.
pub struct CallScope<'a, S: HostState> {
    ctx: &'a Context<S>,
}

impl<'a, S: HostState> CallScope<'a, S> {
    pub fn enter(ctx: &'a Context<S>) -> Result<Self, CallError> {
        if ctx.is_destroyed() {
            return Err(CallError::Destroyed);
        }
        let depth = ctx.depth();
        if depth >= ctx.config().dispatch.max_call_depth {
            return Err(CallError::StackOverflow);
        }
        ctx.inner().depth.set(depth + 1);
        if let Some(slot) = ctx.state().call_arena_slot() {
            slot.fill(ctx.call_arena());
        }
        Ok(Self { ctx })
    }
}

impl<S: HostState> Drop for CallScope<'_, S> {
    fn drop(&mut self) {
        let depth = self.ctx.depth().saturating_sub(1);
        self.ctx.inner().depth.set(depth);
        if depth == 0 {
            self.ctx
                .call_arena()
                .reset(self.ctx.config().arena.call_arena_retain);
        }
    }
}

/// Runs `body` inside a call scope and translates its failure.
pub(crate) fn run<S: HostState, R>(
    ctx: &Context<S>,
    site: &CallSite,
    body: impl FnOnce(&Context<S>) -> Result<R, CallError>,
) -> Result<R, Exception> {
    let result = match CallScope::enter(ctx) {
        Ok(scope) => {
            let result = body(ctx);
            drop(scope);
            result
        }
        Err(err) => Err(err),
    };
    result.map_err(|err| translate(ctx, site, err))
}

/// Invokes an erased method, accessor or static.
pub(crate) fn call_host_fn<S: HostState>(
    ctx: &Context<S>,
    site: &CallSite,
    f: &HostFn<S>,
    info: &CallInfo,
) -> Result<Value, Exception> {
    run(ctx, site, |ctx| {
        let mut params = Params::new(ctx, site, &info.this, &info.args);
        f(&mut params)
    })
}

/// `new Class(...)` for a registered type.
pub(crate) fn construct<S: HostState>(
    ctx: &Context<S>,
    index: TypeIndex,
    info: &CallInfo,
) -> Result<Value, Exception> {
    let bindings = ctx.bindings().clone();
    let class = bindings.class(index);
    let site = CallSite::new(index, class.name, class.name, CallKind::Constructor);
    let Some(constructor) = &class.constructor else {
        return Err(ctx.realm().throw(ErrorKind::TypeError, "Illegal constructor"));
    };
    let Some(this) = info.this.as_object() else {
        return Err(ctx.realm().throw(ErrorKind::TypeError, "Illegal constructor"));
    };

    run(ctx, &site, |ctx| {
        let mut params = Params::new(ctx, &site, &info.this, &info.args);
        let ptr = constructor(&mut params)?;
        if class.empty {
            // the shared instance stands in for every construction
            let shared = ctx.empty_instance(index)?;
            ctx.realm().free(this);
            return Ok(Value::Object(shared));
        }
        ctx.attach(index, this, ptr)?;
        Ok(Value::Object(this))
    })
}

/// Turns a failed call into the script value to throw.
///
/// Precedence: out of memory, argument errors, exceptions thrown by nested
/// script, depth overflow, declared custom exceptions, generic errors.
pub(crate) fn translate<S: HostState>(ctx: &Context<S>, site: &CallSite, error: CallError) -> Exception {
    debug!(target: TARGET_DISPATCH, site = %site, error = %error, "native call failed");
    let realm = ctx.realm();
    match error {
        CallError::OutOfMemory => realm.throw(ErrorKind::Error, "out of memory"),
        CallError::Argument {
            error: ArgError::Arity { required, given },
            ..
        } => {
            let noun = if required == 1 { "argument" } else { "arguments" };
            realm.throw(
                ErrorKind::TypeError,
                format!(
                    "Failed to {}: {required} {noun} required, but only {given} present.",
                    site.action()
                ),
            )
        }
        CallError::Argument { position, error } => realm.throw(
            ErrorKind::TypeError,
            format!("Failed to {}: parameter {position} {error}.", site.action()),
        ),
        CallError::Thrown(exception) => exception,
        CallError::StackOverflow => realm.throw(ErrorKind::RangeError, "Maximum call stack size exceeded"),
        CallError::Native(native) => custom_exception(ctx, site, &native)
            .unwrap_or_else(|| realm.throw(ErrorKind::Error, native.name())),
        CallError::InvalidReceiver => realm.throw(ErrorKind::Error, "InvalidArgument"),
        CallError::Binding(binding) => realm.throw(ErrorKind::Error, binding.name()),
        CallError::Destroyed => realm.throw(ErrorKind::Error, "InvalidState"),
    }
}

fn custom_exception<S: HostState>(ctx: &Context<S>, site: &CallSite, error: &NativeError) -> Option<Exception> {
    let bindings = ctx.bindings().clone();
    let registry = bindings.registry();
    for index in registry.ancestors(site.declaring) {
        let Some(decl) = &bindings.class(index).exception else {
            continue;
        };
        if !(decl.matches)(error) {
            continue;
        }
        return match (decl.construct)(ctx, error, &site.to_string()) {
            Ok(value) => Some(Exception::new(value)),
            Err(err) => {
                debug!(
                    target: TARGET_DISPATCH,
                    exception = decl.rust_name,
                    error = %err,
                    "custom exception could not be constructed"
                );
                None
            }
        };
    }
    None
}
