//! Script functions passed into native code.

use std::fmt;

use crate::context::{CallbackId, Context, HostState};
use crate::core::error::{ArgError, CallError};
use crate::engine::{Exception, ObjectId, Value};

use super::{Fit, FromValue, ToValue};

/// A callable script value received as an argument.
///
/// Calling it runs script synchronously. Exceptions thrown by the script
/// come back as [`CallError::Thrown`] and are rethrown unchanged when the
/// native caller propagates them with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    object: ObjectId,
}

impl Function {
    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn call<S: HostState, A: IntoArgs>(&self, ctx: &Context<S>, args: A) -> Result<Value, CallError> {
        self.call_with_this(ctx, Value::Undefined, args)
    }

    pub fn call_with_this<S: HostState, A: IntoArgs>(
        &self,
        ctx: &Context<S>,
        this: Value,
        args: A,
    ) -> Result<Value, CallError> {
        let args = args.into_args(ctx)?;
        ctx.call(self.object, this, args).map_err(CallError::Thrown)
    }

    /// Calls the function and keeps a thrown exception instead of propagating it.
    pub fn try_call<S: HostState, A: IntoArgs>(&self, ctx: &Context<S>, args: A) -> Result<Result<Value, Caught>, CallError> {
        let args = args.into_args(ctx)?;
        Ok(ctx.call(self.object, Value::Undefined, args).map_err(|exception| Caught {
            message: ctx.realm().display_string(exception.value()),
            exception,
        }))
    }

    /// Keeps the function alive for later asynchronous invocation.
    pub fn persist<S: HostState>(&self, ctx: &Context<S>) -> CallbackId {
        ctx.persist(self.object)
    }
}

impl FromValue for Function {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        value
            .as_object()
            .filter(|&object| ctx.realm().is_callable(object))
            .map(|object| Function { object })
            .ok_or(ArgError::Type { expected: "Function" })
    }

    fn fit<S: HostState>(ctx: &Context<S>, value: &Value) -> Fit {
        match value.as_object() {
            Some(object) if ctx.realm().is_callable(object) => Fit::Exact,
            _ => Fit::Invalid,
        }
    }
}

impl ToValue for Function {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::Object(self.object))
    }
}

/// An exception caught by [`Function::try_call`].
#[derive(Debug, Clone)]
pub struct Caught {
    pub exception: Exception,
    pub message: String,
}

impl fmt::Display for Caught {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Argument lists for calls into script.
pub trait IntoArgs {
    fn into_args<S: HostState>(self, ctx: &Context<S>) -> Result<Vec<Value>, CallError>;
}

impl IntoArgs for () {
    fn into_args<S: HostState>(self, _ctx: &Context<S>) -> Result<Vec<Value>, CallError> {
        Ok(Vec::new())
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args<S: HostState>(self, _ctx: &Context<S>) -> Result<Vec<Value>, CallError> {
        Ok(self)
    }
}

macro_rules! impl_into_args {
    ($($name:ident),+) => {
        impl<$($name: ToValue),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args<S: HostState>(self, ctx: &Context<S>) -> Result<Vec<Value>, CallError> {
                let ($($name,)+) = self;
                Ok(vec![$($name.to_value(ctx)?),+])
            }
        }
    };
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
