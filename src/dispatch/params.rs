//! Positional parameter binding for one native call.

use std::ops::Deref;
use std::rc::Rc;

use crate::context::{Context, HostState};
use crate::core::error::{ArgError, CallError};
use crate::engine::{ObjectId, Value};
use crate::handle::Native;
use crate::marshal::FromValue;

use super::CallSite;

/// How a declared native parameter consumes script arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Exactly one argument, must be present.
    Required,
    /// One argument, absent or nullish is `None`.
    Optional,
    /// Variadic tail when last, otherwise one array argument.
    Sequence,
    /// Supplied by the runtime (state, `this`, context); consumes nothing.
    Injected,
}

impl ParamKind {
    fn consumes(self) -> bool {
        self != ParamKind::Injected
    }
}

/// Cursor over the script arguments of one call.
pub struct Params<'a, S> {
    ctx: &'a Context<S>,
    site: &'a CallSite,
    this: &'a Value,
    args: &'a [Value],
    cursor: usize,
    current: usize,
    last_consuming: Option<usize>,
}

impl<'a, S: HostState> Params<'a, S> {
    pub(crate) fn new(ctx: &'a Context<S>, site: &'a CallSite, this: &'a Value, args: &'a [Value]) -> Self {
        Self {
            ctx,
            site,
            this,
            args,
            cursor: 0,
            current: 0,
            last_consuming: None,
        }
    }

    pub fn context(&self) -> &'a Context<S> {
        self.ctx
    }

    pub fn site(&self) -> &'a CallSite {
        self.site
    }

    pub fn this(&self) -> &'a Value {
        self.this
    }

    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    /// 1-based position of the next script argument.
    pub fn position(&self) -> usize {
        self.cursor + 1
    }

    pub fn peek(&self) -> Option<&'a Value> {
        self.args.get(self.cursor)
    }

    pub fn next_arg(&mut self) -> Option<&'a Value> {
        let value = self.args.get(self.cursor)?;
        self.cursor += 1;
        Some(value)
    }

    /// Consumes every remaining argument.
    pub fn take_rest(&mut self) -> &'a [Value] {
        let rest = self.args.get(self.cursor..).unwrap_or(&[]);
        self.cursor = self.args.len();
        rest
    }

    /// Whether the parameter being bound is the last one that consumes
    /// script arguments.
    pub fn is_last(&self) -> bool {
        self.last_consuming == Some(self.current)
    }

    /// Checks the argument count against the declared parameter list.
    ///
    /// Every `Required` parameter, and a `Sequence` that is not the variadic
    /// tail, must have an argument. Missing ones are an arity error, never a
    /// null fill.
    pub fn begin(&mut self, kinds: &[ParamKind]) -> Result<(), CallError> {
        let consuming: Vec<ParamKind> = kinds.iter().copied().filter(|k| k.consumes()).collect();
        self.last_consuming = kinds.iter().rposition(|k| k.consumes());
        self.current = 0;

        let tail = consuming.len().saturating_sub(1);
        let required = consuming
            .iter()
            .enumerate()
            .rposition(|(i, kind)| {
                *kind == ParamKind::Required || (*kind == ParamKind::Sequence && i != tail)
            })
            .map_or(0, |i| i + 1);

        if self.args.len() < required {
            return Err(CallError::argument(
                self.args.len() + 1,
                ArgError::Arity {
                    required,
                    given: self.args.len(),
                },
            ));
        }
        Ok(())
    }

    /// Binds the next declared parameter.
    pub fn take<A: FromParam<S>>(&mut self) -> Result<A, CallError> {
        let value = A::from_param(self);
        self.current += 1;
        value
    }

    /// Resolves `this` to the receiver type.
    pub fn receiver<T: 'static>(&self) -> Result<Native<T>, CallError> {
        self.ctx.resolve_receiver::<T>(self.this)
    }
}

/// A native parameter the dispatcher knows how to supply.
pub trait FromParam<S: HostState>: Sized {
    fn kind() -> ParamKind;

    fn from_param(params: &mut Params<'_, S>) -> Result<Self, CallError>;
}

impl<S: HostState, T: FromValue> FromParam<S> for T {
    fn kind() -> ParamKind {
        T::param_kind()
    }

    fn from_param(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        T::from_params(params)
    }
}

/// Injected caller state.
pub struct State<S>(pub Rc<S>);

impl<S> Deref for State<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: HostState> FromParam<S> for State<S> {
    fn kind() -> ParamKind {
        ParamKind::Injected
    }

    fn from_param(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        Ok(State(params.context().state_rc()))
    }
}

/// Injected opaque `this` wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThisObject(pub ObjectId);

impl<S: HostState> FromParam<S> for ThisObject {
    fn kind() -> ParamKind {
        ParamKind::Injected
    }

    fn from_param(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        params
            .this()
            .as_object()
            .map(ThisObject)
            .ok_or(CallError::InvalidReceiver)
    }
}

impl<S: HostState> FromParam<S> for Context<S> {
    fn kind() -> ParamKind {
        ParamKind::Injected
    }

    fn from_param(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        Ok(params.context().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Bindings;
    use crate::config::RuntimeConfig;
    use crate::context::{ContextOptions, Runtime};
    use crate::dispatch::CallKind;
    use crate::registry::{TypeBuilder, TypeIndex};

    #[derive(Default)]
    struct Global;

    fn context() -> Context<()> {
        let bindings = Bindings::build(vec![TypeBuilder::<(), Global>::marker("Window").build()]).unwrap();
        let runtime = Runtime::new(bindings, RuntimeConfig::default()).unwrap();
        Context::create(&runtime, Global, (), ContextOptions::isolated()).unwrap()
    }

    fn site() -> CallSite {
        CallSite::new(TypeIndex::new(0), "Window", "f", CallKind::Method)
    }

    #[test]
    fn test_arity_counts_required_prefix() {
        let ctx = context();
        let site = site();
        let this = Value::Undefined;
        let args = [Value::Int(1)];
        let mut params = Params::new(&ctx, &site, &this, &args);
        let err = params
            .begin(&[ParamKind::Required, ParamKind::Required, ParamKind::Optional])
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Argument {
                position: 2,
                error: ArgError::Arity { required: 2, given: 1 }
            }
        ));

        let mut params = Params::new(&ctx, &site, &this, &args);
        assert!(params
            .begin(&[ParamKind::Required, ParamKind::Optional, ParamKind::Sequence])
            .is_ok());
    }

    #[test]
    fn test_tail_detection_skips_injected() {
        let ctx = context();
        let site = site();
        let this = Value::Undefined;
        let args = [Value::Int(1), Value::Int(2)];
        let mut params = Params::new(&ctx, &site, &this, &args);
        params
            .begin(&[ParamKind::Required, ParamKind::Sequence, ParamKind::Injected])
            .unwrap();
        let first: i32 = params.take().unwrap();
        assert_eq!(first, 1);
        assert!(params.is_last());
        let rest: Vec<i32> = params.take().unwrap();
        assert_eq!(rest, vec![2]);
        let _state: State<()> = params.take().unwrap();
    }
}
