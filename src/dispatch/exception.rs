//! Custom exception types declared by native types.

use std::any::{type_name, TypeId};

use crate::context::{Context, HostState};
use crate::core::error::{CallError, ErrorSet, NativeError};
use crate::engine::Value;
use crate::marshal::{Owned, ToValue};

/// A registered native type that is thrown in place of a generic error
/// whenever a native function fails with one of its `Error` values.
///
/// The exception type must itself be registered so that its instances have
/// a class; declare it with [`TypeBuilder::throws`](crate::registry::TypeBuilder::throws).
pub trait NativeException: Sized + 'static {
    type Error: ErrorSet;

    /// `diagnostic` names the failing call site, e.g. `DOMTokenList.add`.
    fn from_error(error: &Self::Error, diagnostic: &str) -> Self;
}

pub struct ExceptionDecl<S> {
    pub(crate) type_id: TypeId,
    pub(crate) rust_name: &'static str,
    pub(crate) matches: fn(&NativeError) -> bool,
    pub(crate) construct: fn(&Context<S>, &NativeError, &str) -> Result<Value, CallError>,
}

impl<S> Clone for ExceptionDecl<S> {
    fn clone(&self) -> Self {
        Self {
            type_id: self.type_id,
            rust_name: self.rust_name,
            matches: self.matches,
            construct: self.construct,
        }
    }
}

impl<S: HostState> ExceptionDecl<S> {
    pub(crate) fn of<X: NativeException>() -> Self {
        Self {
            type_id: TypeId::of::<X>(),
            rust_name: type_name::<X>(),
            matches: matches_error::<X>,
            construct: construct_exception::<S, X>,
        }
    }
}

fn matches_error<X: NativeException>(error: &NativeError) -> bool {
    error.is::<X::Error>()
}

fn construct_exception<S: HostState, X: NativeException>(
    ctx: &Context<S>,
    error: &NativeError,
    diagnostic: &str,
) -> Result<Value, CallError> {
    let inner = error
        .downcast_ref::<X::Error>()
        .ok_or_else(|| CallError::Native(error.clone()))?;
    Owned(X::from_error(inner, diagnostic)).to_value(ctx)
}
