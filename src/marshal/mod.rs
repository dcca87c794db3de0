//! Value Marshaling
//!
//! [`ToValue`] turns native results into script values, [`FromValue`] turns
//! script arguments into native parameters. Every `FromValue` type can also
//! rate how well a value [`fit`](FromValue::fit)s without converting it, which
//! is what union selection is built on.

use std::any::type_name;

use crate::context::{Context, HostState};
use crate::core::error::{ArgError, CallError};
use crate::dispatch::{ParamKind, Params};
use crate::engine::{ObjectId, Value};
use crate::handle::Native;

pub mod buffer;
pub mod callback;
pub mod json;
pub mod primitive;

pub use buffer::{BufferElement, TypedBuffer};
pub use callback::{Caught, Function, IntoArgs};
pub use json::{json_to_value, value_to_json, Json};

/// Native → script.
pub trait ToValue {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError>;
}

/// Script → native.
pub trait FromValue: Sized {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError>;

    /// How well `value` fits, without keeping the conversion.
    fn fit<S: HostState>(ctx: &Context<S>, value: &Value) -> Fit {
        match Self::from_value(ctx, value) {
            Ok(_) => Fit::Coercible,
            Err(_) => Fit::Invalid,
        }
    }

    fn param_kind() -> ParamKind {
        ParamKind::Required
    }

    /// Binds this parameter from the argument cursor.
    fn from_params<S: HostState>(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        let position = params.position();
        let undefined = Value::Undefined;
        let value = params.next_arg().unwrap_or(&undefined);
        Self::from_value(params.context(), value).map_err(|e| CallError::argument(position, e))
    }
}

/// Fit of a script value for a native type, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fit {
    /// Same representation.
    Exact,
    /// Same kind, different representation (`1.5` for an integer).
    Compatible,
    /// Converts under the loose rules (`"3"` for a number).
    Coercible,
    Invalid,
}

/// Picks the first exact variant, else the first compatible one, else the
/// first coercible one. Stops at the first exact match.
pub fn select_variant(fits: impl IntoIterator<Item = Fit>) -> Option<usize> {
    let mut compatible = None;
    let mut coercible = None;
    for (index, fit) in fits.into_iter().enumerate() {
        match fit {
            Fit::Exact => return Some(index),
            Fit::Compatible => {
                compatible.get_or_insert(index);
            }
            Fit::Coercible => {
                coercible.get_or_insert(index);
            }
            Fit::Invalid => {}
        }
    }
    compatible.or(coercible)
}

/// Declares a tagged union converted by trying its variants in order.
///
/// ```ignore
/// native_union! {
///     pub enum NumberOrText {
///         Number(f64),
///         Text(String),
///     }
/// }
/// ```
#[macro_export]
macro_rules! native_union {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident($ty:ty)),+ $(,)? }) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($ty)),+
        }

        impl $crate::marshal::FromValue for $name {
            #[allow(unused_assignments)]
            fn from_value<S: $crate::context::HostState>(
                ctx: &$crate::context::Context<S>,
                value: &$crate::engine::Value,
            ) -> ::std::result::Result<Self, $crate::core::error::ArgError> {
                let fits = [$(
                    <$ty as $crate::marshal::FromValue>::fit::<S>
                        as fn(&$crate::context::Context<S>, &$crate::engine::Value) -> $crate::marshal::Fit
                ),+];
                let chosen = $crate::marshal::select_variant(fits.iter().map(|fit| fit(ctx, value)));
                let mut index = 0usize;
                $(
                    if chosen == Some(index) {
                        return <$ty as $crate::marshal::FromValue>::from_value(ctx, value).map($name::$variant);
                    }
                    index += 1;
                )+
                Err($crate::core::error::ArgError::NoVariant { union: stringify!($name) })
            }

            fn fit<S: $crate::context::HostState>(
                ctx: &$crate::context::Context<S>,
                value: &$crate::engine::Value,
            ) -> $crate::marshal::Fit {
                [$(<$ty as $crate::marshal::FromValue>::fit(ctx, value)),+]
                    .into_iter()
                    .min()
                    .unwrap_or($crate::marshal::Fit::Invalid)
            }
        }

        impl $crate::marshal::ToValue for $name {
            fn to_value<S: $crate::context::HostState>(
                self,
                ctx: &$crate::context::Context<S>,
            ) -> ::std::result::Result<$crate::engine::Value, $crate::core::error::CallError> {
                match self {
                    $($name::$variant(inner) => $crate::marshal::ToValue::to_value(inner, ctx)),+
                }
            }
        }
    };
}

/// A native value returned by value: moved into the context and exposed.
pub struct Owned<T>(pub T);

impl<T: 'static> ToValue for Owned<T> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        ctx.promote(self.0).map(Value::Object)
    }
}

impl<T: 'static> ToValue for Native<T> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        ctx.expose(&self).map(Value::Object)
    }
}

impl<T: 'static> FromValue for Native<T> {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        ctx.resolve_receiver::<T>(value).map_err(|_| ArgError::Type {
            expected: class_name::<S, T>(ctx),
        })
    }

    fn fit<S: HostState>(ctx: &Context<S>, value: &Value) -> Fit {
        let registry = ctx.bindings().registry();
        let (Some(expected), Some(object)) = (registry.index_of::<T>(), value.as_object()) else {
            return Fit::Invalid;
        };
        match ctx.class_of(object) {
            Some(found) if found == expected => Fit::Exact,
            Some(found) if registry.is_subtype(found, expected) => Fit::Compatible,
            _ => Fit::Invalid,
        }
    }
}

fn class_name<S: HostState, T: 'static>(ctx: &Context<S>) -> &'static str {
    let registry = ctx.bindings().registry();
    registry
        .index_of::<T>()
        .map_or_else(type_name::<T>, |index| registry.meta(index).name)
}

impl ToValue for Value {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(self)
    }
}

impl FromValue for Value {
    fn from_value<S: HostState>(_ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        Ok(value.clone())
    }

    fn fit<S: HostState>(_ctx: &Context<S>, _value: &Value) -> Fit {
        Fit::Exact
    }
}

impl ToValue for ObjectId {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::Object(self))
    }
}

impl ToValue for () {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::Undefined)
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        match self {
            Some(value) => value.to_value(ctx),
            None => Ok(Value::Null),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        if value.is_nullish() {
            return Ok(None);
        }
        T::from_value(ctx, value).map(Some)
    }

    fn fit<S: HostState>(ctx: &Context<S>, value: &Value) -> Fit {
        if value.is_nullish() {
            Fit::Exact
        } else {
            T::fit(ctx, value)
        }
    }

    fn param_kind() -> ParamKind {
        ParamKind::Optional
    }

    fn from_params<S: HostState>(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        let position = params.position();
        match params.next_arg() {
            Some(value) => Self::from_value(params.context(), value).map_err(|e| CallError::argument(position, e)),
            None => Ok(None),
        }
    }
}

impl<T: ToValue, E: Into<CallError>> ToValue for Result<T, E> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        match self {
            Ok(value) => value.to_value(ctx),
            Err(err) => Err(err.into()),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        let items = self
            .into_iter()
            .map(|item| item.to_value(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Object(ctx.realm().create_array(items)))
    }
}

impl<T: ToValue + Clone> ToValue for &[T] {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        self.to_vec().to_value(ctx)
    }
}

fn is_list<S: HostState>(ctx: &Context<S>, value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|id| ctx.realm().is_array(id) || ctx.realm().is_typed_array(id))
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        let realm = ctx.realm();
        let items = value
            .as_object()
            .and_then(|id| {
                realm
                    .array_items(id)
                    .or_else(|| realm.typed_array(id).map(|array| array.values()))
            })
            .ok_or(ArgError::Type { expected: "sequence" })?;
        items.iter().map(|item| T::from_value(ctx, item)).collect()
    }

    fn fit<S: HostState>(ctx: &Context<S>, value: &Value) -> Fit {
        if is_list(ctx, value) {
            Fit::Exact
        } else {
            Fit::Invalid
        }
    }

    fn param_kind() -> ParamKind {
        ParamKind::Sequence
    }

    /// As the last parameter, collects every remaining argument unless the
    /// argument in its position is itself an array or typed array.
    fn from_params<S: HostState>(params: &mut Params<'_, S>) -> Result<Self, CallError> {
        let ctx = params.context();
        let spread = params.is_last() && !params.peek().is_some_and(|value| is_list(ctx, value));
        let first = params.position();
        if !spread {
            let undefined = Value::Undefined;
            let value = params.next_arg().unwrap_or(&undefined);
            return Self::from_value(ctx, value).map_err(|e| CallError::argument(first, e));
        }
        params
            .take_rest()
            .iter()
            .enumerate()
            .map(|(offset, value)| T::from_value(ctx, value).map_err(|e| CallError::argument(first + offset, e)))
            .collect()
    }
}
