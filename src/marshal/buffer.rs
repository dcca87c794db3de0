//! Typed array marshaling.

use std::mem::size_of;

use crate::context::{Context, HostState};
use crate::core::error::{ArgError, CallError};
use crate::engine::{TypedArray, TypedArrayKind, Value};

use super::{Fit, FromValue, ToValue};

/// Element type of a [`TypedBuffer`].
pub trait BufferElement: Copy + 'static {
    const SIGNED: bool;
    const FLOAT: bool;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Option<Self>;

    fn kind() -> TypedArrayKind {
        element_kind(size_of::<Self>(), Self::SIGNED, Self::FLOAT)
    }
}

/// Array kind for an element width and signedness.
pub const fn element_kind(width: usize, signed: bool, float: bool) -> TypedArrayKind {
    match (width, signed, float) {
        (1, true, _) => TypedArrayKind::Int8,
        (2, true, false) => TypedArrayKind::Int16,
        (2, false, _) => TypedArrayKind::Uint16,
        (4, _, true) => TypedArrayKind::Float32,
        (4, true, false) => TypedArrayKind::Int32,
        (4, false, false) => TypedArrayKind::Uint32,
        (8, _, true) => TypedArrayKind::Float64,
        (8, true, false) => TypedArrayKind::BigInt64,
        (8, false, false) => TypedArrayKind::BigUint64,
        _ => TypedArrayKind::Uint8,
    }
}

macro_rules! impl_element {
    ($($ty:ty => $signed:literal, $float:literal;)+) => {
        $(
            impl BufferElement for $ty {
                const SIGNED: bool = $signed;
                const FLOAT: bool = $float;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Option<Self> {
                    Some(<$ty>::from_le_bytes(bytes.try_into().ok()?))
                }
            }
        )+
    };
}

impl_element! {
    i8 => true, false;
    u8 => false, false;
    i16 => true, false;
    u16 => false, false;
    i32 => true, false;
    u32 => false, false;
    i64 => true, false;
    u64 => false, false;
    f32 => true, true;
    f64 => true, true;
}

/// A native vector crossing as a typed array, copied in one pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedBuffer<T: BufferElement>(pub Vec<T>);

impl<T: BufferElement> TypedBuffer<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: BufferElement> ToValue for TypedBuffer<T> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        let mut bytes = Vec::with_capacity(self.0.len() * size_of::<T>());
        for element in self.0 {
            element.write_le(&mut bytes);
        }
        let array = TypedArray { kind: T::kind(), bytes };
        Ok(Value::Object(ctx.realm().create_typed_array(array)))
    }
}

impl<T: BufferElement> FromValue for TypedBuffer<T> {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        let expected = T::kind().name();
        let array = value
            .as_object()
            .and_then(|id| ctx.realm().typed_array(id))
            .filter(|array| array.kind == T::kind())
            .ok_or(ArgError::Type { expected })?;
        array
            .bytes
            .chunks_exact(size_of::<T>())
            .map(|chunk| T::read_le(chunk).ok_or(ArgError::Type { expected }))
            .collect::<Result<Vec<_>, _>>()
            .map(TypedBuffer)
    }

    fn fit<S: HostState>(ctx: &Context<S>, value: &Value) -> Fit {
        match value.as_object().and_then(|id| ctx.realm().typed_array(id)) {
            Some(array) if array.kind == T::kind() => Fit::Exact,
            _ => Fit::Invalid,
        }
    }
}
