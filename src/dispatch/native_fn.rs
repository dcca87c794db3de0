//! Conversion of plain Rust functions into erased dispatch entries.
//!
//! A method is any `Fn(&T, A1, .., An) -> R` (shared receiver) or
//! `Fn(&mut T, A1, .., An) -> R` (exclusive receiver) whose parameters
//! implement [`FromParam`] and whose result implements [`ToValue`].
//! Implementations are generated for up to six parameters.

use std::sync::Arc;

use super::params::{FromParam, Params};
use super::{CtorFn, HostFn};
use crate::context::HostState;
use crate::core::error::CallError;
use crate::engine::Value;
use crate::handle::NativePtr;
use crate::marshal::ToValue;

/// Receiver marker: the method borrows `&T`.
pub struct Shared;

/// Receiver marker: the method borrows `&mut T`.
pub struct Exclusive;

pub trait IntoMethod<S: HostState, T, Args>: Send + Sync + 'static {
    fn into_host_fn(self) -> HostFn<S>;
}

pub trait IntoFunction<S: HostState, Args>: Send + Sync + 'static {
    fn into_host_fn(self) -> HostFn<S>;
}

pub trait IntoConstructor<S: HostState, T, Args>: Send + Sync + 'static {
    fn into_ctor_fn(self) -> CtorFn<S>;
}

pub trait IntoTryConstructor<S: HostState, T, Args>: Send + Sync + 'static {
    fn into_ctor_fn(self) -> CtorFn<S>;
}

macro_rules! impl_native_fn {
    ($($A:ident),*) => {
        #[allow(non_snake_case)]
        impl<S, T, F, R, $($A,)*> IntoMethod<S, T, (Shared, $($A,)*)> for F
        where
            S: HostState,
            T: 'static,
            F: Fn(&T, $($A),*) -> R + Send + Sync + 'static,
            R: ToValue,
            $($A: FromParam<S>,)*
        {
            fn into_host_fn(self) -> HostFn<S> {
                Arc::new(move |params: &mut Params<'_, S>| -> Result<Value, CallError> {
                    params.begin(&[$(<$A as FromParam<S>>::kind()),*])?;
                    let receiver = params.receiver::<T>()?;
                    $(let $A = params.take::<$A>()?;)*
                    let result = receiver.with(|this| (self)(this, $($A),*))?;
                    result.to_value(params.context())
                })
            }
        }

        #[allow(non_snake_case)]
        impl<S, T, F, R, $($A,)*> IntoMethod<S, T, (Exclusive, $($A,)*)> for F
        where
            S: HostState,
            T: 'static,
            F: Fn(&mut T, $($A),*) -> R + Send + Sync + 'static,
            R: ToValue,
            $($A: FromParam<S>,)*
        {
            fn into_host_fn(self) -> HostFn<S> {
                Arc::new(move |params: &mut Params<'_, S>| -> Result<Value, CallError> {
                    params.begin(&[$(<$A as FromParam<S>>::kind()),*])?;
                    let receiver = params.receiver::<T>()?;
                    $(let $A = params.take::<$A>()?;)*
                    let result = receiver.with_mut(|this| (self)(this, $($A),*))?;
                    result.to_value(params.context())
                })
            }
        }

        #[allow(non_snake_case)]
        impl<S, F, R, $($A,)*> IntoFunction<S, ($($A,)*)> for F
        where
            S: HostState,
            F: Fn($($A),*) -> R + Send + Sync + 'static,
            R: ToValue,
            $($A: FromParam<S>,)*
        {
            fn into_host_fn(self) -> HostFn<S> {
                Arc::new(move |params: &mut Params<'_, S>| -> Result<Value, CallError> {
                    params.begin(&[$(<$A as FromParam<S>>::kind()),*])?;
                    $(let $A = params.take::<$A>()?;)*
                    (self)($($A),*).to_value(params.context())
                })
            }
        }

        #[allow(non_snake_case)]
        impl<S, T, F, $($A,)*> IntoConstructor<S, T, ($($A,)*)> for F
        where
            S: HostState,
            T: 'static,
            F: Fn($($A),*) -> T + Send + Sync + 'static,
            $($A: FromParam<S>,)*
        {
            fn into_ctor_fn(self) -> CtorFn<S> {
                Arc::new(move |params: &mut Params<'_, S>| -> Result<NativePtr, CallError> {
                    params.begin(&[$(<$A as FromParam<S>>::kind()),*])?;
                    $(let $A = params.take::<$A>()?;)*
                    Ok(NativePtr::new((self)($($A),*)))
                })
            }
        }

        #[allow(non_snake_case)]
        impl<S, T, E, F, $($A,)*> IntoTryConstructor<S, T, ($($A,)*)> for F
        where
            S: HostState,
            T: 'static,
            E: Into<CallError>,
            F: Fn($($A),*) -> Result<T, E> + Send + Sync + 'static,
            $($A: FromParam<S>,)*
        {
            fn into_ctor_fn(self) -> CtorFn<S> {
                Arc::new(move |params: &mut Params<'_, S>| -> Result<NativePtr, CallError> {
                    params.begin(&[$(<$A as FromParam<S>>::kind()),*])?;
                    $(let $A = params.take::<$A>()?;)*
                    let value = (self)($($A),*).map_err(Into::into)?;
                    Ok(NativePtr::new(value))
                })
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A1);
impl_native_fn!(A1, A2);
impl_native_fn!(A1, A2, A3);
impl_native_fn!(A1, A2, A3, A4);
impl_native_fn!(A1, A2, A3, A4, A5);
impl_native_fn!(A1, A2, A3, A4, A5, A6);
