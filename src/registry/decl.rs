//! Declarative native type descriptions.
//!
//! A [`TypeBuilder`] records everything the binding layer needs to know about
//! one native type: its script name, prototype link, callable members and
//! optional hooks. Mistakes that can only be detected once the whole type set
//! is known (unresolved prototypes, duplicate names) are reported by
//! [`TypeRegistry::build`](super::TypeRegistry::build); mistakes local to one
//! declaration are recorded here and reported at the same point.

use std::any::{type_name, TypeId};
use std::marker::PhantomData;
use std::mem::size_of;
use std::rc::Rc;
use std::sync::Arc;

use super::upcast::{follow_of, Delegates, Embeds, Projection};
use super::{ProtoLink, Subtype};
use crate::context::{Context, HostState};
use crate::core::error::{CallError, ConfigError};
use crate::dispatch::exception::{ExceptionDecl, NativeException};
use crate::dispatch::native_fn::{IntoConstructor, IntoFunction, IntoMethod, IntoTryConstructor};
use crate::dispatch::{
    AttachFn, CtorFn, DestructorFn, HostFn, IndexedGetFn, IndexedSetFn, NamedDeleteFn, NamedGetFn,
    NamedSetFn,
};
use crate::engine::{ObjectId, Value};
use crate::handle::{Native, NativePtr};
use crate::marshal::{FromValue, ToValue};

/// Class-level constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Bool(bool),
    Int(i32),
    Number(f64),
    String(&'static str),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::string(s),
        }
    }
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Bool(b)
    }
}

impl From<i32> for Constant {
    fn from(i: i32) -> Self {
        Constant::Int(i)
    }
}

impl From<u16> for Constant {
    fn from(i: u16) -> Self {
        Constant::Int(i32::from(i))
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<&'static str> for Constant {
    fn from(s: &'static str) -> Self {
        Constant::String(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberKind {
    Method,
    Getter,
    Setter,
}

pub(crate) struct MemberDecl<S> {
    pub(crate) name: &'static str,
    pub(crate) kind: MemberKind,
    pub(crate) call: HostFn<S>,
}

pub(crate) struct ProtoDecl {
    pub(crate) type_id: TypeId,
    pub(crate) rust_name: &'static str,
    pub(crate) link: ProtoLink,
}

/// A finished declaration, consumed by the registry and the class table.
pub struct TypeDecl<S> {
    pub(crate) name: &'static str,
    pub(crate) rust_name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) size: usize,
    pub(crate) empty: bool,
    pub(crate) subtype: Option<Subtype>,
    pub(crate) proto: Option<ProtoDecl>,
    pub(crate) constructor: Option<CtorFn<S>>,
    pub(crate) members: Vec<MemberDecl<S>>,
    pub(crate) statics: Vec<(&'static str, HostFn<S>)>,
    pub(crate) constants: Vec<(&'static str, Constant)>,
    pub(crate) indexed_get: Option<IndexedGetFn<S>>,
    pub(crate) indexed_set: Option<IndexedSetFn<S>>,
    pub(crate) named_get: Option<NamedGetFn<S>>,
    pub(crate) named_set: Option<NamedSetFn<S>>,
    pub(crate) named_delete: Option<NamedDeleteFn<S>>,
    pub(crate) exception: Option<ExceptionDecl<S>>,
    pub(crate) on_attach: Option<AttachFn<S>>,
    pub(crate) destructor: Option<DestructorFn<S>>,
    pub(crate) empty_factory: Option<fn() -> NativePtr>,
    unmarked: Vec<&'static str>,
}

impl<S> TypeDecl<S> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    pub(crate) fn deferred_error(&self) -> Option<ConfigError> {
        self.unmarked.first().map(|member| ConfigError::UnmarkedMember {
            ty: self.rust_name.to_string(),
            member: member.to_string(),
        })
    }
}

/// Splits a declared member name into its kind and script-visible name.
///
/// `_name` is a method, `get_name` a getter, `set_name` a setter. Anything
/// else is a plain field and may not be registered as a member.
pub(crate) fn split_member(name: &'static str) -> Option<(MemberKind, &'static str)> {
    let (kind, rest) = if let Some(rest) = name.strip_prefix('_') {
        (MemberKind::Method, rest)
    } else if let Some(rest) = name.strip_prefix("get_") {
        (MemberKind::Getter, rest)
    } else if let Some(rest) = name.strip_prefix("set_") {
        (MemberKind::Setter, rest)
    } else {
        return None;
    };
    (!rest.is_empty()).then_some((kind, rest))
}

fn make_empty<T: Default + 'static>() -> NativePtr {
    NativePtr::new(T::default())
}

/// Declares one native type.
///
/// ```ignore
/// TypeBuilder::<State, List>::new("List")
///     .constructor(List::new)
///     .member("_first", List::first)
///     .member("get_length", List::len)
///     .build()
/// ```
pub struct TypeBuilder<S, T> {
    decl: TypeDecl<S>,
    _marker: PhantomData<fn() -> T>,
}

impl<S: HostState, T: 'static> TypeBuilder<S, T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            decl: TypeDecl {
                name,
                rust_name: type_name::<T>(),
                type_id: TypeId::of::<T>(),
                size: size_of::<T>(),
                empty: false,
                subtype: None,
                proto: None,
                constructor: None,
                members: Vec::new(),
                statics: Vec::new(),
                constants: Vec::new(),
                indexed_get: None,
                indexed_set: None,
                named_get: None,
                named_set: None,
                named_delete: None,
                exception: None,
                on_attach: None,
                destructor: None,
                empty_factory: None,
                unmarked: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// A stateless marker type: no tagged handle, every construction and
    /// resolution yields one shared instance per context.
    pub fn marker(name: &'static str) -> Self
    where
        T: Default,
    {
        let mut builder = Self::new(name);
        builder.decl.empty = true;
        builder.decl.empty_factory = Some(make_empty::<T>);
        builder
    }

    pub fn subtype(mut self, subtype: Subtype) -> Self {
        self.decl.subtype = Some(subtype);
        self
    }

    /// Prototype stored inline in `T`.
    pub fn embeds<P: 'static>(mut self) -> Self
    where
        T: Embeds<P>,
    {
        self.decl.proto = Some(ProtoDecl {
            type_id: TypeId::of::<P>(),
            rust_name: type_name::<P>(),
            link: ProtoLink::Embedded(Projection::of::<T, P>()),
        });
        self
    }

    /// Prototype reached through a pointer held by `T`.
    pub fn delegates<P: 'static>(mut self) -> Self
    where
        T: Delegates<P>,
    {
        self.decl.proto = Some(ProtoDecl {
            type_id: TypeId::of::<P>(),
            rust_name: type_name::<P>(),
            link: ProtoLink::Indirect(follow_of::<T, P>()),
        });
        self
    }

    pub fn constructor<Args, F>(mut self, f: F) -> Self
    where
        F: IntoConstructor<S, T, Args>,
    {
        self.decl.constructor = Some(f.into_ctor_fn());
        self
    }

    pub fn try_constructor<Args, F>(mut self, f: F) -> Self
    where
        F: IntoTryConstructor<S, T, Args>,
    {
        self.decl.constructor = Some(f.into_ctor_fn());
        self
    }

    /// Registers a method (`_name`), getter (`get_name`) or setter (`set_name`).
    pub fn member<Args, F>(mut self, name: &'static str, f: F) -> Self
    where
        F: IntoMethod<S, T, Args>,
    {
        match split_member(name) {
            Some((kind, script_name)) => self.decl.members.push(MemberDecl {
                name: script_name,
                kind,
                call: f.into_host_fn(),
            }),
            None => self.decl.unmarked.push(name),
        }
        self
    }

    /// Registers a class-level function (`_name`).
    pub fn static_member<Args, F>(mut self, name: &'static str, f: F) -> Self
    where
        F: IntoFunction<S, Args>,
    {
        match split_member(name) {
            Some((MemberKind::Method, script_name)) => {
                self.decl.statics.push((script_name, f.into_host_fn()))
            }
            _ => self.decl.unmarked.push(name),
        }
        self
    }

    pub fn constant(mut self, name: &'static str, value: impl Into<Constant>) -> Self {
        self.decl.constants.push((name, value.into()));
        self
    }

    /// `None` lets the lookup fall through to the prototype chain.
    pub fn indexed_getter<R, F>(mut self, f: F) -> Self
    where
        R: ToValue,
        F: Fn(&T, u32) -> Option<R> + Send + Sync + 'static,
    {
        self.decl.indexed_get = Some(Arc::new(
            move |ctx: &Context<S>, this: ObjectId, index: u32| -> Result<Option<Value>, CallError> {
                let receiver = ctx.resolve_receiver::<T>(&Value::Object(this))?;
                let found = receiver.with(|value| f(value, index))?;
                found.map(|r| r.to_value(ctx)).transpose()
            },
        ));
        self
    }

    /// Returns whether the assignment was handled.
    pub fn indexed_setter<V, F>(mut self, f: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut T, u32, V) -> bool + Send + Sync + 'static,
    {
        self.decl.indexed_set = Some(Arc::new(
            move |ctx: &Context<S>, this: ObjectId, index: u32, value: &Value| -> Result<bool, CallError> {
                let receiver = ctx.resolve_receiver::<T>(&Value::Object(this))?;
                let value = V::from_value(ctx, value).map_err(|e| CallError::argument(2, e))?;
                Ok(receiver.with_mut(|target| f(target, index, value))?)
            },
        ));
        self
    }

    pub fn named_getter<R, F>(mut self, f: F) -> Self
    where
        R: ToValue,
        F: Fn(&T, &str) -> Option<R> + Send + Sync + 'static,
    {
        self.decl.named_get = Some(Arc::new(
            move |ctx: &Context<S>, this: ObjectId, name: &str| -> Result<Option<Value>, CallError> {
                let receiver = ctx.resolve_receiver::<T>(&Value::Object(this))?;
                let found = receiver.with(|value| f(value, name))?;
                found.map(|r| r.to_value(ctx)).transpose()
            },
        ));
        self
    }

    pub fn named_setter<V, F>(mut self, f: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut T, &str, V) -> bool + Send + Sync + 'static,
    {
        self.decl.named_set = Some(Arc::new(
            move |ctx: &Context<S>, this: ObjectId, name: &str, value: &Value| -> Result<bool, CallError> {
                let receiver = ctx.resolve_receiver::<T>(&Value::Object(this))?;
                let value = V::from_value(ctx, value).map_err(|e| CallError::argument(2, e))?;
                Ok(receiver.with_mut(|target| f(target, name, value))?)
            },
        ));
        self
    }

    /// `None` means "not mine", `Some(deleted)` reports the outcome.
    pub fn named_deleter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T, &str) -> Option<bool> + Send + Sync + 'static,
    {
        self.decl.named_delete = Some(Arc::new(
            move |ctx: &Context<S>, this: ObjectId, name: &str| -> Result<Option<bool>, CallError> {
                let receiver = ctx.resolve_receiver::<T>(&Value::Object(this))?;
                Ok(receiver.with_mut(|target| f(target, name))?)
            },
        ));
        self
    }

    /// Errors of `X::Error` raised by this type or its descendants are
    /// thrown as `X` instances.
    pub fn throws<X: NativeException>(mut self) -> Self {
        self.decl.exception = Some(ExceptionDecl::of::<X>());
        self
    }

    /// Runs once the native value is bound to its script object.
    pub fn on_attach<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<S>, Native<T>) -> Result<(), CallError> + Send + Sync + 'static,
    {
        self.decl.on_attach = Some(Arc::new(
            move |ctx: &Context<S>, ptr: NativePtr, path: Rc<[Projection]>| -> Result<(), CallError> {
                f(ctx, Native::from_parts(ptr, path))
            },
        ));
        self
    }

    /// Runs at context teardown for every bound instance.
    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<S>, Native<T>) + Send + Sync + 'static,
    {
        self.decl.destructor = Some(Arc::new(
            move |ctx: &Context<S>, ptr: NativePtr, path: Rc<[Projection]>| {
                f(ctx, Native::from_parts(ptr, path))
            },
        ));
        self
    }

    pub fn build(self) -> TypeDecl<S> {
        self.decl
    }
}
