//! Embedding surface of the script engine.
//!
//! Everything above this module talks to the engine through these types:
//! a generational object slab ([`Realm`]), script [`Value`]s, the property
//! and call operations in [`ops`], and compiled [`module`] records.
//! The embedder implements [`Host`] so that native callbacks get it back
//! explicitly.

pub mod module;
pub mod object;
pub mod ops;
pub mod realm;
pub mod value;

pub use module::{ModuleId, ModuleRecord};
pub use object::{
    CallInfo, IndexedGetter, IndexedSetter, Interceptors, NamedDeleter, NamedGetter, NamedSetter,
    NativeCallback, Property, TypedArray, TypedArrayKind,
};
pub use realm::{ErrorKind, Host, Intrinsics, Realm};
pub use value::{Exception, ObjectId, PropertyKey, Value};
