//! Bridges to foreign script engines.
//!
//! [`protocol`] is engine-neutral: any engine that can call one host function
//! with a JSON string can drive a [`Context`](crate::context::Context) through
//! it. [`js`] wires it into QuickJS.

#[cfg(feature = "quickjs")]
pub mod js;
pub mod protocol;

#[cfg(feature = "quickjs")]
pub use js::{JsBindingAdapter, JsError};
pub use protocol::{
    from_wire, handle_json, handle_request, to_wire, ForeignFunctions, Reply, Request, WireObject, WireValue,
};
