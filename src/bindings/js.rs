//! QuickJS bridge.
//!
//! Runs real JavaScript against a [`Context`]. Host objects appear in
//! QuickJS as `Proxy` objects, one per object id, so identity holds on the
//! script side too. Every trap forwards a [`Request`](super::protocol::Request)
//! through a single host function.
//!
//! Script functions handed to native code stay in QuickJS. The Context sees
//! each one as a realm function that calls back into QuickJS, so native
//! code can call them synchronously, persist them as callbacks, and re-enter
//! the Context from inside them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use rquickjs::function::Rest;
use rquickjs::{qjs, Array, Context as JsContext, Ctx, Function, Object, Persistent, Runtime as JsRuntime};
use thiserror::Error;
use tracing::{debug, info};

use super::protocol::{from_wire, handle_json, to_wire, ForeignFunctions, Reply, WireValue};
use crate::context::{Context, HostState};
use crate::core::logging::TARGET_JS;
use crate::engine::{CallInfo, ErrorKind, Exception, ObjectId, Value};

const GLUE: &str = r#"
(() => {
  const host = globalThis.__host;
  delete globalThis.__host;
  const proxies = new Map();
  const ids = new WeakMap();
  const scriptFns = [];
  const scriptIds = new WeakMap();
  let fresh = [];
  const errors = { Error, TypeError, RangeError, SyntaxError, ReferenceError, EvalError, URIError };

  const toWire = (v) => {
    switch (typeof v) {
      case "undefined": return { t: "undefined" };
      case "boolean": return { t: "bool", v };
      case "number": return Number.isFinite(v) ? { t: "number", v } : { t: "nonfinite", v: String(v) };
      case "bigint": return { t: "bigint", v: v.toString() };
      case "string": return { t: "string", v };
      case "symbol": throw new TypeError("symbols cannot cross the bridge");
    }
    if (v === null) return { t: "null" };
    const id = ids.get(v);
    if (id !== undefined) return { t: "object", v: { id, callable: typeof v === "function" } };
    if (typeof v === "function") {
      let index = scriptIds.get(v);
      if (index === undefined) {
        index = scriptFns.push(v) - 1;
        scriptIds.set(v, index);
        fresh.push(v);
      }
      return { t: "function", v: index };
    }
    if (Array.isArray(v)) return { t: "array", v: v.map(toWire) };
    const fields = {};
    for (const key of Object.keys(v)) fields[key] = toWire(v[key]);
    return { t: "record", v: fields };
  };

  const fromWire = (w) => {
    switch (w.t) {
      case "undefined": return undefined;
      case "null": return null;
      case "nonfinite": return Number(w.v);
      case "bigint": return BigInt(w.v);
      case "array": return w.v.map(fromWire);
      case "record": {
        const out = {};
        for (const key of Object.keys(w.v)) out[key] = fromWire(w.v[key]);
        return out;
      }
      case "object": return proxy(w.v.id, w.v.callable);
      case "function": return scriptFns[w.v];
      default: return w.v;
    }
  };

  // script functions first seen since the last crossing, always the tail of scriptFns
  const handOver = () => {
    const passed = fresh;
    fresh = [];
    return [scriptFns.length - passed.length, passed];
  };

  const request = (req) => {
    const text = JSON.stringify(req);
    const [first, passed] = handOver();
    const reply = JSON.parse(host(text, first, ...passed));
    if (reply.status === "ok") return fromWire(reply.value);
    if (reply.value !== undefined) throw fromWire(reply.value);
    const Kind = errors[reply.name] || Error;
    const error = new Kind(reply.message);
    if (Kind === Error && reply.name !== "Error") error.name = reply.name;
    throw error;
  };

  const thrown = (e) => {
    const id = e !== null && (typeof e === "object" || typeof e === "function") ? ids.get(e) : undefined;
    if (id !== undefined) return { status: "throw", name: "Error", message: "", value: toWire(e) };
    const isError = e instanceof Error;
    return {
      status: "throw",
      name: isError ? e.name : "Error",
      message: isError ? e.message : String(e),
    };
  };

  const settle = (produce) => {
    let reply;
    try {
      reply = { status: "ok", value: toWire(produce()) };
    } catch (e) {
      reply = thrown(e);
    }
    const [first, passed] = handOver();
    return [JSON.stringify(reply), first, passed];
  };

  const proxy = (id, callable) => {
    let p = proxies.get(id);
    if (p !== undefined) return p;
    p = new Proxy(callable ? function () {} : {}, {
      get: (target, key) => {
        if (typeof key === "symbol") return undefined;
        if (callable && (key === "call" || key === "apply" || key === "bind")) return target[key];
        return request({ op: "get", target: id, key: String(key) });
      },
      set: (_, key, value) => {
        request({ op: "set", target: id, key: String(key), value: toWire(value) });
        return true;
      },
      deleteProperty: (_, key) => request({ op: "delete", target: id, key: String(key) }),
      getPrototypeOf: () => request({ op: "proto", target: id }),
      apply: (_, self, args) => request({ op: "call", target: id, this: toWire(self), args: args.map(toWire) }),
      construct: (_, args) => request({ op: "construct", target: id, args: args.map(toWire) }),
    });
    proxies.set(id, p);
    ids.set(p, id);
    return p;
  };

  const global = request({ op: "global" });
  for (const name of request({ op: "classes" })) {
    const constructor = global[name];
    if (typeof constructor === "function") globalThis[name] = constructor;
  }
  globalThis.host = global;

  return {
    run: (code) => settle(() => (0, eval)(code)),
    invoke: (index, payload) => settle(() => {
      const [self, args] = JSON.parse(payload);
      return scriptFns[index].apply(fromWire(self), args.map(fromWire));
    }),
  };
})()
"#;

#[derive(Error, Debug)]
pub enum JsError {
    #[error("QuickJS error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("Uncaught {name}: {message}")]
    Thrown { name: String, message: String },

    #[error("Malformed bridge value: {0}")]
    Protocol(String),

    #[error("QuickJS bridge is not attached")]
    Detached,
}

/// Shared between the adapter and the realm functions standing in for
/// script functions; those only hold it weakly.
struct Bridge<S: HostState> {
    host: Context<S>,
    js: JsContext,
    // set while this thread runs inside `js.with`
    entered: Cell<Option<NonNull<qjs::JSContext>>>,
    run: RefCell<Option<Persistent<Function<'static>>>>,
    invoke: RefCell<Option<Persistent<Function<'static>>>>,
    scripts: RefCell<Vec<Persistent<Function<'static>>>>,
    stand_ins: RefCell<Vec<ObjectId>>,
    script_of: RefCell<HashMap<ObjectId, u32>>,
}

/// Restores the previously entered context when dropped.
struct Entered<'a> {
    cell: &'a Cell<Option<NonNull<qjs::JSContext>>>,
    previous: Option<NonNull<qjs::JSContext>>,
}

impl<'a> Entered<'a> {
    fn set(cell: &'a Cell<Option<NonNull<qjs::JSContext>>>, ctx: &Ctx<'_>) -> Self {
        let previous = cell.replace(Some(ctx.as_raw()));
        Self { cell, previous }
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

impl<S: HostState> ForeignFunctions for Bridge<S> {
    fn inbound(&self, index: u32) -> Option<ObjectId> {
        self.stand_ins.borrow().get(index as usize).copied()
    }

    fn outbound(&self, object: ObjectId) -> Option<u32> {
        self.script_of.borrow().get(&object).copied()
    }
}

impl<S: HostState> Bridge<S> {
    /// Runs `f` inside QuickJS. A call made while script is already running
    /// on this thread reuses that context instead of locking the runtime again.
    fn with_js<R>(&self, f: impl for<'js> FnOnce(&Ctx<'js>) -> R) -> R {
        if let Some(raw) = self.entered.get() {
            // SAFETY: `entered` is only set by an `Entered` guard living inside
            // `js.with` on this thread, so the runtime lock is held for as long
            // as this Ctx exists, and the Ctx does not outlive `f`.
            let ctx = unsafe { Ctx::from_raw(raw) };
            return f(&ctx);
        }
        self.js.with(|ctx| {
            let _entered = Entered::set(&self.entered, &ctx);
            f(&ctx)
        })
    }

    /// Gives every newly crossed script function a stand-in realm function.
    fn absorb<'js>(self: &Rc<Self>, ctx: &Ctx<'js>, first: u32, fresh: Vec<Function<'js>>) -> Result<(), String> {
        if fresh.is_empty() {
            return Ok(());
        }
        let mut scripts = self.scripts.borrow_mut();
        if first as usize != scripts.len() {
            return Err(format!(
                "script function {first} out of sequence, expected {}",
                scripts.len()
            ));
        }
        for function in fresh {
            let index = scripts.len() as u32;
            scripts.push(Persistent::save(ctx, function));
            let bridge = Rc::downgrade(self);
            let stand_in = self.host.new_function("", move |host: &Context<S>, info: CallInfo| {
                match bridge.upgrade() {
                    Some(bridge) => bridge.call_script(index, info),
                    None => Err(host
                        .realm()
                        .throw(ErrorKind::TypeError, "script function outlived its QuickJS context")),
                }
            });
            self.stand_ins.borrow_mut().push(stand_in);
            self.script_of.borrow_mut().insert(stand_in, index);
        }
        debug!(target: TARGET_JS, context = self.host.id(), total = scripts.len(), "script functions crossed");
        Ok(())
    }

    /// Reads what `settle` returned on the script side.
    fn settle<'js>(self: &Rc<Self>, ctx: &Ctx<'js>, out: Array<'js>) -> Result<Reply, JsError> {
        let reply: String = out.get(0)?;
        let first: u32 = out.get(1)?;
        let passed: Array<'js> = out.get(2)?;
        let fresh = (0..passed.len())
            .map(|at| passed.get::<Function<'js>>(at))
            .collect::<rquickjs::Result<Vec<_>>>()?;
        self.absorb(ctx, first, fresh).map_err(JsError::Protocol)?;
        serde_json::from_str(&reply).map_err(|e| JsError::Protocol(e.to_string()))
    }

    fn entry(&self, slot: &RefCell<Option<Persistent<Function<'static>>>>) -> Result<Persistent<Function<'static>>, JsError> {
        slot.borrow().clone().ok_or(JsError::Detached)
    }

    fn eval(self: &Rc<Self>, code: &str) -> Result<Reply, JsError> {
        let run = self.entry(&self.run)?;
        self.with_js(|ctx| {
            let out: Array = run.restore(ctx)?.call((code,))?;
            self.settle(ctx, out)
        })
    }

    /// Realm-side call of script function `index`.
    fn call_script(self: &Rc<Self>, index: u32, info: CallInfo) -> Result<Value, Exception> {
        let host = &self.host;
        let this = to_wire(host, &info.this, &**self);
        let args: Vec<WireValue> = info.args.iter().map(|arg| to_wire(host, arg, &**self)).collect();
        let reply = serde_json::to_string(&(this, args))
            .map_err(|e| JsError::Protocol(e.to_string()))
            .and_then(|payload| {
                let invoke = self.entry(&self.invoke)?;
                self.with_js(|ctx| {
                    let out: Array = invoke.restore(ctx)?.call((index, payload))?;
                    self.settle(ctx, out)
                })
            })
            .map_err(|err| host.realm().throw(ErrorKind::Error, err.to_string()))?;
        match reply {
            Reply::Ok { value } => {
                from_wire(host, value, &**self).map_err(|message| host.realm().throw(ErrorKind::TypeError, message))
            }
            Reply::Throw { name, message, value } => {
                let value = value.and_then(|value| from_wire(host, value, &**self).ok());
                Err(self.exception(&name, &message, value))
            }
        }
    }

    /// A script-side throw as a Context exception.
    fn exception(&self, name: &str, message: &str, value: Option<Value>) -> Exception {
        if let Some(value) = value {
            return Exception::new(value);
        }
        let realm = self.host.realm();
        let kind = match name {
            "TypeError" => ErrorKind::TypeError,
            "RangeError" => ErrorKind::RangeError,
            _ => ErrorKind::Error,
        };
        let error = realm.create_error(kind, message);
        if name != kind.name() {
            realm.define_hidden(error, "name", Value::string(name));
        }
        Exception::new(Value::Object(error))
    }

    fn release(&self) {
        let released = self.with_js(|_| {
            self.run.borrow_mut().take();
            self.invoke.borrow_mut().take();
            std::mem::take(&mut *self.scripts.borrow_mut()).len()
        });
        debug!(target: TARGET_JS, context = self.host.id(), released, "script functions released");
    }
}

fn install<'js, S: HostState>(ctx: &Ctx<'js>, bridge: &Rc<Bridge<S>>) -> rquickjs::Result<()> {
    let weak: Weak<Bridge<S>> = Rc::downgrade(bridge);
    let entry = Function::new(
        ctx.clone(),
        move |js: Ctx<'js>, request: String, first: u32, fresh: Rest<Function<'js>>| -> String {
            let Some(bridge) = weak.upgrade() else {
                return Reply::Throw {
                    name: "Error".to_string(),
                    message: "binding context is gone".to_string(),
                    value: None,
                }
                .to_json();
            };
            if let Err(message) = bridge.absorb(&js, first, fresh.0) {
                return Reply::type_error(message).to_json();
            }
            handle_json(&bridge.host, &request, &*bridge)
        },
    )?;
    ctx.globals().set("__host", entry)?;
    let exports: Object = ctx.eval(GLUE)?;
    let run: Function = exports.get("run")?;
    let invoke: Function = exports.get("invoke")?;
    *bridge.run.borrow_mut() = Some(Persistent::save(ctx, run));
    *bridge.invoke.borrow_mut() = Some(Persistent::save(ctx, invoke));
    Ok(())
}

/// One QuickJS context wired to one binding [`Context`].
pub struct JsBindingAdapter<S: HostState> {
    bridge: Rc<Bridge<S>>,
    // dropped after `bridge`
    _runtime: JsRuntime,
}

impl<S: HostState> JsBindingAdapter<S> {
    pub fn new(host: Context<S>) -> Result<Self, JsError> {
        let runtime = JsRuntime::new()?;
        let js = JsContext::full(&runtime)?;
        let bridge = Rc::new(Bridge {
            host,
            js,
            entered: Cell::new(None),
            run: RefCell::new(None),
            invoke: RefCell::new(None),
            scripts: RefCell::new(Vec::new()),
            stand_ins: RefCell::new(Vec::new()),
            script_of: RefCell::new(HashMap::new()),
        });
        bridge.with_js(|ctx| install(ctx, &bridge))?;
        info!(target: TARGET_JS, context = bridge.host.id(), "QuickJS bridge attached");
        Ok(Self {
            bridge,
            _runtime: runtime,
        })
    }

    pub fn host(&self) -> &Context<S> {
        &self.bridge.host
    }

    /// Evaluates `code` and returns its completion value as a Context value.
    pub fn eval(&self, code: &str) -> Result<Value, JsError> {
        match self.bridge.eval(code)? {
            Reply::Ok { value } => from_wire(&self.bridge.host, value, &*self.bridge).map_err(JsError::Protocol),
            Reply::Throw { name, message, .. } => {
                debug!(target: TARGET_JS, %name, %message, "script threw");
                Err(JsError::Thrown { name, message })
            }
        }
    }
}

impl<S: HostState> Drop for JsBindingAdapter<S> {
    fn drop(&mut self) {
        // persisted functions must be gone before the runtime is freed
        self.bridge.release();
    }
}
