//! Wire protocol between a foreign script engine and a Context.
//!
//! The foreign side holds host objects only as opaque ids and forwards every
//! property access, call and `new` as a [`Request`]. Plain data (arrays and
//! records) is copied across; everything else stays in the Context and is
//! referenced by id. Functions of the foreign side cross by index: the
//! Context calls them through a realm function that the bridge supplies
//! via [`ForeignFunctions`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::{Context, HostState};
use crate::engine::{Exception, ObjectId, Value};

/// A value in transit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum WireValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// `NaN`, `Infinity` or `-Infinity`, which JSON cannot carry as numbers.
    NonFinite(String),
    /// Decimal digits; bigints outside `f64` precision survive the trip.
    BigInt(String),
    String(String),
    Array(Vec<WireValue>),
    Record(BTreeMap<String, WireValue>),
    Object(WireObject),
    /// A function owned by the foreign side.
    Function(u32),
}

/// Reference to an object living in the Context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireObject {
    /// `ObjectId` bits as a decimal string.
    pub id: String,
    pub callable: bool,
}

/// One operation requested by the foreign side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    /// The global object.
    Global,
    /// Script names of every registered class.
    Classes,
    Get { target: String, key: String },
    Set { target: String, key: String, value: WireValue },
    Delete { target: String, key: String },
    Call { target: String, this: WireValue, args: Vec<WireValue> },
    Construct { target: String, args: Vec<WireValue> },
    Proto { target: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok {
        value: WireValue,
    },
    Throw {
        name: String,
        message: String,
        /// The thrown value itself when it is a host object, so that its
        /// identity survives the trip.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<WireValue>,
    },
}

impl Reply {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Reply::Throw {
            name: "TypeError".to_string(),
            message: message.into(),
            value: None,
        }
    }

    fn from_exception<S: HostState>(ctx: &Context<S>, exception: &Exception, functions: &dyn ForeignFunctions) -> Self {
        let realm = ctx.realm();
        let thrown = exception.value();
        let (name, message) = realm
            .error_parts(thrown)
            .unwrap_or_else(|| ("Error".to_string(), realm.display_string(thrown)));
        let value = thrown
            .as_object()
            .filter(|&object| ctx.class_of(object).is_some())
            .map(|_| to_wire(ctx, thrown, functions));
        Reply::Throw { name, message, value }
    }

    /// Serializes the reply; never fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(r#"{{"status":"throw","name":"Error","message":"unencodable reply: {err}"}}"#)
        })
    }
}

/// Functions owned by the foreign side, as seen from the Context.
pub trait ForeignFunctions {
    /// Realm function standing in for foreign function `index`.
    fn inbound(&self, index: u32) -> Option<ObjectId>;

    /// Foreign index of a realm function that stands in for one.
    fn outbound(&self, object: ObjectId) -> Option<u32>;
}

/// No foreign functions: every Context function crosses as an object.
impl ForeignFunctions for () {
    fn inbound(&self, _index: u32) -> Option<ObjectId> {
        None
    }

    fn outbound(&self, _object: ObjectId) -> Option<u32> {
        None
    }
}

fn is_record<S: HostState>(ctx: &Context<S>, id: ObjectId) -> bool {
    let realm = ctx.realm();
    realm.internal(id).is_none()
        && realm.interceptors(id).is_none()
        && !realm.is_function(id)
        && realm.prototype_of(id) == Some(realm.intrinsics().object_prototype)
}

/// Encodes a Context value for the foreign side.
pub fn to_wire<S: HostState>(ctx: &Context<S>, value: &Value, functions: &dyn ForeignFunctions) -> WireValue {
    let realm = ctx.realm();
    match value {
        Value::Undefined => WireValue::Undefined,
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(i) => WireValue::Number(f64::from(*i)),
        Value::Number(n) if n.is_finite() => WireValue::Number(*n),
        Value::Number(n) => WireValue::NonFinite(Value::Number(*n).primitive_to_string().unwrap_or_default()),
        Value::BigInt(b) => WireValue::BigInt(b.to_string()),
        Value::String(s) => WireValue::String(s.to_string()),
        Value::Object(id) => {
            if let Some(index) = functions.outbound(*id) {
                return WireValue::Function(index);
            }
            if let Some(items) = realm.array_items(*id) {
                return WireValue::Array(items.iter().map(|item| to_wire(ctx, item, functions)).collect());
            }
            if is_record(ctx, *id) {
                let fields = realm
                    .own_keys(*id)
                    .into_iter()
                    .filter_map(|key| {
                        let field = realm.lookup_data(*id, &key)?;
                        Some((key.to_string(), to_wire(ctx, &field, functions)))
                    })
                    .collect();
                return WireValue::Record(fields);
            }
            WireValue::Object(WireObject {
                id: id.to_bits().to_string(),
                // class constructors only construct, yet must still look like functions
                callable: realm.is_function(*id),
            })
        }
    }
}

/// Decodes a foreign value. Records and arrays become fresh objects.
pub fn from_wire<S: HostState>(ctx: &Context<S>, wire: WireValue, functions: &dyn ForeignFunctions) -> Result<Value, String> {
    let realm = ctx.realm();
    Ok(match wire {
        WireValue::Undefined => Value::Undefined,
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Number(n) => {
            let small = n as i32;
            if f64::from(small) == n && !(n == 0.0 && n.is_sign_negative()) {
                Value::Int(small)
            } else {
                Value::Number(n)
            }
        }
        WireValue::NonFinite(text) => Value::Number(match text.as_str() {
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => f64::NAN,
        }),
        WireValue::BigInt(digits) => digits
            .parse::<i128>()
            .map(Value::BigInt)
            .map_err(|_| format!("invalid bigint '{digits}'"))?,
        WireValue::String(s) => Value::string(s),
        WireValue::Array(items) => {
            let items = items
                .into_iter()
                .map(|item| from_wire(ctx, item, functions))
                .collect::<Result<Vec<_>, _>>()?;
            Value::Object(realm.create_array(items))
        }
        WireValue::Record(fields) => {
            let object = realm.create_object(Some(realm.intrinsics().object_prototype));
            for (key, field) in fields {
                let field = from_wire(ctx, field, functions)?;
                realm.define_value(object, &key, field);
            }
            Value::Object(object)
        }
        WireValue::Object(object) => Value::Object(object_id(ctx, &object.id)?),
        WireValue::Function(index) => functions
            .inbound(index)
            .map(Value::Object)
            .ok_or_else(|| format!("unknown script function {index}"))?,
    })
}

fn object_id<S: HostState>(ctx: &Context<S>, id: &str) -> Result<ObjectId, String> {
    id.parse::<u64>()
        .ok()
        .map(ObjectId::from_bits)
        .filter(|&object| ctx.realm().contains(object))
        .ok_or_else(|| format!("unknown object '{id}'"))
}

fn wire_args<S: HostState>(
    ctx: &Context<S>,
    args: Vec<WireValue>,
    functions: &dyn ForeignFunctions,
) -> Result<Vec<Value>, String> {
    args.into_iter().map(|arg| from_wire(ctx, arg, functions)).collect()
}

/// Performs one request against the Context.
pub fn handle_request<S: HostState>(ctx: &Context<S>, request: Request, functions: &dyn ForeignFunctions) -> Reply {
    let result = match run(ctx, request, functions) {
        Ok(result) => result,
        Err(message) => return Reply::type_error(message),
    };
    match result {
        Ok(value) => Reply::Ok {
            value: to_wire(ctx, &value, functions),
        },
        Err(exception) => Reply::from_exception(ctx, &exception, functions),
    }
}

fn run<S: HostState>(
    ctx: &Context<S>,
    request: Request,
    functions: &dyn ForeignFunctions,
) -> Result<Result<Value, Exception>, String> {
    let realm = ctx.realm();
    Ok(match request {
        Request::Global => Ok(Value::Object(ctx.global())),
        Request::Classes => {
            let names = ctx
                .bindings()
                .registry()
                .iter()
                .map(|meta| Value::string(meta.name))
                .collect();
            Ok(Value::Object(realm.create_array(names)))
        }
        Request::Get { target, key } => ctx.get(object_id(ctx, &target)?, key),
        Request::Set { target, key, value } => {
            let target = object_id(ctx, &target)?;
            let value = from_wire(ctx, value, functions)?;
            ctx.set(target, key, value).map(|()| Value::Undefined)
        }
        Request::Delete { target, key } => ctx.delete(object_id(ctx, &target)?, key).map(Value::Bool),
        Request::Call { target, this, args } => {
            let target = object_id(ctx, &target)?;
            let this = from_wire(ctx, this, functions)?;
            ctx.call(target, this, wire_args(ctx, args, functions)?)
        }
        Request::Construct { target, args } => {
            let target = object_id(ctx, &target)?;
            crate::engine::ops::construct(ctx, target, wire_args(ctx, args, functions)?)
        }
        Request::Proto { target } => Ok(realm
            .prototype_of(object_id(ctx, &target)?)
            .map_or(Value::Null, Value::Object)),
    })
}

/// [`handle_request`] over JSON text.
pub fn handle_json<S: HostState>(ctx: &Context<S>, request: &str, functions: &dyn ForeignFunctions) -> String {
    let reply = match serde_json::from_str::<Request>(request) {
        Ok(request) => handle_request(ctx, request, functions),
        Err(err) => Reply::type_error(format!("malformed request: {err}")),
    };
    reply.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Bindings;
    use crate::config::RuntimeConfig;
    use crate::context::{ContextOptions, Runtime};
    use crate::engine::ErrorKind;
    use crate::registry::TypeBuilder;

    #[derive(Default)]
    struct Window;

    struct Point {
        x: i32,
    }

    impl Point {
        fn x(&self) -> i32 {
            self.x
        }
    }

    fn context() -> Context<()> {
        let bindings = Bindings::build(vec![
            TypeBuilder::<(), Window>::marker("Window").build(),
            TypeBuilder::<(), Point>::new("Point")
                .constructor(|x: i32| Point { x })
                .member("get_x", Point::x)
                .build(),
        ])
        .unwrap();
        let runtime = Runtime::new(bindings, RuntimeConfig::default()).unwrap();
        Context::create(&runtime, Window, (), ContextOptions::isolated()).unwrap()
    }

    fn ok(reply: Reply) -> WireValue {
        match reply {
            Reply::Ok { value } => value,
            Reply::Throw { name, message, .. } => panic!("unexpected throw {name}: {message}"),
        }
    }

    fn object(value: WireValue) -> String {
        match value {
            WireValue::Object(object) => object.id,
            other => panic!("expected an object, got {other:?}"),
        }
    }

    #[test]
    fn test_requests_against_context() {
        let ctx = context();
        let classes = ok(handle_request(&ctx, Request::Classes, &()));
        assert_eq!(
            classes,
            WireValue::Array(vec![
                WireValue::String("Window".to_string()),
                WireValue::String("Point".to_string()),
            ])
        );

        let global = object(ok(handle_request(&ctx, Request::Global, &())));
        let point_class = object(ok(handle_request(
            &ctx,
            Request::Get {
                target: global,
                key: "Point".to_string(),
            },
            &(),
        )));
        let point = object(ok(handle_request(
            &ctx,
            Request::Construct {
                target: point_class,
                args: vec![WireValue::Number(7.0)],
            },
            &(),
        )));
        let x = ok(handle_request(
            &ctx,
            Request::Get {
                target: point,
                key: "x".to_string(),
            },
            &(),
        ));
        assert_eq!(x, WireValue::Number(7.0));
    }

    #[test]
    fn test_constructors_cross_as_functions() {
        let ctx = context();
        let point_class = ctx.get(ctx.global(), "Point").unwrap();
        assert!(!ctx.realm().is_callable(point_class.as_object().unwrap()));
        match to_wire(&ctx, &point_class, &()) {
            WireValue::Object(object) => assert!(object.callable),
            other => panic!("expected an object, got {other:?}"),
        }
        let point = ctx.construct("Point", vec![Value::Int(1)]).unwrap();
        match to_wire(&ctx, &point, &()) {
            WireValue::Object(object) => assert!(!object.callable),
            other => panic!("expected an object, got {other:?}"),
        }
    }

    struct OneForeign(ObjectId);

    impl ForeignFunctions for OneForeign {
        fn inbound(&self, index: u32) -> Option<ObjectId> {
            (index == 0).then_some(self.0)
        }

        fn outbound(&self, object: ObjectId) -> Option<u32> {
            (object == self.0).then_some(0)
        }
    }

    #[test]
    fn test_foreign_functions_cross_by_index() {
        let ctx = context();
        let stand_in = ctx.new_function("foreign", |_, info| Ok(info.args.first().cloned().unwrap_or(Value::Undefined)));
        let foreign = OneForeign(stand_in);

        let decoded = from_wire(&ctx, WireValue::Function(0), &foreign).unwrap();
        assert_eq!(decoded, Value::Object(stand_in));
        assert!(from_wire(&ctx, WireValue::Function(3), &foreign).is_err());
        assert!(from_wire(&ctx, WireValue::Function(0), &()).is_err());

        let array = ctx.realm().create_array(vec![Value::Object(stand_in), Value::Int(2)]);
        assert_eq!(
            to_wire(&ctx, &Value::Object(array), &foreign),
            WireValue::Array(vec![WireValue::Function(0), WireValue::Number(2.0)])
        );

        let apply = ctx.new_function("apply", |ctx, info| {
            let callee = info.args.first().and_then(Value::as_object).unwrap_or(info.callee);
            ctx.call(callee, Value::Undefined, vec![Value::Int(5)])
        });
        let reply = handle_request(
            &ctx,
            Request::Call {
                target: apply.to_bits().to_string(),
                this: WireValue::Undefined,
                args: vec![WireValue::Function(0)],
            },
            &foreign,
        );
        assert_eq!(ok(reply), WireValue::Number(5.0));
    }

    #[test]
    fn test_host_exceptions_keep_their_object() {
        let ctx = context();
        let point = ctx.construct("Point", vec![Value::Int(2)]).unwrap();
        let thrown = point.clone();
        let thrower = ctx.new_function("thrower", move |_, _| Err(Exception::new(thrown.clone())));
        let reply = handle_request(
            &ctx,
            Request::Call {
                target: thrower.to_bits().to_string(),
                this: WireValue::Undefined,
                args: vec![],
            },
            &(),
        );
        match reply {
            Reply::Throw { value: Some(WireValue::Object(object)), .. } => {
                assert_eq!(object.id, point.as_object().unwrap().to_bits().to_string());
            }
            other => panic!("expected a host object throw, got {other:?}"),
        }

        let plain = ctx.new_function("plain", |ctx: &Context<()>, _| Err(ctx.realm().throw(ErrorKind::RangeError, "too far")));
        let reply = handle_request(
            &ctx,
            Request::Call {
                target: plain.to_bits().to_string(),
                this: WireValue::Undefined,
                args: vec![],
            },
            &(),
        );
        assert_eq!(
            reply,
            Reply::Throw {
                name: "RangeError".to_string(),
                message: "too far".to_string(),
                value: None,
            }
        );
    }

    #[test]
    fn test_json_entry_point() {
        let ctx = context();
        let reply = handle_json(&ctx, r#"{"op":"get","target":"999999","key":"x"}"#, &());
        let reply: Reply = serde_json::from_str(&reply).unwrap();
        assert!(matches!(reply, Reply::Throw { ref name, .. } if name == "TypeError"));

        let reply: Reply = serde_json::from_str(&handle_json(&ctx, "not json", &())).unwrap();
        assert!(matches!(reply, Reply::Throw { ref message, .. } if message.starts_with("malformed request")));
    }

    #[test]
    fn test_wire_format() {
        let value = WireValue::Array(vec![
            WireValue::Undefined,
            WireValue::Number(1.5),
            WireValue::Object(WireObject {
                id: "4294967297".to_string(),
                callable: true,
            }),
        ]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"t": "array", "v": [
                {"t": "undefined"},
                {"t": "number", "v": 1.5},
                {"t": "object", "v": {"id": "4294967297", "callable": true}}
            ]})
        );
        let back: WireValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);

        let infinite = serde_json::to_string(&WireValue::NonFinite("-Infinity".to_string())).unwrap();
        assert_eq!(infinite, r#"{"t":"nonfinite","v":"-Infinity"}"#);
    }

    #[test]
    fn test_request_format() {
        let request: Request = serde_json::from_str(
            r#"{"op":"call","target":"7","this":{"t":"null"},"args":[{"t":"bigint","v":"12"}]}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            Request::Call {
                target: "7".to_string(),
                this: WireValue::Null,
                args: vec![WireValue::BigInt("12".to_string())],
            }
        );
        let global: Request = serde_json::from_str(r#"{"op":"global"}"#).unwrap();
        assert_eq!(global, Request::Global);
    }

    #[test]
    fn test_reply_format() {
        let reply = Reply::type_error("nope");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"status": "throw", "name": "TypeError", "message": "nope"})
        );
    }
}
