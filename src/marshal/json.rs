//! Dictionary-style records via serde.
//!
//! A `Json<T>` parameter reads an ordinary script object (or array) into
//! any `Deserialize` type; a `Json<T>` result builds a fresh script object
//! from any `Serialize` type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number};
use thiserror::Error;

use crate::context::{Context, HostState};
use crate::core::error::{ArgError, CallError, ErrorSet};
use crate::engine::Value;

use super::{FromValue, ToValue};

/// Nesting deeper than this is rejected, which also stops cyclic objects.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Json<T>(pub T);

/// A native record that could not be turned into script data.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JsonError(String);

impl ErrorSet for JsonError {
    fn name(&self) -> &'static str {
        "DataError"
    }
}

impl<T: Serialize> ToValue for Json<T> {
    fn to_value<S: HostState>(self, ctx: &Context<S>) -> Result<Value, CallError> {
        let json = serde_json::to_value(&self.0).map_err(|e| JsonError(e.to_string()))?;
        Ok(json_to_value(ctx, &json).map_err(|e| JsonError(e.to_string()))?)
    }
}

impl<T: DeserializeOwned> FromValue for Json<T> {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        let json = value_to_json(ctx, value)?;
        serde_json::from_value(json)
            .map(Json)
            .map_err(|e| ArgError::Json(e.to_string()))
    }
}

/// Reads a script value as JSON data. Functions are rejected; getters run.
pub fn value_to_json<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<serde_json::Value, ArgError> {
    to_json(ctx, value, 0)
}

fn to_json<S: HostState>(ctx: &Context<S>, value: &Value, depth: usize) -> Result<serde_json::Value, ArgError> {
    if depth > MAX_DEPTH {
        return Err(ArgError::Json(format!("nesting deeper than {MAX_DEPTH} levels")));
    }
    Ok(match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Number(n) => Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::BigInt(b) => {
            if let Ok(small) = i64::try_from(*b) {
                serde_json::Value::from(small)
            } else if let Ok(unsigned) = u64::try_from(*b) {
                serde_json::Value::from(unsigned)
            } else {
                serde_json::Value::String(b.to_string())
            }
        }
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Object(id) => {
            let realm = ctx.realm();
            if realm.is_function(*id) {
                return Err(ArgError::Json("functions are not data".to_string()));
            }
            let items = realm
                .array_items(*id)
                .or_else(|| realm.typed_array(*id).map(|array| array.values()));
            if let Some(items) = items {
                let items = items
                    .iter()
                    .map(|item| to_json(ctx, item, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(serde_json::Value::Array(items));
            }
            let mut map = Map::new();
            for key in realm.own_keys(*id) {
                let field = ctx
                    .get(*id, &*key)
                    .map_err(|e| ArgError::Json(format!("reading '{key}': {}", realm.display_string(e.value()))))?;
                if matches!(field, Value::Undefined) {
                    continue;
                }
                map.insert(key.to_string(), to_json(ctx, &field, depth + 1)?);
            }
            serde_json::Value::Object(map)
        }
    })
}

/// Builds script data from JSON: plain objects, arrays and primitives.
pub fn json_to_value<S: HostState>(ctx: &Context<S>, json: &serde_json::Value) -> Result<Value, ArgError> {
    from_json(ctx, json, 0)
}

fn from_json<S: HostState>(ctx: &Context<S>, json: &serde_json::Value, depth: usize) -> Result<Value, ArgError> {
    if depth > MAX_DEPTH {
        return Err(ArgError::Json(format!("nesting deeper than {MAX_DEPTH} levels")));
    }
    let realm = ctx.realm();
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(small) => Value::Int(small),
            None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| from_json(ctx, item, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Value::Object(realm.create_array(items))
        }
        serde_json::Value::Object(map) => {
            let object = realm.create_object(Some(realm.intrinsics().object_prototype));
            for (key, field) in map {
                let field = from_json(ctx, field, depth + 1)?;
                realm.define_value(object, key, field);
            }
            Value::Object(object)
        }
    })
}
