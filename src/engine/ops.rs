//! Property access, calls and `new`, as the engine performs them.

use super::object::{CallInfo, OwnLookup};
use super::realm::{ErrorKind, Host};
use super::value::{Exception, ObjectId, PropertyKey, Value};

const MAX_CHAIN: usize = 4096;

/// `target[key]`.
pub fn get<H: Host>(host: &H, target: ObjectId, key: impl Into<PropertyKey>) -> Result<Value, Exception> {
    get_with_receiver(host, target, &key.into(), Value::Object(target))
}

/// Looks `key` up starting at `holder`, running accessors against `receiver`.
pub fn get_with_receiver<H: Host>(
    host: &H,
    holder: ObjectId,
    key: &PropertyKey,
    receiver: Value,
) -> Result<Value, Exception> {
    let realm = host.realm();
    let mut cursor = Some(holder);
    let mut steps = 0;
    while let Some(current) = cursor {
        if steps > MAX_CHAIN {
            break;
        }
        steps += 1;

        if let Some(interceptors) = realm.interceptors(current) {
            let intercepted = match key {
                PropertyKey::Index(index) => match &interceptors.indexed_get {
                    Some(getter) => getter(host, current, *index)?,
                    None => None,
                },
                PropertyKey::Name(name) => match &interceptors.named_get {
                    Some(getter) => getter(host, current, name)?,
                    None => None,
                },
            };
            if let Some(value) = intercepted {
                return Ok(value);
            }
        }

        match realm.lookup_own(current, key) {
            Some(OwnLookup::Value(value)) | Some(OwnLookup::ReadOnly(value)) => return Ok(value),
            Some(OwnLookup::Accessor { get: Some(getter), .. }) => {
                return call(host, getter, receiver, Vec::new());
            }
            Some(OwnLookup::Accessor { get: None, .. }) => return Ok(Value::Undefined),
            None => cursor = realm.prototype_of(current),
        }
    }
    Ok(Value::Undefined)
}

/// `target[key] = value`.
pub fn set<H: Host>(
    host: &H,
    target: ObjectId,
    key: impl Into<PropertyKey>,
    value: Value,
) -> Result<(), Exception> {
    let key = key.into();
    let realm = host.realm();

    if let Some(interceptors) = realm.interceptors(target) {
        let handled = match &key {
            PropertyKey::Index(index) => match &interceptors.indexed_set {
                Some(setter) => setter(host, target, *index, value.clone())?,
                None => false,
            },
            PropertyKey::Name(name) => match &interceptors.named_set {
                Some(setter) => setter(host, target, name, value.clone())?,
                None => false,
            },
        };
        if handled {
            return Ok(());
        }
    }

    if let PropertyKey::Index(index) = key {
        if realm.set_array_item(target, index, value.clone()) {
            return Ok(());
        }
        if realm.is_typed_array(target) {
            return Ok(());
        }
    }

    let mut cursor = Some(target);
    let mut steps = 0;
    while let Some(current) = cursor {
        if steps > MAX_CHAIN {
            break;
        }
        steps += 1;
        match realm.lookup_own(current, &key) {
            Some(OwnLookup::Accessor { set: Some(setter), .. }) => {
                call(host, setter, Value::Object(target), vec![value])?;
                return Ok(());
            }
            Some(OwnLookup::Accessor { set: None, .. }) => {
                return reject(host, target, &key, "which has only a getter");
            }
            Some(OwnLookup::ReadOnly(_)) => {
                return reject(host, target, &key, "which is read-only");
            }
            Some(OwnLookup::Value(_)) => break,
            None => cursor = realm.prototype_of(current),
        }
    }

    realm.define_value(target, &key.name(), value);
    Ok(())
}

fn reject<H: Host>(host: &H, target: ObjectId, key: &PropertyKey, why: &str) -> Result<(), Exception> {
    let realm = host.realm();
    if !realm.strict() {
        return Ok(());
    }
    let class = realm
        .class_name(target)
        .map(|c| c.to_string())
        .unwrap_or_else(|| "Object".to_string());
    Err(realm.throw(
        ErrorKind::TypeError,
        format!("Cannot set property {key} of #<{class}> {why}"),
    ))
}

/// `delete target[key]`.
pub fn delete<H: Host>(host: &H, target: ObjectId, key: impl Into<PropertyKey>) -> Result<bool, Exception> {
    let key = key.into();
    let realm = host.realm();
    if let (Some(interceptors), PropertyKey::Name(name)) = (realm.interceptors(target), &key) {
        if let Some(deleter) = &interceptors.named_delete {
            if let Some(deleted) = deleter(host, target, name)? {
                return Ok(deleted);
            }
        }
    }
    if let Some(OwnLookup::ReadOnly(_)) = realm.lookup_own(target, &key) {
        return Ok(false);
    }
    realm.remove_own(target, &key.name());
    Ok(true)
}

/// Calls `callee` with an explicit `this`.
pub fn call<H: Host>(host: &H, callee: ObjectId, this: Value, args: Vec<Value>) -> Result<Value, Exception> {
    let realm = host.realm();
    let Some((name, behaviour, _)) = realm.function_parts(callee) else {
        let shown = realm.display_string(&Value::Object(callee));
        return Err(realm.throw(ErrorKind::TypeError, format!("{shown} is not a function")));
    };
    let Some(behaviour) = behaviour else {
        return Err(realm.throw(
            ErrorKind::TypeError,
            format!("Class constructor {name} cannot be invoked without 'new'"),
        ));
    };
    behaviour(
        host,
        CallInfo {
            callee,
            this,
            args,
            new_target: None,
        },
    )
}

/// `new callee(...args)`.
///
/// The receiver is created from `callee.prototype` before the constructor
/// runs. When the constructor throws, the receiver is released again.
pub fn construct<H: Host>(host: &H, callee: ObjectId, args: Vec<Value>) -> Result<Value, Exception> {
    let realm = host.realm();
    let constructor = realm.function_parts(callee).and_then(|(name, _, construct)| construct.map(|c| (name, c)));
    let Some((name, behaviour)) = constructor else {
        let shown = realm.display_string(&Value::Object(callee));
        return Err(realm.throw(ErrorKind::TypeError, format!("{shown} is not a constructor")));
    };

    let proto = match get(host, callee, "prototype")? {
        Value::Object(proto) => proto,
        _ => realm.intrinsics().object_prototype,
    };
    let this = realm.create_object_with_class(Some(proto), &name);
    let result = behaviour(
        host,
        CallInfo {
            callee,
            this: Value::Object(this),
            args,
            new_target: Some(callee),
        },
    );
    match result {
        Ok(Value::Object(returned)) => Ok(Value::Object(returned)),
        Ok(_) => Ok(Value::Object(this)),
        Err(exception) => {
            realm.free(this);
            Err(exception)
        }
    }
}

/// `target.name(...args)`.
pub fn invoke<H: Host>(host: &H, target: &Value, name: &str, args: Vec<Value>) -> Result<Value, Exception> {
    let realm = host.realm();
    let Value::Object(holder) = target else {
        let shown = realm.display_string(target);
        return Err(realm.throw(
            ErrorKind::TypeError,
            format!("Cannot read properties of {shown} (reading '{name}')"),
        ));
    };
    match get(host, *holder, name)? {
        Value::Object(callee) => call(host, callee, target.clone(), args),
        other => {
            let shown = realm.display_string(&other);
            Err(realm.throw(
                ErrorKind::TypeError,
                format!("{name} is not a function (got {shown})"),
            ))
        }
    }
}

/// `value instanceof constructor`.
pub fn instance_of<H: Host>(host: &H, value: &Value, constructor: ObjectId) -> Result<bool, Exception> {
    let Value::Object(id) = value else {
        return Ok(false);
    };
    let Value::Object(proto) = get(host, constructor, "prototype")? else {
        return Ok(false);
    };
    Ok(host.realm().prototype_chain(*id).contains(&proto))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::engine::object::Interceptors;
    use crate::engine::Realm;

    struct Bare {
        realm: Realm<Bare>,
    }

    impl Host for Bare {
        fn realm(&self) -> &Realm<Self> {
            &self.realm
        }
    }

    fn host() -> Bare {
        Bare { realm: Realm::new() }
    }

    #[test]
    fn test_accessor_sees_original_receiver() {
        let host = host();
        let realm = &host.realm;
        let proto = realm.create_object(None);
        let getter = realm.create_function(
            "tag",
            Some(Rc::new(|_: &Bare, info: CallInfo| -> Result<Value, Exception> {
                let this = info.this.as_object().map(|id| id.index).unwrap_or_default();
                Ok(Value::Int(this as i32))
            })),
            None,
        );
        realm.define_accessor(proto, "tag", Some(getter), None);
        let child = realm.create_object(Some(proto));

        let value = get(&host, child, "tag").unwrap();
        assert_eq!(value, Value::Int(child.index as i32));
    }

    #[test]
    fn test_getter_only_assignment_throws_when_strict() {
        let host = host();
        let realm = &host.realm;
        let getter = realm.create_function(
            "x",
            Some(Rc::new(|_: &Bare, _: CallInfo| -> Result<Value, Exception> { Ok(Value::Int(1)) })),
            None,
        );
        let object = realm.create_object(None);
        realm.define_accessor(object, "x", Some(getter), None);

        let err = set(&host, object, "x", Value::Int(2)).unwrap_err();
        let (name, message) = realm.error_parts(err.value()).unwrap();
        assert_eq!(name, "TypeError");
        assert!(message.contains("only a getter"));

        realm.set_strict(false);
        assert!(set(&host, object, "x", Value::Int(2)).is_ok());
        assert_eq!(get(&host, object, "x").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_interceptor_falls_through_on_none() {
        let host = host();
        let realm = &host.realm;
        let object = realm.create_object(None);
        realm.define_value(object, "plain", Value::Int(7));
        let interceptors = Interceptors::<Bare> {
            indexed_get: Some(Rc::new(
                |_: &Bare, _: ObjectId, index: u32| -> Result<Option<Value>, Exception> {
                    Ok((index < 3).then_some(Value::Int(index as i32 * 10)))
                },
            )),
            named_get: Some(Rc::new(
                |_: &Bare, _: ObjectId, name: &str| -> Result<Option<Value>, Exception> {
                    Ok((name == "magic").then(|| Value::string("yes")))
                },
            )),
            ..Interceptors::default()
        };
        realm.set_interceptors(object, Some(Rc::new(interceptors)));

        assert_eq!(get(&host, object, 2u32).unwrap(), Value::Int(20));
        assert_eq!(get(&host, object, 5u32).unwrap(), Value::Undefined);
        assert_eq!(get(&host, object, "magic").unwrap(), Value::string("yes"));
        assert_eq!(get(&host, object, "plain").unwrap(), Value::Int(7));
    }

    #[test]
    fn test_construct_without_new_and_failed_construct() {
        let host = host();
        let realm = &host.realm;
        let class = realm.create_function(
            "Thing",
            None,
            Some(Rc::new(|host: &Bare, _: CallInfo| -> Result<Value, Exception> {
                Err(host.realm.throw(ErrorKind::TypeError, "Illegal constructor"))
            })),
        );
        let proto = realm.create_object(None);
        realm.define_hidden(class, "prototype", Value::Object(proto));

        let live = realm.live_objects();
        assert!(construct(&host, class, Vec::new()).is_err());
        // the thrown error object survives, the half-built receiver does not
        assert_eq!(realm.live_objects(), live + 1);

        let err = call(&host, class, Value::Undefined, Vec::new()).unwrap_err();
        let (_, message) = realm.error_parts(err.value()).unwrap();
        assert_eq!(message, "Class constructor Thing cannot be invoked without 'new'");
    }
}
