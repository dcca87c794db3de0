//! Object layout inside the realm slab.

use std::any::Any;
use std::rc::Rc;

use super::value::{Exception, ObjectId, PropertyKey, Value};

/// Arguments of one native function invocation.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub callee: ObjectId,
    pub this: Value,
    pub args: Vec<Value>,
    /// Set when the function is invoked through `new`.
    pub new_target: Option<ObjectId>,
}

pub type NativeCallback<H> = Rc<dyn Fn(&H, CallInfo) -> Result<Value, Exception>>;

pub type IndexedGetter<H> = Rc<dyn Fn(&H, ObjectId, u32) -> Result<Option<Value>, Exception>>;
pub type IndexedSetter<H> = Rc<dyn Fn(&H, ObjectId, u32, Value) -> Result<bool, Exception>>;
pub type NamedGetter<H> = Rc<dyn Fn(&H, ObjectId, &str) -> Result<Option<Value>, Exception>>;
pub type NamedSetter<H> = Rc<dyn Fn(&H, ObjectId, &str, Value) -> Result<bool, Exception>>;
pub type NamedDeleter<H> = Rc<dyn Fn(&H, ObjectId, &str) -> Result<Option<bool>, Exception>>;

/// Property interceptors installed on an object.
///
/// A getter returning `None` means "no such property here": lookup falls
/// through to own properties and the prototype chain. Setters return whether
/// they handled the assignment.
pub struct Interceptors<H> {
    pub indexed_get: Option<IndexedGetter<H>>,
    pub indexed_set: Option<IndexedSetter<H>>,
    pub named_get: Option<NamedGetter<H>>,
    pub named_set: Option<NamedSetter<H>>,
    pub named_delete: Option<NamedDeleter<H>>,
}

impl<H> Default for Interceptors<H> {
    fn default() -> Self {
        Self {
            indexed_get: None,
            indexed_set: None,
            named_get: None,
            named_set: None,
            named_delete: None,
        }
    }
}

impl<H> Interceptors<H> {
    pub fn is_empty(&self) -> bool {
        self.indexed_get.is_none()
            && self.indexed_set.is_none()
            && self.named_get.is_none()
            && self.named_set.is_none()
            && self.named_delete.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
    },
    Accessor {
        get: Option<ObjectId>,
        set: Option<ObjectId>,
        enumerable: bool,
    },
}

/// Element type of a typed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    BigInt64,
    BigUint64,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub fn element_size(self) -> usize {
        match self {
            TypedArrayKind::Int8 | TypedArrayKind::Uint8 => 1,
            TypedArrayKind::Int16 | TypedArrayKind::Uint16 => 2,
            TypedArrayKind::Int32 | TypedArrayKind::Uint32 | TypedArrayKind::Float32 => 4,
            TypedArrayKind::BigInt64 | TypedArrayKind::BigUint64 | TypedArrayKind::Float64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypedArrayKind::Int8 => "Int8Array",
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Int16 => "Int16Array",
            TypedArrayKind::Uint16 => "Uint16Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::BigInt64 => "BigInt64Array",
            TypedArrayKind::BigUint64 => "BigUint64Array",
            TypedArrayKind::Float32 => "Float32Array",
            TypedArrayKind::Float64 => "Float64Array",
        }
    }
}

/// Typed array backing store (little-endian elements).
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    pub kind: TypedArrayKind,
    pub bytes: Vec<u8>,
}

impl TypedArray {
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.element_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads element `index` as a script value.
    pub fn get(&self, index: usize) -> Option<Value> {
        let size = self.kind.element_size();
        let start = index.checked_mul(size)?;
        let raw = self.bytes.get(start..start + size)?;
        let value = match self.kind {
            TypedArrayKind::Int8 => Value::Int(i32::from(raw[0] as i8)),
            TypedArrayKind::Uint8 => Value::Int(i32::from(raw[0])),
            TypedArrayKind::Int16 => Value::Int(i32::from(i16::from_le_bytes([raw[0], raw[1]]))),
            TypedArrayKind::Uint16 => Value::Int(i32::from(u16::from_le_bytes([raw[0], raw[1]]))),
            TypedArrayKind::Int32 => Value::Int(i32::from_le_bytes(raw.try_into().ok()?)),
            TypedArrayKind::Uint32 => {
                let v = u32::from_le_bytes(raw.try_into().ok()?);
                i32::try_from(v).map(Value::Int).unwrap_or(Value::Number(f64::from(v)))
            }
            TypedArrayKind::BigInt64 => Value::BigInt(i128::from(i64::from_le_bytes(raw.try_into().ok()?))),
            TypedArrayKind::BigUint64 => Value::BigInt(i128::from(u64::from_le_bytes(raw.try_into().ok()?))),
            TypedArrayKind::Float32 => Value::Number(f64::from(f32::from_le_bytes(raw.try_into().ok()?))),
            TypedArrayKind::Float64 => Value::Number(f64::from_le_bytes(raw.try_into().ok()?)),
        };
        Some(value)
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }
}

pub struct FunctionData<H> {
    pub name: Rc<str>,
    pub call: Option<NativeCallback<H>>,
    pub construct: Option<NativeCallback<H>>,
}

pub enum ObjectKind<H> {
    Ordinary,
    Array(Vec<Value>),
    TypedArray(TypedArray),
    Function(FunctionData<H>),
}

pub struct ObjectData<H> {
    pub(crate) proto: Option<ObjectId>,
    pub(crate) properties: Vec<(Rc<str>, Property)>,
    pub(crate) kind: ObjectKind<H>,
    /// Out-of-band storage owned by the embedder (the tagged handle).
    pub(crate) internal: Option<Rc<dyn Any>>,
    pub(crate) interceptors: Option<Rc<Interceptors<H>>>,
    pub(crate) class_name: Rc<str>,
}

/// Result of looking a key up on one object, without following the chain.
pub(crate) enum OwnLookup {
    Value(Value),
    Accessor {
        get: Option<ObjectId>,
        set: Option<ObjectId>,
    },
    ReadOnly(Value),
}

impl<H> ObjectData<H> {
    pub(crate) fn new(proto: Option<ObjectId>, kind: ObjectKind<H>, class_name: Rc<str>) -> Self {
        Self {
            proto,
            properties: Vec::new(),
            kind,
            internal: None,
            interceptors: None,
            class_name,
        }
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|(key, _)| &**key == name)
            .map(|(_, prop)| prop)
    }

    pub(crate) fn find_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties
            .iter_mut()
            .find(|(key, _)| &**key == name)
            .map(|(_, prop)| prop)
    }

    pub(crate) fn insert(&mut self, name: Rc<str>, property: Property) {
        match self.find_mut(&name) {
            Some(existing) => *existing = property,
            None => self.properties.push((name, property)),
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let before = self.properties.len();
        self.properties.retain(|(key, _)| &**key != name);
        before != self.properties.len()
    }

    pub(crate) fn lookup_own(&self, key: &PropertyKey) -> Option<OwnLookup> {
        match (&self.kind, key) {
            (ObjectKind::Array(items), PropertyKey::Index(i)) => {
                return items.get(*i as usize).cloned().map(OwnLookup::Value);
            }
            (ObjectKind::TypedArray(array), PropertyKey::Index(i)) => {
                return array.get(*i as usize).map(OwnLookup::Value);
            }
            (ObjectKind::Array(items), PropertyKey::Name(n)) if &**n == "length" => {
                return Some(OwnLookup::ReadOnly(length_value(items.len())));
            }
            (ObjectKind::TypedArray(array), PropertyKey::Name(n)) if &**n == "length" => {
                return Some(OwnLookup::ReadOnly(length_value(array.len())));
            }
            _ => {}
        }
        let name = key.name();
        self.find(&name).map(|prop| match prop {
            Property::Data { value, writable: true, .. } => OwnLookup::Value(value.clone()),
            Property::Data { value, writable: false, .. } => OwnLookup::ReadOnly(value.clone()),
            Property::Accessor { get, set, .. } => OwnLookup::Accessor { get: *get, set: *set },
        })
    }
}

fn length_value(len: usize) -> Value {
    i32::try_from(len)
        .map(Value::Int)
        .unwrap_or(Value::Number(len as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_array_decoding() {
        let array = TypedArray {
            kind: TypedArrayKind::Int16,
            bytes: [(-2i16).to_le_bytes(), 300i16.to_le_bytes()].concat(),
        };
        assert_eq!(array.len(), 2);
        assert_eq!(array.values(), vec![Value::Int(-2), Value::Int(300)]);
        assert_eq!(array.get(2), None);
    }

    #[test]
    fn test_big_typed_array_elements() {
        let array = TypedArray {
            kind: TypedArrayKind::BigUint64,
            bytes: u64::MAX.to_le_bytes().to_vec(),
        };
        assert_eq!(array.get(0), Some(Value::BigInt(i128::from(u64::MAX))));
    }
}
