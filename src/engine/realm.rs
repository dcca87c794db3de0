//! The object slab of one script context.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::object::{
    FunctionData, Interceptors, NativeCallback, ObjectData, ObjectKind, OwnLookup, Property,
    TypedArray,
};
use super::value::{Exception, ObjectId, PropertyKey, Value};

/// The embedder of a realm.
///
/// Native callbacks receive the host explicitly instead of recovering it
/// from engine-side storage.
pub trait Host: Sized + 'static {
    fn realm(&self) -> &Realm<Self>;
}

/// Built-in error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
        }
    }
}

/// Objects every realm starts with.
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub typed_array_prototype: ObjectId,
    pub error_prototype: ObjectId,
    pub type_error_prototype: ObjectId,
    pub range_error_prototype: ObjectId,
}

struct Slot<H> {
    generation: u32,
    data: Option<ObjectData<H>>,
}

/// Generational object slab plus the intrinsics and global object.
pub struct Realm<H> {
    slots: RefCell<Vec<Slot<H>>>,
    free: RefCell<Vec<u32>>,
    intrinsics: Intrinsics,
    global: Cell<ObjectId>,
    strict: Cell<bool>,
    module_ids: Cell<u64>,
}

const MAX_CHAIN: usize = 4096;

impl<H: Host> Default for Realm<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> Realm<H> {
    pub fn new() -> Self {
        let mut slots: Vec<Slot<H>> = Vec::new();
        let mut push = |proto: Option<ObjectId>, kind: ObjectKind<H>, class: &str| {
            let index = slots.len() as u32;
            slots.push(Slot {
                generation: 0,
                data: Some(ObjectData::new(proto, kind, Rc::from(class))),
            });
            ObjectId::new(index, 0)
        };

        let object_prototype = push(None, ObjectKind::Ordinary, "Object");
        let function_prototype = push(Some(object_prototype), ObjectKind::Ordinary, "Function");
        let array_prototype = push(Some(object_prototype), ObjectKind::Array(Vec::new()), "Array");
        let typed_array_prototype = push(Some(object_prototype), ObjectKind::Ordinary, "TypedArray");
        let error_prototype = push(Some(object_prototype), ObjectKind::Ordinary, "Error");
        let type_error_prototype = push(Some(error_prototype), ObjectKind::Ordinary, "TypeError");
        let range_error_prototype = push(Some(error_prototype), ObjectKind::Ordinary, "RangeError");
        let global = push(Some(object_prototype), ObjectKind::Ordinary, "Window");

        let realm = Self {
            slots: RefCell::new(slots),
            free: RefCell::new(Vec::new()),
            intrinsics: Intrinsics {
                object_prototype,
                function_prototype,
                array_prototype,
                typed_array_prototype,
                error_prototype,
                type_error_prototype,
                range_error_prototype,
            },
            global: Cell::new(global),
            strict: Cell::new(true),
            module_ids: Cell::new(0),
        };

        for (proto, kind) in [
            (error_prototype, ErrorKind::Error),
            (type_error_prototype, ErrorKind::TypeError),
            (range_error_prototype, ErrorKind::RangeError),
        ] {
            realm.define_hidden(proto, "name", Value::string(kind.name()));
            realm.define_hidden(proto, "message", Value::string(""));
        }
        realm
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn global(&self) -> ObjectId {
        self.global.get()
    }

    pub fn set_global(&self, id: ObjectId) {
        self.global.set(id);
    }

    /// Whether failed assignments (read-only data, getter-only accessors)
    /// throw instead of being ignored.
    pub fn strict(&self) -> bool {
        self.strict.get()
    }

    pub fn set_strict(&self, strict: bool) {
        self.strict.set(strict);
    }

    pub(crate) fn next_module_id(&self) -> u64 {
        let next = self.module_ids.get() + 1;
        self.module_ids.set(next);
        next
    }

    fn alloc(&self, data: ObjectData<H>) -> ObjectId {
        let mut slots = self.slots.borrow_mut();
        if let Some(index) = self.free.borrow_mut().pop() {
            let slot = &mut slots[index as usize];
            slot.data = Some(data);
            return ObjectId::new(index, slot.generation);
        }
        let index = slots.len() as u32;
        slots.push(Slot {
            generation: 0,
            data: Some(data),
        });
        ObjectId::new(index, 0)
    }

    /// Releases an object. Ids pointing at it become stale.
    pub fn free(&self, id: ObjectId) -> bool {
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.data.is_some() => {
                slot.data = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.borrow_mut().push(id.index);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.read(id, |_| ()).is_some()
    }

    /// Number of live objects, intrinsics included.
    pub fn live_objects(&self) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|slot| slot.data.is_some())
            .count()
    }

    fn read<R>(&self, id: ObjectId, f: impl FnOnce(&ObjectData<H>) -> R) -> Option<R> {
        let slots = self.slots.borrow();
        let slot = slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_ref().map(f)
    }

    fn write<R>(&self, id: ObjectId, f: impl FnOnce(&mut ObjectData<H>) -> R) -> Option<R> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_mut().map(f)
    }

    pub fn create_object(&self, proto: Option<ObjectId>) -> ObjectId {
        self.create_object_with_class(proto, "Object")
    }

    pub fn create_object_with_class(&self, proto: Option<ObjectId>, class_name: &str) -> ObjectId {
        self.alloc(ObjectData::new(proto, ObjectKind::Ordinary, Rc::from(class_name)))
    }

    pub fn create_array(&self, items: Vec<Value>) -> ObjectId {
        self.alloc(ObjectData::new(
            Some(self.intrinsics.array_prototype),
            ObjectKind::Array(items),
            Rc::from("Array"),
        ))
    }

    pub fn create_typed_array(&self, array: TypedArray) -> ObjectId {
        let class = array.kind.name();
        self.alloc(ObjectData::new(
            Some(self.intrinsics.typed_array_prototype),
            ObjectKind::TypedArray(array),
            Rc::from(class),
        ))
    }

    /// Creates a native function. A function without `call` behaviour can
    /// only be used with `new`; one without `construct` is not a constructor.
    pub fn create_function(
        &self,
        name: &str,
        call: Option<NativeCallback<H>>,
        construct: Option<NativeCallback<H>>,
    ) -> ObjectId {
        let name: Rc<str> = Rc::from(name);
        let id = self.alloc(ObjectData::new(
            Some(self.intrinsics.function_prototype),
            ObjectKind::Function(FunctionData {
                name: name.clone(),
                call,
                construct,
            }),
            Rc::from("Function"),
        ));
        self.define_hidden(id, "name", Value::String(name));
        id
    }

    pub fn create_error(&self, kind: ErrorKind, message: &str) -> ObjectId {
        let proto = match kind {
            ErrorKind::Error => self.intrinsics.error_prototype,
            ErrorKind::TypeError => self.intrinsics.type_error_prototype,
            ErrorKind::RangeError => self.intrinsics.range_error_prototype,
        };
        let id = self.create_object_with_class(Some(proto), kind.name());
        self.define_hidden(id, "message", Value::string(message));
        id
    }

    /// Builds an error object of `kind` ready to be thrown.
    pub fn throw(&self, kind: ErrorKind, message: impl AsRef<str>) -> Exception {
        Exception::new(Value::Object(self.create_error(kind, message.as_ref())))
    }

    pub fn prototype_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.read(id, |data| data.proto).flatten()
    }

    /// Re-links `id` to `proto`. Refuses links that would close a cycle.
    pub fn set_prototype(&self, id: ObjectId, proto: Option<ObjectId>) -> bool {
        let mut cursor = proto;
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == id || steps > MAX_CHAIN {
                return false;
            }
            cursor = self.prototype_of(current);
            steps += 1;
        }
        self.write(id, |data| data.proto = proto).is_some()
    }

    /// Walks the prototype chain of `id`, nearest first, excluding `id`.
    pub fn prototype_chain(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut chain = Vec::new();
        let mut cursor = self.prototype_of(id);
        while let Some(current) = cursor {
            if chain.len() > MAX_CHAIN {
                break;
            }
            chain.push(current);
            cursor = self.prototype_of(current);
        }
        chain
    }

    pub fn class_name(&self, id: ObjectId) -> Option<Rc<str>> {
        self.read(id, |data| data.class_name.clone())
    }

    pub fn define_property(&self, id: ObjectId, name: &str, property: Property) -> bool {
        self.write(id, |data| data.insert(Rc::from(name), property))
            .is_some()
    }

    /// Writable, enumerable data property.
    pub fn define_value(&self, id: ObjectId, name: &str, value: Value) -> bool {
        self.define_property(
            id,
            name,
            Property::Data {
                value,
                writable: true,
                enumerable: true,
            },
        )
    }

    /// Writable, non-enumerable data property (methods, class bindings).
    pub fn define_hidden(&self, id: ObjectId, name: &str, value: Value) -> bool {
        self.define_property(
            id,
            name,
            Property::Data {
                value,
                writable: true,
                enumerable: false,
            },
        )
    }

    pub fn define_constant(&self, id: ObjectId, name: &str, value: Value) -> bool {
        self.define_property(
            id,
            name,
            Property::Data {
                value,
                writable: false,
                enumerable: true,
            },
        )
    }

    pub fn define_accessor(
        &self,
        id: ObjectId,
        name: &str,
        get: Option<ObjectId>,
        set: Option<ObjectId>,
    ) -> bool {
        self.define_property(
            id,
            name,
            Property::Accessor {
                get,
                set,
                enumerable: true,
            },
        )
    }

    pub fn own_property(&self, id: ObjectId, name: &str) -> Option<Property> {
        self.read(id, |data| data.find(name).cloned()).flatten()
    }

    pub(crate) fn lookup_own(&self, id: ObjectId, key: &PropertyKey) -> Option<OwnLookup> {
        self.read(id, |data| data.lookup_own(key)).flatten()
    }

    /// Enumerable own keys in insertion order (array indices first).
    pub fn own_keys(&self, id: ObjectId) -> Vec<Rc<str>> {
        self.read(id, |data| {
            let mut keys: Vec<Rc<str>> = match &data.kind {
                ObjectKind::Array(items) => (0..items.len()).map(|i| Rc::from(i.to_string())).collect(),
                ObjectKind::TypedArray(array) => {
                    (0..array.len()).map(|i| Rc::from(i.to_string())).collect()
                }
                _ => Vec::new(),
            };
            keys.extend(data.properties.iter().filter_map(|(key, prop)| match prop {
                Property::Data { enumerable: true, .. }
                | Property::Accessor { enumerable: true, .. } => Some(key.clone()),
                _ => None,
            }));
            keys
        })
        .unwrap_or_default()
    }

    pub(crate) fn remove_own(&self, id: ObjectId, name: &str) -> bool {
        self.write(id, |data| data.remove(name)).unwrap_or(false)
    }

    /// Raw data lookup along the chain, without running accessors.
    pub fn lookup_data(&self, id: ObjectId, name: &str) -> Option<Value> {
        let mut cursor = Some(id);
        let mut steps = 0;
        while let Some(current) = cursor {
            if steps > MAX_CHAIN {
                return None;
            }
            if let Some(Property::Data { value, .. }) = self.own_property(current, name) {
                return Some(value);
            }
            cursor = self.prototype_of(current);
            steps += 1;
        }
        None
    }

    pub fn set_internal(&self, id: ObjectId, internal: Option<Rc<dyn Any>>) -> bool {
        self.write(id, |data| data.internal = internal).is_some()
    }

    pub fn internal(&self, id: ObjectId) -> Option<Rc<dyn Any>> {
        self.read(id, |data| data.internal.clone()).flatten()
    }

    pub fn set_interceptors(&self, id: ObjectId, interceptors: Option<Rc<Interceptors<H>>>) -> bool {
        self.write(id, |data| data.interceptors = interceptors).is_some()
    }

    pub fn interceptors(&self, id: ObjectId) -> Option<Rc<Interceptors<H>>> {
        self.read(id, |data| data.interceptors.clone()).flatten()
    }

    pub fn is_callable(&self, id: ObjectId) -> bool {
        self.read(id, |data| matches!(&data.kind, ObjectKind::Function(f) if f.call.is_some()))
            .unwrap_or(false)
    }

    pub fn is_constructor(&self, id: ObjectId) -> bool {
        self.read(id, |data| matches!(&data.kind, ObjectKind::Function(f) if f.construct.is_some()))
            .unwrap_or(false)
    }

    pub fn is_function(&self, id: ObjectId) -> bool {
        self.read(id, |data| matches!(data.kind, ObjectKind::Function(_)))
            .unwrap_or(false)
    }

    pub(crate) fn function_parts(
        &self,
        id: ObjectId,
    ) -> Option<(Rc<str>, Option<NativeCallback<H>>, Option<NativeCallback<H>>)> {
        self.read(id, |data| match &data.kind {
            ObjectKind::Function(f) => Some((f.name.clone(), f.call.clone(), f.construct.clone())),
            _ => None,
        })
        .flatten()
    }

    pub fn is_array(&self, id: ObjectId) -> bool {
        self.read(id, |data| matches!(data.kind, ObjectKind::Array(_)))
            .unwrap_or(false)
    }

    pub fn is_typed_array(&self, id: ObjectId) -> bool {
        self.read(id, |data| matches!(data.kind, ObjectKind::TypedArray(_)))
            .unwrap_or(false)
    }

    pub fn array_items(&self, id: ObjectId) -> Option<Vec<Value>> {
        self.read(id, |data| match &data.kind {
            ObjectKind::Array(items) => Some(items.clone()),
            _ => None,
        })
        .flatten()
    }

    pub(crate) fn set_array_item(&self, id: ObjectId, index: u32, value: Value) -> bool {
        self.write(id, |data| match &mut data.kind {
            ObjectKind::Array(items) => {
                let index = index as usize;
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                true
            }
            _ => false,
        })
        .unwrap_or(false)
    }

    pub fn typed_array(&self, id: ObjectId) -> Option<TypedArray> {
        self.read(id, |data| match &data.kind {
            ObjectKind::TypedArray(array) => Some(array.clone()),
            _ => None,
        })
        .flatten()
    }

    /// `(name, message)` of an error-like object, read without running accessors.
    pub fn error_parts(&self, value: &Value) -> Option<(String, String)> {
        let id = value.as_object()?;
        let name = self.lookup_data(id, "name")?;
        let message = self.lookup_data(id, "message").unwrap_or_default();
        Some((
            self.display_string(&name),
            self.display_string(&message),
        ))
    }

    /// String conversion that never runs script.
    pub fn display_string(&self, value: &Value) -> String {
        if let Some(s) = value.primitive_to_string() {
            return s;
        }
        let Some(id) = value.as_object() else {
            return String::new();
        };
        if let Some(items) = self.array_items(id) {
            return items
                .iter()
                .map(|item| match item {
                    Value::Undefined | Value::Null => String::new(),
                    Value::Object(inner) if *inner == id => String::new(),
                    other => self.display_string(other),
                })
                .collect::<Vec<_>>()
                .join(",");
        }
        if let Some(array) = self.typed_array(id) {
            return array
                .values()
                .iter()
                .map(|v| self.display_string(v))
                .collect::<Vec<_>>()
                .join(",");
        }
        if let Some((name, _, _)) = self.function_parts(id) {
            return format!("function {name}() {{ [native code] }}");
        }
        if let Some((name, message)) = self.error_parts(value) {
            if self.prototype_chain(id).contains(&self.intrinsics.error_prototype) {
                return if message.is_empty() {
                    name
                } else {
                    format!("{name}: {message}")
                };
            }
        }
        let class = self.class_name(id).unwrap_or_else(|| Rc::from("Object"));
        format!("[object {class}]")
    }
}
