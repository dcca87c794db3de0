//! Script Context
//!
//! The live binding between one script execution unit and the shared
//! [`Bindings`]. A context owns its realm (the engine-side object slab), the
//! per-context class objects, the identity map from native addresses to
//! script objects, the teardown list, persisted callbacks, the module cache
//! and the call and context arenas.
//!
//! Native code never recovers the context from engine storage: every
//! dispatch entry receives it explicitly as the realm's [`Host`].

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::class::{Bindings, ClassDescriptor};
use crate::config::RuntimeConfig;
use crate::core::error::{BindingError, CallError, ConfigResult, ContextError, ContextResult};
use crate::core::logging::TARGET_CONTEXT;
use crate::dispatch::{self, CallKind, CallSite, DestructorFn, HostFn};
use crate::engine::{
    ops, CallInfo, ErrorKind, Exception, Host, Interceptors, NativeCallback, ObjectId, Property, PropertyKey,
    Realm, Value,
};
use crate::handle::{resolve, Native, NativePtr, TaggedHandle};
use crate::registry::{Projection, Subtype, TypeIndex};

pub mod arena;
pub mod module;
pub mod tasks;

pub use arena::{Arena, ArenaRef, ArenaSlot};
pub use module::{normalize, MemoryLoader, ModuleLoader};
pub use tasks::{Completion, TaskReport, TaskSender};

use module::ModuleCache;
use tasks::TaskQueue;

/// Caller-supplied state of a context.
///
/// A state that exposes an [`ArenaSlot`] gets the context's call arena
/// filled in on every dispatched call.
pub trait HostState: 'static {
    fn call_arena_slot(&self) -> Option<&ArenaSlot> {
        None
    }
}

impl HostState for () {}

/// One engine instance: the shared bindings, the configuration and the
/// outer execution scope that at most one main-world context may hold.
pub struct Runtime<S> {
    inner: Rc<RuntimeInner<S>>,
}

struct RuntimeInner<S> {
    bindings: Arc<Bindings<S>>,
    config: RuntimeConfig,
    scope_holder: Cell<Option<u64>>,
    next_id: Cell<u64>,
}

impl<S> Clone for Runtime<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: HostState> Runtime<S> {
    /// Fails when `config` does not validate.
    pub fn new(bindings: Arc<Bindings<S>>, config: RuntimeConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Rc::new(RuntimeInner {
                bindings,
                config,
                scope_holder: Cell::new(None),
                next_id: Cell::new(1),
            }),
        })
    }

    pub fn bindings(&self) -> &Arc<Bindings<S>> {
        &self.inner.bindings
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Id of the context holding the outer execution scope.
    pub fn scope_holder(&self) -> Option<u64> {
        self.inner.scope_holder.get()
    }

    fn next_context_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }
}

/// Which execution scope a context enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum World {
    /// Acquires the runtime's outer execution scope.
    Main,
    /// Attaches to the scope held by the main context.
    Isolated,
}

pub struct ContextOptions {
    pub loader: Option<Box<dyn ModuleLoader>>,
    pub world: World,
}

impl ContextOptions {
    pub fn main() -> Self {
        Self {
            loader: None,
            world: World::Main,
        }
    }

    pub fn isolated() -> Self {
        Self {
            loader: None,
            world: World::Isolated,
        }
    }

    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("loader", &self.loader.is_some())
            .field("world", &self.world)
            .finish()
    }
}

/// Generation-stamped reference to a persisted script function.
///
/// `generation` is the context generation at persist time; `version` counts
/// how often the slot was vacated, so an id released from a slot never
/// reaches whatever is persisted there next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
    pub(crate) version: u32,
}

impl CallbackId {
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextStats {
    pub id: u64,
    pub world: Option<World>,
    pub generation: u32,
    pub depth: u32,
    pub identity_entries: usize,
    pub tracked_objects: usize,
    pub destructors: usize,
    pub callbacks: usize,
    pub modules: usize,
    pub pending_tasks: usize,
    pub live_objects: usize,
    pub call_arena_bytes: usize,
    pub context_arena_bytes: usize,
}

/// What a teardown released.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeardownReport {
    pub destructors: usize,
    pub handles: usize,
    pub tracked: usize,
    pub modules: usize,
    pub callbacks: usize,
}

/// Diagnostic view of a script value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub class_name: String,
    pub type_index: Option<TypeIndex>,
    pub subtype: Option<Subtype>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct IdentityKey {
    address: usize,
    root: TypeIndex,
}

struct IdentityEntry {
    object: ObjectId,
    type_index: TypeIndex,
    // keeps the address from being reused while mapped
    _ptr: NativePtr,
}

enum Teardown<S> {
    Hook {
        hook: DestructorFn<S>,
        ptr: NativePtr,
        path: Rc<[Projection]>,
    },
    Custom(Box<dyn FnOnce(&Context<S>)>),
}

struct CallbackSlot {
    function: Option<ObjectId>,
    generation: u32,
    version: u32,
}

impl CallbackSlot {
    fn holds(&self, id: CallbackId) -> bool {
        self.function.is_some() && self.generation == id.generation && self.version == id.version
    }

    /// Empties the slot; returns whether it held a function.
    fn vacate(&mut self) -> bool {
        let live = self.function.take().is_some();
        if live {
            self.version = self.version.wrapping_add(1);
        }
        live
    }
}

struct ClassObjects<S> {
    constructor: ObjectId,
    prototype: ObjectId,
    interceptors: Option<Rc<Interceptors<Context<S>>>>,
}

pub(crate) struct ContextInner<S> {
    id: u64,
    runtime: Runtime<S>,
    realm: Realm<Context<S>>,
    state: Rc<S>,
    world: World,
    classes: Vec<ClassObjects<S>>,
    prototype_owner: HashMap<ObjectId, TypeIndex>,
    identity: RefCell<HashMap<IdentityKey, IdentityEntry>>,
    empty_objects: RefCell<HashMap<TypeIndex, (ObjectId, NativePtr)>>,
    tracked: RefCell<Vec<ObjectId>>,
    teardown: RefCell<Vec<Teardown<S>>>,
    callbacks: RefCell<Vec<CallbackSlot>>,
    modules: RefCell<ModuleCache>,
    loader: Option<Box<dyn ModuleLoader>>,
    call_arena: Rc<Arena>,
    context_arena: Rc<Arena>,
    pub(crate) depth: Cell<u32>,
    generation: Cell<u32>,
    destroyed: Cell<bool>,
    tasks: TaskQueue,
}

impl<S> Drop for ContextInner<S> {
    fn drop(&mut self) {
        if self.runtime.inner.scope_holder.get() == Some(self.id) {
            self.runtime.inner.scope_holder.set(None);
        }
        if !self.destroyed.get() {
            debug!(target: TARGET_CONTEXT, id = self.id, "context dropped without teardown");
        }
    }
}

/// Handle to a live script context. Cheap to clone.
pub struct Context<S> {
    inner: Rc<ContextInner<S>>,
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> fmt::Debug for Context<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("world", &self.inner.world)
            .field("destroyed", &self.inner.destroyed.get())
            .finish_non_exhaustive()
    }
}

impl<S: HostState> Host for Context<S> {
    fn realm(&self) -> &Realm<Self> {
        &self.inner.realm
    }
}

fn root_path() -> Rc<[Projection]> {
    Rc::from(Vec::new())
}

fn host_function<S: HostState>(realm: &Realm<Context<S>>, site: CallSite, f: HostFn<S>) -> ObjectId {
    let name = site.name;
    let call: NativeCallback<Context<S>> =
        Rc::new(move |ctx: &Context<S>, info: CallInfo| dispatch::call_host_fn(ctx, &site, &f, &info));
    realm.create_function(name, Some(call), None)
}

fn instantiate_class<S: HostState>(realm: &Realm<Context<S>>, class: &ClassDescriptor<S>) -> ClassObjects<S> {
    let index = class.index;
    let prototype = realm.create_object_with_class(Some(realm.intrinsics().object_prototype), class.name);
    let construct: NativeCallback<Context<S>> =
        Rc::new(move |ctx: &Context<S>, info: CallInfo| dispatch::construct(ctx, index, &info));
    let constructor = realm.create_function(class.name, None, Some(construct));
    realm.define_property(
        constructor,
        "prototype",
        Property::Data {
            value: Value::Object(prototype),
            writable: false,
            enumerable: false,
        },
    );
    realm.define_hidden(prototype, "constructor", Value::Object(constructor));

    for &(name, ref f) in &class.methods {
        let site = CallSite::new(index, class.name, name, CallKind::Method);
        let function = host_function(realm, site, f.clone());
        realm.define_hidden(prototype, name, Value::Object(function));
    }
    for accessor in class.accessors() {
        let site = CallSite::new(index, class.name, accessor.name, CallKind::Getter);
        let getter = host_function(realm, site, accessor.getter.clone());
        let setter = accessor.setter.as_ref().map(|f| {
            let site = CallSite::new(index, class.name, accessor.name, CallKind::Setter);
            host_function(realm, site, f.clone())
        });
        realm.define_accessor(prototype, accessor.name, Some(getter), setter);
    }
    for &(name, ref f) in &class.statics {
        let site = CallSite::new(index, class.name, name, CallKind::Static);
        let function = host_function(realm, site, f.clone());
        realm.define_hidden(constructor, name, Value::Object(function));
    }
    for (name, constant) in class.constants() {
        realm.define_constant(constructor, name, constant.to_value());
        realm.define_constant(prototype, name, constant.to_value());
    }

    ClassObjects {
        constructor,
        prototype,
        interceptors: interceptors_for(class),
    }
}

fn interceptors_for<S: HostState>(class: &ClassDescriptor<S>) -> Option<Rc<Interceptors<Context<S>>>> {
    let mut interceptors: Interceptors<Context<S>> = Interceptors::default();
    let hook_site = |declaring: TypeIndex, kind: CallKind| CallSite::new(declaring, class.name, "", kind);

    if let Some(hooks) = &class.indexed {
        if let Some(get) = hooks.get.clone() {
            let site = hook_site(hooks.declaring, CallKind::IndexedGet);
            interceptors.indexed_get = Some(Rc::new(move |ctx: &Context<S>, this: ObjectId, index: u32| {
                dispatch::run(ctx, &site, |ctx| get(ctx, this, index))
            }));
        }
        if let Some(set) = hooks.set.clone() {
            let site = hook_site(hooks.declaring, CallKind::IndexedSet);
            interceptors.indexed_set = Some(Rc::new(
                move |ctx: &Context<S>, this: ObjectId, index: u32, value: Value| {
                    dispatch::run(ctx, &site, |ctx| set(ctx, this, index, &value))
                },
            ));
        }
    }
    if let Some(hooks) = &class.named {
        if let Some(get) = hooks.get.clone() {
            let site = hook_site(hooks.declaring, CallKind::NamedGet);
            interceptors.named_get = Some(Rc::new(move |ctx: &Context<S>, this: ObjectId, name: &str| {
                dispatch::run(ctx, &site, |ctx| get(ctx, this, name))
            }));
        }
        if let Some(set) = hooks.set.clone() {
            let site = hook_site(hooks.declaring, CallKind::NamedSet);
            interceptors.named_set = Some(Rc::new(
                move |ctx: &Context<S>, this: ObjectId, name: &str, value: Value| {
                    dispatch::run(ctx, &site, |ctx| set(ctx, this, name, &value))
                },
            ));
        }
        if let Some(delete) = hooks.delete.clone() {
            let site = hook_site(hooks.declaring, CallKind::NamedDelete);
            interceptors.named_delete = Some(Rc::new(move |ctx: &Context<S>, this: ObjectId, name: &str| {
                dispatch::run(ctx, &site, |ctx| delete(ctx, this, name))
            }));
        }
    }
    (!interceptors.is_empty()).then(|| Rc::new(interceptors))
}

fn setup_error(err: CallError) -> ContextError {
    match err {
        CallError::Binding(binding) => ContextError::Binding(binding),
        CallError::Destroyed => ContextError::Destroyed,
        other => ContextError::Script(other.to_string()),
    }
}

impl<S: HostState> Context<S> {
    /// Creates a context whose global object wraps `global`.
    ///
    /// Every registered class gets a constructor function and prototype
    /// object in the new realm, re-linked to its parent's per-context
    /// objects, and is bound on the global object under its class name.
    pub fn create<G: 'static>(runtime: &Runtime<S>, global: G, state: S, options: ContextOptions) -> ContextResult<Self> {
        let bindings = runtime.bindings().clone();
        let registry = bindings.registry();
        let global_type = registry
            .index_of::<G>()
            .ok_or_else(|| ContextError::UnregisteredGlobal(type_name::<G>().to_string()))?;
        if options.world == World::Main {
            if let Some(holder) = runtime.scope_holder() {
                return Err(ContextError::ScopeHeld(holder));
            }
        }

        let id = runtime.next_context_id();
        let config = runtime.config();
        let realm: Realm<Context<S>> = Realm::new();
        realm.set_strict(config.dispatch.strict_setters);

        let mut classes = Vec::with_capacity(bindings.classes().len());
        let mut prototype_owner = HashMap::new();
        for class in bindings.classes().iter() {
            let objects = instantiate_class(&realm, class);
            prototype_owner.insert(objects.prototype, class.index);
            classes.push(objects);
        }

        // per-context prototype links
        for class in bindings.classes().iter() {
            let objects = &classes[class.index.get()];
            match class.parent() {
                Some(parent) => {
                    let parent = &classes[parent.get()];
                    realm.set_prototype(objects.prototype, Some(parent.prototype));
                    realm.set_prototype(objects.constructor, Some(parent.constructor));
                }
                None if class.subtype == Some(Subtype::Error) => {
                    realm.set_prototype(objects.prototype, Some(realm.intrinsics().error_prototype));
                }
                None => {}
            }
        }

        let global_class = bindings.class(global_type);
        let global_object = realm.create_object_with_class(
            Some(classes[global_type.get()].prototype),
            global_class.name,
        );
        realm.set_global(global_object);
        for class in bindings.classes().iter() {
            realm.define_hidden(
                global_object,
                class.name,
                Value::Object(classes[class.index.get()].constructor),
            );
        }

        let ctx = Context {
            inner: Rc::new(ContextInner {
                id,
                runtime: runtime.clone(),
                realm,
                state: Rc::new(state),
                world: options.world,
                classes,
                prototype_owner,
                identity: RefCell::new(HashMap::new()),
                empty_objects: RefCell::new(HashMap::new()),
                tracked: RefCell::new(Vec::new()),
                teardown: RefCell::new(Vec::new()),
                callbacks: RefCell::new(Vec::new()),
                modules: RefCell::new(ModuleCache::default()),
                loader: options.loader,
                call_arena: Rc::new(Arena::new("call", config.arena.call_limit())),
                context_arena: Rc::new(Arena::new("context", None)),
                depth: Cell::new(0),
                generation: Cell::new(0),
                destroyed: Cell::new(false),
                tasks: TaskQueue::new(),
            }),
        };
        if options.world == World::Main {
            runtime.inner.scope_holder.set(Some(id));
        }

        let ptr = NativePtr::new(global);
        if global_class.empty {
            ctx.realm()
                .set_interceptors(global_object, ctx.inner.classes[global_type.get()].interceptors.clone());
            ctx.inner
                .empty_objects
                .borrow_mut()
                .insert(global_type, (global_object, ptr));
        } else {
            ctx.bind(global_type, global_object, ptr, root_path())
                .map_err(setup_error)?;
        }

        info!(
            target: TARGET_CONTEXT,
            id,
            world = ?options.world,
            global = global_class.name,
            classes = bindings.classes().len(),
            "context created"
        );
        Ok(ctx)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn world(&self) -> World {
        self.inner.world
    }

    pub fn realm(&self) -> &Realm<Self> {
        &self.inner.realm
    }

    pub fn state(&self) -> &S {
        &self.inner.state
    }

    pub fn state_rc(&self) -> Rc<S> {
        self.inner.state.clone()
    }

    pub fn runtime(&self) -> &Runtime<S> {
        &self.inner.runtime
    }

    pub fn bindings(&self) -> &Arc<Bindings<S>> {
        self.inner.runtime.bindings()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.inner.runtime.config()
    }

    pub(crate) fn inner(&self) -> &ContextInner<S> {
        &self.inner
    }

    /// Current native call nesting.
    pub fn depth(&self) -> u32 {
        self.inner.depth.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub fn call_arena(&self) -> &Rc<Arena> {
        &self.inner.call_arena
    }

    pub fn context_arena(&self) -> &Rc<Arena> {
        &self.inner.context_arena
    }

    pub fn global(&self) -> ObjectId {
        self.inner.realm.global()
    }

    fn ensure_live(&self) -> ContextResult<()> {
        if self.is_destroyed() {
            return Err(ContextError::Destroyed);
        }
        Ok(())
    }

    /// Per-context constructor function of a registered class.
    pub fn class_constructor(&self, index: TypeIndex) -> Option<ObjectId> {
        self.inner.classes.get(index.get()).map(|objects| objects.constructor)
    }

    pub fn class_prototype(&self, index: TypeIndex) -> Option<ObjectId> {
        self.inner.classes.get(index.get()).map(|objects| objects.prototype)
    }

    /// Registered type of a script object: its tagged handle if it has one,
    /// otherwise the nearest class prototype on its chain.
    pub fn class_of(&self, object: ObjectId) -> Option<TypeIndex> {
        if let Some(internal) = self.realm().internal(object) {
            if let Some(handle) = internal.downcast_ref::<TaggedHandle>() {
                return Some(handle.type_index);
            }
        }
        self.realm()
            .prototype_chain(object)
            .into_iter()
            .find_map(|proto| self.inner.prototype_owner.get(&proto).copied())
    }

    fn identity_key(&self, index: TypeIndex, ptr: &NativePtr, path: &[Projection]) -> Result<IdentityKey, CallError> {
        Ok(IdentityKey {
            address: ptr.address(path)?,
            root: self.bindings().registry().root_of(index),
        })
    }

    /// Binds native data to `object`: tagged handle, interceptors and the
    /// identity map entry, then the attach hook. A failing attach hook
    /// leaves the object unbound. The destructor is registered last.
    fn bind(&self, index: TypeIndex, object: ObjectId, ptr: NativePtr, path: Rc<[Projection]>) -> Result<(), CallError> {
        let bindings = self.bindings().clone();
        let class = bindings.class(index);
        let key = self.identity_key(index, &ptr, &path)?;

        let handle = TaggedHandle::new(index, class.subtype, ptr.clone(), path.clone());
        self.realm().set_internal(object, Some(Rc::new(handle)));
        self.realm()
            .set_interceptors(object, self.inner.classes[index.get()].interceptors.clone());
        self.inner.identity.borrow_mut().insert(
            key,
            IdentityEntry {
                object,
                type_index: index,
                _ptr: ptr.clone(),
            },
        );

        if let Some(attach) = &class.on_attach {
            if let Err(err) = attach(self, ptr.clone(), path.clone()) {
                self.inner.identity.borrow_mut().remove(&key);
                self.realm().set_internal(object, None);
                self.realm().set_interceptors(object, None);
                return Err(err);
            }
        }
        if let Some(hook) = &class.destructor {
            self.inner.teardown.borrow_mut().push(Teardown::Hook {
                hook: hook.clone(),
                ptr,
                path,
            });
        }
        Ok(())
    }

    /// Binds a freshly constructed native value to the `this` of `new`.
    pub(crate) fn attach(&self, index: TypeIndex, this: ObjectId, ptr: NativePtr) -> Result<(), CallError> {
        self.context_arena().alloc(ptr.clone())?;
        self.bind(index, this, ptr, root_path())?;
        self.inner.tracked.borrow_mut().push(this);
        Ok(())
    }

    /// Shared instance of a stateless marker type.
    pub(crate) fn empty_instance(&self, index: TypeIndex) -> Result<ObjectId, CallError> {
        self.empty_entry(index).map(|(object, _)| object)
    }

    fn empty_entry(&self, index: TypeIndex) -> Result<(ObjectId, NativePtr), CallError> {
        if let Some((object, ptr)) = self.inner.empty_objects.borrow().get(&index) {
            return Ok((*object, ptr.clone()));
        }
        if self.is_destroyed() {
            return Err(CallError::Destroyed);
        }
        let bindings = self.bindings().clone();
        let class = bindings.class(index);
        let factory = class
            .empty_factory
            .ok_or(CallError::Binding(BindingError::Unregistered(class.name)))?;
        let objects = &self.inner.classes[index.get()];
        let object = self
            .realm()
            .create_object_with_class(Some(objects.prototype), class.name);
        self.realm().set_interceptors(object, objects.interceptors.clone());
        let ptr = factory();
        self.inner
            .empty_objects
            .borrow_mut()
            .insert(index, (object, ptr.clone()));
        self.inner.tracked.borrow_mut().push(object);
        Ok((object, ptr))
    }

    /// Script object for native data, creating it on first exposure.
    ///
    /// The same data always yields the same object. When data first exposed
    /// through a prototype view is later exposed as its more derived type,
    /// the existing object is re-tagged instead of duplicated.
    pub fn expose<T: 'static>(&self, native: &Native<T>) -> Result<ObjectId, CallError> {
        if self.is_destroyed() {
            return Err(CallError::Destroyed);
        }
        let bindings = self.bindings().clone();
        let registry = bindings.registry();
        let index = registry
            .index_of::<T>()
            .ok_or(CallError::Binding(BindingError::Unregistered(type_name::<T>())))?;
        if registry.meta(index).empty {
            return self.empty_instance(index);
        }

        let key = self.identity_key(index, native.ptr(), native.path())?;
        let existing = self
            .inner
            .identity
            .borrow()
            .get(&key)
            .map(|entry| (entry.object, entry.type_index));
        if let Some((object, mapped)) = existing {
            if self.realm().contains(object) {
                if mapped != index && registry.is_subtype(index, mapped) {
                    self.retag(object, index, native);
                }
                return Ok(object);
            }
            self.inner.identity.borrow_mut().remove(&key);
        }

        let class = bindings.class(index);
        let object = self
            .realm()
            .create_object_with_class(self.class_prototype(index), class.name);
        self.bind(index, object, native.ptr().clone(), native.path().clone())?;
        Ok(object)
    }

    fn retag<T: 'static>(&self, object: ObjectId, index: TypeIndex, native: &Native<T>) {
        let bindings = self.bindings().clone();
        let class = bindings.class(index);
        let handle = TaggedHandle::new(index, class.subtype, native.ptr().clone(), native.path().clone());
        self.realm().set_internal(object, Some(Rc::new(handle)));
        self.realm().set_prototype(object, self.class_prototype(index));
        self.realm()
            .set_interceptors(object, self.inner.classes[index.get()].interceptors.clone());
        if let Ok(key) = self.identity_key(index, native.ptr(), native.path()) {
            if let Some(entry) = self.inner.identity.borrow_mut().get_mut(&key) {
                entry.type_index = index;
            }
        }
        debug!(target: TARGET_CONTEXT, object = %object, class = class.name, "object re-tagged");
    }

    /// Moves a native value into the context and exposes it.
    pub fn promote<T: 'static>(&self, value: T) -> Result<ObjectId, CallError> {
        let native = Native::new(value);
        self.context_arena().alloc(native.ptr().clone())?;
        let object = self.expose(&native)?;
        self.inner.tracked.borrow_mut().push(object);
        Ok(object)
    }

    /// Reinterprets `value` as native data of type `T`.
    pub fn resolve_receiver<T: 'static>(&self, value: &Value) -> Result<Native<T>, CallError> {
        let bindings = self.bindings().clone();
        let registry = bindings.registry();
        let expected = registry
            .index_of::<T>()
            .ok_or(CallError::Binding(BindingError::Unregistered(type_name::<T>())))?;
        let object = value.as_object().ok_or(CallError::InvalidReceiver)?;

        if registry.meta(expected).empty {
            let found = self.class_of(object).ok_or(CallError::InvalidReceiver)?;
            if !registry.is_subtype(found, expected) {
                return Err(CallError::InvalidReceiver);
            }
            let (_, ptr) = self.empty_entry(expected)?;
            return Ok(Native::from_parts(ptr, root_path()));
        }

        let internal = self.realm().internal(object).ok_or(CallError::InvalidReceiver)?;
        let handle = internal
            .downcast_ref::<TaggedHandle>()
            .ok_or(CallError::InvalidReceiver)?;
        match resolve(registry, handle, expected) {
            Ok(resolved) => Ok(resolved.into_native()),
            Err(BindingError::TypeMismatch { .. }) => Err(CallError::InvalidReceiver),
            Err(other) => Err(CallError::Binding(other)),
        }
    }

    /// Native view of the global object.
    pub fn global_native<G: 'static>(&self) -> Result<Native<G>, CallError> {
        self.resolve_receiver::<G>(&Value::Object(self.global()))
    }

    pub fn inspect(&self, value: &Value) -> Inspection {
        let realm = self.realm();
        let (class_name, type_index) = match value.as_object() {
            Some(object) => (
                realm
                    .class_name(object)
                    .map_or_else(|| "Object".to_string(), |name| name.to_string()),
                self.class_of(object),
            ),
            None => (value.type_of().to_string(), None),
        };
        let subtype = type_index.and_then(|index| self.bindings().registry().meta(index).subtype);
        Inspection {
            class_name,
            type_index,
            subtype,
            description: realm.display_string(value),
        }
    }

    pub fn get(&self, target: ObjectId, key: impl Into<PropertyKey>) -> Result<Value, Exception> {
        ops::get(self, target, key)
    }

    pub fn set(&self, target: ObjectId, key: impl Into<PropertyKey>, value: Value) -> Result<(), Exception> {
        ops::set(self, target, key, value)
    }

    pub fn delete(&self, target: ObjectId, key: impl Into<PropertyKey>) -> Result<bool, Exception> {
        ops::delete(self, target, key)
    }

    pub fn call(&self, callee: ObjectId, this: Value, args: Vec<Value>) -> Result<Value, Exception> {
        ops::call(self, callee, this, args)
    }

    /// `new <global name>(...args)`.
    pub fn construct(&self, class: &str, args: Vec<Value>) -> Result<Value, Exception> {
        match self.get(self.global(), class)? {
            Value::Object(constructor) => ops::construct(self, constructor, args),
            other => {
                let shown = self.realm().display_string(&other);
                Err(self.realm().throw(
                    ErrorKind::TypeError,
                    format!("{class} is not a constructor (got {shown})"),
                ))
            }
        }
    }

    pub fn invoke(&self, target: &Value, name: &str, args: Vec<Value>) -> Result<Value, Exception> {
        ops::invoke(self, target, name, args)
    }

    /// `value instanceof <global name>`.
    pub fn instance_of(&self, value: &Value, class: &str) -> Result<bool, Exception> {
        match self.get(self.global(), class)? {
            Value::Object(constructor) => ops::instance_of(self, value, constructor),
            _ => Ok(false),
        }
    }

    /// Script-callable function backed by a closure.
    pub fn new_function<F>(&self, name: &str, f: F) -> ObjectId
    where
        F: Fn(&Context<S>, CallInfo) -> Result<Value, Exception> + 'static,
    {
        self.realm().create_function(name, Some(Rc::new(f)), None)
    }

    /// Keeps `function` callable from outside script under the current generation.
    pub fn persist(&self, function: ObjectId) -> CallbackId {
        let generation = self.generation();
        let mut callbacks = self.inner.callbacks.borrow_mut();
        let index = match callbacks.iter().position(|slot| slot.function.is_none()) {
            Some(free) => free,
            None => {
                callbacks.push(CallbackSlot {
                    function: None,
                    generation,
                    version: 0,
                });
                callbacks.len() - 1
            }
        };
        let slot = &mut callbacks[index];
        slot.function = Some(function);
        slot.generation = generation;
        CallbackId {
            slot: index as u32,
            generation,
            version: slot.version,
        }
    }

    /// Invokes a persisted callback. Stale ids are dropped silently: `Ok(None)`.
    pub fn invoke_callback(&self, id: CallbackId, args: Vec<Value>) -> Result<Option<Value>, Exception> {
        let function = {
            let callbacks = self.inner.callbacks.borrow();
            callbacks
                .get(id.slot as usize)
                .filter(|slot| slot.holds(id))
                .and_then(|slot| slot.function)
        };
        let function = match function {
            Some(function) if !self.is_destroyed() && id.generation == self.generation() => function,
            _ => {
                debug!(
                    target: TARGET_CONTEXT,
                    slot = id.slot,
                    generation = id.generation,
                    version = id.version,
                    current = self.generation(),
                    "stale callback dropped"
                );
                return Ok(None);
            }
        };
        self.call(function, Value::Undefined, args).map(Some)
    }

    pub fn release_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.borrow_mut();
        match callbacks.get_mut(id.slot as usize) {
            Some(slot) if slot.holds(id) => slot.vacate(),
            _ => false,
        }
    }

    pub fn generation(&self) -> u32 {
        self.inner.generation.get()
    }

    /// Advances the generation: every callback persisted before becomes
    /// stale and is released.
    pub fn reset(&self) -> u32 {
        let generation = self.generation().wrapping_add(1);
        self.inner.generation.set(generation);
        let released = self
            .inner
            .callbacks
            .borrow_mut()
            .iter_mut()
            .map(CallbackSlot::vacate)
            .filter(|&live| live)
            .count();
        debug!(target: TARGET_CONTEXT, id = self.id(), generation, released, "context reset");
        generation
    }

    /// Runs `f` at teardown, in reverse order with the destructor hooks.
    pub fn on_teardown(&self, f: impl FnOnce(&Context<S>) + 'static) {
        self.inner.teardown.borrow_mut().push(Teardown::Custom(Box::new(f)));
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            id: self.id(),
            world: Some(self.world()),
            generation: self.generation(),
            depth: self.depth(),
            identity_entries: self.inner.identity.borrow().len(),
            tracked_objects: self.inner.tracked.borrow().len(),
            destructors: self.inner.teardown.borrow().len(),
            callbacks: self
                .inner
                .callbacks
                .borrow()
                .iter()
                .filter(|slot| slot.function.is_some())
                .count(),
            modules: self.inner.modules.borrow().len(),
            pending_tasks: self.inner.tasks.len(),
            live_objects: self.realm().live_objects(),
            call_arena_bytes: self.call_arena().allocated_bytes(),
            context_arena_bytes: self.context_arena().allocated_bytes(),
        }
    }

    /// Tears the context down.
    ///
    /// Destructors run first, newest first, while the context is still
    /// usable. Then identity-mapped objects lose their native handles,
    /// tracked objects are freed, and modules, callbacks and arenas are
    /// released. The outer scope, if held, is given back last.
    pub fn destroy(&self) -> ContextResult<TeardownReport> {
        self.ensure_live()?;
        if self.depth() > 0 {
            return Err(ContextError::Busy(self.depth()));
        }
        let mut report = TeardownReport::default();

        loop {
            let next = self.inner.teardown.borrow_mut().pop();
            let Some(entry) = next else { break };
            match entry {
                Teardown::Hook { hook, ptr, path } => hook(self, ptr, path),
                Teardown::Custom(f) => f(self),
            }
            report.destructors += 1;
        }

        self.inner.destroyed.set(true);
        let realm = self.realm();

        let identity = std::mem::take(&mut *self.inner.identity.borrow_mut());
        for entry in identity.values() {
            realm.set_internal(entry.object, None);
            realm.set_interceptors(entry.object, None);
        }
        report.handles = identity.len();
        drop(identity);
        for (object, _) in self.inner.empty_objects.borrow_mut().drain().map(|(_, entry)| entry) {
            realm.set_interceptors(object, None);
        }

        let tracked = std::mem::take(&mut *self.inner.tracked.borrow_mut());
        report.tracked = tracked.into_iter().filter(|object| realm.free(*object)).count();

        report.modules = self.inner.modules.borrow_mut().clear();
        report.callbacks = {
            let mut callbacks = self.inner.callbacks.borrow_mut();
            let live = callbacks.iter().filter(|slot| slot.function.is_some()).count();
            callbacks.clear();
            live
        };
        let dropped_tasks = self.inner.tasks.close();

        let arena = &self.config().arena;
        self.call_arena().reset(arena.call_arena_retain);
        self.context_arena().reset(arena.context_arena_retain);

        if self.runtime().scope_holder() == Some(self.id()) {
            self.inner.runtime.inner.scope_holder.set(None);
        }

        info!(
            target: TARGET_CONTEXT,
            id = self.id(),
            destructors = report.destructors,
            handles = report.handles,
            tracked = report.tracked,
            modules = report.modules,
            callbacks = report.callbacks,
            dropped_tasks,
            "context destroyed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn runtime() -> Runtime<()> {
        let bindings = Bindings::build(vec![
            TypeBuilder::<(), Window>::marker("Window").build(),
            TypeBuilder::<(), Point>::new("Point")
                .constructor(|x: i32| Point { x })
                .member("get_x", Point::x)
                .build(),
        ])
        .unwrap();
        Runtime::new(bindings, RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_single_main_world() {
        let runtime = runtime();
        let main = Context::create(&runtime, Window, (), ContextOptions::main()).unwrap();
        assert_eq!(runtime.scope_holder(), Some(main.id()));
        assert!(matches!(
            Context::create(&runtime, Window, (), ContextOptions::main()),
            Err(ContextError::ScopeHeld(id)) if id == main.id()
        ));
        let isolated = Context::create(&runtime, Window, (), ContextOptions::isolated()).unwrap();
        assert_eq!(runtime.scope_holder(), Some(main.id()));

        main.destroy().unwrap();
        assert_eq!(runtime.scope_holder(), None);
        drop(isolated);
        let again = Context::create(&runtime, Window, (), ContextOptions::main()).unwrap();
        assert_eq!(runtime.scope_holder(), Some(again.id()));
    }

    #[test]
    fn test_unregistered_global() {
        struct Stranger;
        assert!(matches!(
            Context::create(&runtime(), Stranger, (), ContextOptions::isolated()),
            Err(ContextError::UnregisteredGlobal(_))
        ));
    }

    #[test]
    fn test_classes_are_bound_on_the_global() {
        let ctx = Context::create(&runtime(), Window, (), ContextOptions::isolated()).unwrap();
        let point = ctx.construct("Point", vec![Value::Int(4)]).unwrap();
        let x = ctx.get(point.as_object().unwrap(), "x").unwrap();
        assert_eq!(x, Value::Int(4));
        assert!(ctx.instance_of(&point, "Point").unwrap());
        assert!(!ctx.instance_of(&point, "Window").unwrap());
        assert_eq!(ctx.inspect(&point).class_name, "Point");
        assert!(ctx.global_native::<Window>().is_ok());
    }

    #[test]
    fn test_released_callback_never_reaches_the_next_one() {
        let ctx = Context::create(&runtime(), Window, (), ContextOptions::isolated()).unwrap();
        let a = ctx.new_function("a", |_, _| Ok(Value::string("A")));
        let b = ctx.new_function("b", |_, _| Ok(Value::string("B")));

        let id_a = ctx.persist(a);
        assert!(ctx.release_callback(id_a));
        let id_b = ctx.persist(b);
        assert_eq!(id_b.slot, id_a.slot);
        assert_ne!(id_b, id_a);

        assert_eq!(ctx.invoke_callback(id_a, vec![]).unwrap(), None);
        assert!(!ctx.release_callback(id_a));
        assert_eq!(ctx.invoke_callback(id_b, vec![]).unwrap(), Some(Value::string("B")));
        assert_eq!(ctx.stats().callbacks, 1);
    }

    #[test]
    fn test_reset_keeps_slot_versions() {
        let ctx = Context::create(&runtime(), Window, (), ContextOptions::isolated()).unwrap();
        let f = ctx.new_function("f", |_, _| Ok(Value::Int(1)));
        let before = ctx.persist(f);
        ctx.reset();
        let after = ctx.persist(f);
        assert_eq!(after.slot, before.slot);
        assert_eq!(ctx.invoke_callback(before, vec![]).unwrap(), None);
        assert_eq!(ctx.invoke_callback(after, vec![]).unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_runtime_rejects_invalid_config() {
        let bindings = Bindings::build(vec![TypeBuilder::<(), Window>::marker("Window").build()]).unwrap();
        let mut config = RuntimeConfig::default();
        config.dispatch.max_call_depth = 0;
        assert!(matches!(
            Runtime::new(bindings, config),
            Err(crate::core::error::ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_destroy_twice() {
        let ctx = Context::create(&runtime(), Window, (), ContextOptions::isolated()).unwrap();
        ctx.destroy().unwrap();
        assert!(matches!(ctx.destroy(), Err(ContextError::Destroyed)));
    }
}
