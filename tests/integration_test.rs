// 集成测试

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use script_bindings::config::{ConfigError, LogLevel};
use script_bindings::context::{ArenaSlot, MemoryLoader};
use script_bindings::core::error::ModuleError;
use script_bindings::core::logging;
use script_bindings::engine::CallInfo;
use script_bindings::marshal::json_to_value;
use script_bindings::prelude::*;
use script_bindings::registry::Subtype;

#[derive(Default)]
struct Page {
    arena: ArenaSlot,
    log: RefCell<Vec<String>>,
}

impl HostState for Page {
    fn call_arena_slot(&self) -> Option<&ArenaSlot> {
        Some(&self.arena)
    }
}

#[derive(Default)]
struct Window;

#[derive(Default)]
struct Scratch;

#[derive(Default)]
struct EventTarget {
    listeners: Vec<String>,
}

impl EventTarget {
    fn listen(&mut self, event: String) -> u32 {
        self.listeners.push(event);
        self.listeners.len() as u32
    }
}

#[repr(C)]
struct Node {
    target: EventTarget,
    name: String,
}

impl Node {
    fn new(name: &str) -> Self {
        Node {
            target: EventTarget::default(),
            name: name.to_string(),
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Embeds<EventTarget> for Node {
    fn parent(&self) -> &EventTarget {
        &self.target
    }

    fn parent_mut(&mut self) -> &mut EventTarget {
        &mut self.target
    }
}

#[repr(C)]
struct Element {
    node: Node,
    tag: String,
}

impl Element {
    fn new(tag: String) -> Self {
        Element {
            node: Node::new(&tag),
            tag,
        }
    }

    fn tag(&self) -> String {
        self.tag.clone()
    }

    fn fail(&self) -> Result<(), DomError> {
        Err(DomError::HierarchyRequest)
    }
}

impl Embeds<Node> for Element {
    fn parent(&self) -> &Node {
        &self.node
    }

    fn parent_mut(&mut self) -> &mut Node {
        &mut self.node
    }
}

struct Widget {
    base: Native<Node>,
}

impl Delegates<Node> for Widget {
    fn parent(&self) -> Native<Node> {
        self.base.clone()
    }
}

#[derive(Debug)]
enum DomError {
    HierarchyRequest,
}

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the operation would yield an incorrect node tree")
    }
}

impl ErrorSet for DomError {
    fn name(&self) -> &'static str {
        match self {
            DomError::HierarchyRequest => "HierarchyRequestError",
        }
    }
}

struct DomException {
    name: String,
    message: String,
}

impl DomException {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

impl NativeException for DomException {
    type Error = DomError;

    fn from_error(error: &DomError, diagnostic: &str) -> Self {
        DomException {
            name: error.name().to_string(),
            message: format!("{diagnostic}: {error}"),
        }
    }
}

struct List {
    items: Vec<i32>,
}

impl List {
    fn first(&self) -> Option<i32> {
        self.items.first().copied()
    }

    fn len(&self) -> u32 {
        self.items.len() as u32
    }
}

struct Gauge {
    level: i32,
}

#[derive(Default)]
struct Storage {
    entries: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct Rect {
    width: u32,
    height: u32,
}

fn area(rect: Json<Rect>) -> u32 {
    rect.0.width * rect.0.height
}

fn bytes(count: u8) -> TypedBuffer<u8> {
    TypedBuffer((0..count).collect())
}

fn sum(values: TypedBuffer<u8>) -> u32 {
    values.0.iter().map(|&v| u32::from(v)).sum()
}

fn outer(state: State<Page>, ctx: Context<Page>, callback: Function) -> Result<bool, CallError> {
    let arena = state.arena.get().ok_or(CallError::InvalidReceiver)?;
    let scratch = arena.alloc(String::from("outer"))?;
    callback.call(&ctx, ())?;
    let intact = arena.with(scratch, |s| s == "outer").unwrap_or(false);
    Ok(intact && arena.len() == 2)
}

fn inner(state: State<Page>) -> Result<u32, CallError> {
    let arena = state.arena.get().ok_or(CallError::InvalidReceiver)?;
    arena.alloc([0u8; 16])?;
    Ok(arena.len() as u32)
}

fn relay(ctx: Context<Page>, f: Function) -> Result<Value, CallError> {
    f.call(&ctx, (f,))
}

fn spawn(tag: String) -> Owned<Element> {
    Owned(Element::new(tag))
}

native_union! {
    #[derive(Debug, PartialEq)]
    enum ColorOrNumber {
        Color(String),
        Number(i32),
        Flag(bool),
    }
}

fn declarations() -> Vec<script_bindings::registry::TypeDecl<Page>> {
    vec![
        TypeBuilder::<Page, Window>::marker("Window").build(),
        TypeBuilder::<Page, Scratch>::marker("Scratch")
            .static_member("_outer", outer)
            .static_member("_inner", inner)
            .static_member("_area", area)
            .static_member("_bytes", bytes)
            .static_member("_sum", sum)
            .static_member("_relay", relay)
            .static_member("_spawn", spawn)
            .build(),
        TypeBuilder::<Page, EventTarget>::new("EventTarget")
            .member("_listen", EventTarget::listen)
            .build(),
        TypeBuilder::<Page, Node>::new("Node")
            .subtype(Subtype::Node)
            .embeds::<EventTarget>()
            .member("get_nodeName", Node::name)
            .throws::<DomException>()
            .build(),
        TypeBuilder::<Page, Element>::new("Element")
            .embeds::<Node>()
            .constructor(Element::new)
            .member("get_tagName", Element::tag)
            .member("_fail", Element::fail)
            .on_destroy(|ctx: &Context<Page>, element: Native<Element>| {
                let tag = element.with(|e| e.tag.clone()).unwrap_or_default();
                ctx.state().log.borrow_mut().push(tag);
            })
            .build(),
        TypeBuilder::<Page, Widget>::new("Widget")
            .delegates::<Node>()
            .build(),
        TypeBuilder::<Page, DomException>::new("DOMException")
            .subtype(Subtype::Error)
            .member("get_name", DomException::name)
            .member("get_message", DomException::message)
            .build(),
        TypeBuilder::<Page, List>::new("List")
            .constructor(|items: Vec<i32>| List { items })
            .member("_first", List::first)
            .member("get_length", List::len)
            .indexed_getter(|list: &List, index| list.items.get(index as usize).copied())
            .indexed_setter(|list: &mut List, index, value: i32| match list.items.get_mut(index as usize) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            })
            .build(),
        TypeBuilder::<Page, Gauge>::new("Gauge")
            .constructor(|level: i32| Gauge { level })
            .on_attach(|ctx: &Context<Page>, gauge: Native<Gauge>| {
                let level = gauge.with(|g| g.level)?;
                if level < 0 {
                    return Err(DomError::HierarchyRequest.into());
                }
                ctx.state().log.borrow_mut().push(format!("attached {level}"));
                Ok(())
            })
            .on_destroy(|ctx: &Context<Page>, gauge: Native<Gauge>| {
                let level = gauge.with(|g| g.level).unwrap_or_default();
                ctx.state().log.borrow_mut().push(format!("released {level}"));
            })
            .build(),
        TypeBuilder::<Page, Storage>::new("Storage")
            .constructor(Storage::default)
            .named_getter(|storage: &Storage, name| storage.entries.get(name).cloned())
            .named_setter(|storage: &mut Storage, name, value: String| {
                storage.entries.insert(name.to_string(), value);
                true
            })
            .named_deleter(|storage: &mut Storage, name| storage.entries.remove(name).map(|_| true))
            .build(),
    ]
}

fn runtime() -> Runtime<Page> {
    runtime_with(RuntimeConfig::default())
}

fn runtime_with(config: RuntimeConfig) -> Runtime<Page> {
    logging::init(&config.logging);
    let bindings = Bindings::build(declarations()).expect("bindings build");
    Runtime::new(bindings, config).expect("runtime")
}

fn context() -> Context<Page> {
    Context::create(&runtime(), Window, Page::default(), ContextOptions::isolated()).expect("context")
}

fn class_object(ctx: &Context<Page>, name: &str) -> Value {
    ctx.get(ctx.global(), name).expect("class on global")
}

#[test]
fn test_construct_and_call_methods() {
    let ctx = context();
    let list = ctx
        .construct("List", vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        .unwrap();
    assert_eq!(ctx.invoke(&list, "first", vec![]).unwrap(), Value::Int(1));
    assert_eq!(ctx.get(list.as_object().unwrap(), "length").unwrap(), Value::Int(3));
    assert!(ctx.instance_of(&list, "List").unwrap());

    let array = ctx.realm().create_array(vec![Value::Int(9)]);
    let from_array = ctx.construct("List", vec![Value::Object(array)]).unwrap();
    assert_eq!(ctx.invoke(&from_array, "first", vec![]).unwrap(), Value::Int(9));
}

#[test]
fn test_indexed_getter_falls_through() {
    let ctx = context();
    let list = ctx
        .construct("List", vec![Value::Int(4), Value::Int(5)])
        .unwrap()
        .as_object()
        .unwrap();
    assert_eq!(ctx.get(list, 1u32).unwrap(), Value::Int(5));
    assert_eq!(ctx.get(list, 7u32).unwrap(), Value::Undefined);
}

#[test]
fn test_indexed_setter() {
    let ctx = context();
    let list = ctx
        .construct("List", vec![Value::Int(4), Value::Int(5)])
        .unwrap()
        .as_object()
        .unwrap();
    ctx.set(list, 1u32, Value::Int(42)).unwrap();
    assert_eq!(ctx.get(list, 1u32).unwrap(), Value::Int(42));
    let native = ctx.resolve_receiver::<List>(&Value::Object(list)).unwrap();
    assert_eq!(native.with(|l| l.items.clone()).unwrap(), vec![4, 42]);

    // unhandled indices become ordinary properties
    ctx.set(list, 9u32, Value::Int(7)).unwrap();
    assert_eq!(ctx.get(list, 9u32).unwrap(), Value::Int(7));
    assert_eq!(native.with(|l| l.items.len()).unwrap(), 2);

    let err = ctx.set(list, 0u32, Value::string("four")).unwrap_err();
    let (name, _) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "TypeError");
    assert_eq!(native.with(|l| l.items[0]).unwrap(), 4);
}

#[test]
fn test_named_hooks() {
    let ctx = context();
    let storage = ctx.construct("Storage", vec![]).unwrap().as_object().unwrap();
    ctx.set(storage, "theme", Value::string("dark")).unwrap();
    assert_eq!(ctx.get(storage, "theme").unwrap(), Value::string("dark"));
    assert!(ctx.delete(storage, "theme").unwrap());
    assert_eq!(ctx.get(storage, "theme").unwrap(), Value::Undefined);
}

#[test]
fn test_method_on_foreign_receiver() {
    let ctx = context();
    let list = ctx.construct("List", vec![Value::Int(1)]).unwrap();
    let first = ctx.get(list.as_object().unwrap(), "first").unwrap().as_object().unwrap();
    let plain = ctx.realm().create_object(Some(ctx.realm().intrinsics().object_prototype));

    let err = ctx.call(first, Value::Object(plain), vec![]).unwrap_err();
    let (name, message) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "Error");
    assert_eq!(message, "InvalidArgument");
}

#[test]
fn test_illegal_constructor_leaves_no_trace() {
    let ctx = context();
    let before = ctx.stats();
    let err = ctx.construct("EventTarget", vec![]).unwrap_err();
    let (name, message) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "TypeError");
    assert_eq!(message, "Illegal constructor");

    let after = ctx.stats();
    assert_eq!(after.tracked_objects, before.tracked_objects);
    assert_eq!(after.identity_entries, before.identity_entries);
}

#[test]
fn test_attach_hook_runs_after_binding() {
    let ctx = context();
    let before = ctx.stats();
    let gauge = ctx.construct("Gauge", vec![Value::Int(3)]).unwrap();
    assert_eq!(*ctx.state().log.borrow(), vec!["attached 3"]);
    assert_eq!(ctx.stats().identity_entries, before.identity_entries + 1);
    assert_eq!(ctx.stats().destructors, before.destructors + 1);

    let native = ctx.resolve_receiver::<Gauge>(&gauge).unwrap();
    assert_eq!(ctx.expose(&native).unwrap(), gauge.as_object().unwrap());
}

#[test]
fn test_failing_attach_hook_leaves_object_unbound() {
    let ctx = context();
    let before = ctx.stats();
    let err = ctx.construct("Gauge", vec![Value::Int(-1)]).unwrap_err();
    let (name, message) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "Error");
    assert_eq!(message, "HierarchyRequestError");

    let exposed = Native::new(Gauge { level: -2 });
    assert!(ctx.expose(&exposed).is_err());
    assert!(ctx.expose(&exposed).is_err());

    let after = ctx.stats();
    assert_eq!(after.identity_entries, before.identity_entries);
    assert_eq!(after.tracked_objects, before.tracked_objects);
    assert_eq!(after.destructors, before.destructors);
    assert!(ctx.state().log.borrow().is_empty());

    ctx.destroy().unwrap();
    assert!(ctx.state().log.borrow().is_empty());
}

#[test]
fn test_call_depth_limit() {
    let mut config = RuntimeConfig::default();
    config.dispatch.max_call_depth = 4;
    let runtime = runtime_with(config);
    let ctx = Context::create(&runtime, Window, Page::default(), ContextOptions::isolated()).unwrap();
    let calls = std::rc::Rc::new(std::cell::Cell::new(0));
    let counter = calls.clone();
    let bounce = ctx.new_function("bounce", move |ctx: &Context<Page>, info: CallInfo| {
        counter.set(counter.get() + 1);
        let scratch = ctx.get(ctx.global(), "Scratch")?;
        ctx.invoke(&scratch, "relay", info.args)
    });

    let scratch = class_object(&ctx, "Scratch");
    let err = ctx
        .invoke(&scratch, "relay", vec![Value::Object(bounce)])
        .unwrap_err();
    let (name, message) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "RangeError");
    assert_eq!(message, "Maximum call stack size exceeded");
    assert_eq!(calls.get(), 4);
    assert_eq!(ctx.depth(), 0);
    assert!(ctx.call_arena().is_empty());
}

#[test]
fn test_owned_return_is_promoted() {
    let ctx = context();
    let before = ctx.stats();
    let scratch = class_object(&ctx, "Scratch");
    let element = ctx.invoke(&scratch, "spawn", vec![Value::string("li")]).unwrap();

    assert!(ctx.instance_of(&element, "Element").unwrap());
    let object = element.as_object().unwrap();
    assert_eq!(ctx.get(object, "tagName").unwrap(), Value::string("li"));

    let after = ctx.stats();
    assert_eq!(after.tracked_objects, before.tracked_objects + 1);
    assert_eq!(after.identity_entries, before.identity_entries + 1);
    assert!(after.context_arena_bytes > before.context_arena_bytes);

    let native = ctx.resolve_receiver::<Element>(&element).unwrap();
    assert_eq!(ctx.expose(&native).unwrap(), object);
    assert_eq!(ctx.expose(&native.upcast::<Node>()).unwrap(), object);

    ctx.destroy().unwrap();
    assert_eq!(*ctx.state().log.borrow(), vec!["li"]);
}

#[test]
fn test_embedded_prototype_chain() {
    let ctx = context();
    let element = ctx.construct("Element", vec![Value::string("div")]).unwrap();
    assert!(ctx.instance_of(&element, "Node").unwrap());
    assert!(ctx.instance_of(&element, "EventTarget").unwrap());
    assert!(!ctx.instance_of(&element, "List").unwrap());

    let object = element.as_object().unwrap();
    assert_eq!(ctx.get(object, "tagName").unwrap(), Value::string("div"));
    assert_eq!(ctx.get(object, "nodeName").unwrap(), Value::string("div"));
    assert_eq!(ctx.invoke(&element, "listen", vec![Value::string("click")]).unwrap(), Value::Int(1));

    let native = ctx.resolve_receiver::<Element>(&element).unwrap();
    let listeners = native.with(|e| e.node.target.listeners.clone()).unwrap();
    assert_eq!(listeners, vec!["click".to_string()]);
}

#[test]
fn test_delegated_prototype() {
    let ctx = context();
    let base = Native::new(Node::new("base"));
    let widget = Native::new(Widget { base: base.clone() });
    let object = Value::Object(ctx.expose(&widget).unwrap());

    assert!(ctx.instance_of(&object, "Node").unwrap());
    assert_eq!(ctx.get(object.as_object().unwrap(), "nodeName").unwrap(), Value::string("base"));
    ctx.invoke(&object, "listen", vec![Value::string("focus")]).unwrap();
    assert_eq!(base.with(|n| n.target.listeners.len()).unwrap(), 1);
}

#[test]
fn test_identity_is_stable() {
    let ctx = context();
    let element = Native::new(Element::new("span".to_string()));
    let first = ctx.expose(&element).unwrap();
    let second = ctx.expose(&element.clone()).unwrap();
    assert_eq!(first, second);

    let other = Native::new(Element::new("span".to_string()));
    assert_ne!(ctx.expose(&other).unwrap(), first);
}

#[test]
fn test_prototype_view_is_retagged() {
    let ctx = context();
    let element = Native::new(Element::new("p".to_string()));
    let as_node = ctx.expose(&element.upcast::<Node>()).unwrap();
    assert!(!ctx.instance_of(&Value::Object(as_node), "Element").unwrap());

    let as_element = ctx.expose(&element).unwrap();
    assert_eq!(as_node, as_element);
    assert!(ctx.instance_of(&Value::Object(as_element), "Element").unwrap());
    assert_eq!(ctx.get(as_element, "tagName").unwrap(), Value::string("p"));
}

#[test]
fn test_custom_exception_from_ancestor() {
    let ctx = context();
    let element = ctx.construct("Element", vec![Value::string("ul")]).unwrap();
    let err = ctx.invoke(&element, "fail", vec![]).unwrap_err();

    assert!(ctx.instance_of(err.value(), "DOMException").unwrap());
    let exception = err.value().as_object().unwrap();
    assert_eq!(ctx.get(exception, "name").unwrap(), Value::string("HierarchyRequestError"));
    let message = ctx.get(exception, "message").unwrap();
    assert!(message.as_str().unwrap().starts_with("Element.fail"));
}

#[test]
fn test_argument_errors() {
    let ctx = context();
    let scratch = class_object(&ctx, "Scratch");
    let err = ctx.invoke(&scratch, "area", vec![]).unwrap_err();
    let (name, message) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "TypeError");
    assert!(message.contains("1 argument required, but only 0 present"), "{message}");

    let err = ctx.invoke(&scratch, "sum", vec![Value::Int(3)]).unwrap_err();
    let (name, _) = ctx.realm().error_parts(err.value()).unwrap();
    assert_eq!(name, "TypeError");
}

#[test]
fn test_records_and_buffers() {
    let ctx = context();
    let scratch = class_object(&ctx, "Scratch");
    let rect = json_to_value(&ctx, &serde_json::json!({"width": 3, "height": 4})).unwrap();
    assert_eq!(ctx.invoke(&scratch, "area", vec![rect]).unwrap(), Value::Int(12));

    let buffer = ctx.invoke(&scratch, "bytes", vec![Value::Int(4)]).unwrap();
    assert!(ctx.realm().is_typed_array(buffer.as_object().unwrap()));
    assert_eq!(ctx.invoke(&scratch, "sum", vec![buffer]).unwrap(), Value::Int(6));
}

#[test]
fn test_nested_calls_keep_outer_scratch() {
    let ctx = context();
    let callback = ctx.new_function("callback", |ctx: &Context<Page>, _info: CallInfo| {
        let scratch = ctx.get(ctx.global(), "Scratch")?;
        ctx.invoke(&scratch, "inner", vec![])
    });
    let scratch = class_object(&ctx, "Scratch");
    let result = ctx
        .invoke(&scratch, "outer", vec![Value::Object(callback)])
        .unwrap();
    assert_eq!(result, Value::Bool(true));
    assert!(ctx.call_arena().is_empty());
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn test_callbacks_and_tasks() {
    let ctx = context();
    let seen = std::rc::Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let function = ctx.new_function("onDone", move |ctx: &Context<Page>, info: CallInfo| {
        let text = ctx.realm().display_string(info.args.first().unwrap_or(&Value::Undefined));
        sink.borrow_mut().push(text);
        Ok(Value::Undefined)
    });
    let id = ctx.persist(function);
    assert_eq!(ctx.invoke_callback(id, vec![Value::string("direct")]).unwrap(), Some(Value::Undefined));

    let sender = ctx.task_sender();
    let worker = std::thread::spawn(move || sender.complete(id, serde_json::json!("threaded")));
    assert!(worker.join().unwrap());
    let report = ctx.run_pending();
    assert_eq!(report.invoked, 1);
    assert_eq!(report.stale, 0);
    assert_eq!(*seen.borrow(), vec!["direct".to_string(), "threaded".to_string()]);

    ctx.reset();
    assert_eq!(ctx.invoke_callback(id, vec![]).unwrap(), None);
    ctx.task_sender().complete(id, serde_json::Value::Null);
    let report = ctx.run_pending();
    assert_eq!(report.invoked, 0);
    assert_eq!(report.stale, 1);
    assert!(!ctx.release_callback(id));
}

#[test]
fn test_completions_after_teardown_are_refused() {
    let ctx = context();
    let function = ctx.new_function("late", |_: &Context<Page>, _: CallInfo| Ok(Value::Undefined));
    let id = ctx.persist(function);
    let sender = ctx.task_sender();
    assert!(sender.complete(id, serde_json::json!(1)));

    ctx.destroy().unwrap();
    assert!(!sender.complete(id, serde_json::json!(2)));
    assert!(!ctx.task_sender().complete(id, serde_json::json!(3)));
    assert_eq!(ctx.stats().pending_tasks, 0);
    assert_eq!(ctx.run_pending(), Default::default());
}

#[test]
fn test_teardown_order() {
    let ctx = context();
    ctx.construct("Element", vec![Value::string("a")]).unwrap();
    ctx.construct("Element", vec![Value::string("b")]).unwrap();
    ctx.on_teardown(|ctx: &Context<Page>| ctx.state().log.borrow_mut().push("custom".to_string()));

    let exposed = Native::new(Element::new("c".to_string()));
    let object = ctx.expose(&exposed).unwrap();

    let report = ctx.destroy().unwrap();
    assert_eq!(report.destructors, 4);
    assert_eq!(*ctx.state().log.borrow(), vec!["c", "custom", "b", "a"]);
    assert!(ctx.is_destroyed());
    assert!(ctx.realm().internal(object).is_none());
    assert!(ctx.construct("Element", vec![Value::string("d")]).is_err());
    assert!(matches!(ctx.destroy(), Err(ContextError::Destroyed)));
}

#[test]
fn test_main_world_scope_is_exclusive() {
    let runtime = runtime();
    let main = Context::create(&runtime, Window, Page::default(), ContextOptions::main()).unwrap();
    let second = Context::create(&runtime, Window, Page::default(), ContextOptions::main());
    assert!(matches!(second, Err(ContextError::ScopeHeld(id)) if id == main.id()));

    let isolated = Context::create(&runtime, Window, Page::default(), ContextOptions::isolated());
    assert!(isolated.is_ok());

    main.destroy().unwrap();
    assert!(Context::create(&runtime, Window, Page::default(), ContextOptions::main()).is_ok());
}

#[test]
fn test_module_graph_with_cycle() {
    let loader = MemoryLoader::new()
        .with("/app/main.js", "import { a } from './lib/a.js';\nexport default a;\n")
        .with("/app/lib/a.js", "import { b } from './b.js';\nexport const a = 1;\n")
        .with("/app/lib/b.js", "import { a } from './a.js';\nexport const b = 2;\n");
    let options = ContextOptions::isolated().with_loader(loader);
    let ctx = Context::create(&runtime(), Window, Page::default(), options).unwrap();

    let main = ctx.load_module("/app/main.js", None).unwrap();
    assert_eq!(main.requests, vec!["./lib/a.js".to_string()]);
    assert_eq!(ctx.module_count(), 3);

    let a = ctx.resolve_dependency(main.id, "./lib/a.js").unwrap();
    assert_eq!(&*a.specifier, "/app/lib/a.js");
    assert_eq!(ctx.module(a.id).unwrap().specifier, a.specifier);

    let missing = ctx.load_module("./nope.js", Some("/app/main.js"));
    assert!(matches!(
        missing,
        Err(ContextError::Module(ModuleError::Fetch { ref specifier, .. })) if specifier == "/app/nope.js"
    ));
}

#[test]
fn test_failed_import_is_not_cached() {
    let loader = MemoryLoader::new()
        .with("/a.js", "import { b } from './b.js';\nexport const a = b;\n")
        .with("/c.js", "export const c = 3;\n");
    let options = ContextOptions::isolated().with_loader(loader);
    let ctx = Context::create(&runtime(), Window, Page::default(), options).unwrap();
    ctx.load_module("/c.js", None).unwrap();

    for _ in 0..2 {
        let err = ctx.load_module("/a.js", None).unwrap_err();
        assert!(matches!(
            err,
            ContextError::Module(ModuleError::Fetch { ref specifier, .. }) if specifier == "/b.js"
        ));
        assert_eq!(ctx.module_count(), 1);
    }
}

#[test]
fn test_runtime_validates_config() {
    let bindings = Bindings::build(declarations()).unwrap();
    let mut config = RuntimeConfig::default();
    config.dispatch.max_call_depth = 0;
    assert!(matches!(
        Runtime::new(bindings, config),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_config_round_trip() -> anyhow::Result<()> {
    let mut config = RuntimeConfig::default();
    config.dispatch.max_call_depth = 32;
    config.logging.level = LogLevel::Debug;
    let text = toml::to_string(&config)?;
    let parsed = RuntimeConfig::from_toml_str(&text)?;
    assert_eq!(parsed, config);

    parsed.validate()?;
    let mut broken = parsed.clone();
    broken.dispatch.max_call_depth = 0;
    assert!(matches!(broken.validate(), Err(ConfigError::ValidationError(_))));

    let mut overridden = RuntimeConfig::default();
    overridden.apply_overrides(|key| match key {
        "BINDINGS_MAX_CALL_DEPTH" => Some("12".to_string()),
        "BINDINGS_LOG_LEVEL" => Some("warn".to_string()),
        _ => None,
    });
    assert_eq!(overridden.dispatch.max_call_depth, 12);
    assert_eq!(overridden.logging.level, LogLevel::Warn);
    Ok(())
}

#[test]
fn test_union_selection() {
    let ctx = context();
    let pick = |value: Value| ColorOrNumber::from_value(&ctx, &value).unwrap();
    assert_eq!(pick(Value::string("red")), ColorOrNumber::Color("red".to_string()));
    assert_eq!(pick(Value::Int(5)), ColorOrNumber::Number(5));
    assert_eq!(pick(Value::Number(2.5)), ColorOrNumber::Number(2));
    assert_eq!(pick(Value::Bool(true)), ColorOrNumber::Flag(true));
    assert_eq!(pick(Value::string("5")), ColorOrNumber::Color("5".to_string()));
}

proptest! {
    #[test]
    fn prop_i32_round_trip(x in any::<i32>()) {
        let ctx = context();
        let value = x.to_value(&ctx).unwrap();
        prop_assert_eq!(i32::from_value(&ctx, &value).unwrap(), x);
    }

    #[test]
    fn prop_u64_round_trip(x in any::<u64>()) {
        let ctx = context();
        let value = x.to_value(&ctx).unwrap();
        prop_assert_eq!(u64::from_value(&ctx, &value).unwrap(), x);
    }

    #[test]
    fn prop_f64_round_trip(x in any::<f64>()) {
        let ctx = context();
        let value = x.to_value(&ctx).unwrap();
        prop_assert_eq!(f64::from_value(&ctx, &value).unwrap().to_bits(), x.to_bits());
    }

    #[test]
    fn prop_string_round_trip(s in ".*") {
        let ctx = context();
        let value = s.clone().to_value(&ctx).unwrap();
        prop_assert_eq!(String::from_value(&ctx, &value).unwrap(), s);
    }

    #[test]
    fn prop_u8_rejects_out_of_range(x in 256i32..) {
        let ctx = context();
        prop_assert!(u8::from_value(&ctx, &Value::Int(x)).is_err());
    }

    #[test]
    fn prop_union_prefers_exact(n in any::<i32>(), flag in any::<bool>()) {
        let ctx = context();
        prop_assert_eq!(ColorOrNumber::from_value(&ctx, &Value::Int(n)).unwrap(), ColorOrNumber::Number(n));
        prop_assert_eq!(ColorOrNumber::from_value(&ctx, &Value::Bool(flag)).unwrap(), ColorOrNumber::Flag(flag));
    }
}
