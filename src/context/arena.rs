use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::rc::Rc;

use crate::core::error::ArenaError;

/// Arena分配器
///
/// 每个槽位是独立的 `Rc<RefCell<T>>`，借用一个槽位不会阻止在同一Arena中继续分配，
/// 因此嵌套（重入）调用可以安全地共享调用Arena。
pub struct Arena {
    /// 标签（用于日志和错误）
    label: &'static str,
    /// 槽位
    slots: RefCell<Vec<Rc<dyn Any>>>,
    /// 已分配字节数
    bytes: Cell<usize>,
    /// 字节上限
    limit: Option<usize>,
    /// 当前代数，每次重置加一
    generation: Cell<u32>,
    /// 峰值字节数
    peak: Cell<usize>,
    /// 重置次数
    resets: Cell<u64>,
}

/// Arena中一个值的句柄，重置后失效
pub struct ArenaRef<T> {
    index: usize,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ArenaRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaRef<T> {}

impl<T> PartialEq for ArenaRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> fmt::Debug for ArenaRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaRef({}@{})", self.index, self.generation)
    }
}

impl Arena {
    pub fn new(label: &'static str, limit: Option<usize>) -> Self {
        Self {
            label,
            slots: RefCell::new(Vec::new()),
            bytes: Cell::new(0),
            limit,
            generation: Cell::new(0),
            peak: Cell::new(0),
            resets: Cell::new(0),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// 分配一个值
    pub fn alloc<T: 'static>(&self, value: T) -> Result<ArenaRef<T>, ArenaError> {
        let requested = size_of::<T>().max(1);
        let used = self.bytes.get();
        if let Some(limit) = self.limit {
            if used + requested > limit {
                return Err(ArenaError::OutOfMemory {
                    label: self.label,
                    requested,
                    used,
                    limit,
                });
            }
        }

        let mut slots = self.slots.borrow_mut();
        slots.push(Rc::new(RefCell::new(value)));
        self.bytes.set(used + requested);
        self.peak.set(self.peak.get().max(used + requested));
        Ok(ArenaRef {
            index: slots.len() - 1,
            generation: self.generation.get(),
            _marker: PhantomData,
        })
    }

    /// 取出槽位；句柄过期时返回 `None`
    pub fn get<T: 'static>(&self, handle: ArenaRef<T>) -> Option<Rc<RefCell<T>>> {
        if handle.generation != self.generation.get() {
            return None;
        }
        let slot = self.slots.borrow().get(handle.index)?.clone();
        slot.downcast::<RefCell<T>>().ok()
    }

    pub fn with<T: 'static, R>(&self, handle: ArenaRef<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        let cell = self.get(handle)?;
        let value = cell.try_borrow().ok()?;
        Some(f(&value))
    }

    pub fn with_mut<T: 'static, R>(&self, handle: ArenaRef<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let cell = self.get(handle)?;
        let mut value = cell.try_borrow_mut().ok()?;
        Some(f(&mut value))
    }

    /// 重置Arena (保留不超过 `retain_bytes` 的槽位容量)
    pub fn reset(&self, retain_bytes: usize) {
        let mut slots = self.slots.borrow_mut();
        slots.clear();
        slots.shrink_to(retain_bytes / size_of::<Rc<dyn Any>>());
        self.bytes.set(0);
        self.generation.set(self.generation.get().wrapping_add(1));
        self.resets.set(self.resets.get() + 1);
    }

    /// 获取已分配的总大小
    pub fn allocated_bytes(&self) -> usize {
        self.bytes.get()
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak.get()
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取槽位容量
    pub fn capacity(&self) -> usize {
        self.slots.borrow().capacity()
    }

    pub fn generation(&self) -> u32 {
        self.generation.get()
    }

    pub fn resets(&self) -> u64 {
        self.resets.get()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("label", &self.label)
            .field("slots", &self.len())
            .field("bytes", &self.bytes.get())
            .field("limit", &self.limit)
            .field("generation", &self.generation.get())
            .finish()
    }
}

/// 状态中的调用Arena槽位
///
/// 状态类型通过 [`HostState::call_arena_slot`](super::HostState::call_arena_slot)
/// 暴露该槽位后，每次分发调用都会把当前上下文的调用Arena填入。
#[derive(Default)]
pub struct ArenaSlot {
    arena: RefCell<Option<Rc<Arena>>>,
}

impl ArenaSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&self, arena: &Rc<Arena>) {
        let mut slot = self.arena.borrow_mut();
        match slot.as_ref() {
            Some(current) if Rc::ptr_eq(current, arena) => {}
            _ => *slot = Some(arena.clone()),
        }
    }

    pub fn get(&self) -> Option<Rc<Arena>> {
        self.arena.borrow().clone()
    }

    pub fn clear(&self) {
        self.arena.borrow_mut().take();
    }
}
