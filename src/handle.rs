//! Tagged handles and reverse resolution.
//!
//! Every script object that wraps native data carries a [`TaggedHandle`] in
//! its internal slot: the registered type of the data, the shared native
//! allocation and the projection path from that allocation to the data.
//! [`resolve`] turns a handle back into data of an expected type, walking the
//! prototype table when the handle's own type is more derived.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::core::error::BindingError;
use crate::registry::upcast::{Delegates, Embeds, Projection};
use crate::registry::{ProtoLink, Subtype, TypeIndex, TypeRegistry};

/// Shared native allocation.
#[derive(Clone)]
pub struct NativePtr(Rc<RefCell<dyn Any>>);

impl NativePtr {
    pub fn new<T: 'static>(value: T) -> Self {
        NativePtr(Rc::new(RefCell::new(value)))
    }

    /// Address of the allocation itself (not of a projected view).
    pub fn allocation(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &NativePtr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Address of the data reached through `path`.
    pub(crate) fn address(&self, path: &[Projection]) -> Result<usize, BindingError> {
        let view = self.view(path)?;
        Ok(&*view as *const dyn Any as *const () as usize)
    }

    fn view(&self, path: &[Projection]) -> Result<Ref<'_, dyn Any + 'static>, BindingError> {
        let mut view = self
            .0
            .try_borrow()
            .map_err(|_| BindingError::AlreadyMutablyBorrowed)?;
        for step in path {
            view = Ref::filter_map(view, |any| (step.shared)(any)).map_err(|_| BindingError::Projection)?;
        }
        Ok(view)
    }

    fn view_mut(&self, path: &[Projection]) -> Result<RefMut<'_, dyn Any + 'static>, BindingError> {
        let mut view = self
            .0
            .try_borrow_mut()
            .map_err(|_| BindingError::AlreadyBorrowed)?;
        for step in path {
            view = RefMut::filter_map(view, |any| (step.exclusive)(any))
                .map_err(|_| BindingError::Projection)?;
        }
        Ok(view)
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.allocation())
    }
}

/// Typed view of native data: an allocation plus the projection path that
/// reaches a `T` inside it.
pub struct Native<T> {
    ptr: NativePtr,
    path: Rc<[Projection]>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Native<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr.clone(),
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> fmt::Debug for Native<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native")
            .field("type", &std::any::type_name::<T>())
            .field("ptr", &self.ptr)
            .field("depth", &self.path.len())
            .finish()
    }
}

impl<T: 'static> Native<T> {
    pub fn new(value: T) -> Self {
        Self::from_parts(NativePtr::new(value), Rc::from(Vec::new()))
    }

    pub(crate) fn from_parts(ptr: NativePtr, path: Rc<[Projection]>) -> Self {
        Self {
            ptr,
            path,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_parts(self) -> (NativePtr, Rc<[Projection]>) {
        (self.ptr, self.path)
    }

    pub(crate) fn ptr(&self) -> &NativePtr {
        &self.ptr
    }

    pub(crate) fn path(&self) -> &Rc<[Projection]> {
        &self.path
    }

    pub fn borrow(&self) -> Result<Ref<'_, T>, BindingError> {
        let view = self.ptr.view(&self.path)?;
        Ref::filter_map(view, |any| any.downcast_ref::<T>()).map_err(|_| BindingError::Downcast {
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>, BindingError> {
        let view = self.ptr.view_mut(&self.path)?;
        RefMut::filter_map(view, |any| any.downcast_mut::<T>()).map_err(|_| BindingError::Downcast {
            expected: std::any::type_name::<T>(),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, BindingError> {
        let value = self.borrow()?;
        Ok(f(&value))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, BindingError> {
        let mut value = self.borrow_mut()?;
        Ok(f(&mut value))
    }

    /// Address of the projected data. Two views of the same data agree;
    /// this is the identity map key.
    pub fn address(&self) -> Result<usize, BindingError> {
        self.ptr.address(&self.path)
    }

    pub fn ptr_eq(&self, other: &Native<T>) -> bool {
        match (self.address(), other.address()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.ptr.ptr_eq(&other.ptr) && self.path.len() == other.path.len(),
        }
    }

    /// Statically widens to an embedded prototype.
    pub fn upcast<P: 'static>(&self) -> Native<P>
    where
        T: Embeds<P>,
    {
        let mut path = self.path.to_vec();
        path.push(Projection::of::<T, P>());
        Native::from_parts(self.ptr.clone(), Rc::from(path))
    }

    /// Follows a delegated prototype.
    pub fn parent<P: 'static>(&self) -> Result<Native<P>, BindingError>
    where
        T: Delegates<P>,
    {
        let value = self.borrow()?;
        Ok(<T as Delegates<P>>::parent(&value))
    }
}

/// Internal-slot payload of a script object wrapping native data.
#[derive(Debug, Clone)]
pub struct TaggedHandle {
    pub type_index: TypeIndex,
    pub subtype: Option<Subtype>,
    pub(crate) ptr: NativePtr,
    pub(crate) path: Rc<[Projection]>,
}

impl TaggedHandle {
    pub(crate) fn new(type_index: TypeIndex, subtype: Option<Subtype>, ptr: NativePtr, path: Rc<[Projection]>) -> Self {
        Self {
            type_index,
            subtype,
            ptr,
            path,
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub ptr: NativePtr,
    pub path: Rc<[Projection]>,
    /// Prototype links crossed; zero on the fast path.
    pub steps: usize,
}

impl Resolved {
    pub fn into_native<T: 'static>(self) -> Native<T> {
        Native::from_parts(self.ptr, self.path)
    }
}

/// Reinterprets `handle` as data of type `expected`.
///
/// Equal indices resolve in O(1). Otherwise the prototype table is walked
/// upward: embedded links extend the projection path, indirect links borrow
/// the current view, read the parent pointer and restart the path there.
/// Reaching a root without meeting `expected` is a type mismatch.
pub fn resolve(
    registry: &TypeRegistry,
    handle: &TaggedHandle,
    expected: TypeIndex,
) -> Result<Resolved, BindingError> {
    if handle.type_index == expected {
        return Ok(Resolved {
            ptr: handle.ptr.clone(),
            path: handle.path.clone(),
            steps: 0,
        });
    }

    let mismatch = || BindingError::TypeMismatch {
        found: registry.meta(handle.type_index).name.to_string(),
        expected: registry.meta(expected).name.to_string(),
    };

    let mut ptr = handle.ptr.clone();
    let mut path: Vec<Projection> = handle.path.to_vec();
    let mut current = handle.type_index;
    let mut steps = 0;

    loop {
        let proto = registry.prototype_of(current);
        if proto == current || steps >= registry.len() {
            return Err(mismatch());
        }
        match registry.meta(current).link {
            ProtoLink::Embedded(projection) => path.push(projection),
            ProtoLink::Indirect(follow) => {
                let next = {
                    let view = ptr.view(&path)?;
                    follow(&*view).ok_or(BindingError::Projection)?
                };
                ptr = next.0;
                path = next.1.to_vec();
            }
            ProtoLink::None => return Err(mismatch()),
        }
        steps += 1;
        if proto == expected {
            return Ok(Resolved {
                ptr,
                path: Rc::from(path),
                steps,
            });
        }
        current = proto;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn test_borrow_rules_are_reported() {
        let native = Native::new(Counter { hits: 0 });
        let guard = native.borrow().unwrap();
        assert_eq!(native.borrow_mut().unwrap_err(), BindingError::AlreadyBorrowed);
        drop(guard);

        native.with_mut(|c| c.hits += 1).unwrap();
        let other = native.clone();
        let guard = other.borrow_mut().unwrap();
        assert_eq!(native.borrow().unwrap_err(), BindingError::AlreadyMutablyBorrowed);
        drop(guard);
        assert_eq!(native.with(|c| c.hits).unwrap(), 1);
    }

    #[test]
    fn test_wrong_type_is_a_downcast_error() {
        let native = Native::new(Counter { hits: 3 });
        let (ptr, path) = native.into_parts();
        let confused: Native<String> = Native::from_parts(ptr, path);
        assert!(matches!(confused.borrow(), Err(BindingError::Downcast { .. })));
    }

    #[test]
    fn test_address_is_stable_across_clones() {
        let native = Native::new(Counter { hits: 0 });
        let clone = native.clone();
        assert!(native.ptr_eq(&clone));
        assert!(!native.ptr_eq(&Native::new(Counter { hits: 0 })));
    }
}
