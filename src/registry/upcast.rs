//! Checked upcasts between a native type and its declared prototype.
//!
//! Each prototype link stores a pair of monomorphized function pointers
//! instead of a byte offset. Widening a handle applies them in order, each
//! one downcasting to the concrete type before handing out the parent.

use std::any::Any;
use std::rc::Rc;

use crate::handle::{Native, NativePtr};

pub type AnyRef<'a> = &'a (dyn Any + 'static);
pub type AnyMut<'a> = &'a mut (dyn Any + 'static);

/// A type that stores its prototype's data inline.
pub trait Embeds<P: 'static>: 'static {
    fn parent(&self) -> &P;
    fn parent_mut(&mut self) -> &mut P;
}

/// A type whose prototype's data lives in a separate native allocation.
pub trait Delegates<P: 'static>: 'static {
    fn parent(&self) -> Native<P>;
}

/// One embedded step of a widening path.
#[derive(Clone, Copy)]
pub struct Projection {
    pub(crate) shared: for<'a> fn(AnyRef<'a>) -> Option<AnyRef<'a>>,
    pub(crate) exclusive: for<'a> fn(AnyMut<'a>) -> Option<AnyMut<'a>>,
    pub(crate) target: &'static str,
}

impl Projection {
    pub fn of<T: Embeds<P>, P: 'static>() -> Self {
        Self {
            shared: project_shared::<T, P>,
            exclusive: project_exclusive::<T, P>,
            target: std::any::type_name::<P>(),
        }
    }

    /// Name of the type this step produces.
    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl std::fmt::Debug for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Projection(-> {})", self.target)
    }
}

/// An indirect step: reads the pointer to the parent allocation.
pub type Follow = for<'a> fn(AnyRef<'a>) -> Option<(NativePtr, Rc<[Projection]>)>;

pub fn follow_of<T: Delegates<P>, P: 'static>() -> Follow {
    follow::<T, P>
}

fn project_shared<T: Embeds<P>, P: 'static>(value: AnyRef<'_>) -> Option<AnyRef<'_>> {
    value
        .downcast_ref::<T>()
        .map(|this| <T as Embeds<P>>::parent(this) as AnyRef<'_>)
}

fn project_exclusive<T: Embeds<P>, P: 'static>(value: AnyMut<'_>) -> Option<AnyMut<'_>> {
    value
        .downcast_mut::<T>()
        .map(|this| <T as Embeds<P>>::parent_mut(this) as AnyMut<'_>)
}

fn follow<T: Delegates<P>, P: 'static>(value: AnyRef<'_>) -> Option<(NativePtr, Rc<[Projection]>)> {
    value
        .downcast_ref::<T>()
        .map(|this| <T as Delegates<P>>::parent(this).into_parts())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base {
        id: u32,
    }

    struct Derived {
        base: Base,
        extra: u32,
    }

    impl Embeds<Base> for Derived {
        fn parent(&self) -> &Base {
            &self.base
        }
        fn parent_mut(&mut self) -> &mut Base {
            &mut self.base
        }
    }

    #[test]
    fn test_projection_downcasts_before_widening() {
        let projection = Projection::of::<Derived, Base>();
        let mut derived = Derived {
            base: Base { id: 9 },
            extra: 1,
        };
        let base = (projection.shared)(&derived as AnyRef<'_>)
            .and_then(|any| any.downcast_ref::<Base>())
            .map(|base| base.id);
        assert_eq!(base, Some(9));

        if let Some(base) = (projection.exclusive)(&mut derived as AnyMut<'_>)
            .and_then(|any| any.downcast_mut::<Base>())
        {
            base.id = 10;
        }
        assert_eq!(derived.base.id, 10);
        assert_eq!(derived.extra, 1);

        // a value of the wrong concrete type is refused, not reinterpreted
        let unrelated = 5u32;
        assert!((projection.shared)(&unrelated as AnyRef<'_>).is_none());
    }
}
