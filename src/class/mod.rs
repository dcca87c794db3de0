//! Class Descriptor Table
//!
//! One [`ClassDescriptor`] per registered type, in registry index order.
//! Members are sorted into methods, accessor pairs and statics; hooks are
//! shared with descendants that do not declare their own; parent links are
//! filled in by a second pass once every descriptor exists.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::HostState;
use crate::core::error::{ConfigError, ConfigResult};
use crate::core::logging::TARGET_CLASS;
use crate::dispatch::exception::ExceptionDecl;
use crate::dispatch::{
    AttachFn, CtorFn, DestructorFn, HostFn, IndexedGetFn, IndexedSetFn, NamedDeleteFn, NamedGetFn,
    NamedSetFn,
};
use crate::handle::NativePtr;
use crate::registry::decl::{MemberKind, TypeDecl};
use crate::registry::{Constant, Subtype, TypeIndex, TypeRegistry};

pub struct AccessorDescriptor<S> {
    pub name: &'static str,
    pub(crate) getter: HostFn<S>,
    pub(crate) setter: Option<HostFn<S>>,
}

impl<S> AccessorDescriptor<S> {
    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }
}

pub(crate) struct IndexedHooks<S> {
    pub(crate) declaring: TypeIndex,
    pub(crate) get: Option<IndexedGetFn<S>>,
    pub(crate) set: Option<IndexedSetFn<S>>,
}

pub(crate) struct NamedHooks<S> {
    pub(crate) declaring: TypeIndex,
    pub(crate) get: Option<NamedGetFn<S>>,
    pub(crate) set: Option<NamedSetFn<S>>,
    pub(crate) delete: Option<NamedDeleteFn<S>>,
}

pub struct ClassDescriptor<S> {
    pub index: TypeIndex,
    pub name: &'static str,
    pub subtype: Option<Subtype>,
    /// Stateless marker: instances share one empty native value.
    pub empty: bool,
    pub(crate) parent: Option<TypeIndex>,
    pub(crate) constructor: Option<CtorFn<S>>,
    pub(crate) methods: Vec<(&'static str, HostFn<S>)>,
    pub(crate) accessors: Vec<AccessorDescriptor<S>>,
    pub(crate) statics: Vec<(&'static str, HostFn<S>)>,
    pub(crate) constants: Vec<(&'static str, Constant)>,
    pub(crate) indexed: Option<Arc<IndexedHooks<S>>>,
    pub(crate) named: Option<Arc<NamedHooks<S>>>,
    pub(crate) exception: Option<ExceptionDecl<S>>,
    pub(crate) on_attach: Option<AttachFn<S>>,
    pub(crate) destructor: Option<DestructorFn<S>>,
    pub(crate) empty_factory: Option<fn() -> NativePtr>,
}

impl<S> ClassDescriptor<S> {
    pub fn parent(&self) -> Option<TypeIndex> {
        self.parent
    }

    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|(name, _)| *name).collect()
    }

    pub fn accessors(&self) -> &[AccessorDescriptor<S>] {
        &self.accessors
    }

    pub fn static_names(&self) -> Vec<&'static str> {
        self.statics.iter().map(|(name, _)| *name).collect()
    }

    pub fn constants(&self) -> &[(&'static str, Constant)] {
        &self.constants
    }

    /// Type whose indexed hooks this class uses, if any.
    pub fn indexed_hooks_from(&self) -> Option<TypeIndex> {
        self.indexed.as_ref().map(|hooks| hooks.declaring)
    }

    pub fn named_hooks_from(&self) -> Option<TypeIndex> {
        self.named.as_ref().map(|hooks| hooks.declaring)
    }

    pub fn declares_exception(&self) -> bool {
        self.exception.is_some()
    }
}

pub struct ClassTable<S> {
    classes: Vec<ClassDescriptor<S>>,
}

impl<S> ClassTable<S> {
    pub(crate) fn build(registry: &TypeRegistry, decls: Vec<TypeDecl<S>>) -> ConfigResult<Self> {
        let mut classes = Vec::with_capacity(decls.len());

        for (position, decl) in decls.into_iter().enumerate() {
            let index = TypeIndex::new(position);
            let mut methods = Vec::new();
            let mut pairs: Vec<(&'static str, Option<HostFn<S>>, Option<HostFn<S>>)> = Vec::new();

            for member in decl.members {
                match member.kind {
                    MemberKind::Method => methods.push((member.name, member.call)),
                    MemberKind::Getter | MemberKind::Setter => {
                        let slot = match pairs.iter().position(|(name, _, _)| *name == member.name) {
                            Some(at) => at,
                            None => {
                                pairs.push((member.name, None, None));
                                pairs.len() - 1
                            }
                        };
                        if member.kind == MemberKind::Getter {
                            pairs[slot].1 = Some(member.call);
                        } else {
                            pairs[slot].2 = Some(member.call);
                        }
                    }
                }
            }

            let mut accessors = Vec::with_capacity(pairs.len());
            for (name, getter, setter) in pairs {
                let getter = getter.ok_or_else(|| ConfigError::SetterWithoutGetter {
                    ty: decl.rust_name.to_string(),
                    member: name.to_string(),
                })?;
                accessors.push(AccessorDescriptor { name, getter, setter });
            }

            let indexed = (decl.indexed_get.is_some() || decl.indexed_set.is_some()).then(|| {
                Arc::new(IndexedHooks {
                    declaring: index,
                    get: decl.indexed_get,
                    set: decl.indexed_set,
                })
            });
            let named = (decl.named_get.is_some() || decl.named_set.is_some() || decl.named_delete.is_some())
                .then(|| {
                    Arc::new(NamedHooks {
                        declaring: index,
                        get: decl.named_get,
                        set: decl.named_set,
                        delete: decl.named_delete,
                    })
                });

            classes.push(ClassDescriptor {
                index,
                name: decl.name,
                subtype: decl.subtype,
                empty: decl.empty,
                parent: None,
                constructor: decl.constructor,
                methods,
                accessors,
                statics: decl.statics,
                constants: decl.constants,
                indexed,
                named,
                exception: decl.exception,
                on_attach: decl.on_attach,
                destructor: decl.destructor,
                empty_factory: decl.empty_factory,
            });
        }

        // second pass: inheritance, over the finished table
        let own_indexed: Vec<_> = classes.iter().map(|c| c.indexed.clone()).collect();
        let own_named: Vec<_> = classes.iter().map(|c| c.named.clone()).collect();
        for class in classes.iter_mut() {
            class.parent = registry.parent_of(class.index);
            if class.indexed.is_none() {
                class.indexed = registry
                    .ancestors(class.index)
                    .find_map(|ancestor| own_indexed[ancestor.get()].clone());
            }
            if class.named.is_none() {
                class.named = registry
                    .ancestors(class.index)
                    .find_map(|ancestor| own_named[ancestor.get()].clone());
            }
            debug!(
                target: TARGET_CLASS,
                class = class.name,
                parent = ?class.parent.map(|p| registry.meta(p).name),
                methods = class.methods.len(),
                accessors = class.accessors.len(),
                statics = class.statics.len(),
                constructor = class.constructor.is_some(),
                "class descriptor ready"
            );
        }

        Ok(Self { classes })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, index: TypeIndex) -> &ClassDescriptor<S> {
        &self.classes[index.get()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassDescriptor<S>> {
        self.classes.iter()
    }
}

/// The immutable, startup-built half of the runtime: registry plus class
/// table. Shared behind an `Arc` by every context.
pub struct Bindings<S> {
    registry: TypeRegistry,
    classes: ClassTable<S>,
}

impl<S: HostState> Bindings<S> {
    pub fn build(decls: Vec<TypeDecl<S>>) -> ConfigResult<Arc<Self>> {
        let registry = TypeRegistry::build(&decls)?;
        let classes = ClassTable::build(&registry, decls)?;
        info!(target: TARGET_CLASS, classes = classes.len(), "class table built");
        Ok(Arc::new(Self { registry, classes }))
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn classes(&self) -> &ClassTable<S> {
        &self.classes
    }

    pub fn class(&self, index: TypeIndex) -> &ClassDescriptor<S> {
        self.classes.get(index)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassDescriptor<S>> {
        self.registry.lookup(name).map(|index| self.classes.get(index))
    }
}
