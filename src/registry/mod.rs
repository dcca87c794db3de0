//! Type Registry
//!
//! Built once from the closed list of native type declarations. Pass one
//! assigns dense indices; pass two resolves prototype links against those
//! indices and validates them. Every failure here is a startup error.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::error::{ConfigError, ConfigResult};
use crate::core::logging::TARGET_REGISTRY;

pub mod decl;
pub mod upcast;

pub use decl::{Constant, TypeBuilder, TypeDecl};
pub use upcast::{Delegates, Embeds, Follow, Projection};

/// Dense, stable index of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeIndex(u32);

impl TypeIndex {
    pub(crate) fn new(index: usize) -> Self {
        TypeIndex(index as u32)
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostic tag reported to inspectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subtype {
    Array,
    Error,
    Node,
    Iterator,
    Map,
    Set,
    Promise,
    TypedArray,
}

impl Subtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Subtype::Array => "array",
            Subtype::Error => "error",
            Subtype::Node => "node",
            Subtype::Iterator => "iterator",
            Subtype::Map => "map",
            Subtype::Set => "set",
            Subtype::Promise => "promise",
            Subtype::TypedArray => "typedarray",
        }
    }
}

/// How a type reaches its prototype's data.
#[derive(Clone, Copy)]
pub enum ProtoLink {
    /// Root type.
    None,
    /// Parent stored inline.
    Embedded(Projection),
    /// Parent behind another native allocation.
    Indirect(Follow),
}

impl fmt::Debug for ProtoLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoLink::None => f.write_str("None"),
            ProtoLink::Embedded(projection) => write!(f, "Embedded({})", projection.target()),
            ProtoLink::Indirect(_) => f.write_str("Indirect"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeMeta {
    pub index: TypeIndex,
    /// Script-visible class name.
    pub name: &'static str,
    pub rust_name: &'static str,
    pub type_id: TypeId,
    pub subtype: Option<Subtype>,
    pub link: ProtoLink,
    /// Stateless marker type: no tagged handle, one shared instance.
    pub empty: bool,
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    metas: Vec<TypeMeta>,
    prototypes: Vec<TypeIndex>,
    exceptions: Vec<Option<TypeIndex>>,
    by_type: HashMap<TypeId, TypeIndex>,
    by_name: HashMap<&'static str, TypeIndex>,
}

impl TypeRegistry {
    pub fn build<S>(decls: &[TypeDecl<S>]) -> ConfigResult<Self> {
        let mut registry = TypeRegistry::default();

        // pass 1: indices
        for (position, decl) in decls.iter().enumerate() {
            if let Some(error) = decl.deferred_error() {
                return Err(error);
            }
            if registry.by_type.contains_key(&decl.type_id) {
                return Err(ConfigError::DuplicateType(decl.rust_name.to_string()));
            }
            if let Some(existing) = registry.by_name.get(decl.name) {
                return Err(ConfigError::DuplicateName {
                    name: decl.name.to_string(),
                    first: registry.metas[existing.get()].rust_name.to_string(),
                    second: decl.rust_name.to_string(),
                });
            }
            if decl.empty && decl.size != 0 {
                return Err(ConfigError::EmptyTypeWithState {
                    ty: decl.rust_name.to_string(),
                    size: decl.size,
                });
            }

            let index = TypeIndex::new(position);
            registry.by_type.insert(decl.type_id, index);
            registry.by_name.insert(decl.name, index);
            registry.prototypes.push(index);
            registry.exceptions.push(None);
            registry.metas.push(TypeMeta {
                index,
                name: decl.name,
                rust_name: decl.rust_name,
                type_id: decl.type_id,
                subtype: decl.subtype,
                link: ProtoLink::None,
                empty: decl.empty,
            });
        }

        // pass 2: prototype links and exception types
        for (position, decl) in decls.iter().enumerate() {
            if let Some(proto) = &decl.proto {
                if proto.type_id == decl.type_id {
                    return Err(ConfigError::SelfPrototype(decl.rust_name.to_string()));
                }
                let parent = registry.by_type.get(&proto.type_id).copied().ok_or_else(|| {
                    ConfigError::UnresolvedPrototype {
                        ty: decl.rust_name.to_string(),
                        prototype: proto.rust_name.to_string(),
                    }
                })?;
                registry.prototypes[position] = parent;
                registry.metas[position].link = proto.link;
            }
            if let Some(exception) = &decl.exception {
                let index = registry.by_type.get(&exception.type_id).copied().ok_or_else(|| {
                    ConfigError::UnregisteredException {
                        ty: decl.rust_name.to_string(),
                        exception: exception.rust_name.to_string(),
                    }
                })?;
                registry.exceptions[position] = Some(index);
            }
        }

        registry.check_cycles()?;

        for meta in &registry.metas {
            debug!(
                target: TARGET_REGISTRY,
                index = meta.index.get(),
                name = meta.name,
                prototype = registry.metas[registry.prototypes[meta.index.get()].get()].name,
                link = ?meta.link,
                empty = meta.empty,
                "registered type"
            );
        }
        info!(target: TARGET_REGISTRY, types = registry.len(), "type registry built");
        Ok(registry)
    }

    fn check_cycles(&self) -> ConfigResult<()> {
        for meta in &self.metas {
            let mut current = meta.index;
            let mut steps = 0;
            loop {
                let proto = self.prototype_of(current);
                if proto == current {
                    break;
                }
                steps += 1;
                if steps > self.len() {
                    return Err(ConfigError::PrototypeCycle(meta.rust_name.to_string()));
                }
                current = proto;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn meta(&self, index: TypeIndex) -> &TypeMeta {
        &self.metas[index.get()]
    }

    pub fn get(&self, index: TypeIndex) -> Option<&TypeMeta> {
        self.metas.get(index.get())
    }

    /// The Prototype Table: immediate prototype, or `index` itself for roots.
    pub fn prototype_of(&self, index: TypeIndex) -> TypeIndex {
        self.prototypes[index.get()]
    }

    pub fn parent_of(&self, index: TypeIndex) -> Option<TypeIndex> {
        let proto = self.prototype_of(index);
        (proto != index).then_some(proto)
    }

    pub fn index_of<T: 'static>(&self) -> Option<TypeIndex> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn index_of_type_id(&self, type_id: TypeId) -> Option<TypeIndex> {
        self.by_type.get(&type_id).copied()
    }

    pub fn lookup(&self, name: &str) -> Option<TypeIndex> {
        self.by_name.get(name).copied()
    }

    pub fn exception_of(&self, index: TypeIndex) -> Option<TypeIndex> {
        self.exceptions[index.get()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeMeta> {
        self.metas.iter()
    }

    /// `index` and its prototypes, nearest first.
    pub fn ancestors(&self, index: TypeIndex) -> Ancestors<'_> {
        Ancestors {
            registry: self,
            next: Some(index),
        }
    }

    /// Topmost prototype of `index`.
    pub fn root_of(&self, index: TypeIndex) -> TypeIndex {
        self.ancestors(index).last().unwrap_or(index)
    }

    pub fn is_subtype(&self, index: TypeIndex, ancestor: TypeIndex) -> bool {
        self.ancestors(index).any(|i| i == ancestor)
    }
}

pub struct Ancestors<'a> {
    registry: &'a TypeRegistry,
    next: Option<TypeIndex>,
}

impl Iterator for Ancestors<'_> {
    type Item = TypeIndex;

    fn next(&mut self) -> Option<TypeIndex> {
        let current = self.next?;
        self.next = self.registry.parent_of(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Marker;

    struct Node;

    struct Element {
        node: Node,
    }

    impl Embeds<Node> for Element {
        fn parent(&self) -> &Node {
            &self.node
        }
        fn parent_mut(&mut self) -> &mut Node {
            &mut self.node
        }
    }

    struct Orphan {
        node: Node,
    }

    impl Embeds<Node> for Orphan {
        fn parent(&self) -> &Node {
            &self.node
        }
        fn parent_mut(&mut self) -> &mut Node {
            &mut self.node
        }
    }

    struct Looped;

    impl Embeds<Looped> for Looped {
        fn parent(&self) -> &Looped {
            self
        }
        fn parent_mut(&mut self) -> &mut Looped {
            self
        }
    }

    #[test]
    fn test_dense_indices_and_links() {
        // the child is declared before its prototype; pass two still resolves it
        let decls = vec![
            TypeBuilder::<(), Element>::new("Element").embeds::<Node>().build(),
            TypeBuilder::<(), Node>::new("Node").subtype(Subtype::Node).build(),
            TypeBuilder::<(), Marker>::marker("Marker").build(),
        ];
        let registry = TypeRegistry::build(&decls).unwrap();
        let element = registry.index_of::<Element>().unwrap();
        let node = registry.lookup("Node").unwrap();

        assert_eq!(element.get(), 0);
        assert_eq!(node.get(), 1);
        assert_eq!(registry.prototype_of(element), node);
        assert_eq!(registry.prototype_of(node), node);
        assert!(registry.is_subtype(element, node));
        assert!(!registry.is_subtype(node, element));
        assert!(registry.meta(registry.lookup("Marker").unwrap()).empty);
        assert_eq!(registry.ancestors(element).collect::<Vec<_>>(), vec![element, node]);
    }

    #[test]
    fn test_unresolved_prototype_is_fatal() {
        let decls = vec![TypeBuilder::<(), Orphan>::new("Orphan").embeds::<Node>().build()];
        assert!(matches!(
            TypeRegistry::build(&decls),
            Err(ConfigError::UnresolvedPrototype { .. })
        ));
    }

    #[test]
    fn test_duplicates_and_self_links() {
        let decls = vec![
            TypeBuilder::<(), Node>::new("Node").build(),
            TypeBuilder::<(), Node>::new("Node2").build(),
        ];
        assert!(matches!(TypeRegistry::build(&decls), Err(ConfigError::DuplicateType(_))));

        let decls = vec![
            TypeBuilder::<(), Node>::new("Node").build(),
            TypeBuilder::<(), Element>::new("Node").build(),
        ];
        assert!(matches!(TypeRegistry::build(&decls), Err(ConfigError::DuplicateName { .. })));

        let decls = vec![TypeBuilder::<(), Looped>::new("Looped").embeds::<Looped>().build()];
        assert!(matches!(TypeRegistry::build(&decls), Err(ConfigError::SelfPrototype(_))));
    }

    #[test]
    fn test_marker_with_state_is_rejected() {
        #[derive(Default)]
        struct NotEmpty {
            _value: u64,
        }
        let decls = vec![TypeBuilder::<(), NotEmpty>::marker("NotEmpty").build()];
        assert!(matches!(
            TypeRegistry::build(&decls),
            Err(ConfigError::EmptyTypeWithState { size: 8, .. })
        ));
    }
}
