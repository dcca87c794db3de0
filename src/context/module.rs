//! Module loading for one context.
//!
//! Specifiers are normalized against the referring module before the loader
//! sees them; compiled records live in the context arena, keyed by the
//! normalized specifier. A side table maps module ids back to specifiers so
//! that dependency requests carrying only the dependent module can be
//! resolved.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::arena::{Arena, ArenaRef};
use super::{Context, HostState};
use crate::core::error::{ArenaError, ContextResult, ModuleError};
use crate::core::logging::TARGET_MODULE;
use crate::engine::module::compile;
use crate::engine::{ModuleId, ModuleRecord};

/// Supplies module source for a normalized specifier.
pub trait ModuleLoader {
    fn fetch(&self, specifier: &str) -> Result<Vec<u8>, String>;
}

impl<F> ModuleLoader for F
where
    F: Fn(&str) -> Result<Vec<u8>, String>,
{
    fn fetch(&self, specifier: &str) -> Result<Vec<u8>, String> {
        self(specifier)
    }
}

/// In-memory loader; records every fetch.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: HashMap<String, Vec<u8>>,
    fetched: RefCell<Vec<String>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, specifier: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        self.insert(specifier, source);
        self
    }

    pub fn insert(&mut self, specifier: impl Into<String>, source: impl Into<Vec<u8>>) {
        self.sources.insert(specifier.into(), source.into());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }
}

impl ModuleLoader for MemoryLoader {
    fn fetch(&self, specifier: &str) -> Result<Vec<u8>, String> {
        self.fetched.borrow_mut().push(specifier.to_string());
        self.sources
            .get(specifier)
            .cloned()
            .ok_or_else(|| "not found".to_string())
    }
}

#[derive(Default)]
pub(crate) struct ModuleCache {
    by_specifier: HashMap<Rc<str>, ArenaRef<ModuleRecord>>,
    by_id: HashMap<ModuleId, Rc<str>>,
}

impl ModuleCache {
    pub(crate) fn get(&self, arena: &Arena, specifier: &str) -> Option<ModuleRecord> {
        let handle = *self.by_specifier.get(specifier)?;
        arena.with(handle, ModuleRecord::clone)
    }

    pub(crate) fn by_id(&self, arena: &Arena, id: ModuleId) -> Option<ModuleRecord> {
        let specifier = self.by_id.get(&id)?;
        self.get(arena, specifier)
    }

    pub(crate) fn specifier_of(&self, id: ModuleId) -> Option<Rc<str>> {
        self.by_id.get(&id).cloned()
    }

    pub(crate) fn insert(&mut self, arena: &Arena, record: ModuleRecord) -> Result<(), ArenaError> {
        let specifier = record.specifier.clone();
        let id = record.id;
        let handle = arena.alloc(record)?;
        self.by_specifier.insert(specifier.clone(), handle);
        self.by_id.insert(id, specifier);
        Ok(())
    }

    pub(crate) fn remove(&mut self, specifier: &str) -> bool {
        if self.by_specifier.remove(specifier).is_none() {
            return false;
        }
        self.by_id.retain(|_, cached| &**cached != specifier);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.by_specifier.len()
    }

    /// Drops every entry and returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.by_specifier.len();
        self.by_specifier.clear();
        self.by_id.clear();
        count
    }
}

/// Resolves `request` against the specifier of the module that imports it.
///
/// URLs (`scheme://host/path`) are taken as they are, absolute paths keep
/// the referrer's origin, anything else is joined to the referrer's
/// directory. Dot segments are removed; climbing above the root fails.
pub fn normalize(request: &str, referrer: Option<&str>) -> Result<String, ModuleError> {
    let unresolved = || ModuleError::Unresolved {
        request: request.to_string(),
        referrer: referrer.unwrap_or_default().to_string(),
    };
    if request.is_empty() {
        return Err(unresolved());
    }

    let (origin, path) = if let Some((origin, path)) = split_origin(request) {
        (origin, path.to_string())
    } else if request.starts_with('/') {
        let origin = referrer.and_then(split_origin).map_or("", |(origin, _)| origin);
        (origin, request.to_string())
    } else {
        match referrer {
            Some(referrer) => {
                let (origin, base) = split_origin(referrer).unwrap_or(("", referrer));
                let dir = base.rfind('/').map_or("", |at| &base[..=at]);
                (origin, format!("{dir}{request}"))
            }
            None => ("", request.to_string()),
        }
    };

    let path = if !origin.is_empty() && !path.starts_with('/') {
        format!("/{path}")
    } else {
        path
    };
    let cleaned = clean_path(&path).ok_or_else(unresolved)?;
    Ok(format!("{origin}{cleaned}"))
}

fn split_origin(specifier: &str) -> Option<(&str, &str)> {
    let scheme_end = specifier.find("://")?;
    let scheme = &specifier[..scheme_end];
    let valid = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return None;
    }
    let host_start = scheme_end + 3;
    let path_start = specifier[host_start..]
        .find('/')
        .map_or(specifier.len(), |at| host_start + at);
    Some(specifier.split_at(path_start))
}

fn clean_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    Some(if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    })
}

impl<S: HostState> Context<S> {
    /// Loads, compiles and caches `request` and everything it imports.
    pub fn load_module(&self, request: &str, referrer: Option<&str>) -> ContextResult<ModuleRecord> {
        self.ensure_live()?;
        let specifier = normalize(request, referrer)?;
        self.load_graph(&specifier)
    }

    /// Resolves an import `request` made by the already loaded module `referrer`.
    pub fn resolve_dependency(&self, referrer: ModuleId, request: &str) -> ContextResult<ModuleRecord> {
        self.ensure_live()?;
        let base = self
            .inner
            .modules
            .borrow()
            .specifier_of(referrer)
            .ok_or_else(|| ModuleError::UnknownModule(referrer.to_string()))?;
        let specifier = normalize(request, Some(&*base))?;
        self.load_graph(&specifier)
    }

    pub fn module(&self, id: ModuleId) -> Option<ModuleRecord> {
        self.inner.modules.borrow().by_id(&self.inner.context_arena, id)
    }

    pub fn module_count(&self) -> usize {
        self.inner.modules.borrow().len()
    }

    /// Loads `specifier` with its imports. When any module of the graph
    /// fails, every record this load cached is dropped again so that a
    /// retry starts over instead of finding a half-linked graph.
    fn load_graph(&self, specifier: &str) -> ContextResult<ModuleRecord> {
        let mut inserted = Vec::new();
        let result = self.load_normalized(specifier, &mut inserted);
        if result.is_err() && !inserted.is_empty() {
            let mut modules = self.inner.modules.borrow_mut();
            for cached in &inserted {
                modules.remove(cached);
            }
            debug!(
                target: TARGET_MODULE,
                specifier,
                dropped = inserted.len(),
                "module graph failed to load"
            );
        }
        result
    }

    fn load_normalized(&self, specifier: &str, inserted: &mut Vec<String>) -> ContextResult<ModuleRecord> {
        let arena = &self.inner.context_arena;
        if let Some(record) = self.inner.modules.borrow().get(arena, specifier) {
            return Ok(record);
        }

        let loader = self
            .inner
            .loader
            .as_ref()
            .ok_or_else(|| ModuleError::NoLoader(specifier.to_string()))?;
        let source = loader.fetch(specifier).map_err(|reason| ModuleError::Fetch {
            specifier: specifier.to_string(),
            reason,
        })?;
        let record = compile(self.realm(), specifier, &source)?;
        debug!(
            target: TARGET_MODULE,
            specifier,
            id = %record.id,
            imports = record.requests.len(),
            "module compiled"
        );

        // cached before its imports so that cycles end at the cache
        self.inner.modules.borrow_mut().insert(arena, record.clone())?;
        inserted.push(specifier.to_string());
        for request in &record.requests {
            let dependency = normalize(request, Some(specifier))?;
            self.load_normalized(&dependency, inserted)?;
        }
        Ok(record)
    }
}
