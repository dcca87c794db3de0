//! Compiled module records.
//!
//! The engine does not evaluate module bodies; compiling a module validates
//! the source text and extracts its static import requests.

use std::fmt;
use std::rc::Rc;

use super::realm::{Host, Realm};
use crate::core::error::ModuleError;

/// Engine-assigned identity hash of a compiled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{:016x}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub specifier: Rc<str>,
    pub source: Rc<str>,
    /// Import requests in source order, duplicates removed.
    pub requests: Vec<String>,
}

/// Compiles `source` as the module `specifier`.
pub fn compile<H: Host>(realm: &Realm<H>, specifier: &str, source: &[u8]) -> Result<ModuleRecord, ModuleError> {
    let text = std::str::from_utf8(source).map_err(|e| ModuleError::Compile {
        specifier: specifier.to_string(),
        reason: e.to_string(),
    })?;
    let requests = scan_requests(text).map_err(|reason| ModuleError::Compile {
        specifier: specifier.to_string(),
        reason,
    })?;
    Ok(ModuleRecord {
        id: ModuleId(identity_hash(realm.next_module_id())),
        specifier: Rc::from(specifier),
        source: Rc::from(text),
        requests,
    })
}

// splitmix64 finalizer, so ids look like hashes rather than counters
fn identity_hash(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn scan_requests(text: &str) -> Result<Vec<String>, String> {
    let mut requests: Vec<String> = Vec::new();
    let mut statement = String::new();
    let mut depth: i32 = 0;

    for line in text.lines() {
        let trimmed = line.trim();
        if statement.is_empty() {
            let starts = trimmed.starts_with("import ")
                || trimmed.starts_with("import{")
                || trimmed.starts_with("import\"")
                || trimmed.starts_with("import'")
                || trimmed.starts_with("export ");
            if !starts {
                continue;
            }
        }
        statement.push_str(trimmed);
        statement.push(' ');
        depth += trimmed.matches('{').count() as i32 - trimmed.matches('}').count() as i32;
        if depth > 0 {
            continue;
        }
        depth = 0;
        if let Some(request) = request_of(&statement)? {
            if !requests.contains(&request) {
                requests.push(request);
            }
        }
        statement.clear();
    }
    if !statement.is_empty() {
        return Err("unterminated import statement".to_string());
    }
    Ok(requests)
}

fn request_of(statement: &str) -> Result<Option<String>, String> {
    let rest = if let Some(rest) = statement.strip_prefix("import") {
        let rest = rest.trim_start();
        // dynamic import() and import.meta are not static requests
        if rest.starts_with('(') || rest.starts_with('.') {
            return Ok(None);
        }
        if rest.starts_with('"') || rest.starts_with('\'') {
            return quoted(rest).map(Some);
        }
        rest
    } else {
        statement
    };
    match rest.find(" from ").or_else(|| rest.find("}from ")) {
        Some(at) => {
            let after = rest[at..].trim_start_matches(['}', ' ']);
            let after = after.trim_start_matches("from").trim_start();
            quoted(after).map(Some)
        }
        None if statement.starts_with("import") => Err(format!("malformed import: {}", statement.trim())),
        None => Ok(None),
    }
}

fn quoted(text: &str) -> Result<String, String> {
    let mut chars = text.chars();
    let quote = match chars.next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(format!("expected a module specifier in '{}'", text.trim())),
    };
    let body: String = chars.by_ref().take_while(|&c| c != quote).collect();
    if text[1..].contains(quote) {
        Ok(body)
    } else {
        Err(format!("unterminated string in '{}'", text.trim()))
    }
}
