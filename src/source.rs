//! Cached source line retrieval for report rendering
//!
//! Consulted only while rendering, never on the profiling hot path. Files
//! are read once and cached as line lists. A resolver hook lets embedders
//! supply source for paths that are not readable from disk (code loaded
//! from an archive or a database); anything still missing renders as empty
//! lines, with profiling data emitted regardless.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

/// Fallback content supplier for paths the filesystem cannot serve.
pub trait SourceResolver: Send {
    /// Full text of `path`, or `None` when unknown.
    fn resolve(&self, path: &str) -> Option<String>;
}

impl<F> SourceResolver for F
where
    F: Fn(&str) -> Option<String> + Send,
{
    fn resolve(&self, path: &str) -> Option<String> {
        self(path)
    }
}

/// Per-path cache of source lines, 1-based access.
pub struct SourceCache {
    cache: HashMap<String, Arc<Vec<String>>>,
    resolver: Option<Box<dyn SourceResolver>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            resolver: None,
        }
    }

    pub fn with_resolver(resolver: Box<dyn SourceResolver>) -> Self {
        Self {
            cache: HashMap::new(),
            resolver: Some(resolver),
        }
    }

    /// All lines of `path`, without trailing newlines. Empty when the file
    /// cannot be read and the resolver does not know it.
    pub fn lines(&mut self, path: &str) -> Arc<Vec<String>> {
        if let Some(cached) = self.cache.get(path) {
            return cached.clone();
        }
        let text = fs::read_to_string(path)
            .ok()
            .or_else(|| self.resolver.as_ref().and_then(|r| r.resolve(path)));
        let lines: Vec<String> = match text {
            Some(text) => text.lines().map(|l| l.to_string()).collect(),
            None => Vec::new(),
        };
        let lines = Arc::new(lines);
        self.cache.insert(path.to_string(), lines.clone());
        lines
    }

    /// Text of line `lineno` (1-based), or an empty string when absent.
    pub fn line(&mut self, path: &str, lineno: u32) -> String {
        if lineno == 0 {
            return String::new();
        }
        self.lines(path)
            .get(lineno as usize - 1)
            .cloned()
            .unwrap_or_default()
    }

    pub fn exists(&mut self, path: &str) -> bool {
        !self.lines(path).is_empty()
    }

    /// Raw text as cached, one string per line. Used by the archive writer.
    pub fn text(&mut self, path: &str) -> String {
        let lines = self.lines(path);
        if lines.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::new()
    }
}
