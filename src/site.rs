//! Cost keys: sites, callables and call edges
//!
//! Every accumulated cost in the profiler is keyed by one of the types in
//! this module. A `Site` is a `(file, line)` pair; a `CodeRef` identifies a
//! callable; an `Edge` ties the exact line a call was issued from to the
//! callable it entered.

use std::fmt;
use std::sync::Arc;

/// Name used for module-level (top-level) code, mirroring the host
/// interpreter's convention.
pub const MODULE_NAME: &str = "<module>";

/// A source position: file path plus 1-based line number.
///
/// Equality is structural; this is the primary key for all line costs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Site {
    pub file: Arc<str>,
    pub line: u32,
}

impl Site {
    pub fn new(file: Arc<str>, line: u32) -> Self {
        Self { file, line }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Identity of a callable: the file it lives in, the line its definition
/// starts on, and its name. Used to group sites into function blocks in
/// callgrind output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeRef {
    pub file: Arc<str>,
    pub first_line: u32,
    pub name: Arc<str>,
}

impl CodeRef {
    pub fn new(file: Arc<str>, first_line: u32, name: Arc<str>) -> Self {
        Self {
            file,
            first_line,
            name,
        }
    }

    /// Synthesized identity for top-level code of `file`.
    pub fn module(file: Arc<str>) -> Self {
        Self {
            file,
            first_line: 1,
            name: Arc::from(MODULE_NAME),
        }
    }

    pub fn is_module(&self) -> bool {
        &*self.name == MODULE_NAME
    }

    /// The site control lands on when this callable is entered.
    pub fn entry_site(&self) -> Site {
        Site {
            file: self.file.clone(),
            line: self.first_line,
        }
    }
}

/// A directed call association: the caller's exact line and the callable it
/// invoked. Keyed statically, so recursion folds onto a single edge whose
/// hit count reflects dynamic invocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub caller: Site,
    pub callee: CodeRef,
}

/// Accumulated cost of one site.
///
/// In deterministic mode `hits == 0` implies `nanos == 0`; in statistical
/// mode `nanos` is always 0 and `hits` counts samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStat {
    pub hits: u64,
    pub nanos: u64,
}

/// Accumulated cost of one call edge. `nanos` is the callee's inclusive
/// time, already contained in the callee's own line costs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeStat {
    pub hits: u64,
    pub nanos: u64,
}

/// Host-assigned thread identity. The profiler only ever uses it as a map
/// key; no ordering across threads is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}
