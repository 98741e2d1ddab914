//! Path filtering for traced and reported files
//!
//! Decides per file path whether the profiler records and reports it.
//! Rules are prefix matches on normalized absolute paths, evaluated
//! include, then exclude, then host library roots; later rules override
//! earlier ones. An untracked frame still pushes and pops on the call
//! stack, only its line records are suppressed.

use std::path::MAIN_SEPARATOR;

/// Include/exclude policy over file paths.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    include: Vec<String>,
    exclude: Vec<String>,
    syspath: Vec<String>,
    cwd: String,
}

impl FilterPolicy {
    /// Policy that tracks every path.
    pub fn allow_all() -> Self {
        Self::new(&[], &[], &[])
    }

    /// Build a policy from raw rule strings. `syspath` holds the host
    /// runtime's library roots; they only take effect combined with
    /// `--exclude-syspath` (callers pass an empty slice otherwise).
    pub fn new(include: &[String], exclude: &[String], syspath: &[String]) -> Self {
        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().replace(MAIN_SEPARATOR, "/"))
            .unwrap_or_else(|_| String::from("/"));
        let normalize = |rules: &[String]| -> Vec<String> {
            rules.iter().map(|r| normalize_path(r, &cwd)).collect()
        };
        Self {
            include: normalize(include),
            exclude: normalize(exclude),
            syspath: normalize(syspath),
            cwd,
        }
    }

    /// True when `path` passes the active rules.
    pub fn is_tracked(&self, path: &str) -> bool {
        let path = normalize_path(path, &self.cwd);
        if !self.include.is_empty() && !self.include.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        if self.exclude.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        if self.syspath.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        true
    }

    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.syspath.is_empty()
    }
}

/// Normalize to an absolute, forward-slash path with `.`/`..` segments
/// resolved. Works on strings only: "file names" supplied by a host may
/// not exist on disk.
fn normalize_path(path: &str, cwd: &str) -> String {
    let mut raw = path.replace('\\', "/");
    let drive =
        if raw.len() >= 2 && raw.as_bytes()[1] == b':' && raw.as_bytes()[0].is_ascii_alphabetic() {
            let d = raw[..2].to_string();
            raw = raw[2..].to_string();
            d
        } else {
            String::new()
        };
    let absolute = if raw.starts_with('/') {
        raw
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), raw)
    };
    let mut parts: Vec<&str> = Vec::new();
    for segment in absolute.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("{}/{}", drive, parts.join("/"))
}
