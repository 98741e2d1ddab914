//! Merging thread stores into a global profile
//!
//! Runs once, at `disable`. Residual frames left on any thread's stack are
//! flushed first (their open delta is credited to the site they entered),
//! then all per-thread maps are summed. Sums are commutative, so no
//! cross-thread ordering is needed. Per-file time can exceed the total
//! duration in multi-threaded programs; that is a property of summing
//! wall-clock per thread, not a bug.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::filter::FilterPolicy;
use crate::profiler::DroppedDeltas;
use crate::site::{Edge, Site};
use crate::store::{EdgeRecord, LineRecord, ThreadStore};

/// The merged result of one profiling session.
#[derive(Debug, Default)]
pub struct GlobalProfile {
    pub lines: HashMap<Site, LineRecord>,
    pub edges: HashMap<Edge, EdgeRecord>,
    /// Wall-clock span between enable and disable on the controlling
    /// thread, in nanoseconds.
    pub total_ns: u64,
    /// Command line the profile was collected for, echoed into reports.
    pub command_line: Option<String>,
    /// Recoverable invariant violations observed during the session.
    pub dropped: DroppedDeltas,
}

/// Merge `stores`, flushing residual frames at `flush_at_ns`. The filter
/// is applied a second time here so files that were traced but are not to
/// be reported drop out of the result.
pub fn aggregate(
    stores: Vec<ThreadStore>,
    flush_at_ns: u64,
    total_ns: u64,
    command_line: Option<String>,
    dropped: DroppedDeltas,
    filter: &FilterPolicy,
) -> GlobalProfile {
    let mut profile = GlobalProfile {
        total_ns,
        command_line,
        dropped,
        ..Default::default()
    };
    let mut verdicts: HashMap<Arc<str>, bool> = HashMap::new();
    let mut tracked = |file: &Arc<str>| -> bool {
        if filter.is_unrestricted() {
            return true;
        }
        match verdicts.get(file) {
            Some(&v) => v,
            None => {
                let v = filter.is_tracked(file);
                verdicts.insert(file.clone(), v);
                v
            }
        }
    };
    for store in stores {
        let (lines, edges, stack) = store.into_parts();
        for (site, record) in lines {
            if !tracked(&site.file) {
                continue;
            }
            let entry = profile
                .lines
                .entry(site)
                .or_insert_with(|| LineRecord {
                    owner: record.owner.clone(),
                    stat: Default::default(),
                });
            entry.stat.hits += record.stat.hits;
            entry.stat.nanos += record.stat.nanos;
        }
        for (edge, record) in edges {
            if !tracked(&edge.caller.file) {
                continue;
            }
            let entry = profile
                .edges
                .entry(edge)
                .or_insert_with(|| EdgeRecord {
                    owner: record.owner.clone(),
                    stat: Default::default(),
                });
            entry.stat.hits += record.stat.hits;
            entry.stat.nanos += record.stat.nanos;
        }
        // Residual frames: profiling stopped while these activations were
        // still live. Credit their open interval to the site they were on.
        for frame in stack.into_iter().rev() {
            let elapsed = flush_at_ns.saturating_sub(frame.last_tick);
            let delta = elapsed.saturating_sub(frame.discount);
            if let (Some(site), Some(owner)) = (frame.site, frame.owner) {
                if tracked(&site.file) {
                    let entry = profile
                        .lines
                        .entry(site)
                        .or_insert_with(|| LineRecord {
                            owner: owner.clone(),
                            stat: Default::default(),
                        });
                    entry.stat.hits += 1;
                    entry.stat.nanos += delta;
                }
            }
        }
    }
    profile
}

impl GlobalProfile {
    /// All files with recorded sites or outgoing calls.
    pub fn files(&self) -> BTreeSet<Arc<str>> {
        let mut files: BTreeSet<Arc<str>> = self.lines.keys().map(|s| s.file.clone()).collect();
        files.extend(self.edges.keys().map(|e| e.caller.file.clone()));
        files
    }

    /// Total line time and hits recorded in `file`.
    pub fn file_totals(&self, file: &str) -> (u64, u64) {
        let mut nanos = 0;
        let mut hits = 0;
        for (site, record) in &self.lines {
            if &*site.file == file {
                nanos += record.stat.nanos;
                hits += record.stat.hits;
            }
        }
        (nanos, hits)
    }

    /// Files ordered for annotation: descending total time, then hits
    /// (meaningful for sampled profiles), then path for stable output.
    pub fn files_by_weight(&self) -> Vec<Arc<str>> {
        let mut files: Vec<Arc<str>> = self.files().into_iter().collect();
        files.sort_by(|a, b| {
            let (a_ns, a_hits) = self.file_totals(a);
            let (b_ns, b_hits) = self.file_totals(b);
            (b_ns, b_hits, a).cmp(&(a_ns, a_hits, b))
        });
        files
    }

    /// Outgoing calls of `file`, grouped by caller line, each group in
    /// descending hit order.
    pub fn calls_by_line(&self, file: &str) -> BTreeMap<u32, Vec<(&Edge, &EdgeRecord)>> {
        let mut by_line: BTreeMap<u32, Vec<(&Edge, &EdgeRecord)>> = BTreeMap::new();
        for (edge, record) in &self.edges {
            if &*edge.caller.file == file {
                by_line.entry(edge.caller.line).or_default().push((edge, record));
            }
        }
        for calls in by_line.values_mut() {
            calls.sort_by(|(ea, ra), (eb, rb)| {
                (rb.stat.hits, rb.stat.nanos)
                    .cmp(&(ra.stat.hits, ra.stat.nanos))
                    .then_with(|| {
                        (&ea.callee.file, ea.callee.first_line, &ea.callee.name).cmp(&(
                            &eb.callee.file,
                            eb.callee.first_line,
                            &eb.callee.name,
                        ))
                    })
            });
        }
        by_line
    }

    /// Highest line number carrying data in `file`.
    pub fn last_line(&self, file: &str) -> u32 {
        let stat_max = self
            .lines
            .keys()
            .filter(|s| &*s.file == file)
            .map(|s| s.line)
            .max()
            .unwrap_or(0);
        let call_max = self
            .edges
            .keys()
            .filter(|e| &*e.caller.file == file)
            .map(|e| e.caller.line)
            .max()
            .unwrap_or(0);
        stat_max.max(call_max)
    }

    /// The line record at `file:line`, if any.
    pub fn line_at(&self, file: &Arc<str>, line: u32) -> Option<&LineRecord> {
        self.lines.get(&Site {
            file: file.clone(),
            line,
        })
    }
}
