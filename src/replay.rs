//! Replay host: executes recorded interpreter event streams
//!
//! The profiler core is host-agnostic; this module is the host bundled
//! with the launcher. A target "program" is a JSON-lines trace captured
//! from an interpreter hook: one record per event, each carrying its
//! thread id and a monotonic timestamp in nanoseconds. Replaying a trace
//! through the deterministic tracer reproduces the original run's profile
//! exactly; replaying it in wall-clock time makes it sampleable by the
//! statistical engine.
//!
//! Record shapes:
//!
//! ```text
//! {"event":"meta","main_thread":1,"syspath":["/usr/lib/host"]}
//! {"event":"line","thread":1,"t":1200,"file":"demo/app.src","line":3}
//! {"event":"call","thread":1,"t":1900,"file":"demo/app.src","first_line":7,"name":"worker"}
//! {"event":"return","thread":1,"t":2400}
//! {"event":"exit","code":0}
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::ManualClock;
use crate::event::{FrameSnapshot, StackProvider, ThreadStack, TraceEvent};
use crate::profiler::Profiler;
use crate::site::{CodeRef, ThreadId};
use crate::tracer::TracerHandle;

/// File extension recorded traces use; `-m NAME` resolves to
/// `NAME.trace.jsonl` on the search path.
pub const TRACE_EXTENSION: &str = ".trace.jsonl";

/// Environment variable listing extra directories for `-m` resolution.
pub const SEARCH_PATH_ENV: &str = "LINEPROF_PATH";

/// One recorded interpreter event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceRecord {
    /// Optional header; when present it must be the first record.
    Meta {
        #[serde(default)]
        main_thread: Option<u64>,
        #[serde(default)]
        syspath: Vec<String>,
    },
    Line {
        thread: u64,
        t: u64,
        file: String,
        line: u32,
    },
    Call {
        thread: u64,
        t: u64,
        file: String,
        first_line: u32,
        name: String,
    },
    Return {
        thread: u64,
        t: u64,
    },
    /// Exit status of the recorded program.
    Exit { code: i32 },
}

impl TraceRecord {
    fn timestamp(&self) -> Option<u64> {
        match self {
            TraceRecord::Line { t, .. }
            | TraceRecord::Call { t, .. }
            | TraceRecord::Return { t, .. } => Some(*t),
            TraceRecord::Meta { .. } | TraceRecord::Exit { .. } => None,
        }
    }
}

/// A loaded event trace.
pub struct ReplayHost {
    records: Vec<TraceRecord>,
    main_thread: ThreadId,
    syspath: Vec<String>,
    /// Interned file paths so repeated records share one allocation.
    interned: HashMap<String, Arc<str>>,
}

impl ReplayHost {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("cannot open trace {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("malformed trace {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: BufReader<R>) -> Result<Self> {
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.context("trace read failed")?;
            if line.trim().is_empty() {
                continue;
            }
            let record: TraceRecord = serde_json::from_str(&line)
                .with_context(|| format!("bad trace record on line {}", index + 1))?;
            records.push(record);
        }
        let mut main_thread = None;
        let mut syspath = Vec::new();
        if let Some(TraceRecord::Meta {
            main_thread: declared,
            syspath: roots,
        }) = records.first()
        {
            main_thread = declared.map(ThreadId);
            syspath.clone_from(roots);
        }
        let main_thread = main_thread
            .or_else(|| {
                records.iter().find_map(|r| match r {
                    TraceRecord::Line { thread, .. }
                    | TraceRecord::Call { thread, .. }
                    | TraceRecord::Return { thread, .. } => Some(ThreadId(*thread)),
                    _ => None,
                })
            })
            .unwrap_or(ThreadId(0));
        Ok(Self {
            records,
            main_thread,
            syspath,
            interned: HashMap::new(),
        })
    }

    /// Resolve `-m NAME` to a trace file: `LINEPROF_PATH` entries first,
    /// then the current directory.
    pub fn resolve_module(name: &str) -> Result<PathBuf> {
        let file_name = format!("{}{}", name, TRACE_EXTENSION);
        let mut roots: Vec<PathBuf> = std::env::var(SEARCH_PATH_ENV)
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();
        roots.push(PathBuf::from("."));
        for root in &roots {
            let candidate = root.join(&file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        bail!(
            "module {} not found (looked for {} under {} and the current directory)",
            name,
            file_name,
            SEARCH_PATH_ENV
        );
    }

    /// Library roots declared by the trace, for `--exclude-syspath`.
    pub fn syspath(&self) -> &[String] {
        &self.syspath
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    fn intern(&mut self, file: &str) -> Arc<str> {
        if let Some(interned) = self.interned.get(file) {
            return interned.clone();
        }
        let interned: Arc<str> = Arc::from(file);
        self.interned.insert(file.to_string(), interned.clone());
        interned
    }

    /// Replay deterministically: the manual clock is driven from record
    /// timestamps, so the rebuilt profile carries the recorded run's exact
    /// timing. Returns the recorded exit code.
    pub fn run_deterministic(&mut self, profiler: &Profiler, clock: &ManualClock) -> Result<i32> {
        let mut handles: HashMap<ThreadId, Option<TracerHandle>> = HashMap::new();
        let mut exit_code = 0;
        let records = std::mem::take(&mut self.records);
        for record in &records {
            if let Some(t) = record.timestamp() {
                clock.set(t);
            }
            match record {
                TraceRecord::Meta { .. } => {}
                TraceRecord::Exit { code } => exit_code = *code,
                TraceRecord::Line { thread, file, line, .. } => {
                    let event = TraceEvent::Line {
                        file: self.intern(file),
                        line: *line,
                    };
                    self.dispatch(profiler, &mut handles, ThreadId(*thread), event);
                }
                TraceRecord::Call {
                    thread,
                    file,
                    first_line,
                    name,
                    ..
                } => {
                    let event = TraceEvent::Call {
                        callee: CodeRef::new(
                            self.intern(file),
                            *first_line,
                            Arc::from(name.as_str()),
                        ),
                    };
                    self.dispatch(profiler, &mut handles, ThreadId(*thread), event);
                }
                TraceRecord::Return { thread, .. } => {
                    self.dispatch(profiler, &mut handles, ThreadId(*thread), TraceEvent::Return);
                }
            }
        }
        self.records = records;
        debug!(exit_code, "deterministic replay finished");
        Ok(exit_code)
    }

    fn dispatch(
        &mut self,
        profiler: &Profiler,
        handles: &mut HashMap<ThreadId, Option<TracerHandle>>,
        thread: ThreadId,
        event: TraceEvent,
    ) {
        let handle = handles
            .entry(thread)
            .or_insert_with(|| profiler.handle(thread));
        if let Some(handle) = handle {
            handle.on_event(event);
        }
    }

    /// Replay in wall-clock time for statistical profiling: live stacks
    /// are maintained in `stacks` and the gaps between record timestamps
    /// are slept, so a concurrent sampler observes the recorded run's
    /// shape. Returns the recorded exit code.
    pub fn run_timed(&mut self, stacks: &ReplayStacks) -> Result<i32> {
        let mut exit_code = 0;
        let mut last_t: Option<u64> = None;
        let records = std::mem::take(&mut self.records);
        for record in &records {
            if let Some(t) = record.timestamp() {
                if let Some(prev) = last_t {
                    let gap = t.saturating_sub(prev);
                    if gap > 0 {
                        std::thread::sleep(Duration::from_nanos(gap));
                    }
                }
                last_t = Some(t);
            }
            match record {
                TraceRecord::Meta { .. } => {}
                TraceRecord::Exit { code } => exit_code = *code,
                TraceRecord::Line { thread, file, line, .. } => {
                    stacks.on_line(ThreadId(*thread), self.intern(file), *line);
                }
                TraceRecord::Call {
                    thread,
                    file,
                    first_line,
                    name,
                    ..
                } => {
                    let callee =
                        CodeRef::new(self.intern(file), *first_line, Arc::from(name.as_str()));
                    stacks.on_call(ThreadId(*thread), callee);
                }
                TraceRecord::Return { thread, .. } => {
                    stacks.on_return(ThreadId(*thread));
                }
            }
        }
        self.records = records;
        debug!(exit_code, "timed replay finished");
        Ok(exit_code)
    }
}

/// Live stack state for timed replay. The mutex is the replay host's
/// equivalent of the interpreter barrier: the sampler snapshots under it
/// and never sees a half-updated chain.
#[derive(Default)]
pub struct ReplayStacks {
    inner: Mutex<HashMap<ThreadId, Vec<FrameSnapshot>>>,
}

impl ReplayStacks {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_line(&self, thread: ThreadId, file: Arc<str>, line: u32) {
        let mut inner = self.inner.lock();
        let frames = inner.entry(thread).or_default();
        match frames.last_mut() {
            Some(top) => top.line = line,
            None => frames.push(FrameSnapshot {
                code: CodeRef::module(file),
                line,
            }),
        }
    }

    fn on_call(&self, thread: ThreadId, callee: CodeRef) {
        let mut inner = self.inner.lock();
        let line = callee.first_line;
        inner
            .entry(thread)
            .or_default()
            .push(FrameSnapshot { code: callee, line });
    }

    fn on_return(&self, thread: ThreadId) {
        let mut inner = self.inner.lock();
        if let Some(frames) = inner.get_mut(&thread) {
            frames.pop();
        }
    }
}

impl StackProvider for ReplayStacks {
    fn snapshot(&self) -> Vec<ThreadStack> {
        self.inner
            .lock()
            .iter()
            .map(|(thread, frames)| ThreadStack {
                thread: *thread,
                frames: frames.clone(),
            })
            .collect()
    }
}
