//! Profiler facade: session lifecycle, thread registry, invariant counters
//!
//! A `Profiler` owns the process-wide state of one profiling session: the
//! clock, the filter policy, and the registry mapping thread ids to their
//! stores. Hosts obtain a per-thread `TracerHandle` once (registry lock on
//! first event only) and feed events through it; `disable` tears the
//! session down and aggregates every store into a `GlobalProfile`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::aggregate::{self, GlobalProfile};
use crate::clock::{Clock, MonotonicClock};
use crate::filter::FilterPolicy;
use crate::site::ThreadId;
use crate::store::ThreadStore;
use crate::tracer::TracerHandle;

/// Errors surfaced by the session lifecycle. The event hot path never
/// returns errors; invariant violations there are counted instead.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profiling is already enabled")]
    AlreadyEnabled,
    #[error("profiling is not enabled")]
    NotEnabled,
}

/// Counters for recoverable invariant violations (§ error handling).
/// The affected delta is dropped; the session keeps going.
#[derive(Debug, Default)]
pub struct SessionWarnings {
    underflow: AtomicU64,
    backwards: AtomicU64,
}

impl SessionWarnings {
    /// A RETURN event arrived with an empty call stack.
    pub fn stack_underflow(&self) {
        if self.underflow.fetch_add(1, Ordering::Relaxed) == 0 {
            warn!("call stack underflow on return event; delta dropped");
        }
    }

    /// The clock went backwards between two events on one thread.
    pub fn backwards_clock(&self) {
        if self.backwards.fetch_add(1, Ordering::Relaxed) == 0 {
            warn!("clock went backwards between events; delta dropped");
        }
    }

    pub fn snapshot(&self) -> DroppedDeltas {
        DroppedDeltas {
            underflow: self.underflow.load(Ordering::Relaxed),
            backwards: self.backwards.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of `SessionWarnings`, carried into the report headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedDeltas {
    pub underflow: u64,
    pub backwards: u64,
}

impl DroppedDeltas {
    pub fn any(&self) -> bool {
        self.underflow > 0 || self.backwards > 0
    }
}

/// Session configuration.
pub struct ProfileOptions {
    pub clock: Arc<dyn Clock>,
    pub filter: FilterPolicy,
    /// When false, only the thread that enabled profiling is recorded.
    pub propagate: bool,
    /// Command line echoed into report headers.
    pub command_line: Option<String>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            filter: FilterPolicy::allow_all(),
            propagate: true,
            command_line: None,
        }
    }
}

/// One profiling session. Deterministic tracing and statistical sampling
/// are mutually exclusive within a session; the launcher constructs the
/// session one way or the other.
pub struct Profiler {
    clock: Arc<dyn Clock>,
    filter: Arc<FilterPolicy>,
    propagate: bool,
    command_line: Option<String>,
    registry: Mutex<HashMap<ThreadId, Arc<Mutex<ThreadStore>>>>,
    warnings: Arc<SessionWarnings>,
    enabled: Arc<AtomicBool>,
    start_ns: AtomicU64,
    main_thread: Mutex<Option<ThreadId>>,
}

impl Profiler {
    pub fn new(options: ProfileOptions) -> Self {
        Self {
            clock: options.clock,
            filter: Arc::new(options.filter),
            propagate: options.propagate,
            command_line: options.command_line,
            registry: Mutex::new(HashMap::new()),
            warnings: Arc::new(SessionWarnings::default()),
            enabled: Arc::new(AtomicBool::new(false)),
            start_ns: AtomicU64::new(0),
            main_thread: Mutex::new(None),
        }
    }

    /// Start the session. `main` is the controlling thread; with
    /// propagation off it is the only thread recorded. Re-entrant enable
    /// is an error.
    pub fn enable(&self, main: ThreadId) -> Result<(), ProfileError> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Err(ProfileError::AlreadyEnabled);
        }
        *self.main_thread.lock() = Some(main);
        self.start_ns.store(self.clock.now_ns(), Ordering::SeqCst);
        Ok(())
    }

    /// Stop the session, flush residual frames and aggregate all thread
    /// stores into a global profile. Events arriving afterwards are
    /// ignored by the handles.
    pub fn disable(&self) -> Result<GlobalProfile, ProfileError> {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return Err(ProfileError::NotEnabled);
        }
        let end = self.clock.now_ns();
        let total_ns = end.saturating_sub(self.start_ns.load(Ordering::SeqCst));
        let stores: Vec<ThreadStore> = self
            .registry
            .lock()
            .drain()
            .map(|(_, store)| std::mem::take(&mut *store.lock()))
            .collect();
        Ok(aggregate::aggregate(
            stores,
            end,
            total_ns,
            self.command_line.clone(),
            self.warnings.snapshot(),
            &self.filter,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn filter(&self) -> &Arc<FilterPolicy> {
        &self.filter
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn warnings(&self) -> &Arc<SessionWarnings> {
        &self.warnings
    }

    pub fn main_thread(&self) -> Option<ThreadId> {
        *self.main_thread.lock()
    }

    /// Per-thread deterministic event consumer. Returns `None` for
    /// threads excluded by the propagation setting; the host simply does
    /// not install its hook there. Takes the registry lock, so hosts call
    /// this once per thread and keep the handle.
    pub fn handle(&self, thread: ThreadId) -> Option<TracerHandle> {
        if !self.propagate && self.main_thread().map_or(false, |main| main != thread) {
            return None;
        }
        Some(TracerHandle::new(
            self.store_for(thread),
            self.clock.clone(),
            self.filter.clone(),
            self.warnings.clone(),
            self.enabled.clone(),
        ))
    }

    /// The store owned by `thread`, created on first use. Used by the
    /// sampler, which writes into the sampled thread's store.
    pub fn store_for(&self, thread: ThreadId) -> Arc<Mutex<ThreadStore>> {
        self.registry
            .lock()
            .entry(thread)
            .or_insert_with(|| Arc::new(Mutex::new(ThreadStore::new())))
            .clone()
    }

    pub fn thread_count(&self) -> usize {
        self.registry.lock().len()
    }
}
