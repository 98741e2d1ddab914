//! Deterministic per-thread line tracer
//!
//! Consumes LINE / CALL / RETURN events from the host interpreter and
//! drives one thread's store and call-stack model. This is the profiling
//! choke point: every executed source line lands here, so the handlers
//! are O(1), take no contended locks, never allocate on error and never
//! panic. Invariant violations increment a session counter and drop the
//! affected delta.
//!
//! Accounting model: each frame tracks the site currently charged and the
//! clock value its next delta is measured from. When a child returns, its
//! inclusive time is posted to the caller's edge and added to the caller's
//! discount so the caller's next line delta does not re-count it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::event::TraceEvent;
use crate::filter::FilterPolicy;
use crate::profiler::SessionWarnings;
use crate::site::{CodeRef, Edge, Site};
use crate::store::{Frame, ThreadStore};

/// Per-thread deterministic event consumer. Obtained once per thread from
/// `Profiler::handle`; the host's trace hook forwards every event here.
pub struct TracerHandle {
    store: Arc<Mutex<ThreadStore>>,
    clock: Arc<dyn Clock>,
    filter: Arc<FilterPolicy>,
    warnings: Arc<SessionWarnings>,
    enabled: Arc<AtomicBool>,
    /// Per-file filter verdicts, cached so the policy's path
    /// normalization stays off the hot path.
    tracked: HashMap<Arc<str>, bool>,
    unrestricted: bool,
}

impl TracerHandle {
    pub(crate) fn new(
        store: Arc<Mutex<ThreadStore>>,
        clock: Arc<dyn Clock>,
        filter: Arc<FilterPolicy>,
        warnings: Arc<SessionWarnings>,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        let unrestricted = filter.is_unrestricted();
        Self {
            store,
            clock,
            filter,
            warnings,
            enabled,
            tracked: HashMap::new(),
            unrestricted,
        }
    }

    /// Feed one interpreter event. Events arriving after `disable` are
    /// ignored; an event already past this check completes normally.
    pub fn on_event(&mut self, event: TraceEvent) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        match event {
            TraceEvent::Line { file, line } => self.on_line(file, line),
            TraceEvent::Call { callee } => self.on_call(callee),
            TraceEvent::Return => self.on_return(),
        }
    }

    fn is_tracked(&mut self, file: &Arc<str>) -> bool {
        if self.unrestricted {
            return true;
        }
        if let Some(&verdict) = self.tracked.get(file) {
            return verdict;
        }
        let verdict = self.filter.is_tracked(file);
        self.tracked.insert(file.clone(), verdict);
        verdict
    }

    /// Delta since the frame's last tick, minus the accumulated discount,
    /// clamped at zero. Resets the discount.
    fn take_delta(frame: &mut Frame, now: u64, warnings: &SessionWarnings) -> u64 {
        let elapsed = if now < frame.last_tick {
            warnings.backwards_clock();
            0
        } else {
            now - frame.last_tick
        };
        let delta = elapsed.saturating_sub(frame.discount);
        frame.discount = 0;
        delta
    }

    fn on_line(&mut self, file: Arc<str>, line: u32) {
        let t = self.clock.now_ns();
        let tracked = self.is_tracked(&file);
        let store = self.store.clone();
        let mut store = store.lock();
        if store.stack.is_empty() {
            store.stack.push(Frame::sentinel(t));
        }
        let Some(top) = store.stack.last_mut() else {
            return;
        };
        let owner = match &top.owner {
            Some(owner) => owner.clone(),
            None => {
                // Code already running when profiling started; attribute
                // it to top-level code of the file we first observe.
                let module = CodeRef::module(file.clone());
                top.owner = Some(module.clone());
                module
            }
        };
        let delta = Self::take_delta(top, t, &self.warnings);
        let closed = top.site.replace(Site::new(file, line));
        // Re-read the clock so handler time is excluded from the next
        // interval.
        top.last_tick = self.clock.now_ns();
        if let Some(site) = closed {
            if tracked {
                store.record_line(site, &owner, delta);
            }
        }
    }

    fn on_call(&mut self, callee: CodeRef) {
        let t = self.clock.now_ns();
        let store = self.store.clone();
        let mut store = store.lock();
        if store.stack.is_empty() {
            store.stack.push(Frame::sentinel(t));
        }
        let Some(top) = store.stack.last_mut() else {
            return;
        };
        // Close out the caller's current line up to the call.
        let delta = Self::take_delta(top, t, &self.warnings);
        top.last_tick = t;
        let caller_site = top.site.clone();
        let caller_owner = top.owner.clone();
        if let (Some(site), Some(owner)) = (caller_site.clone(), caller_owner.as_ref()) {
            if self.is_tracked(&site.file) {
                store.record_line(site, owner, delta);
            }
        }
        if let Some(site) = caller_site.clone() {
            if self.is_tracked(&site.file) {
                let owner = caller_owner.unwrap_or_else(|| CodeRef::module(site.file.clone()));
                store.record_edge_hit(
                    Edge {
                        caller: site,
                        callee: callee.clone(),
                    },
                    &owner,
                );
            }
        }
        let entered_at = self.clock.now_ns();
        store
            .stack
            .push(Frame::entered(callee, caller_site, entered_at));
    }

    fn on_return(&mut self) {
        let t = self.clock.now_ns();
        let store = self.store.clone();
        let mut store = store.lock();
        let Some(mut frame) = store.stack.pop() else {
            self.warnings.stack_underflow();
            return;
        };
        // Final delta goes to the last line the callee executed.
        let delta = Self::take_delta(&mut frame, t, &self.warnings);
        if let (Some(site), Some(owner)) = (frame.site.clone(), frame.owner.as_ref()) {
            if self.is_tracked(&site.file) {
                store.record_line(site, owner, delta);
            }
        }
        let inclusive = t.saturating_sub(frame.enter_tick);
        if let Some(parent) = store.stack.last_mut() {
            parent.discount += inclusive;
            let parent_owner = parent.owner.clone();
            if let (Some(caller_site), Some(callee)) = (frame.caller_site, frame.owner) {
                if self.is_tracked(&caller_site.file) {
                    let owner = parent_owner
                        .unwrap_or_else(|| CodeRef::module(caller_site.file.clone()));
                    store.record_edge_time(
                        Edge {
                            caller: caller_site,
                            callee,
                        },
                        &owner,
                        inclusive,
                    );
                }
            }
        }
    }
}
