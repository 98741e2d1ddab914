//! Interpreter event model and host-runtime interface
//!
//! The profiler core never talks to a concrete interpreter. A host runtime
//! delivers `TraceEvent`s per thread for deterministic profiling, and
//! exposes live stacks through `StackProvider` for statistical profiling.
//! The bundled replay host (`crate::replay`) implements both from recorded
//! event streams; embedders wrap their interpreter's hook the same way.

use std::sync::Arc;

use crate::site::{CodeRef, ThreadId};

/// One interpreter event, already resolved to stable identifiers.
///
/// Events for native callables must not be delivered: the host is expected
/// to suppress them so native time stays on the invoking line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A source line is about to execute in the current frame.
    Line { file: Arc<str>, line: u32 },
    /// Control enters a callable.
    Call { callee: CodeRef },
    /// Control leaves the current callable, by return or by exception
    /// unwind. Hosts deliver one event per popped frame either way.
    Return,
}

/// A frame observed while sampling a live stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub code: CodeRef,
    /// Line currently executing in this frame.
    pub line: u32,
}

/// A thread's call chain, bottom (outermost) to top (innermost).
#[derive(Debug, Clone)]
pub struct ThreadStack {
    pub thread: ThreadId,
    pub frames: Vec<FrameSnapshot>,
}

/// Source of live stack snapshots for the statistical sampler.
///
/// Implementations must take whatever barrier the host runtime requires
/// (interpreter lock or equivalent) so the returned frames are a coherent
/// copy; the sampler never holds references into host-owned frames.
pub trait StackProvider: Send + Sync {
    fn snapshot(&self) -> Vec<ThreadStack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_event_equality() {
        let a = TraceEvent::Line {
            file: Arc::from("demo/app.src"),
            line: 4,
        };
        let b = TraceEvent::Line {
            file: Arc::from("demo/app.src"),
            line: 4,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_call_event_carries_callee_identity() {
        let callee = CodeRef::new(Arc::from("demo/app.src"), 10, Arc::from("worker"));
        let event = TraceEvent::Call {
            callee: callee.clone(),
        };
        match event {
            TraceEvent::Call { callee: c } => assert_eq!(c, callee),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
