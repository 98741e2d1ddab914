//! Hot-path overhead benchmark
//!
//! The deterministic tracer runs once per executed source line of the
//! profiled program, so per-event cost is the profiler's overhead factor.
//! This measures the LINE and CALL/RETURN handlers over a synthetic event
//! stream with a manual clock, isolating handler cost from time sources.
//!
//! ```bash
//! cargo bench --bench line_event_overhead
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lineprof::clock::ManualClock;
use lineprof::event::TraceEvent;
use lineprof::profiler::{ProfileOptions, Profiler};
use lineprof::site::{CodeRef, ThreadId};

fn bench_line_events(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new());
    let profiler = Profiler::new(ProfileOptions {
        clock: clock.clone(),
        ..Default::default()
    });
    profiler.enable(ThreadId(1)).unwrap();
    let mut handle = profiler.handle(ThreadId(1)).unwrap();
    let file: Arc<str> = Arc::from("bench/app.src");

    let mut lineno = 0u32;
    c.bench_function("line_event", |b| {
        b.iter(|| {
            clock.advance(100);
            lineno = (lineno % 64) + 1;
            handle.on_event(black_box(TraceEvent::Line {
                file: file.clone(),
                line: lineno,
            }));
        })
    });
}

fn bench_call_return_pair(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new());
    let profiler = Profiler::new(ProfileOptions {
        clock: clock.clone(),
        ..Default::default()
    });
    profiler.enable(ThreadId(1)).unwrap();
    let mut handle = profiler.handle(ThreadId(1)).unwrap();
    let file: Arc<str> = Arc::from("bench/app.src");
    handle.on_event(TraceEvent::Line {
        file: file.clone(),
        line: 1,
    });
    let callee = CodeRef::new(file.clone(), 10, Arc::from("worker"));

    c.bench_function("call_return_pair", |b| {
        b.iter(|| {
            clock.advance(100);
            handle.on_event(black_box(TraceEvent::Call {
                callee: callee.clone(),
            }));
            clock.advance(100);
            handle.on_event(TraceEvent::Line {
                file: file.clone(),
                line: 11,
            });
            clock.advance(100);
            handle.on_event(black_box(TraceEvent::Return));
        })
    });
}

criterion_group!(benches, bench_line_events, bench_call_return_pair);
criterion_main!(benches);
