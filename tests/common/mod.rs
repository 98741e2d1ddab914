//! Shared helpers for integration tests: trace construction and synthetic
//! programs with known profiles.

#![allow(dead_code)] // not every test file uses every helper

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lineprof::aggregate::GlobalProfile;
use lineprof::clock::ManualClock;
use lineprof::filter::FilterPolicy;
use lineprof::profiler::{ProfileOptions, Profiler};
use lineprof::replay::ReplayHost;

pub const FIB_FILE: &str = "demo/fibo.src";
pub const THREADS_FILE: &str = "demo/threads.src";

/// Builds JSON-lines event traces for the replay host.
#[derive(Default)]
pub struct TraceBuilder {
    records: Vec<String>,
    calls: u64,
    returns: u64,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meta(&mut self, main_thread: u64, syspath: &[&str]) -> &mut Self {
        let roots = syspath
            .iter()
            .map(|s| format!("\"{}\"", s))
            .collect::<Vec<_>>()
            .join(",");
        self.records.push(format!(
            "{{\"event\":\"meta\",\"main_thread\":{},\"syspath\":[{}]}}",
            main_thread, roots
        ));
        self
    }

    pub fn line(&mut self, thread: u64, t: u64, file: &str, line: u32) -> &mut Self {
        self.records.push(format!(
            "{{\"event\":\"line\",\"thread\":{},\"t\":{},\"file\":\"{}\",\"line\":{}}}",
            thread, t, file, line
        ));
        self
    }

    pub fn call(&mut self, thread: u64, t: u64, file: &str, first_line: u32, name: &str) -> &mut Self {
        self.calls += 1;
        self.records.push(format!(
            "{{\"event\":\"call\",\"thread\":{},\"t\":{},\"file\":\"{}\",\"first_line\":{},\"name\":\"{}\"}}",
            thread, t, file, first_line, name
        ));
        self
    }

    pub fn ret(&mut self, thread: u64, t: u64) -> &mut Self {
        self.returns += 1;
        self.records
            .push(format!("{{\"event\":\"return\",\"thread\":{},\"t\":{}}}", thread, t));
        self
    }

    pub fn exit(&mut self, code: i32) -> &mut Self {
        self.records
            .push(format!("{{\"event\":\"exit\",\"code\":{}}}", code));
        self
    }

    pub fn call_count(&self) -> u64 {
        self.calls
    }

    pub fn return_count(&self) -> u64 {
        self.returns
    }

    pub fn build(&self) -> String {
        let mut out = self.records.join("\n");
        out.push('\n');
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("trace written");
        path
    }
}

/// Event trace of computing `fib(n)` with
/// `fib(n) = 1 if n < 3 else fib(n-1) + fib(n-2)`.
///
/// Source layout of `demo/fibo.src`:
/// ```text
/// 1  fn fib(n):
/// 2      if n < 3:
/// 3          return 1
/// 4      return fib(n - 1) + fib(n - 2)
/// 5
/// 6  print(fib(10))
/// ```
/// Every event advances the clock by `step` nanoseconds.
pub fn fib_trace(n: u64, step: u64) -> TraceBuilder {
    let mut builder = TraceBuilder::new();
    let mut t = 0u64;
    builder.meta(1, &[]);
    builder.line(1, t, FIB_FILE, 6);
    t += step;
    emit_fib(&mut builder, &mut t, step, n);
    builder.exit(0);
    builder
}

fn emit_fib(builder: &mut TraceBuilder, t: &mut u64, step: u64, n: u64) {
    builder.call(1, *t, FIB_FILE, 1, "fib");
    *t += step;
    builder.line(1, *t, FIB_FILE, 2);
    *t += step;
    if n < 3 {
        builder.line(1, *t, FIB_FILE, 3);
        *t += step;
    } else {
        builder.line(1, *t, FIB_FILE, 4);
        *t += step;
        emit_fib(builder, t, step, n - 1);
        emit_fib(builder, t, step, n - 2);
    }
    builder.ret(1, *t);
    *t += step;
}

/// Event trace of three threads sleeping `sleep_ns` each, concurrently:
/// the main thread plus two spawned ones, all inside `func` whose body is
/// the sleep line.
///
/// Source layout of `demo/threads.src`:
/// ```text
/// 4  fn func():
/// 5      sleep(1)
/// ...
/// 10 run_all()
/// ```
pub fn threads_trace(sleep_ns: u64) -> TraceBuilder {
    let mut builder = TraceBuilder::new();
    builder.meta(1, &[]);
    builder.line(1, 0, THREADS_FILE, 10);
    builder.call(1, 100, THREADS_FILE, 4, "func");
    builder.call(2, 110, THREADS_FILE, 4, "func");
    builder.call(3, 120, THREADS_FILE, 4, "func");
    builder.line(1, 130, THREADS_FILE, 5);
    builder.line(2, 140, THREADS_FILE, 5);
    builder.line(3, 150, THREADS_FILE, 5);
    builder.ret(1, 130 + sleep_ns);
    builder.ret(2, 140 + sleep_ns);
    builder.ret(3, 150 + sleep_ns);
    builder.exit(0);
    builder
}

/// Replay `trace` through a deterministic session and return the profile
/// with the recorded exit code.
pub fn profile_trace_with(
    trace: &str,
    propagate: bool,
    filter: FilterPolicy,
) -> (GlobalProfile, i32) {
    let mut host = ReplayHost::from_reader(BufReader::new(Cursor::new(trace.to_string())))
        .expect("trace parses");
    let clock = Arc::new(ManualClock::new());
    let profiler = Profiler::new(ProfileOptions {
        clock: clock.clone(),
        filter,
        propagate,
        command_line: None,
    });
    profiler.enable(host.main_thread()).expect("enable");
    let code = host.run_deterministic(&profiler, &clock).expect("replay");
    let profile = profiler.disable().expect("disable");
    (profile, code)
}

pub fn profile_trace(trace: &str) -> GlobalProfile {
    profile_trace_with(trace, true, FilterPolicy::allow_all()).0
}
