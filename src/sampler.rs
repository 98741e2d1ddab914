//! Statistical sampling of live call stacks
//!
//! A dedicated thread wakes on a fixed period, snapshots every live
//! thread's frame chain through the host's `StackProvider`, and counts the
//! topmost frame's site plus one hit per adjacent caller/callee pair. No
//! interpreter hook is installed and no time is measured: nanos stay zero
//! in sampled profiles, hit counts carry the signal.
//!
//! Best-effort cadence; drift is allowed. The stop signal doubles as the
//! inter-sample timer so shutdown never waits a full period.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::event::StackProvider;
use crate::profiler::Profiler;
use crate::site::{Edge, Site, ThreadId};
use crate::store::ThreadStore;

/// Default sampling period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running sampling thread.
pub struct Sampler {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl Sampler {
    /// Spawn the sampling thread. With `single`, only the given thread is
    /// sampled; otherwise every stack the provider reports is.
    pub fn start(
        profiler: Arc<Profiler>,
        provider: Arc<dyn StackProvider>,
        period: Duration,
        single: Option<ThreadId>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let join = std::thread::Builder::new()
            .name("lineprof-sampler".into())
            .spawn(move || {
                let mut stores: HashMap<ThreadId, Arc<Mutex<ThreadStore>>> = HashMap::new();
                let mut samples = 0u64;
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if !profiler.is_enabled() {
                        break;
                    }
                    sample_once(&profiler, provider.as_ref(), single, &mut stores);
                    samples += 1;
                }
                debug!(samples, "sampler exiting");
            })?;
        Ok(Self { stop_tx, join })
    }

    /// Ask the thread to stop and wait for it. Returns true on a clean
    /// exit (the thread did not panic).
    pub fn stop(self) -> bool {
        let _ = self.stop_tx.send(());
        self.join.join().is_ok()
    }
}

fn sample_once(
    profiler: &Profiler,
    provider: &dyn StackProvider,
    single: Option<ThreadId>,
    stores: &mut HashMap<ThreadId, Arc<Mutex<ThreadStore>>>,
) {
    let filter = profiler.filter().clone();
    for stack in provider.snapshot() {
        if let Some(only) = single {
            if stack.thread != only {
                continue;
            }
        }
        if stack.frames.is_empty() {
            continue;
        }
        let store = stores
            .entry(stack.thread)
            .or_insert_with(|| profiler.store_for(stack.thread))
            .clone();
        let mut store = store.lock();
        if let Some(top) = stack.frames.last() {
            if filter.is_tracked(&top.code.file) {
                let site = Site::new(top.code.file.clone(), top.line);
                store.record_line(site, &top.code, 0);
            }
        }
        for pair in stack.frames.windows(2) {
            let (caller, callee) = (&pair[0], &pair[1]);
            if !filter.is_tracked(&caller.code.file) {
                continue;
            }
            let edge = Edge {
                caller: Site::new(caller.code.file.clone(), caller.line),
                callee: callee.code.clone(),
            };
            store.record_edge_hit(edge, &caller.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FrameSnapshot, ThreadStack};
    use crate::filter::FilterPolicy;
    use crate::profiler::ProfileOptions;
    use crate::site::CodeRef;

    struct FixedStacks(Vec<ThreadStack>);

    impl StackProvider for FixedStacks {
        fn snapshot(&self) -> Vec<ThreadStack> {
            self.0.clone()
        }
    }

    fn frame(file: &str, name: &str, first: u32, line: u32) -> FrameSnapshot {
        FrameSnapshot {
            code: CodeRef::new(Arc::from(file), first, Arc::from(name)),
            line,
        }
    }

    fn chain() -> Vec<ThreadStack> {
        vec![ThreadStack {
            thread: ThreadId(1),
            frames: vec![
                frame("demo/app.src", "<module>", 1, 12),
                frame("demo/app.src", "outer", 3, 5),
                frame("demo/app.src", "inner", 8, 9),
            ],
        }]
    }

    fn sample_n(profiler: &Profiler, provider: &dyn StackProvider, n: usize) {
        let mut stores = HashMap::new();
        for _ in 0..n {
            sample_once(profiler, provider, None, &mut stores);
        }
    }

    #[test]
    fn test_sample_counts_leaf_and_edges() {
        let profiler = Profiler::new(ProfileOptions::default());
        profiler.enable(ThreadId(1)).unwrap();
        sample_n(&profiler, &FixedStacks(chain()), 5);
        let profile = profiler.disable().unwrap();

        // Only the leaf takes line hits.
        let leaf = profile
            .line_at(&Arc::from("demo/app.src"), 9)
            .expect("leaf sampled");
        assert_eq!(leaf.stat.hits, 5);
        assert_eq!(leaf.stat.nanos, 0);
        assert!(profile.line_at(&Arc::from("demo/app.src"), 5).is_none());

        // Both adjacent pairs became edges with hit counts only.
        assert_eq!(profile.edges.len(), 2);
        for record in profile.edges.values() {
            assert_eq!(record.stat.hits, 5);
            assert_eq!(record.stat.nanos, 0);
        }
    }

    #[test]
    fn test_all_nanos_zero_in_sampled_profile() {
        let profiler = Profiler::new(ProfileOptions::default());
        profiler.enable(ThreadId(1)).unwrap();
        sample_n(&profiler, &FixedStacks(chain()), 20);
        let profile = profiler.disable().unwrap();
        assert!(profile.lines.values().all(|r| r.stat.nanos == 0));
        assert!(profile.edges.values().all(|r| r.stat.nanos == 0));
    }

    #[test]
    fn test_single_thread_sampling_skips_others() {
        let mut stacks = chain();
        stacks.push(ThreadStack {
            thread: ThreadId(2),
            frames: vec![frame("demo/other.src", "<module>", 1, 2)],
        });
        let profiler = Profiler::new(ProfileOptions::default());
        profiler.enable(ThreadId(1)).unwrap();
        let mut stores = HashMap::new();
        for _ in 0..3 {
            sample_once(&profiler, &FixedStacks(stacks.clone()), Some(ThreadId(1)), &mut stores);
        }
        let profile = profiler.disable().unwrap();
        assert!(profile.line_at(&Arc::from("demo/other.src"), 2).is_none());
        assert!(profile.line_at(&Arc::from("demo/app.src"), 9).is_some());
    }

    #[test]
    fn test_filter_gates_sampled_sites() {
        let filter = FilterPolicy::new(&["/work/demo".to_string()], &[], &[]);
        let profiler = Profiler::new(ProfileOptions {
            filter,
            ..Default::default()
        });
        profiler.enable(ThreadId(1)).unwrap();
        let stacks = vec![ThreadStack {
            thread: ThreadId(1),
            frames: vec![
                frame("/work/demo/app.src", "<module>", 1, 4),
                frame("/usr/lib/host/util.src", "helper", 2, 3),
            ],
        }];
        sample_n(&profiler, &FixedStacks(stacks), 2);
        let profile = profiler.disable().unwrap();

        // The untracked leaf is suppressed; the tracked caller still
        // records the edge into it.
        assert!(profile.lines.is_empty());
        assert_eq!(profile.edges.len(), 1);
        let edge = profile.edges.keys().next().unwrap();
        assert_eq!(&*edge.caller.file, "/work/demo/app.src");
    }

    #[test]
    fn test_sampler_thread_start_stop() {
        let profiler = Arc::new(Profiler::new(ProfileOptions::default()));
        profiler.enable(ThreadId(1)).unwrap();
        let provider: Arc<dyn StackProvider> = Arc::new(FixedStacks(chain()));
        let sampler = Sampler::start(
            profiler.clone(),
            provider,
            Duration::from_millis(2),
            None,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(sampler.stop());
        let profile = profiler.disable().unwrap();
        let leaf = profile
            .line_at(&Arc::from("demo/app.src"), 9)
            .expect("sampled at least once");
        assert!(leaf.stat.hits >= 1);
        assert_eq!(leaf.stat.nanos, 0);
    }
}
