//! Shared test fixtures: a fixed-size test allocation class and a root-set
//! double, reused across the scenario files below.

use std::sync::Arc;
use vmgc::registry::{DestroyFn, Finalize, WalkFn};
use vmgc::roots::StaticRoots;
use vmgc::{Collector, GcConfig};

pub const PLAIN_CLASS: u32 = 0;
pub const FINALIZABLE_CLASS: u32 = 1;
pub const FIXED_CLASS: u32 = 2;
pub const WALKED_CLASS: u32 = 3;

/// A collector wired up with a small set of test allocation classes and a
/// `StaticRoots` root set the test can add/remove addresses from directly.
pub struct Harness {
    pub collector: Arc<Collector>,
    pub roots: Arc<StaticRoots>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GcConfig {
            heap_block_capacity: 8,
            max_heap_bytes: 1 << 20,
            ..GcConfig::default()
        })
    }

    pub fn with_config(config: GcConfig) -> Self {
        let roots = Arc::new(StaticRoots::new());
        let collector = Collector::new(config, roots.clone()).expect("valid config");
        collector
            .register_gc(PLAIN_CLASS, None, Finalize::Normal, None, "plain")
            .unwrap();
        collector.register_fixed(FIXED_CLASS, "fixed").unwrap();
        collector.enable();
        Harness { collector, roots }
    }

    /// Register `FINALIZABLE_CLASS` with a finalizer that records every
    /// address it's invoked on into `sink`.
    pub fn register_finalizable(&self, sink: Arc<std::sync::Mutex<Vec<usize>>>) {
        let finalize: DestroyFn = Arc::new(move |addr| sink.lock().unwrap().push(addr));
        self.collector
            .register_gc(FINALIZABLE_CLASS, None, Finalize::Callback(finalize), None, "finalizable")
            .unwrap();
    }

    /// Register `WALKED_CLASS` with a `walk` callback that treats the first
    /// machine word of the payload as a single outgoing child pointer,
    /// simulating a simple precisely-traced object.
    pub fn register_walked(&self) {
        let walk: WalkFn = Arc::new(|addr, size, mark| {
            if size >= std::mem::size_of::<usize>() {
                // SAFETY: addr/size describe the just-marked unit's own
                // payload, read-only, during the mark phase.
                let child = unsafe { std::ptr::read_unaligned(addr as *const usize) };
                if child != 0 {
                    mark(child);
                }
            }
        });
        self.collector
            .register_gc(WALKED_CLASS, Some(walk), Finalize::Normal, None, "walked")
            .unwrap();
    }

    pub fn is_alive(&self, addr: usize) -> bool {
        self.collector.object_size(addr).unwrap().is_some()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
