//! The collector: owns the heap, the registry, and the two background
//! threads (`gcman`, `finman`) that drive collection and finalization.
//!
//! Three lock/condvar pairs, acquired in one fixed order everywhere in this
//! module: the allocator lock (`inner`, guarding `Heap`+`GcStats`) before
//! `gcman_state`, and the allocator lock before `finman_state`. `finman` is
//! always released before a finalizer callback runs and reacquired right
//! after, so a finalizer that triggers new allocations never deadlocks
//! against the worker that's about to hand it its next unit.

mod driver;

use crate::allocator;
use crate::config::GcConfig;
use crate::error::Result;
use crate::heap::Heap;
use crate::registry::{DestroyFn, Finalize, Registry, WalkFn};
use crate::roots::RootScanner;
use crate::safepoint::{NullWorld, WorldStopper};
use crate::stats::GcStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

struct Inner {
    heap: Heap,
    stats: GcStats,
}

/// `gcman`'s running state: 0 idle, 1 requested (subject to the skip
/// heuristic), 2 forced (heuristic bypassed).
struct GcManState {
    running: u8,
}

struct FinManState {
    active: bool,
}

struct Workers {
    collector: JoinHandle<()>,
    finalizer: JoinHandle<()>,
}

/// Entry point for allocation, collection, and finalization. Cheap to clone
/// (an `Arc<Collector>` is the intended handle); [`Collector::enable`] spawns
/// the background workers once construction and registration are complete.
pub struct Collector {
    inner: Mutex<Inner>,
    config: GcConfig,
    registry: Registry,
    root_scanner: Arc<dyn RootScanner>,
    world: Arc<dyn WorldStopper>,

    gcman_state: Mutex<GcManState>,
    gcman_cond: Condvar,

    finman_state: Mutex<FinManState>,
    finman_cond: Condvar,

    workers: Mutex<Option<Workers>>,
    shutdown: AtomicBool,
}

impl Collector {
    /// Construct a collector over a fresh heap, using [`NullWorld`] (no
    /// mutators to suspend) as the stop-the-world implementation. Use
    /// [`Collector::with_world`] to supply a real one.
    pub fn new(config: GcConfig, root_scanner: Arc<dyn RootScanner>) -> Result<Arc<Self>> {
        Self::with_world(config, root_scanner, Arc::new(NullWorld))
    }

    pub fn with_world(
        config: GcConfig,
        root_scanner: Arc<dyn RootScanner>,
        world: Arc<dyn WorldStopper>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let heap = Heap::new(config.heap_block_capacity, config.max_heap_bytes);
        Ok(Arc::new(Collector {
            inner: Mutex::new(Inner {
                heap,
                stats: GcStats::new(),
            }),
            config,
            registry: Registry::new(),
            root_scanner,
            world,
            gcman_state: Mutex::new(GcManState { running: 0 }),
            gcman_cond: Condvar::new(),
            finman_state: Mutex::new(FinManState { active: false }),
            finman_cond: Condvar::new(),
            workers: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Spawn the collector and finalizer worker threads. Idempotent: a
    /// second call on an already-enabled collector is a no-op.
    pub fn enable(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        if workers.is_some() {
            return;
        }
        let collector = {
            let c = self.clone();
            std::thread::Builder::new()
                .name("gcman".into())
                .spawn(move || driver::gcman_loop(&c))
                .expect("failed to spawn gc collector thread")
        };
        let finalizer = {
            let c = self.clone();
            std::thread::Builder::new()
                .name("finman".into())
                .spawn(move || driver::finman_loop(&c))
                .expect("failed to spawn gc finalizer thread")
        };
        *workers = Some(Workers {
            collector,
            finalizer,
        });
    }

    /// Signal both worker threads to stop and join them. Safe to call more
    /// than once; a collector with no workers running is a no-op.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.gcman_cond.notify_all();
        self.finman_cond.notify_all();
        if let Some(workers) = self.workers.lock().unwrap().take() {
            let _ = workers.collector.join();
            let _ = workers.finalizer.join();
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register_fixed(&self, index: u32, description: impl Into<String>) -> Result<()> {
        self.registry.register_fixed(index, description)
    }

    pub fn register_gc(
        &self,
        index: u32,
        walk: Option<WalkFn>,
        finalize: Finalize,
        destroy: Option<DestroyFn>,
        description: impl Into<String>,
    ) -> Result<()> {
        self.registry.register_gc(index, walk, finalize, destroy, description)
    }

    pub fn malloc(&self, size: usize, class_idx: u32) -> Result<usize> {
        let mut inner = self.inner.lock()?;
        let Inner { heap, stats } = &mut *inner;
        allocator::allocate(heap, &self.registry, stats, size, class_idx)
    }

    pub fn realloc(&self, ptr: usize, size: usize, class_idx: u32) -> Result<usize> {
        let mut inner = self.inner.lock()?;
        let Inner { heap, stats } = &mut *inner;
        allocator::reallocate(heap, &self.registry, stats, ptr, size, class_idx)
    }

    pub fn free(&self, ptr: usize) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let Inner { heap, stats } = &mut *inner;
        allocator::free(heap, &self.registry, stats, ptr)
    }

    pub fn object_size(&self, ptr: usize) -> Result<Option<usize>> {
        let inner = self.inner.lock()?;
        Ok(allocator::object_size(&inner.heap, ptr))
    }

    pub fn stats(&self) -> Result<GcStats> {
        Ok(self.inner.lock()?.stats)
    }

    /// Request a collection cycle and block until it completes. `must =
    /// true` bypasses the skip heuristic; the worker thread runs the cycle
    /// either way once woken, this call only waits for `running` to return
    /// to idle.
    pub fn invoke(&self, must: bool) {
        let mut state = self.gcman_state.lock().unwrap();
        if state.running == 0 {
            state.running = if must { 2 } else { 1 };
            self.gcman_cond.notify_all();
        } else if must {
            state.running = 2;
        }
        while state.running != 0 {
            state = self.gcman_cond.wait(state).unwrap();
        }
    }

    /// Force a collection, then force the finalizer worker to drain the
    /// finalise list and wait for it to finish. The forced signal here is
    /// redundant with the one `finish_gc` already sends when the finalise
    /// list is non-empty; it exists to also unblock waiting when the list
    /// was already empty (the finalizer wakes, finds nothing, and returns
    /// immediately).
    pub fn invoke_finalizer(&self) {
        self.invoke(true);
        let mut fin = self.finman_state.lock().unwrap();
        fin.active = true;
        self.finman_cond.notify_all();
        while fin.active {
            fin = self.finman_cond.wait(fin).unwrap();
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
