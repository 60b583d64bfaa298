//! The mark-sweep cycle itself, plus the allocator-lock-free skip heuristic.
//!
//! Every function here operates on an already-locked `Heap`; the world is
//! stopped for the whole span from `start_gc` through `finish_gc`. Splitting
//! the cycle into these free functions (rather than methods that also touch
//! `Collector`'s threading state) keeps the tracing logic testable without a
//! live worker thread.

use super::Collector;
use crate::config::GcConfig;
use crate::heap::{Heap, UnitId};
use crate::logging::{self, GcEvent};
use crate::object::{Colour, LifecycleState, ListId};
use crate::registry::{Finalize, Registry};
use crate::roots::{GcHandle, RootScanner};
use crate::stats::{CycleTimer, GcStats};
use std::sync::atomic::Ordering;

/// Decide whether a non-forced cycle should be skipped: nothing has been
/// allocated since the last cycle, or the heap has room to grow and the
/// live:allocated ratio doesn't yet justify the stop-the-world pause.
pub(crate) fn should_skip(stats: &GcStats, heap_total: usize, config: &GcConfig) -> bool {
    if stats.allocmem == 0 {
        return true;
    }
    if (heap_total as u64) < config.heap_limit_bytes as u64
        && config.liveness_numerator * stats.allocmem < config.liveness_denominator * stats.totalmem
    {
        return true;
    }
    false
}

/// Seed the grey list: every unit still waiting on the finalise list counts
/// as reachable (it is not garbage, merely pending its finalizer), and every
/// mutator root the embedder reports.
pub(crate) fn start_gc(heap: &mut Heap, root_scanner: &dyn RootScanner) {
    let pending: Vec<UnitId> = heap.list_iter(ListId::Finalise).collect();
    for id in pending {
        let mut gc = GcHandle::new(heap);
        gc.mark_object(id);
    }

    let mut gc = GcHandle::new(heap);
    root_scanner.scan_roots(&mut gc);
}

/// Drain the grey list to completion: walk every unit's outgoing references
/// (precisely via its class's `walk` callback, conservatively otherwise),
/// turning each into black as it's processed.
pub(crate) fn drain_grey(heap: &mut Heap, registry: &Registry, stats: &mut GcStats) {
    while let Some(id) = heap.list_pop_front(ListId::Grey) {
        heap.set_colour(id, Colour::Black);
        heap.list_push_back(ListId::Black, id);

        let size = heap.object_size(id);
        stats.record_mark(size as u64);

        let class_idx = heap.class_of(id);
        let addr = heap.address_of(id);
        let walk = registry.get(class_idx).and_then(|c| c.walk.clone());

        let mut gc = GcHandle::new(heap);
        match walk {
            Some(walk_fn) => walk_fn(addr, size, &mut |child| gc.mark_address(child)),
            // SAFETY: [addr, addr+size) is the payload of a live, in-use unit.
            None => unsafe { gc.walk_conservative(addr, size) },
        }
    }
}

/// After the first mark pass, promote every white unit awaiting finalization
/// to grey so the second pass keeps its referents alive too.
pub(crate) fn promote_finalizable(heap: &mut Heap) {
    let candidates: Vec<UnitId> = heap
        .list_iter(ListId::White)
        .filter(|&id| heap.state(id) == LifecycleState::NeedFinalize)
        .collect();

    for id in candidates {
        heap.set_state(id, LifecycleState::InFinalize);
        let mut gc = GcHandle::new(heap);
        gc.mark_object(id);
    }
}

/// Sweep: every remaining white unit is garbage (queued for release); every
/// black unit is reset to white, except units mid-finalization, which move
/// to the finalise list instead. Both branches reset colour to white,
/// matching the reference's unconditional `finishGC` recolouring.
///
/// Returns whether the finalise list is non-empty after this pass.
pub(crate) fn finish_gc(heap: &mut Heap, stats: &mut GcStats) -> bool {
    debug_assert!(heap.list_is_empty(ListId::Grey));

    while let Some(id) = heap.list_pop_front(ListId::White) {
        let size = heap.object_size(id) as u64;
        stats.record_sweep(size);
        heap.list_push_back(ListId::MustFree, id);
    }

    while let Some(id) = heap.list_pop_front(ListId::Black) {
        let state = heap.state(id);
        heap.set_colour(id, Colour::White);
        if state == LifecycleState::InFinalize {
            let size = heap.object_size(id) as u64;
            stats.record_finalize_pending(size);
            heap.list_push_back(ListId::Finalise, id);
        } else {
            heap.list_push_back(ListId::White, id);
        }
    }

    !heap.list_is_empty(ListId::Finalise)
}

/// Release every unit queued on the must-free list: invoke its class's
/// `destroy` callback (if any), then return its storage to the heap. Run
/// after the world resumes, since destroy callbacks only touch the dying
/// unit's own payload.
pub(crate) fn drain_mustfree(heap: &mut Heap, registry: &Registry) {
    while let Some(id) = heap.list_pop_front(ListId::MustFree) {
        let class_idx = heap.class_of(id);
        let addr = heap.address_of(id);
        let size = heap.object_size(id) as u64;
        if let Some(class) = registry.get(class_idx) {
            if let Some(destroy) = &class.destroy {
                destroy(addr);
            }
            class.record_free(size);
        }
        heap.free(id);
    }
}

/// `gcman`'s body: wait for a request, run it (subject to the skip
/// heuristic unless forced), signal completion, repeat until shutdown.
pub(super) fn gcman_loop(collector: &Collector) {
    loop {
        let forced;
        {
            let mut state = collector.gcman_state.lock().unwrap();
            while state.running == 0 {
                if collector.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                state = collector.gcman_cond.wait(state).unwrap();
            }
            if collector.shutdown.load(Ordering::SeqCst) {
                state.running = 0;
                collector.gcman_cond.notify_all();
                return;
            }

            forced = state.running == 2;
            if !forced {
                let inner = collector.inner.lock().unwrap();
                let skip = should_skip(&inner.stats, inner.heap.heap_total(), &collector.config);
                drop(inner);
                if skip {
                    state.running = 0;
                    collector.gcman_cond.notify_all();
                    logging::log_event(&GcEvent::CycleSkipped {
                        reason: "allocation below liveness threshold",
                    });
                    continue;
                }
            }
        }

        run_cycle(collector, forced);

        let mut state = collector.gcman_state.lock().unwrap();
        state.running = 0;
        collector.gcman_cond.notify_all();
    }
}

/// One full stop-the-world cycle: mark, sweep, resume, release.
fn run_cycle(collector: &Collector, forced: bool) {
    let mut inner = collector.inner.lock().unwrap();
    inner.stats.begin_cycle();
    let cycle = inner.stats.cycles + 1;
    logging::log_event(&GcEvent::CycleStart {
        cycle,
        forced,
    });
    let timer = CycleTimer::start();

    collector.world.stop_world();

    start_gc(&mut inner.heap, collector.root_scanner.as_ref());
    drain_grey(&mut inner.heap, &collector.registry, &mut inner.stats);
    promote_finalizable(&mut inner.heap);
    drain_grey(&mut inner.heap, &collector.registry, &mut inner.stats);
    let finalise_pending = finish_gc(&mut inner.heap, &mut inner.stats);

    collector.world.resume_world();

    drain_mustfree(&mut inner.heap, &collector.registry);
    inner.stats.reconcile_cycle();

    let elapsed = timer.elapsed();
    logging::print_cycle_summary(collector.config.verbose, cycle, elapsed, &inner.stats);
    if collector.config.verbose >= 2 {
        for (_, class) in collector.registry.iter() {
            logging::print_class_summary(
                collector.config.verbose,
                &class.description,
                class.live_objects.load(Ordering::Relaxed),
                class.live_bytes.load(Ordering::Relaxed),
            );
        }
    }
    logging::log_event(&GcEvent::CycleEnd {
        cycle,
        duration: elapsed,
        freed_objects: inner.stats.freedobj,
        freed_bytes: inner.stats.freedmem,
    });

    // Release the allocator lock before signalling finman: the lock
    // ordering is allocator-lock < finman, never the reverse.
    drop(inner);

    if finalise_pending {
        let mut fin = collector.finman_state.lock().unwrap();
        fin.active = true;
        collector.finman_cond.notify_all();
    }
}

/// `finman`'s body: wait to be woken, drain the finalise list one unit at a
/// time, releasing the finalizer mutex around each user callback.
pub(super) fn finman_loop(collector: &Collector) {
    loop {
        let mut fin = collector.finman_state.lock().unwrap();
        while !fin.active {
            if collector.shutdown.load(Ordering::SeqCst) {
                return;
            }
            fin = collector.finman_cond.wait(fin).unwrap();
        }
        if collector.shutdown.load(Ordering::SeqCst) {
            fin.active = false;
            collector.finman_cond.notify_all();
            return;
        }

        let mut drained = 0u64;
        loop {
            let next = {
                let mut inner = collector.inner.lock().unwrap();
                let popped = inner.heap.list_pop_front(ListId::Finalise);
                popped.map(|id| {
                    inner.heap.set_colour(id, Colour::Grey);
                    inner.heap.set_state(id, LifecycleState::Finalized);
                    inner.heap.list_push_back(ListId::Grey, id);
                    (inner.heap.class_of(id), inner.heap.address_of(id))
                })
            };
            let Some((class_idx, addr)) = next else {
                break;
            };

            // Release finman before invoking user code, reacquire right
            // after: a finalizer is free to allocate, which only needs the
            // allocator lock, never finman.
            drop(fin);
            if let Some(class) = collector.registry.get(class_idx) {
                if let Finalize::Callback(finalize) = &class.finalize {
                    finalize(addr);
                }
            }
            drained += 1;
            fin = collector.finman_state.lock().unwrap();
        }

        if drained > 0 {
            logging::log_event(&GcEvent::FinalizerRun { objects: drained });
        }

        fin.active = false;
        collector.finman_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Finalize;
    use crate::roots::StaticRoots;

    fn setup(capacity: usize, max_bytes: usize) -> (Heap, Registry) {
        let heap = Heap::new(capacity, max_bytes);
        let registry = Registry::new();
        registry
            .register_gc(0, None, Finalize::Normal, None, "plain")
            .unwrap();
        (heap, registry)
    }

    #[test]
    fn unreachable_unit_is_swept() {
        let (mut heap, registry) = setup(8, 1 << 20);
        let mut stats = GcStats::new();
        let roots = StaticRoots::new();

        let id = heap.allocate(32, 0).unwrap();
        heap.list_push_back(ListId::White, id);
        stats.record_alloc(heap.object_size(id) as u64);

        start_gc(&mut heap, &roots);
        drain_grey(&mut heap, &registry, &mut stats);
        promote_finalizable(&mut heap);
        drain_grey(&mut heap, &registry, &mut stats);
        let pending = finish_gc(&mut heap, &mut stats);

        assert!(!pending);
        assert_eq!(heap.current_list(id), Some(ListId::MustFree));
        drain_mustfree(&mut heap, &registry);
        assert_eq!(stats.freedobj, 1);
    }

    #[test]
    fn rooted_unit_survives_and_returns_white() {
        let (mut heap, registry) = setup(8, 1 << 20);
        let mut stats = GcStats::new();
        let roots = StaticRoots::new();

        let id = heap.allocate(32, 0).unwrap();
        heap.list_push_back(ListId::White, id);
        let addr = heap.address_of(id);
        roots.add(addr);

        start_gc(&mut heap, &roots);
        drain_grey(&mut heap, &registry, &mut stats);
        promote_finalizable(&mut heap);
        drain_grey(&mut heap, &registry, &mut stats);
        let pending = finish_gc(&mut heap, &mut stats);

        assert!(!pending);
        assert_eq!(heap.colour(id), Colour::White);
        assert_eq!(heap.current_list(id), Some(ListId::White));
    }

    #[test]
    fn finalizable_unit_is_promoted_not_swept() {
        let (mut heap, registry) = setup(8, 1 << 20);
        registry
            .register_gc(
                1,
                None,
                Finalize::Callback(std::sync::Arc::new(|_addr| {})),
                None,
                "finalizable",
            )
            .unwrap();
        let mut stats = GcStats::new();
        let roots = StaticRoots::new();

        let id = heap.allocate(32, 1).unwrap();
        heap.set_state(id, LifecycleState::NeedFinalize);
        heap.list_push_back(ListId::White, id);

        start_gc(&mut heap, &roots);
        drain_grey(&mut heap, &registry, &mut stats);
        promote_finalizable(&mut heap);
        drain_grey(&mut heap, &registry, &mut stats);
        let pending = finish_gc(&mut heap, &mut stats);

        assert!(pending);
        assert_eq!(heap.colour(id), Colour::White);
        assert_eq!(heap.current_list(id), Some(ListId::Finalise));
        assert_eq!(heap.state(id), LifecycleState::InFinalize);
    }

    #[test]
    fn skip_heuristic_gates_on_liveness_ratio() {
        let config = GcConfig::default();
        let mut stats = GcStats::new();
        assert!(should_skip(&stats, 0, &config));

        stats.record_alloc(10);
        stats.totalmem = 100;
        assert!(should_skip(&stats, 0, &config));

        stats.totalmem = 10;
        assert!(!should_skip(&stats, 0, &config));
    }
}
