//! `malloc` / `realloc` / `free`: placing new units into the correct
//! list/colour and updating statistics. These are plain functions over an
//! already-locked `Heap` + `Registry` + `GcStats` rather than methods on a
//! struct of their own, since the collector always calls them with the
//! allocator lock already held.

use crate::error::{fatal, GcError, Result};
use crate::heap::{Heap, UnitId};
use crate::object::{Colour, LifecycleState, ListId};
use crate::registry::{Finalize, Registry};
use crate::stats::GcStats;

/// Allocate a zero-initialized unit of `size` bytes under `class_idx`.
///
/// FIXED classes get colour FIXED and are never placed on a list. GC classes
/// get colour WHITE, state NEED_FINALIZE (if the class has a real finalizer)
/// or NORMAL otherwise, and are appended to the white list.
pub fn allocate(
    heap: &mut Heap,
    registry: &Registry,
    stats: &mut GcStats,
    size: usize,
    class_idx: u32,
) -> Result<usize> {
    let class = registry.get(class_idx).unwrap_or_else(|| {
        fatal(format!(
            "allocate: class {class_idx} was never registered"
        ))
    });

    let id = heap
        .allocate(size, class_idx)
        .ok_or(GcError::OutOfMemory {
            size,
            class: class_idx,
        })?;

    if class.is_fixed() {
        heap.set_colour(id, Colour::Fixed);
        heap.set_state(id, LifecycleState::Normal);
    } else {
        heap.set_colour(id, Colour::White);
        let state = match &class.finalize {
            Finalize::Callback(_) => LifecycleState::NeedFinalize,
            _ => LifecycleState::Normal,
        };
        heap.set_state(id, state);
        heap.list_push_back(ListId::White, id);
    }

    let actual_size = heap.object_size(id) as u64;
    stats.record_alloc(actual_size);
    class.record_alloc(actual_size);
    Ok(heap.address_of(id))
}

/// Grow, shrink, or relocate a FIXED allocation. Only valid for FIXED
/// objects; any other class index is a fatal programming error, matching the
/// reference implementation's assertion.
pub fn reallocate(
    heap: &mut Heap,
    registry: &Registry,
    stats: &mut GcStats,
    ptr: usize,
    size: usize,
    class_idx: u32,
) -> Result<usize> {
    if ptr == 0 {
        return allocate(heap, registry, stats, size, class_idx);
    }

    let id = heap
        .is_object(ptr)
        .unwrap_or_else(|| fatal(format!("reallocate: {ptr:#x} is not a live object")));

    if heap.colour(id) != Colour::Fixed {
        fatal(format!(
            "reallocate: {ptr:#x} is not a FIXED allocation (reallocate is undefined for other classes)"
        ));
    }

    let old_size = heap.object_size(id);
    if old_size >= size {
        return Ok(ptr);
    }

    let new_addr = allocate(heap, registry, stats, size, class_idx)?;
    let new_id = heap
        .is_object(new_addr)
        .expect("just-allocated unit must be a live object");
    // SAFETY: copying the lesser of old/new size between two live units.
    unsafe {
        heap.copy_payload(id, new_id, old_size.min(size));
    }
    free(heap, registry, stats, ptr)?;
    Ok(new_addr)
}

/// Release a FIXED allocation. A no-op on a null pointer. Freeing anything
/// else (a GC-managed colour) is a fatal programming error.
pub fn free(heap: &mut Heap, registry: &Registry, stats: &mut GcStats, ptr: usize) -> Result<()> {
    if ptr == 0 {
        return Ok(());
    }

    let id = heap
        .is_object(ptr)
        .unwrap_or_else(|| fatal(format!("free: {ptr:#x} is not a live object")));

    if heap.colour(id) != Colour::Fixed {
        fatal(format!(
            "free: {ptr:#x} is not a FIXED allocation; only FIXED objects may be explicitly freed"
        ));
    }

    let class_idx = heap.class_of(id);
    let size = heap.object_size(id) as u64;
    heap.free(id);
    stats.record_free(size);
    if let Some(class) = registry.get(class_idx) {
        class.record_free(size);
    }
    Ok(())
}

/// Look up the unit containing `ptr` and return its block size, per the
/// `object_size` vtable entry.
pub fn object_size(heap: &Heap, ptr: usize) -> Option<usize> {
    heap.is_object(ptr).map(|id| heap.object_size(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn setup() -> (Heap, Registry, GcStats) {
        let heap = Heap::new(8, 1 << 20);
        let registry = Registry::new();
        registry.register_gc(0, None, Finalize::Normal, None, "normal").unwrap();
        registry.register_fixed(1, "fixed").unwrap();
        (heap, registry, GcStats::new())
    }

    #[test]
    fn allocate_normal_goes_white() {
        let (mut heap, registry, mut stats) = setup();
        let addr = allocate(&mut heap, &registry, &mut stats, 64, 0).unwrap();
        let id = heap.is_object(addr).unwrap();
        assert_eq!(heap.colour(id), Colour::White);
        assert_eq!(heap.current_list(id), Some(ListId::White));
        assert_eq!(stats.totalobj, 1);
        assert_eq!(stats.allocobj, 1);

        let class = registry.get(0).unwrap();
        assert_eq!(class.live_objects.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(class.live_bytes.load(std::sync::atomic::Ordering::Relaxed), 64);
    }

    #[test]
    fn allocate_fixed_has_no_list() {
        let (mut heap, registry, mut stats) = setup();
        let addr = allocate(&mut heap, &registry, &mut stats, 64, 1).unwrap();
        let id = heap.is_object(addr).unwrap();
        assert_eq!(heap.colour(id), Colour::Fixed);
        assert_eq!(heap.current_list(id), None);
    }

    #[test]
    fn free_fixed_releases_and_updates_stats() {
        let (mut heap, registry, mut stats) = setup();
        let addr = allocate(&mut heap, &registry, &mut stats, 64, 1).unwrap();
        free(&mut heap, &registry, &mut stats, addr).unwrap();
        assert_eq!(stats.totalobj, 0);

        let class = registry.get(1).unwrap();
        assert_eq!(class.live_objects.load(std::sync::atomic::Ordering::Relaxed), 0);
        assert_eq!(class.live_bytes.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn free_null_is_noop() {
        let (mut heap, registry, mut stats) = setup();
        assert!(free(&mut heap, &registry, &mut stats, 0).is_ok());
    }

    #[test]
    fn reallocate_in_place_when_it_fits() {
        let (mut heap, registry, mut stats) = setup();
        let addr = allocate(&mut heap, &registry, &mut stats, 64, 1).unwrap();
        let addr2 = reallocate(&mut heap, &registry, &mut stats, addr, 8, 1).unwrap();
        assert_eq!(addr, addr2);
    }
}
