//! Allocation-class registry.
//!
//! Allocation classes are dispatched by a small integer index into a
//! statically sized table rather than by inheritance. The table is
//! write-once at init and lock-free for reads thereafter (each slot is a
//! `OnceLock`, so a completed registration never requires the caller to take
//! a lock to read it back).

use crate::error::{GcError, Result};
use std::sync::{Arc, OnceLock};

/// Upper bound on the number of distinct allocation classes a process may
/// register. A compile-time constant, per the registry's fixed-size
/// contract.
pub const MAX_CLASSES: usize = 256;

/// Tracer callback: given a unit's address and size, report every candidate
/// child reference to `mark` by address. `mark` is provided by the collector
/// during a walk and already knows how to classify/enqueue a candidate.
pub type WalkFn = Arc<dyn Fn(usize, usize, &mut dyn FnMut(usize)) + Send + Sync>;

/// Finalizer callback, invoked with the locks released on the payload
/// address.
pub type FinalizeFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Post-mortem callback invoked right before a unit's storage is returned to
/// the heap.
pub type DestroyFn = Arc<dyn Fn(usize) + Send + Sync>;

/// What a class does about finalization. `Normal` and `Fixed` are the two
/// sentinel values from the spec's `finalize` field; `Callback` carries a
/// real finalizer.
#[derive(Clone)]
pub enum Finalize {
    /// No finalizer. The unit is managed normally.
    Normal,
    /// The class is entirely unmanaged: `register_fixed` uses this.
    Fixed,
    /// A real finalizer callback.
    Callback(FinalizeFn),
}

pub struct ClassEntry {
    pub walk: Option<WalkFn>,
    pub finalize: Finalize,
    pub destroy: Option<DestroyFn>,
    pub description: String,
    pub live_objects: std::sync::atomic::AtomicU64,
    pub live_bytes: std::sync::atomic::AtomicU64,
}

impl ClassEntry {
    pub fn is_fixed(&self) -> bool {
        matches!(self.finalize, Finalize::Fixed)
    }

    /// `objectStatsChange(..., OBJECTSTATSADD)`: bump this class's live
    /// counters when a unit of `size` bytes is allocated under it.
    pub fn record_alloc(&self, size: u64) {
        self.live_objects
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.live_bytes
            .fetch_add(size, std::sync::atomic::Ordering::Relaxed);
    }

    /// `objectStatsChange(..., OBJECTSTATSREMOVE)`: the inverse, applied when
    /// a unit of this class is freed (explicitly or swept).
    pub fn record_free(&self, size: u64) {
        self.live_objects
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        self.live_bytes
            .fetch_sub(size, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Fixed-size, write-once table of allocation classes.
pub struct Registry {
    slots: Vec<OnceLock<ClassEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_CLASSES);
        slots.resize_with(MAX_CLASSES, OnceLock::new);
        Self { slots }
    }

    fn check_index(&self, index: u32) -> Result<usize> {
        let idx = index as usize;
        if idx >= self.slots.len() {
            return Err(GcError::IndexOutOfRange {
                index,
                max: self.slots.len() as u32 - 1,
            });
        }
        Ok(idx)
    }

    /// Register an entirely unmanaged allocation class: units allocated under
    /// it are coloured FIXED and never enter a colour list.
    pub fn register_fixed(&self, index: u32, description: impl Into<String>) -> Result<()> {
        let idx = self.check_index(index)?;
        let entry = ClassEntry {
            walk: None,
            finalize: Finalize::Fixed,
            destroy: None,
            description: description.into(),
            live_objects: std::sync::atomic::AtomicU64::new(0),
            live_bytes: std::sync::atomic::AtomicU64::new(0),
        };
        self.slots[idx]
            .set(entry)
            .map_err(|_| GcError::AlreadyRegistered { index })
    }

    /// Register a GC-managed allocation class. `walk` of `None` falls back to
    /// a conservative per-word scan of the unit during marking. `finalize` of
    /// `Finalize::Normal` means no finalizer runs.
    pub fn register_gc(
        &self,
        index: u32,
        walk: Option<WalkFn>,
        finalize: Finalize,
        destroy: Option<DestroyFn>,
        description: impl Into<String>,
    ) -> Result<()> {
        let idx = self.check_index(index)?;
        let entry = ClassEntry {
            walk,
            finalize,
            destroy,
            description: description.into(),
            live_objects: std::sync::atomic::AtomicU64::new(0),
            live_bytes: std::sync::atomic::AtomicU64::new(0),
        };
        self.slots[idx]
            .set(entry)
            .map_err(|_| GcError::AlreadyRegistered { index })
    }

    pub fn get(&self, index: u32) -> Option<&ClassEntry> {
        self.slots.get(index as usize).and_then(OnceLock::get)
    }

    /// Every registered class and its index, in registration-index order.
    /// Used by the verbose-GC level 2 per-class summary.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &ClassEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.get().map(|entry| (i as u32, entry)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_fixed_then_lookup() {
        let registry = Registry::new();
        registry.register_fixed(0, "lock-record").unwrap();
        let entry = registry.get(0).unwrap();
        assert!(entry.is_fixed());
        assert_eq!(entry.description, "lock-record");
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        registry.register_fixed(3, "a").unwrap();
        let err = registry.register_fixed(3, "b").unwrap_err();
        assert!(matches!(err, GcError::AlreadyRegistered { index: 3 }));
    }

    #[test]
    fn out_of_range_index_fails() {
        let registry = Registry::new();
        let err = registry
            .register_fixed(MAX_CLASSES as u32, "oops")
            .unwrap_err();
        assert!(matches!(err, GcError::IndexOutOfRange { .. }));
    }

    #[test]
    fn iter_yields_only_registered_classes_in_index_order() {
        let registry = Registry::new();
        registry.register_fixed(5, "five").unwrap();
        registry.register_fixed(1, "one").unwrap();

        let indices: Vec<u32> = registry.iter().map(|(idx, _)| idx).collect();
        assert_eq!(indices, vec![1, 5]);
    }

    #[test]
    fn record_alloc_then_free_round_trips_live_counters() {
        use std::sync::atomic::Ordering;

        let registry = Registry::new();
        registry.register_fixed(0, "fixed").unwrap();
        let class = registry.get(0).unwrap();

        class.record_alloc(64);
        assert_eq!(class.live_objects.load(Ordering::Relaxed), 1);
        assert_eq!(class.live_bytes.load(Ordering::Relaxed), 64);

        class.record_free(64);
        assert_eq!(class.live_objects.load(Ordering::Relaxed), 0);
        assert_eq!(class.live_bytes.load(Ordering::Relaxed), 0);
    }
}
