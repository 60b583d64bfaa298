//! Root scanner contract and the marking capability handed to it.
//!
//! `GcHandle` borrows the heap directly rather than re-deriving "marking is
//! currently legal" from some ambient lock: it only exists for the duration
//! of a root-scan or class-walk callback, both of which the collector driver
//! only invokes while holding the allocator lock with the world stopped.
//! That keeps the mark phase free of re-entrant locking.

use crate::heap::{Heap, UnitId};
use crate::object::{Colour, ListId};

/// A capability for marking reachable objects, valid only for the duration
/// of a root-scan or class-walk callback.
pub struct GcHandle<'a> {
    heap: &'a mut Heap,
}

impl<'a> GcHandle<'a> {
    pub(crate) fn new(heap: &'a mut Heap) -> Self {
        GcHandle { heap }
    }

    /// Classify `addr` as a potential unit start via the heap adapter's
    /// `is_object` predicate; if positive, mark it.
    pub fn mark_address(&mut self, addr: usize) {
        if let Some(id) = self.heap.is_object(addr) {
            self.mark_object(id);
        }
    }

    /// Promote a white unit to grey. Idempotent for non-white units (already
    /// queued/walked, or FIXED and not subject to tracing at all).
    pub fn mark_object(&mut self, id: UnitId) {
        if self.heap.colour(id) != Colour::White {
            return;
        }
        self.heap.list_remove(id);
        self.heap.set_colour(id, Colour::Grey);
        self.heap.list_push_back(ListId::Grey, id);
    }

    /// Conservative per-word scan of `[base, base+size)`, marking every
    /// machine word that classifies as a live object start. Used for
    /// mutator stacks and anything else that cannot be walked precisely.
    ///
    /// # Safety
    /// `[base, base+size)` must be readable memory, word-aligned at `base`.
    pub unsafe fn walk_conservative(&mut self, base: usize, size: usize) {
        let word = std::mem::size_of::<usize>();
        let mut offset = 0;
        while offset + word <= size {
            let candidate = self.heap.read_word(base + offset);
            self.mark_address(candidate);
            offset += word;
        }
    }
}

/// Supplied at construction, invoked once per collection cycle during
/// `start_gc` with the world already stopped. Expected to enumerate thread
/// stacks (via [`GcHandle::walk_conservative`]), global references, and any
/// other root table, marking each candidate.
pub trait RootScanner: Send + Sync {
    fn scan_roots(&self, gc: &mut GcHandle<'_>);
}

/// A root scanner over a fixed set of addresses, useful for tests and small
/// embeddings that maintain their own global root table.
pub struct StaticRoots {
    roots: parking_lot::Mutex<Vec<usize>>,
}

impl StaticRoots {
    pub fn new() -> Self {
        Self {
            roots: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, addr: usize) {
        self.roots.lock().push(addr);
    }

    pub fn remove(&self, addr: usize) {
        self.roots.lock().retain(|&a| a != addr);
    }

    pub fn clear(&self) {
        self.roots.lock().clear();
    }
}

impl Default for StaticRoots {
    fn default() -> Self {
        Self::new()
    }
}

impl RootScanner for StaticRoots {
    fn scan_roots(&self, gc: &mut GcHandle<'_>) {
        for &addr in self.roots.lock().iter() {
            gc.mark_address(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn mark_address_promotes_white_to_grey() {
        let mut heap = Heap::new(4, 1 << 20);
        let id = heap.allocate(32, 0).unwrap();
        heap.list_push_back(ListId::White, id);
        let addr = heap.address_of(id);

        {
            let mut handle = GcHandle::new(&mut heap);
            handle.mark_address(addr);
        }

        assert_eq!(heap.colour(id), Colour::Grey);
        assert_eq!(heap.current_list(id), Some(ListId::Grey));
    }

    #[test]
    fn mark_address_ignores_garbage_values() {
        let mut heap = Heap::new(4, 1 << 20);
        let mut handle = GcHandle::new(&mut heap);
        handle.mark_address(0xdead_beef);
    }
}
