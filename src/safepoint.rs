//! Stop-the-world contract.
//!
//! The collector's correctness never depends on *how* mutators are
//! suspended - signals, cooperative polling, or safepoint pages are all
//! valid implementations of the same two-method capability. This module
//! supplies a cooperative default good enough to embed and to drive from
//! tests; an embedder with a richer scheduler supplies its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Suspends and resumes every registered mutator around the collector's mark
/// phase. Implementations must ensure `stop_world` does not return until
/// every mutator has reached a safe point and will not touch heap colours,
/// lists, or object graph edges until `resume_world` is called.
pub trait WorldStopper: Send + Sync {
    fn stop_world(&self);
    fn resume_world(&self);
}

/// A cooperative stop-the-world implementation: mutators periodically call
/// [`CooperativeWorld::poll`] at their own safepoints (allocation entry,
/// explicit safepoint calls, blocking monitor operations); `stop_world`
/// bumps a generation counter and waits for every currently-registered
/// mutator to acknowledge it has observed the new generation before
/// returning.
pub struct CooperativeWorld {
    generation: AtomicU64,
    state: Mutex<CooperativeState>,
    acked: Condvar,
}

struct CooperativeState {
    registered: u64,
    acked_count: u64,
    stopped: bool,
}

impl CooperativeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU64::new(0),
            state: Mutex::new(CooperativeState {
                registered: 0,
                acked_count: 0,
                stopped: false,
            }),
            acked: Condvar::new(),
        })
    }

    /// Register a mutator that must acknowledge every stop-the-world
    /// request before `stop_world` returns. Returns a handle the mutator
    /// uses to poll.
    pub fn register_mutator(self: &Arc<Self>) -> MutatorHandle {
        self.state.lock().unwrap().registered += 1;
        MutatorHandle {
            world: self.clone(),
            last_seen_generation: self.generation.load(Ordering::Acquire),
        }
    }

    pub fn unregister_mutator(&self) {
        let mut state = self.state.lock().unwrap();
        state.registered = state.registered.saturating_sub(1);
        self.acked.notify_all();
    }
}

impl WorldStopper for CooperativeWorld {
    fn stop_world(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        state.acked_count = 0;
        while state.acked_count < state.registered {
            state = self.acked.wait(state).unwrap();
        }
    }

    fn resume_world(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = false;
        self.acked.notify_all();
    }
}

/// A mutator's view of a [`CooperativeWorld`]: call [`poll`](Self::poll) at
/// safepoints.
pub struct MutatorHandle {
    world: Arc<CooperativeWorld>,
    last_seen_generation: u64,
}

impl MutatorHandle {
    /// Acknowledge the current stop-the-world generation, if any, and block
    /// until the collector resumes the world.
    pub fn poll(&mut self) {
        let current = self.world.generation.load(Ordering::Acquire);
        if current == self.last_seen_generation {
            return;
        }
        self.last_seen_generation = current;
        let mut state = self.world.state.lock().unwrap();
        if state.stopped {
            state.acked_count += 1;
            self.world.acked.notify_all();
            while state.stopped {
                state = self.world.acked.wait(state).unwrap();
            }
        }
    }
}

impl Drop for MutatorHandle {
    fn drop(&mut self) {
        self.world.unregister_mutator();
    }
}

/// A `WorldStopper` with no mutators to wait for: useful for single-threaded
/// tests and benchmarks where there is nothing else to suspend.
pub struct NullWorld;

impl WorldStopper for NullWorld {
    fn stop_world(&self) {}
    fn resume_world(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn stop_world_waits_for_registered_mutator() {
        let world = CooperativeWorld::new();
        let mut mutator = world.register_mutator();
        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed2 = observed.clone();

        let handle = thread::spawn(move || {
            loop {
                mutator.poll();
                if observed2.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        world.stop_world();
        observed.store(true, Ordering::SeqCst);
        world.resume_world();
        handle.join().unwrap();
    }

    #[test]
    fn null_world_never_blocks() {
        let world = NullWorld;
        world.stop_world();
        world.resume_world();
    }
}
