//! Address-keyed recursive monitor layer.
//!
//! Every managed (and embedder-supplied) address can carry at most one
//! monitor, acquired by address rather than by an explicit handle: `lock`
//! and `unlock` take the protected object's address and look up (or
//! allocate) a [`LockRecord`] behind a fixed-size, open-addressed bucket
//! table. A handful of well-known monitors that must outlive any particular
//! object - the allocator lock among them, conceptually - are instead keyed
//! by a static name via `*_static`, with a record that is never recycled.
//!
//! Each record is a single `Mutex<LockState>` plus one `Condvar`, not the
//! historical separate mutex-and-atomics split: a non-reentrant
//! `std::sync::Mutex` cannot be relocked by its own holder to test
//! recursion, so recursion is tracked explicitly in `LockState.depth`
//! instead of by attempting (and detecting failure of) a second lock
//! acquisition. External semantics - recursive acquisition by the same
//! thread, full release and re-acquisition across `wait` - are unchanged.

use crate::error::{fatal, GcError, Result};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Per-thread identity for recursion and ownership checks. Ids start at 1,
/// so a freshly allocated `LockState` (`holder: None`) can never collide
/// with a real thread, unlike the historical "thread id 0" coincidence.
fn current_tid() -> u64 {
    std::thread_local! {
        static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    }
    static NEXT_TID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
    TID.with(|t| *t)
}

struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `lock`, which spins
// until `locked` transitions false->true, giving exclusive access for the
// guard's lifetime.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    fn new(data: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
}

struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: guard holds exclusive access, granted by `SpinLock::lock`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

struct LockState {
    locked: bool,
    holder: Option<u64>,
    depth: u32,
}

struct LockRecord {
    /// 0 for static (name-keyed) records, which never participate in the
    /// address bucket hash.
    address: AtomicUsize,
    /// -1 for static records (never recycled); otherwise the number of live
    /// references an address-keyed record holds (>=1 while in use, 0 once
    /// its last holder has unlocked and it becomes a reuse candidate).
    refcount: AtomicIsize,
    state: Mutex<LockState>,
    cv: Condvar,
}

impl LockRecord {
    fn fresh(address: usize, refcount: isize) -> Self {
        LockRecord {
            address: AtomicUsize::new(address),
            refcount: AtomicIsize::new(refcount),
            state: Mutex::new(LockState {
                locked: false,
                holder: None,
                depth: 0,
            }),
            cv: Condvar::new(),
        }
    }
}

/// A fixed-size, address-keyed table of recursive monitors, plus a
/// name-keyed table of static monitors that are never recycled.
pub struct Monitor {
    buckets: Vec<SpinLock<Vec<Arc<LockRecord>>>>,
    statics: SpinLock<HashMap<&'static str, Arc<LockRecord>>>,
    word_size: usize,
}

impl Monitor {
    pub fn new(bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "monitor requires at least one bucket");
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, || SpinLock::new(Vec::new()));
        Monitor {
            buckets,
            statics: SpinLock::new(HashMap::new()),
            word_size: std::mem::size_of::<usize>(),
        }
    }

    /// Construct a bucket table sized from [`crate::config::GcConfig::max_lock_buckets`].
    pub fn from_config(config: &crate::config::GcConfig) -> Self {
        Self::new(config.max_lock_buckets)
    }

    fn bucket_of(&self, addr: usize) -> usize {
        (addr / self.word_size) % self.buckets.len()
    }

    /// Find (incrementing its refcount) or allocate a record for `addr`.
    /// Prefers recycling a refcount-0 slot in the bucket over growing it.
    fn get_or_create(&self, addr: usize) -> Arc<LockRecord> {
        let idx = self.bucket_of(addr);
        let mut bucket = self.buckets[idx].lock();

        if let Some(record) = bucket
            .iter()
            .find(|r| r.address.load(Ordering::Acquire) == addr && r.refcount.load(Ordering::Acquire) > 0)
        {
            record.refcount.fetch_add(1, Ordering::AcqRel);
            return record.clone();
        }

        if let Some(record) = bucket
            .iter()
            .find(|r| r.refcount.load(Ordering::Acquire) == 0)
        {
            record.address.store(addr, Ordering::Release);
            record.refcount.store(1, Ordering::Release);
            return record.clone();
        }

        let record = Arc::new(LockRecord::fresh(addr, 1));
        bucket.push(record.clone());
        record
    }

    /// Look up a currently-live record by address without affecting its
    /// refcount. Used by every operation except the initial `lock`, which
    /// must also allocate on first use.
    fn find(&self, addr: usize) -> Option<Arc<LockRecord>> {
        let idx = self.bucket_of(addr);
        let bucket = self.buckets[idx].lock();
        bucket
            .iter()
            .find(|r| r.address.load(Ordering::Acquire) == addr && r.refcount.load(Ordering::Acquire) > 0)
            .cloned()
    }

    /// Drop one reference to `record`, under the owning bucket's spinlock.
    /// Acquired strictly after the record's own state mutex has already
    /// been released, so the lock order is always bucket-spinlock before
    /// record-mutex, never the reverse.
    fn release_ref(&self, record: &Arc<LockRecord>) {
        let idx = self.bucket_of(record.address.load(Ordering::Acquire));
        let _bucket = self.buckets[idx].lock();
        record.refcount.fetch_sub(1, Ordering::AcqRel);
    }

    fn find_static(&self, name: &str) -> Option<Arc<LockRecord>> {
        self.statics.lock().get(name).cloned()
    }

    /// Register a static, name-keyed monitor. Idempotent: re-registering the
    /// same name is a no-op (the first registration wins).
    pub fn init_static(&self, name: &'static str) {
        let mut statics = self.statics.lock();
        statics
            .entry(name)
            .or_insert_with(|| Arc::new(LockRecord::fresh(0, -1)));
    }

    pub fn lock(&self, addr: usize) {
        let record = self.get_or_create(addr);
        Self::acquire(&record);
    }

    pub fn unlock(&self, addr: usize) -> Result<()> {
        let record = self
            .find(addr)
            .ok_or(GcError::IllegalMonitorState { address: addr })?;
        Self::release_lock(&record, addr)?;
        self.release_ref(&record);
        Ok(())
    }

    /// Block on `addr`'s condition variable. `timeout` of [`Duration::ZERO`]
    /// waits forever; any other value is a wakeup deadline. Requires the
    /// current thread to already hold the monitor, which is released for
    /// the duration of the wait and fully restored (including recursion
    /// depth) before returning.
    pub fn wait(&self, addr: usize, timeout: Duration) -> Result<()> {
        let record = self
            .find(addr)
            .ok_or(GcError::IllegalMonitorState { address: addr })?;
        Self::wait_on(&record, addr, timeout)
    }

    pub fn signal(&self, addr: usize) -> Result<()> {
        let record = self
            .find(addr)
            .ok_or(GcError::IllegalMonitorState { address: addr })?;
        Self::signal_on(&record, addr, false)
    }

    pub fn broadcast(&self, addr: usize) -> Result<()> {
        let record = self
            .find(addr)
            .ok_or(GcError::IllegalMonitorState { address: addr })?;
        Self::signal_on(&record, addr, true)
    }

    pub fn held(&self, addr: usize) -> bool {
        self.find(addr).map(|r| Self::held_on(&r)).unwrap_or(false)
    }

    pub fn lock_static(&self, name: &'static str) {
        let record = self
            .find_static(name)
            .unwrap_or_else(|| fatal(format!("lock_static: {name} was never init_static'd")));
        Self::acquire(&record);
    }

    pub fn unlock_static(&self, name: &'static str) -> Result<()> {
        let record = self
            .find_static(name)
            .unwrap_or_else(|| fatal(format!("unlock_static: {name} was never init_static'd")));
        Self::release_lock(&record, 0)
    }

    pub fn wait_static(&self, name: &'static str, timeout: Duration) -> Result<()> {
        let record = self
            .find_static(name)
            .unwrap_or_else(|| fatal(format!("wait_static: {name} was never init_static'd")));
        Self::wait_on(&record, 0, timeout)
    }

    pub fn signal_static(&self, name: &'static str) -> Result<()> {
        let record = self
            .find_static(name)
            .unwrap_or_else(|| fatal(format!("signal_static: {name} was never init_static'd")));
        Self::signal_on(&record, 0, false)
    }

    pub fn broadcast_static(&self, name: &'static str) -> Result<()> {
        let record = self
            .find_static(name)
            .unwrap_or_else(|| fatal(format!("broadcast_static: {name} was never init_static'd")));
        Self::signal_on(&record, 0, true)
    }

    pub fn held_static(&self, name: &'static str) -> bool {
        self.find_static(name)
            .map(|r| Self::held_on(&r))
            .unwrap_or(false)
    }

    // ---- shared record-level operations ----

    fn acquire(record: &LockRecord) {
        let tid = current_tid();
        let mut state = record.state.lock().unwrap();
        while state.locked && state.holder != Some(tid) {
            state = record.cv.wait(state).unwrap();
        }
        state.locked = true;
        state.holder = Some(tid);
        state.depth += 1;
    }

    fn release_lock(record: &LockRecord, addr: usize) -> Result<()> {
        let tid = current_tid();
        let mut state = record.state.lock().unwrap();
        if state.holder != Some(tid) || state.depth == 0 {
            return Err(GcError::IllegalMonitorState { address: addr });
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.locked = false;
            state.holder = None;
            record.cv.notify_all();
        }
        Ok(())
    }

    /// Release the monitor entirely (saving its recursion depth), block for
    /// a signal (or until `timeout` elapses, when non-zero), then
    /// re-acquire it and restore that depth before returning.
    fn wait_on(record: &LockRecord, addr: usize, timeout: Duration) -> Result<()> {
        let tid = current_tid();
        let mut state = record.state.lock().unwrap();
        if state.holder != Some(tid) || state.depth == 0 {
            return Err(GcError::IllegalMonitorState { address: addr });
        }
        let saved_depth = state.depth;
        state.depth = 0;
        state.locked = false;
        state.holder = None;
        record.cv.notify_all();

        if timeout.is_zero() {
            loop {
                state = record.cv.wait(state).unwrap();
                if !state.locked {
                    break;
                }
            }
        } else {
            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let (next_state, result) = record.cv.wait_timeout(state, remaining).unwrap();
                state = next_state;
                if !state.locked || result.timed_out() {
                    break;
                }
            }
        }
        state.locked = true;
        state.holder = Some(tid);
        state.depth = saved_depth;
        Ok(())
    }

    fn signal_on(record: &LockRecord, addr: usize, all: bool) -> Result<()> {
        let tid = current_tid();
        let state = record.state.lock().unwrap();
        if state.holder != Some(tid) || state.depth == 0 {
            return Err(GcError::IllegalMonitorState { address: addr });
        }
        if all {
            record.cv.notify_all();
        } else {
            record.cv.notify_one();
        }
        Ok(())
    }

    fn held_on(record: &LockRecord) -> bool {
        let state = record.state.lock().unwrap();
        state.holder == Some(current_tid()) && state.depth > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn recursive_lock_is_reentrant_for_the_same_thread() {
        let monitor = Monitor::new(16);
        monitor.lock(0x1000);
        monitor.lock(0x1000);
        assert!(monitor.held(0x1000));
        monitor.unlock(0x1000).unwrap();
        assert!(monitor.held(0x1000));
        monitor.unlock(0x1000).unwrap();
        assert!(!monitor.held(0x1000));
    }

    #[test]
    fn unlock_without_holding_is_illegal_state() {
        let monitor = Monitor::new(16);
        let err = monitor.unlock(0x2000).unwrap_err();
        assert!(matches!(err, GcError::IllegalMonitorState { address: 0x2000 }));
    }

    #[test]
    fn wait_without_holding_is_illegal_state() {
        let monitor = Monitor::new(16);
        monitor.lock(0x3000);
        monitor.unlock(0x3000).unwrap();
        let err = monitor.wait(0x3000, Duration::ZERO).unwrap_err();
        assert!(matches!(err, GcError::IllegalMonitorState { .. }));
    }

    #[test]
    fn signal_wakes_a_waiter() {
        let monitor = Arc::new(Monitor::new(16));
        let woke = Arc::new(AtomicBool::new(false));

        let m2 = monitor.clone();
        let woke2 = woke.clone();
        let handle = thread::spawn(move || {
            m2.lock(0x4000);
            m2.wait(0x4000, Duration::ZERO).unwrap();
            woke2.store(true, Ordering::SeqCst);
            m2.unlock(0x4000).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        monitor.lock(0x4000);
        monitor.signal(0x4000).unwrap();
        monitor.unlock(0x4000).unwrap();

        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn bucket_collisions_are_disambiguated_by_address() {
        let monitor = Monitor::new(1);
        monitor.lock(0x1000);
        monitor.lock(0x2000);
        assert!(monitor.held(0x1000));
        assert!(monitor.held(0x2000));
        monitor.unlock(0x1000).unwrap();
        monitor.unlock(0x2000).unwrap();
    }

    #[test]
    fn released_slot_is_recycled_for_a_new_address() {
        let monitor = Monitor::new(1);
        monitor.lock(0x1000);
        monitor.unlock(0x1000).unwrap();
        monitor.lock(0x2000);
        assert!(monitor.held(0x2000));
        assert!(!monitor.held(0x1000));
        monitor.unlock(0x2000).unwrap();
    }

    #[test]
    fn wait_with_timeout_returns_and_restores_ownership_when_unsignalled() {
        let monitor = Monitor::new(16);
        monitor.lock(0x4500);
        monitor.wait(0x4500, Duration::from_millis(20)).unwrap();
        assert!(monitor.held(0x4500));
        monitor.unlock(0x4500).unwrap();
    }

    #[test]
    fn static_monitor_is_keyed_by_name_not_address() {
        let monitor = Monitor::new(16);
        monitor.init_static("gc_lock");
        monitor.lock_static("gc_lock");
        assert!(monitor.held_static("gc_lock"));
        monitor.unlock_static("gc_lock").unwrap();
        assert!(!monitor.held_static("gc_lock"));
    }

    #[test]
    fn concurrent_lock_excludes_other_threads() {
        let monitor = Arc::new(Monitor::new(16));
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = monitor.clone();
            let c = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.lock(0x5000);
                    let v = c.load(Ordering::Relaxed);
                    c.store(v + 1, Ordering::Relaxed);
                    m.unlock(0x5000).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 800);
    }
}
