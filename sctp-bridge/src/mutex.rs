use std::{
    fmt,
    ops::{Deref, DerefMut},
};

#[cfg(feature = "lock_tracking")]
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

#[cfg(feature = "lock_tracking")]
use tracing::warn;

/// Lock guarding one socket, or the bridge's global state
///
/// With the `lock_tracking` feature, every acquisition records its purpose and how long the
/// lock was held, and slow acquisitions or long critical sections are reported.
pub(crate) struct Mutex<T> {
    inner: std::sync::Mutex<Tracked<T>>,
}

struct Tracked<T> {
    #[cfg(feature = "lock_tracking")]
    last_owners: VecDeque<(&'static str, Duration)>,
    value: T,
}

impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: std::sync::Mutex::new(Tracked {
                #[cfg(feature = "lock_tracking")]
                last_owners: VecDeque::new(),
                value,
            }),
        }
    }

    /// Acquires the lock for `purpose`
    ///
    /// A poisoned lock means a socket operation panicked half way through; the state behind it
    /// cannot be trusted, so the panic is propagated.
    pub(crate) fn lock(&self, purpose: &'static str) -> MutexGuard<'_, T> {
        #[cfg(feature = "lock_tracking")]
        let requested = Instant::now();
        let guard = self.inner.lock().expect("lock poisoned");

        #[cfg(feature = "lock_tracking")]
        let acquired = {
            let acquired = Instant::now();
            let waited = acquired.duration_since(requested);
            if waited > TRACKING_THRESHOLD {
                warn!(
                    "locking for {} took {:?}, last owners: {:?}",
                    purpose, waited, guard.last_owners
                );
            }
            acquired
        };
        #[cfg(not(feature = "lock_tracking"))]
        let _ = purpose;

        MutexGuard {
            guard,
            #[cfg(feature = "lock_tracking")]
            acquired,
            #[cfg(feature = "lock_tracking")]
            purpose,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(guard) => f.debug_tuple("Mutex").field(&guard.value).finish(),
            Err(_) => f.write_str("Mutex(<locked>)"),
        }
    }
}

pub(crate) struct MutexGuard<'a, T> {
    guard: std::sync::MutexGuard<'a, Tracked<T>>,
    #[cfg(feature = "lock_tracking")]
    acquired: Instant,
    #[cfg(feature = "lock_tracking")]
    purpose: &'static str,
}

#[cfg(feature = "lock_tracking")]
impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        let held = self.acquired.elapsed();
        if held > TRACKING_THRESHOLD {
            warn!("holding the lock for {} took {:?}", self.purpose, held);
        }
        let owners = &mut self.guard.last_owners;
        if owners.len() == MAX_LOCK_OWNERS {
            owners.pop_back();
        }
        owners.push_front((self.purpose, held));
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard.value
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard.value
    }
}

/// Reader-writer lock guarding the bridge's socket table
///
/// Handle lookups take it shared, so socket operations on different handles never queue behind
/// each other or behind `init`, `finish` and socket creation. With the `lock_tracking` feature,
/// slow acquisitions are reported.
pub(crate) struct RwLock<T> {
    inner: std::sync::RwLock<T>,
}

impl<T> RwLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: std::sync::RwLock::new(value),
        }
    }

    pub(crate) fn read(&self, purpose: &'static str) -> std::sync::RwLockReadGuard<'_, T> {
        #[cfg(feature = "lock_tracking")]
        let requested = Instant::now();
        let guard = self.inner.read().expect("lock poisoned");
        #[cfg(feature = "lock_tracking")]
        report_wait(purpose, requested);
        #[cfg(not(feature = "lock_tracking"))]
        let _ = purpose;
        guard
    }

    pub(crate) fn write(&self, purpose: &'static str) -> std::sync::RwLockWriteGuard<'_, T> {
        #[cfg(feature = "lock_tracking")]
        let requested = Instant::now();
        let guard = self.inner.write().expect("lock poisoned");
        #[cfg(feature = "lock_tracking")]
        report_wait(purpose, requested);
        #[cfg(not(feature = "lock_tracking"))]
        let _ = purpose;
        guard
    }
}

impl<T: fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_read() {
            Ok(guard) => f.debug_tuple("RwLock").field(&*guard).finish(),
            Err(_) => f.write_str("RwLock(<locked>)"),
        }
    }
}

#[cfg(feature = "lock_tracking")]
fn report_wait(purpose: &'static str, requested: Instant) {
    let waited = requested.elapsed();
    if waited > TRACKING_THRESHOLD {
        warn!("locking for {} took {:?}", purpose, waited);
    }
}

#[cfg(feature = "lock_tracking")]
const TRACKING_THRESHOLD: Duration = Duration::from_millis(1);
#[cfg(feature = "lock_tracking")]
const MAX_LOCK_OWNERS: usize = 20;
