//! Keyed async mutexes.
//!
//! One lock per key (account, invocation), created on demand and dropped once
//! no task holds or waits for it. Different keys never contend.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// A set of async mutexes addressed by key.
pub struct KeyedLocks<K> {
    locks: LockMap<K>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancel safe: a wait dropped before it acquires the lock releases its
    /// claim on the map entry.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let mut waiter = Waiter {
            acquire: Box::pin(mutex.lock_owned()),
            cleanup: Cleanup {
                key: &key,
                locks: &self.locks,
                armed: true,
            },
        };
        let guard = waiter.acquire.as_mut().await;

        // The guard owns cleanup from here.
        waiter.cleanup.armed = false;
        drop(waiter);

        KeyedGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently locked or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no key is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pending `lock()` call. Fields drop in order, so the acquire future
/// releases its reference to the mutex before `cleanup` inspects the entry.
struct Waiter<'a, K: Eq + Hash> {
    acquire: Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>,
    cleanup: Cleanup<'a, K>,
}

/// Removes the map entry of an abandoned wait if nothing else references it.
struct Cleanup<'a, K: Eq + Hash> {
    key: &'a K,
    locks: &'a LockMap<K>,
    armed: bool,
}

impl<K: Eq + Hash> Drop for Cleanup<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            remove_if_unused(self.locks, self.key);
        }
    }
}

fn remove_if_unused<K: Eq + Hash>(locks: &LockMap<K>, key: &K) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(key)
        .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
    {
        locks.remove(key);
    }
}

/// Exclusive access to one key. Released on drop.
pub struct KeyedGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap<K>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        remove_if_unused(&self.locks, &self.key);
    }
}
