use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

/// Proof of holding a lock in [`KeyLocks`].
///
/// Every successful [`KeyLocks::try_lock`] hands out a fresh token, so a token from an earlier
/// hold can never release a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(NonZeroU64);

impl LockToken {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Default)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    held: Option<(LockToken, OwnedMutexGuard<()>)>,
}

impl Slot {
    /// Whether nobody holds or waits for this slot, besides the table itself.
    fn is_idle(&self) -> bool {
        self.held.is_none() && Arc::strong_count(&self.lock) == 1
    }
}

/// A table of advisory, per-path locks with a bounded wait.
///
/// These locks only serve to avoid redundant origin fetches. They are never consulted when
/// reading from the cache, and the presence of a file on disk stays the only source of truth.
#[derive(Debug)]
pub struct KeyLocks {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    generation: AtomicU64,
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self {
            slots: Mutex::default(),
            generation: AtomicU64::new(1),
        }
    }

    /// Tries to take exclusive ownership of `path`, waiting up to `timeout` for the current
    /// holder to let go.
    ///
    /// Returns `None` if the lock is still taken after `timeout`, which callers should read as
    /// "somebody else is already working on this".
    pub async fn try_lock(&self, path: &Path, timeout: Duration) -> Option<LockToken> {
        let lock = {
            let mut slots = self.slots.lock().unwrap();
            Arc::clone(&slots.entry(path.to_owned()).or_default().lock)
        };

        let guard = match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(path = %path.display(), ?timeout, "Timed out waiting for key lock");
                let mut slots = self.slots.lock().unwrap();
                // the timed out `lock_owned` future has already released its reference
                if slots.get(path).is_some_and(Slot::is_idle) {
                    slots.remove(path);
                }
                return None;
            }
        };

        let token = self.next_token();
        let mut slots = self.slots.lock().unwrap();
        // The slot cannot have been removed while we were waiting, as our guard keeps a reference
        // to its mutex alive.
        let slot = slots.entry(path.to_owned()).or_default();
        slot.held = Some((token, guard));

        Some(token)
    }

    /// Releases the lock on `path` if it is currently held with `token`.
    ///
    /// Releasing with a stale or foreign token does nothing.
    pub fn unlock(&self, path: &Path, token: LockToken) {
        let mut slots = self.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(path) else {
            tracing::debug!(path = %path.display(), "Ignoring unlock of an unknown key lock");
            return;
        };

        let is_holder = matches!(slot.held, Some((holder, _)) if holder == token);
        if !is_holder {
            tracing::debug!(
                path = %path.display(),
                token = token.get(),
                "Ignoring unlock with a stale key lock token"
            );
            return;
        }

        // dropping the guard wakes up the next waiter
        slot.held = None;
        if slot.is_idle() {
            slots.remove(path);
        }
    }

    /// The number of paths that are currently locked or contended.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_token(&self) -> LockToken {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and would need centuries to wrap around.
        LockToken(NonZeroU64::new(generation).unwrap_or(NonZeroU64::MIN))
    }
}
