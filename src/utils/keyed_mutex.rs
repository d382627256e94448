use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A mutex that locks per key (user id). Rental creation and renewal hold the
/// user's lock across their check-then-act section, so two concurrent
/// activations for the same user serialize instead of racing the
/// "one active rental" check.
#[derive(Debug, Clone)]
pub struct KeyedMutex {
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquires the lock for `key`; released when the guard drops.
    pub async fn lock(&self, key: i32) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        mutex.lock_owned().await
    }

    /// Drops entries not currently held by any task. Called periodically by
    /// the background worker to bound the map's size.
    pub fn cleanup(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let m = KeyedMutex::new();
        let g = m.lock(1).await;
        // A different key must not block.
        let _other = m.lock(2).await;
        drop(g);
        let _again = m.lock(1).await;
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_entries() {
        let m = KeyedMutex::new();
        {
            let _g = m.lock(7).await;
            m.cleanup();
            assert_eq!(m.locks.len(), 1);
        }
        m.cleanup();
        assert_eq!(m.locks.len(), 0);
    }
}
