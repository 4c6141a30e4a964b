// libs/appointment-cell/src/services/locks.rs
//
// In-process scheduling locks. Every mutation that can change who is busy
// when holds the locks of the therapist and patient it touches, so the
// conflict check and the write that follows it see the same calendar.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::SchedulingError;

const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKey {
    Therapist(Uuid),
    Patient(Uuid),
}

/// Held for the duration of one scheduling mutation. Dropping it releases
/// every lock it holds.
#[derive(Debug)]
pub struct ResourceGuard {
    keys: Vec<ResourceKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ResourceGuard {
    pub fn keys(&self) -> &[ResourceKey] {
        &self.keys
    }
}

pub struct ResourceLocks {
    locks: Mutex<HashMap<ResourceKey, Arc<AsyncMutex<()>>>>,
    acquire_timeout: Duration,
}

impl ResourceLocks {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    /// Locks every key, always in the same global order, within one shared
    /// deadline. Expiry is reported as `Unavailable`.
    pub async fn acquire(&self, keys: &[ResourceKey]) -> Result<ResourceGuard, SchedulingError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + self.acquire_timeout;
        let mut guards = Vec::with_capacity(keys.len());

        for key in &keys {
            let lock = self.lock_for(*key);
            match timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    warn!("Timed out waiting for scheduling lock on {:?}", key);
                    return Err(SchedulingError::Unavailable(format!(
                        "scheduling lock on {:?} not acquired within {} ms",
                        key,
                        self.acquire_timeout.as_millis()
                    )));
                }
            }
        }

        debug!("Acquired scheduling locks {:?}", keys);
        Ok(ResourceGuard { keys, _guards: guards })
    }

    fn lock_for(&self, key: ResourceKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        if locks.len() > PRUNE_THRESHOLD {
            // Entries nobody else references are idle and can be rebuilt on demand
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
