//! Explicit TTL cache
//!
//! Small read-through cache for values that are expensive to recompute but
//! tolerate staleness, such as the distinct-tags list. The cache is an
//! explicit object with `{value, fetched_at, ttl}` injected where needed,
//! refreshed on access once stale.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Slot<T> {
    value: T,
    fetched_at: Instant,
}

pub struct TtlCache<T> {
    slot: Mutex<Option<Slot<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    /// Return the cached value, refreshing through `fetch` when the slot is
    /// empty or stale. A failed fetch leaves any stale value in place.
    pub fn get_or_refresh<E>(&self, fetch: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| {
            // A panic mid-refresh leaves the old value intact; keep serving it.
            poisoned.into_inner()
        });

        if let Some(ref cached) = *slot
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.value.clone());
        }

        let value = fetch()?;
        *slot = Some(Slot {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop the cached value so the next access refetches.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }
}
