//! In-memory read-through cache with per-entry TTLs and LRU eviction.
//!
//! Values are `serde_json::Value` so one cache serves every endpoint class.
//! Entries may be scoped to a project id; indexing and deletion invalidate a
//! project's scope wholesale, regardless of remaining TTL.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL for project list/detail responses.
pub const TTL_PROJECT: Duration = Duration::from_secs(300);
/// TTL for index statistics.
pub const TTL_STATS: Duration = Duration::from_secs(60);
/// TTL for search results.
pub const TTL_SEARCH: Duration = Duration::from_secs(600);
/// TTL for file-derived data such as dependency graphs.
pub const TTL_FILE: Duration = Duration::from_secs(300);

struct Entry {
    value: Value,
    expires_at: Instant,
    last_used: u64,
    scope: Option<String>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Cache hit/miss counters, exposed through the health endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct CacheLayer {
    capacity: usize,
    state: Mutex<State>,
}

impl CacheLayer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Return the cached value for `key` if fresh, otherwise run `compute`,
    /// store its result under `key`, and return it. `scope` ties the entry
    /// to a project for [`CacheLayer::invalidate_scope`].
    ///
    /// The lock is not held across `compute`; two concurrent misses on the
    /// same key may both compute, last write wins.
    pub async fn get_or_compute<F, Fut>(
        &self,
        scope: Option<&str>,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let now = Instant::now();
        {
            let mut state = self.lock();
            state.tick += 1;
            let tick = state.tick;
            let fresh = match state.entries.get_mut(key) {
                Some(entry) if entry.expires_at > now => {
                    entry.last_used = tick;
                    Some(entry.value.clone())
                }
                _ => None,
            };
            if let Some(value) = fresh {
                state.hits += 1;
                return Ok(value);
            }
            state.misses += 1;
        }

        let value = compute().await?;

        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: now + ttl,
                last_used: tick,
                scope: scope.map(|s| s.to_string()),
            },
        );
        self.evict(&mut state);
        Ok(value)
    }

    /// Drop every entry scoped to `project_id`, fresh or not.
    pub fn invalidate_scope(&self, project_id: &str) {
        let mut state = self.lock();
        state
            .entries
            .retain(|_, entry| entry.scope.as_deref() != Some(project_id));
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
        }
    }

    fn evict(&self, state: &mut State) {
        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
