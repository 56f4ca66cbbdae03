use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use terra_common::Packument;

/// Process-local packument cache with a TTL. A zero TTL means entries never
/// expire.
#[derive(Debug)]
pub(crate) struct PackumentCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    packument: Arc<Packument>,
}

impl PackumentCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<Packument>> {
        let entry = self.entries.get(name)?;
        if !self.ttl.is_zero() && entry.fetched_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(name);
            return None;
        }
        Some(entry.packument.clone())
    }

    pub(crate) fn insert(&self, name: String, packument: Arc<Packument>) {
        self.entries.insert(
            name,
            CacheEntry {
                fetched_at: Instant::now(),
                packument,
            },
        );
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}
