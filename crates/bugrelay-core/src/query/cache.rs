//! Disposable in-memory caches for bug detail reads and first listing pages.
//!
//! Entries are only ever filled from committed store reads and dropped on
//! invalidation; nothing here patches a cached value in place. Dropping the
//! whole cache at any time is always correct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::errors::TrackerResult;
use crate::models::{BugReport, Page, PageRequest};
use crate::query::listing::{BugFilter, SortMode};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL map with least-recently-used eviction. Insertion order doubles as
/// recency order: a hit moves the entry to the back.
struct LruTtl<V> {
    max_entries: usize,
    ttl: Duration,
    entries: IndexMap<String, CacheEntry<V>>,
}

impl<V: Clone> LruTtl<V> {
    fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
            entries: IndexMap::new(),
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.max_entries {
            self.entries.shift_remove_index(0);
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        self.evict_expired(Instant::now());
        let entry = self.entries.shift_remove(key)?;
        let value = entry.value.clone();
        self.entries.insert(key.to_string(), entry);
        Some(value)
    }

    fn insert(&mut self, key: String, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.shift_remove(&key);
        self.entries.insert(key, CacheEntry { value, expires_at });
        self.evict_over_capacity();
    }

    fn remove(&mut self, key: &str) {
        self.entries.shift_remove(key);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub detail_entries: usize,
    pub listing_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Snapshot of the invalidation epoch taken before a store read. A fill
/// carrying a stale ticket is discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillTicket(u64);

pub struct CacheLayer {
    enabled: bool,
    details: Mutex<LruTtl<BugReport>>,
    listings: Mutex<LruTtl<Page<BugReport>>>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Serialize)]
struct ListingKey<'a> {
    filter: &'a BugFilter,
    sort: SortMode,
    limit: i64,
}

/// Cache key for a listing request, or `None` when it is not cacheable: only
/// the first page of a listing without a search term is cached. `page` must
/// already be normalized.
pub fn listing_key(
    filter: &BugFilter,
    sort: SortMode,
    page: PageRequest,
) -> TrackerResult<Option<String>> {
    let has_search = filter
        .search
        .as_deref()
        .is_some_and(|term| !term.trim().is_empty());
    if page.page != 1 || has_search {
        return Ok(None);
    }
    let mut normalized = filter.clone();
    normalized.search = None;
    normalized.tags = normalized
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    normalized.tags.sort();
    normalized.tags.dedup();

    let payload = serde_json::to_string(&ListingKey {
        filter: &normalized,
        sort,
        limit: page.limit,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    Ok(Some(format!("listing:{:x}", hasher.finalize())))
}

fn detail_key(bug_id: Uuid) -> String {
    format!("bug:{bug_id}")
}

impl CacheLayer {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            enabled: config.cache_enabled,
            details: Mutex::new(LruTtl::new(config.cache_max_entries, config.detail_ttl)),
            listings: Mutex::new(LruTtl::new(config.cache_max_entries, config.listing_ttl)),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Take before reading the store for a value that will be cached.
    pub fn ticket(&self) -> FillTicket {
        FillTicket(self.epoch.load(Ordering::Acquire))
    }

    fn record(&self, hit: bool, key: &str) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache hit: {key}");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("cache miss: {key}");
        }
    }

    pub fn get_bug(&self, bug_id: Uuid) -> Option<BugReport> {
        if !self.enabled {
            return None;
        }
        let key = detail_key(bug_id);
        let found = self.details.lock().get(&key);
        self.record(found.is_some(), &key);
        found
    }

    pub fn put_bug(&self, ticket: FillTicket, bug: &BugReport) {
        if !self.enabled {
            return;
        }
        let mut details = self.details.lock();
        if self.epoch.load(Ordering::Acquire) == ticket.0 {
            details.insert(detail_key(bug.id), bug.clone());
        }
    }

    pub fn get_listing(&self, key: &str) -> Option<Page<BugReport>> {
        if !self.enabled {
            return None;
        }
        let found = self.listings.lock().get(key);
        self.record(found.is_some(), key);
        found
    }

    pub fn put_listing(&self, ticket: FillTicket, key: String, page: &Page<BugReport>) {
        if !self.enabled {
            return;
        }
        let mut listings = self.listings.lock();
        if self.epoch.load(Ordering::Acquire) == ticket.0 {
            listings.insert(key, page.clone());
        }
    }

    /// Drop the bug's detail entry and every listing page. Call after the
    /// mutating transaction has committed.
    pub fn invalidate_bug(&self, bug_id: Uuid) {
        let mut details = self.details.lock();
        let mut listings = self.listings.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        details.remove(&detail_key(bug_id));
        listings.clear();
    }

    /// Drop listing pages only, after a submission.
    pub fn invalidate_listings(&self) {
        let _details = self.details.lock();
        let mut listings = self.listings.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        listings.clear();
    }

    pub fn clear(&self) {
        let mut details = self.details.lock();
        let mut listings = self.listings.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        details.clear();
        listings.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            detail_entries: self.details.lock().len(),
            listing_entries: self.listings.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.epoch.load(Ordering::Acquire),
        }
    }
}
