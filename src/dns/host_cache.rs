//! Host cache implementation.
//!
//! Chromium mapping: net/dns/host_cache.h
//!
//! Entries are keyed by [`ResolutionKey`] and carry a TTL. A generation
//! counter invalidates every entry on network change without walking the
//! map: an entry recorded under an older generation is stale.

use crate::base::neterror::NetError;
use crate::dns::address_list::AddressList;
use crate::dns::key::ResolutionKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

/// Default number of cached keys.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Result of a resolution as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    error: Option<NetError>,
    addresses: AddressList,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new(result: Result<AddressList, NetError>, ttl: Duration) -> Self {
        match result {
            Ok(addresses) => Self {
                error: None,
                addresses,
                ttl,
            },
            Err(error) => Self {
                error: Some(error),
                addresses: AddressList::new(),
                ttl,
            },
        }
    }

    pub fn error(&self) -> Option<NetError> {
        self.error
    }

    pub fn addresses(&self) -> &AddressList {
        &self.addresses
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The stored outcome, with addresses cloned out.
    pub fn result(&self) -> Result<AddressList, NetError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.addresses.clone()),
        }
    }
}

/// How stale a cache hit is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStaleness {
    /// How long ago the entry expired, `None` if it has not.
    pub expired_by: Option<Duration>,
    /// Network changes since the entry was stored.
    pub network_changes: u64,
    /// Times the entry has been served stale, this hit included.
    pub stale_hits: u32,
}

impl EntryStaleness {
    pub fn is_stale(&self) -> bool {
        self.expired_by.is_some() || self.network_changes > 0
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: CacheEntry,
    expires: Instant,
    generation: u64,
    stale_hits: u32,
}

impl StoredEntry {
    fn staleness(&self, now: Instant, generation: u64) -> EntryStaleness {
        EntryStaleness {
            expired_by: (now >= self.expires).then(|| now.duration_since(self.expires)),
            network_changes: generation.saturating_sub(self.generation),
            stale_hits: self.stale_hits,
        }
    }
}

/// Serializable form of a successful cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: ResolutionKey,
    pub addresses: AddressList,
    pub ttl_secs: u64,
    pub expires_unix_secs: i64,
}

#[derive(Debug)]
pub struct HostCache {
    entries: HashMap<ResolutionKey, StoredEntry>,
    max_entries: usize,
    generation: u64,
}

impl Default for HostCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl HostCache {
    /// A cache with `max_entries == 0` stores nothing.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            // Starts above zero so restored entries can sit one generation back.
            generation: 1,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh entry for `key`, if any.
    pub fn lookup(&self, key: &ResolutionKey, now: Instant) -> Option<&CacheEntry> {
        let stored = self.entries.get(key)?;
        if stored.staleness(now, self.generation).is_stale() {
            return None;
        }
        Some(&stored.entry)
    }

    /// Entry for `key` whether fresh or not, with its staleness.
    pub fn lookup_stale(
        &mut self,
        key: &ResolutionKey,
        now: Instant,
    ) -> Option<(&CacheEntry, EntryStaleness)> {
        let generation = self.generation;
        let stored = self.entries.get_mut(key)?;
        if stored.staleness(now, generation).is_stale() {
            stored.stale_hits = stored.stale_hits.saturating_add(1);
        }
        let staleness = stored.staleness(now, generation);
        Some((&stored.entry, staleness))
    }

    /// Store `entry` for `ttl`, replacing any previous value.
    pub fn set(&mut self, key: ResolutionKey, entry: CacheEntry, now: Instant, ttl: Duration) {
        if self.max_entries == 0 {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_one(now);
        }
        tracing::trace!(host = %key.hostname, ttl_secs = ttl.as_secs(), "caching result");
        self.entries.insert(
            key,
            StoredEntry {
                entry,
                expires: now + ttl,
                generation: self.generation,
                stale_hits: 0,
            },
        );
    }

    /// Mark every current entry stale.
    pub fn on_network_change(&mut self) {
        self.generation += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop the entry that expires first, preferring ones already stale.
    fn evict_one(&mut self, now: Instant) {
        let generation = self.generation;
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, stored)| {
                let stale = stored.staleness(now, generation).is_stale();
                (!stale, stored.expires)
            })
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            tracing::trace!(host = %key.hostname, "evicting cache entry");
            self.entries.remove(&key);
        }
    }

    /// Successful entries, for persistence.
    pub fn export(&self, now: Instant) -> Vec<PersistedEntry> {
        let wall_now = OffsetDateTime::now_utc();
        self.entries
            .iter()
            .filter(|(_, stored)| stored.entry.error.is_none())
            .map(|(key, stored)| {
                let expires = if stored.expires >= now {
                    wall_now + stored.expires.duration_since(now)
                } else {
                    wall_now - now.duration_since(stored.expires)
                };
                PersistedEntry {
                    key: key.clone(),
                    addresses: stored.entry.addresses.clone(),
                    ttl_secs: stored.entry.ttl.as_secs(),
                    expires_unix_secs: expires.unix_timestamp(),
                }
            })
            .collect()
    }

    /// Load persisted entries without overwriting anything already cached.
    ///
    /// Restored entries are recorded one generation back so they are only
    /// ever served through [`lookup_stale`](Self::lookup_stale).
    pub fn restore(&mut self, persisted: Vec<PersistedEntry>, now: Instant) -> usize {
        let wall_now = OffsetDateTime::now_utc().unix_timestamp();
        let mut restored = 0;
        for p in persisted {
            if self.entries.len() >= self.max_entries {
                break;
            }
            if self.entries.contains_key(&p.key) || p.addresses.is_empty() {
                continue;
            }
            let delta = p.expires_unix_secs - wall_now;
            let expires = if delta >= 0 {
                now + Duration::from_secs(delta.unsigned_abs())
            } else {
                now.checked_sub(Duration::from_secs(delta.unsigned_abs()))
                    .unwrap_or(now)
            };
            self.entries.insert(
                p.key,
                StoredEntry {
                    entry: CacheEntry::new(Ok(p.addresses), Duration::from_secs(p.ttl_secs)),
                    expires,
                    generation: self.generation - 1,
                    stale_hits: 0,
                },
            );
            restored += 1;
        }
        restored
    }
}
