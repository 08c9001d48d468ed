//! # Result Cache
//!
//! Memoizes nearby-search results by query fingerprint with a TTL.
//!
//! With the default capacity of 1 only the most recent query is remembered:
//! a query with a different fingerprint evicts the previous entry. A larger
//! capacity keeps that many distinct queries, evicting the least recently
//! used.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::location::LocationSnapshot;
use crate::lru_cache::LruCache;
use crate::proximity::{find_nearby, Candidate, ProximityResult};

/// Default time a cached result stays valid.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Stable hash over everything that affects a nearby search result.
///
/// Covers candidate ids and coordinates (in order), the origin's coordinates
/// and provenance flag, and the search radius and limit.
pub fn fingerprint(
    candidates: &[Candidate],
    origin: Option<&LocationSnapshot>,
    max_distance_km: f64,
    limit: usize,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update((candidates.len() as u64).to_le_bytes());
    for c in candidates {
        hasher.update((c.id.len() as u64).to_le_bytes());
        hasher.update(c.id.as_bytes());
        match c.coordinates {
            Some(p) => {
                hasher.update([1u8]);
                hasher.update(p.latitude.to_bits().to_le_bytes());
                hasher.update(p.longitude.to_bits().to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update([c.featured as u8]);
        hasher.update(c.rating.unwrap_or(-1.0).to_bits().to_le_bytes());
    }

    match origin {
        Some(o) => {
            hasher.update([1u8]);
            hasher.update(o.latitude.to_bits().to_le_bytes());
            hasher.update(o.longitude.to_bits().to_le_bytes());
            hasher.update([o.is_real as u8]);
        }
        None => hasher.update([0u8]),
    }

    hasher.update(max_distance_km.to_bits().to_le_bytes());
    hasher.update((limit as u64).to_le_bytes());

    format!("{:x}", hasher.finalize())
}

/// A stored search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fingerprint: String,
    pub results: Vec<ProximityResult>,
    pub stored_at: DateTime<Utc>,
}

/// Results of a cached lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResults {
    pub entry: CacheEntry,
    /// Served from the cache without running the search
    pub cache_hit: bool,
}

impl CachedResults {
    pub fn results(&self) -> &[ProximityResult] {
        &self.entry.results
    }
}

/// Fingerprint + TTL cache in front of [`find_nearby`].
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    slots: LruCache<String, CacheEntry>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS), 1)
    }
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            slots: LruCache::new(capacity),
        }
    }

    /// Cached [`find_nearby`] as of the current time.
    pub fn get(
        &mut self,
        origin: Option<&LocationSnapshot>,
        candidates: &[Candidate],
        max_distance_km: f64,
        limit: usize,
    ) -> CachedResults {
        self.get_at(Utc::now(), origin, candidates, max_distance_km, limit)
    }

    /// Cached [`find_nearby`] as of `now`.
    ///
    /// Returns the stored entry when its fingerprint matches and it is
    /// younger than the TTL; otherwise searches and stores a new entry.
    pub fn get_at(
        &mut self,
        now: DateTime<Utc>,
        origin: Option<&LocationSnapshot>,
        candidates: &[Candidate],
        max_distance_km: f64,
        limit: usize,
    ) -> CachedResults {
        let key = fingerprint(candidates, origin, max_distance_km, limit);

        if let Some((entry, _)) = self.slots.get_fresh(&key, now, self.ttl) {
            debug!("[ResultCache] Hit {}", &key[..12]);
            return CachedResults {
                entry: entry.clone(),
                cache_hit: true,
            };
        }

        debug!("[ResultCache] Miss {}, searching", &key[..12]);
        let entry = CacheEntry {
            fingerprint: key.clone(),
            results: find_nearby(origin, candidates, max_distance_km, limit),
            stored_at: now,
        };
        self.slots.insert(key, entry.clone(), now);

        CachedResults {
            entry,
            cache_hit: false,
        }
    }

    pub fn invalidate(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("sinhagad", "Sinhagad Fort", GpsPoint::new(18.3663, 73.7559)),
            Candidate::new("rajgad", "Rajgad Fort", GpsPoint::new(18.2462, 73.6823)),
        ]
    }

    #[test]
    fn test_fingerprint_sensitivity() {
        let origin = LocationSnapshot::real(18.5204, 73.8567);
        let base = fingerprint(&candidates(), Some(&origin), 100.0, 6);
        assert_eq!(base, fingerprint(&candidates(), Some(&origin), 100.0, 6));
        assert_eq!(base.len(), 64);

        let fallback = LocationSnapshot::fallback(18.5204, 73.8567);
        assert_ne!(base, fingerprint(&candidates(), Some(&fallback), 100.0, 6));
        assert_ne!(base, fingerprint(&candidates(), None, 100.0, 6));
        assert_ne!(base, fingerprint(&candidates()[..1], Some(&origin), 100.0, 6));
        assert_ne!(base, fingerprint(&candidates(), Some(&origin), 50.0, 6));

        let mut moved = candidates();
        moved[1].coordinates = Some(GpsPoint::new(18.2463, 73.6823));
        assert_ne!(base, fingerprint(&moved, Some(&origin), 100.0, 6));
    }

    #[test]
    fn test_hit_within_ttl_then_expiry() {
        let t0 = Utc::now();
        let origin = LocationSnapshot::real(18.5204, 73.8567);
        let mut cache = ResultCache::default();

        let first = cache.get_at(t0, Some(&origin), &candidates(), 100.0, 6);
        assert!(!first.cache_hit);

        let second = cache.get_at(t0 + Duration::seconds(60), Some(&origin), &candidates(), 100.0, 6);
        assert!(second.cache_hit);
        assert_eq!(second.entry, first.entry);

        let third = cache.get_at(t0 + Duration::minutes(5), Some(&origin), &candidates(), 100.0, 6);
        assert!(!third.cache_hit);
        assert_eq!(third.entry.stored_at, t0 + Duration::minutes(5));
    }

    #[test]
    fn test_single_slot_thrashes() {
        let t0 = Utc::now();
        let origin = LocationSnapshot::real(18.5204, 73.8567);
        let mut cache = ResultCache::default();

        cache.get_at(t0, Some(&origin), &candidates(), 100.0, 6);
        cache.get_at(t0, None, &candidates(), 100.0, 6);
        assert_eq!(cache.len(), 1);
        assert!(!cache.get_at(t0, Some(&origin), &candidates(), 100.0, 6).cache_hit);
    }

    #[test]
    fn test_larger_capacity_keeps_both_queries() {
        let t0 = Utc::now();
        let origin = LocationSnapshot::real(18.5204, 73.8567);
        let mut cache = ResultCache::new(Duration::minutes(5), 4);

        cache.get_at(t0, Some(&origin), &candidates(), 100.0, 6);
        cache.get_at(t0, None, &candidates(), 100.0, 6);
        assert!(cache.get_at(t0, Some(&origin), &candidates(), 100.0, 6).cache_hit);
        assert!(cache.get_at(t0, None, &candidates(), 100.0, 6).cache_hit);
    }
}
