/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! In-memory content cache with interest filters and a pending-interest
//! table.
//!
//! The face glue routes every interest arriving under the stream prefix
//! through [`MemoryContentCache::on_interest`]: stored fresh data is served
//! first, then registered filters get a chance to generate an object on
//! demand (`_live`, `_latest`), and anything unanswered is parked in the
//! pending table. The stream engine reads the pending table to measure
//! generation delay for frame metadata.

use std::sync::Mutex;

use namecast_types::data::{Data, Interest};
use namecast_types::name::Name;

/// Callback that may generate a content object for an arriving interest.
pub type InterestFilter = Box<dyn Fn(&Name, &Interest) -> Option<Data> + Send + Sync>;

/// Stale entries still answer non-fresh interests; drop them for good only
/// after this long.
const RETENTION_MS: u64 = 30_000;

#[derive(Debug, Clone)]
struct CachedData {
    data: Data,
    added_ms: u64,
}

#[derive(Debug, Clone)]
struct PendingInterest {
    interest: Interest,
    arrival_ms: u64,
}

#[derive(Default)]
struct CacheInner {
    store: Vec<CachedData>,
    pending: Vec<PendingInterest>,
}

/// Producer-side in-memory content cache.
#[derive(Default)]
pub struct MemoryContentCache {
    inner: Mutex<CacheInner>,
    filters: Mutex<Vec<(Name, InterestFilter)>>,
}

impl MemoryContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator for interests under `prefix`.
    pub fn set_interest_filter(&self, prefix: Name, filter: InterestFilter) {
        self.filters.lock().unwrap().push((prefix, filter));
    }

    /// Store a content object; answered pending interests are dropped.
    pub fn add(&self, data: Data, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.retain(|p| !p.interest.matches(&data));
        inner.store.push(CachedData { data, added_ms: now_ms });
        Self::prune(&mut inner, now_ms);
    }

    /// Serve, generate, or park an arriving interest.
    pub fn on_interest(&self, interest: &Interest, now_ms: u64) -> Option<Data> {
        if let Some(found) = self.get(interest, now_ms) {
            return Some(found);
        }

        {
            let filters = self.filters.lock().unwrap();
            for (prefix, filter) in filters.iter() {
                if prefix.is_prefix_of(&interest.name) {
                    if let Some(generated) = filter(prefix, interest) {
                        drop(filters);
                        self.add(generated.clone(), now_ms);
                        return Some(generated);
                    }
                }
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.pending.push(PendingInterest {
            interest: interest.clone(),
            arrival_ms: now_ms,
        });
        log::trace!("pending interest parked: {}", interest.name);
        None
    }

    /// Look up stored data matching `interest`, newest first.
    pub fn get(&self, interest: &Interest, now_ms: u64) -> Option<Data> {
        let inner = self.inner.lock().unwrap();
        inner
            .store
            .iter()
            .rev()
            .find(|c| {
                interest.matches(&c.data)
                    && (!interest.must_be_fresh || !Self::is_stale(c, now_ms))
            })
            .map(|c| c.data.clone())
    }

    /// Pending interests whose name would be answered by data named `name`,
    /// with their arrival timestamps. Oldest first.
    pub fn pending_interests_for(&self, name: &Name, now_ms: u64) -> Vec<(Interest, u64)> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .pending
            .retain(|p| p.arrival_ms + p.interest.lifetime_ms as u64 > now_ms);
        inner
            .pending
            .iter()
            .filter(|p| p.interest.name.is_prefix_of(name))
            .map(|p| (p.interest.clone(), p.arrival_ms))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_stale(cached: &CachedData, now_ms: u64) -> bool {
        let freshness = cached.data.meta_info.freshness_ms as u64;
        freshness > 0 && cached.added_ms + freshness <= now_ms
    }

    fn prune(inner: &mut CacheInner, now_ms: u64) {
        inner
            .store
            .retain(|c| c.added_ms + RETENTION_MS > now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use namecast_types::name;

    fn create_test_data(uri: &str, freshness_ms: u32) -> Data {
        let mut d = Data::new(Name::from_uri(uri));
        d.meta_info.freshness_ms = freshness_ms;
        d.set_content(b"x".to_vec());
        d.sign_with_digest();
        d
    }

    #[test]
    fn serves_stored_data_by_prefix() {
        let cache = MemoryContentCache::new();
        cache.add(create_test_data("/s/a/b", 1000), 0);

        let hit = cache.on_interest(&Interest::new(Name::from_uri("/s/a")), 10);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().name(), &Name::from_uri("/s/a/b"));
    }

    #[test]
    fn fresh_only_interests_skip_stale_entries() {
        let cache = MemoryContentCache::new();
        cache.add(create_test_data("/s/a", 100), 0);

        let stale = cache.get(&Interest::new(Name::from_uri("/s/a")).fresh(), 200);
        assert!(stale.is_none());

        // Stale entries still answer non-fresh lookups.
        let any = cache.get(&Interest::new(Name::from_uri("/s/a")), 200);
        assert!(any.is_some());
    }

    #[test]
    fn filters_generate_on_demand() {
        let cache = MemoryContentCache::new();
        let stream = Name::from_uri("/s");
        let live_prefix = stream.clone().append_str(name::LIVE);
        cache.set_interest_filter(
            live_prefix.clone(),
            Box::new(|prefix, _interest| {
                let mut d = Data::new(prefix.clone().append_timestamp(42));
                d.sign_with_digest();
                Some(d)
            }),
        );

        let answer = cache.on_interest(&Interest::new(live_prefix.clone()), 0);
        assert!(answer.is_some());
        // The generated object is now cached.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unanswered_interests_are_parked_with_arrival_time() {
        let cache = MemoryContentCache::new();
        let name = Name::from_uri("/s/frame/meta");
        assert!(cache
            .on_interest(&Interest::new(name.clone()).with_lifetime(1000), 500)
            .is_none());

        let pending = cache.pending_interests_for(&name, 600);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1, 500);

        // Expired pending interests are dropped.
        assert!(cache.pending_interests_for(&name, 2000).is_empty());
    }

    #[test]
    fn add_clears_matching_pending_interests() {
        let cache = MemoryContentCache::new();
        let name = Name::from_uri("/s/obj");
        cache.on_interest(&Interest::new(name.clone()).with_lifetime(4000), 0);

        cache.add(create_test_data("/s/obj", 1000), 10);
        assert!(cache.pending_interests_for(&name, 20).is_empty());
    }
}
