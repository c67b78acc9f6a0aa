//! DetailCache - Per-event detail memoization
//!
//! Each id is fetched at most once while its details are cached, and at most
//! one request per id is ever in flight. Failed fetches are not cached, so the
//! next request for that id tries again.

use crate::{Config, EventApi, EventDetails, EventId, Result};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Outcome of looking up an id before fetching its details
#[derive(Debug, Clone, PartialEq)]
pub enum DetailLookup {
    /// Details are already cached
    Cached(Arc<EventDetails>),
    /// A fetch for this id is already in flight
    Pending,
    /// The caller must fetch the details and report back with [`DetailCache::complete`]
    Fetch,
}

/// Cache of detail payloads keyed by event id
#[derive(Debug)]
pub struct DetailCache {
    entries: LruCache<EventId, Arc<EventDetails>>,
    pending: HashSet<EventId>,
}

impl Default for DetailCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl DetailCache {
    /// Cache that keeps every entry for the session
    pub fn unbounded() -> Self {
        Self {
            entries: LruCache::unbounded(),
            pending: HashSet::new(),
        }
    }

    /// Cache that evicts the least recently used entry beyond `capacity`
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            pending: HashSet::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        match config.detail_cache_capacity {
            Some(capacity) => Self::with_capacity(capacity),
            None => Self::unbounded(),
        }
    }

    /// Cached details for `id`, without touching recency
    #[inline]
    pub fn peek(&self, id: &EventId) -> Option<Arc<EventDetails>> {
        self.entries.peek(id).cloned()
    }

    #[inline]
    pub fn contains(&self, id: &EventId) -> bool {
        self.entries.contains(id)
    }

    #[inline]
    pub fn is_pending(&self, id: &EventId) -> bool {
        self.pending.contains(id)
    }

    /// Whether any fetch is in flight
    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `id`, claiming the fetch if nobody else has
    pub fn begin(&mut self, id: &EventId) -> DetailLookup {
        if let Some(details) = self.entries.get(id) {
            tracing::trace!("Details for event {} served from cache", id);
            return DetailLookup::Cached(Arc::clone(details));
        }
        if !self.pending.insert(id.clone()) {
            tracing::trace!("Details for event {} already being fetched", id);
            return DetailLookup::Pending;
        }
        DetailLookup::Fetch
    }

    /// Record the result of a fetch claimed with [`DetailCache::begin`]
    ///
    /// Returns the cached details on success. Failures are logged and leave the
    /// id uncached.
    pub fn complete(
        &mut self,
        id: EventId,
        result: Result<EventDetails>,
    ) -> Option<Arc<EventDetails>> {
        self.pending.remove(&id);

        match result {
            Ok(details) => {
                let details = Arc::new(details);
                if let Some((evicted, _)) = self.entries.push(id.clone(), Arc::clone(&details))
                    && evicted != id
                {
                    tracing::debug!("Evicted cached details for event {}", evicted);
                }
                Some(details)
            }
            Err(e) => {
                tracing::warn!("Error fetching details for event {}: {}", id, e);
                None
            }
        }
    }

    /// Cached details for `id`, fetching them through `api` on a miss
    ///
    /// Returns `None` if the fetch failed, or if another fetch for the same id
    /// is already in flight through [`DetailCache::begin`]; use
    /// [`DetailCache::is_pending`] to tell the two apart. Dropping the future
    /// mid-fetch releases the claim on `id`.
    pub async fn get(&mut self, api: &dyn EventApi, id: &EventId) -> Option<Arc<EventDetails>> {
        match self.begin(id) {
            DetailLookup::Cached(details) => Some(details),
            DetailLookup::Pending => None,
            DetailLookup::Fetch => {
                let claim = FetchClaim {
                    cache: self,
                    id,
                    settled: false,
                };
                let result = api.fetch_event_details(id).await;
                claim.settle(result)
            }
        }
    }
}

/// Pending mark held by [`DetailCache::get`], released if the fetch is abandoned
struct FetchClaim<'a> {
    cache: &'a mut DetailCache,
    id: &'a EventId,
    settled: bool,
}

impl FetchClaim<'_> {
    fn settle(mut self, result: Result<EventDetails>) -> Option<Arc<EventDetails>> {
        self.settled = true;
        self.cache.complete(self.id.clone(), result)
    }
}

impl Drop for FetchClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("Fetch of details for event {} abandoned", self.id);
            self.cache.pending.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use crate::testing::MockApi;
    use std::time::Duration;

    fn details(name: &str) -> EventDetails {
        EventDetails {
            name: name.to_string(),
            ..EventDetails::default()
        }
    }

    #[test]
    fn test_begin_claims_fetch_once() {
        let mut cache = DetailCache::unbounded();
        let id = EventId::from(1);

        assert_eq!(cache.begin(&id), DetailLookup::Fetch);
        assert!(cache.is_pending(&id));
        assert_eq!(cache.begin(&id), DetailLookup::Pending);

        let stored = cache.complete(id.clone(), Ok(details("Gig"))).unwrap();
        assert_eq!(stored.name, "Gig");
        assert!(!cache.has_pending());
        assert_eq!(cache.begin(&id), DetailLookup::Cached(stored));
    }

    #[test]
    fn test_failures_are_not_cached() {
        let mut cache = DetailCache::unbounded();
        let id = EventId::from(2);

        assert_eq!(cache.begin(&id), DetailLookup::Fetch);
        assert!(cache.complete(id.clone(), Err(EngineError::NotFound(id.clone()))).is_none());
        assert!(!cache.contains(&id));
        assert!(!cache.is_pending(&id));
        // Retried on the next request
        assert_eq!(cache.begin(&id), DetailLookup::Fetch);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut cache = DetailCache::with_capacity(NonZeroUsize::new(2).unwrap());
        for i in 0..2 {
            let id = EventId::from(i);
            cache.begin(&id);
            cache.complete(id, Ok(details("x")));
        }
        // Touch 0 so that 1 is the eviction candidate
        assert!(matches!(cache.begin(&EventId::from(0)), DetailLookup::Cached(_)));

        let id = EventId::from(2);
        cache.begin(&id);
        cache.complete(id, Ok(details("y")));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&EventId::from(0)));
        assert!(!cache.contains(&EventId::from(1)));
        assert!(cache.contains(&EventId::from(2)));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            detail_cache_capacity: NonZeroUsize::new(1),
            ..Config::default()
        };
        let mut cache = DetailCache::from_config(&config);
        for i in 0..3 {
            let id = EventId::from(i);
            cache.begin(&id);
            cache.complete(id, Ok(details("z")));
        }
        assert_eq!(cache.len(), 1);

        let unbounded = DetailCache::from_config(&Config::default());
        assert!(unbounded.is_empty());
    }

    #[tokio::test]
    async fn test_get_fetches_once() {
        let api = MockApi::default();
        api.set_details(EventId::from(7), details("Market"));
        let mut cache = DetailCache::unbounded();

        let first = cache.get(&api, &EventId::from(7)).await.unwrap();
        let second = cache.get(&api, &EventId::from(7)).await.unwrap();
        assert_eq!(first.name, "Market");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(api.detail_fetches(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_id() {
        let api = MockApi::default();
        let mut cache = DetailCache::unbounded();

        assert!(cache.get(&api, &EventId::from(404)).await.is_none());
        assert!(cache.get(&api, &EventId::from(404)).await.is_none());
        assert_eq!(api.detail_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_get_releases_claim() {
        let api = MockApi::default().with_delay(Duration::from_secs(1));
        api.set_details(EventId::from(5), details("Late"));
        let mut cache = DetailCache::unbounded();
        let id = EventId::from(5);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), cache.get(&api, &id)).await;
        assert!(abandoned.is_err());
        assert!(!cache.is_pending(&id));
        assert!(!cache.contains(&id));

        let details = cache.get(&api, &id).await.unwrap();
        assert_eq!(details.name, "Late");
        assert_eq!(api.detail_fetches(), 2);
    }
}
