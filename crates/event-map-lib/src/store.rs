//! EventStore - Full-snapshot event collection with loading state
//!
//! A refresh always replaces the whole collection. Failed refreshes keep the
//! previous collection available, so the map keeps showing stale data rather
//! than nothing.

use crate::{Event, EventApi, EventId, Result};
use std::sync::Arc;

/// Identifies one refresh request
///
/// Tickets increase monotonically; a response for a ticket older than the
/// snapshot already applied is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshTicket(u64);

/// Owner of the current event collection
#[derive(Debug, Clone)]
pub struct EventStore {
    events: Arc<[Arc<Event>]>,
    /// Bumped every time a snapshot is applied
    generation: u64,
    next_ticket: u64,
    applied_ticket: Option<RefreshTicket>,
    in_flight: usize,
    last_error: Option<String>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Arc::from(Vec::new()),
            generation: 0,
            next_ticket: 0,
            applied_ticket: None,
            in_flight: 0,
            last_error: None,
        }
    }

    /// Current collection
    #[inline]
    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    /// Shared handle to the current collection
    #[inline]
    pub fn snapshot(&self) -> Arc<[Arc<Event>]> {
        Arc::clone(&self.events)
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether any refresh is in flight
    #[inline]
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the last-fetched collection contains `id`
    pub fn contains(&self, id: &EventId) -> bool {
        self.events.iter().any(|event| &event.id == id)
    }

    /// Message of the most recent failed refresh, cleared by a successful one
    #[inline]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Mark a refresh as started
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        let ticket = RefreshTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight += 1;
        ticket
    }

    /// Apply the outcome of a refresh started with [`EventStore::begin_refresh`]
    ///
    /// Returns `true` if the collection was replaced.
    pub fn finish_refresh(&mut self, ticket: RefreshTicket, result: Result<Vec<Event>>) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    "Error fetching events: {} - keeping {} previously loaded events",
                    e,
                    self.events.len()
                );
                self.last_error = Some(e.to_string());
                return false;
            }
        };

        if self.applied_ticket.is_some_and(|applied| applied > ticket) {
            tracing::debug!(
                "Discarding out-of-order event snapshot {:?} (already applied {:?})",
                ticket,
                self.applied_ticket
            );
            return false;
        }

        let unusable = events
            .iter()
            .filter(|event| !event.has_valid_coordinates())
            .count();
        if unusable > 0 {
            tracing::warn!(
                "{} of {} loaded events have unusable coordinates",
                unusable,
                events.len()
            );
        }

        tracing::info!("Loaded {} events", events.len());
        self.events = events.into_iter().map(Arc::new).collect();
        self.generation += 1;
        self.applied_ticket = Some(ticket);
        self.last_error = None;
        true
    }

    /// Fetch the full catalog and replace the collection
    ///
    /// On failure the previous collection is kept. Either way the collection
    /// held after the call is returned.
    pub async fn fetch_all(&mut self, api: &dyn EventApi) -> Arc<[Arc<Event>]> {
        let ticket = self.begin_refresh();
        let result = api.fetch_all_events().await;
        self.finish_refresh(ticket, result);
        self.snapshot()
    }
}
