//! In-memory [`EventApi`] used by the unit tests

use crate::{EngineError, Event, EventApi, EventDetails, EventId, Result};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct MockApi {
    events: Mutex<std::result::Result<Vec<Event>, String>>,
    details: Mutex<HashMap<EventId, EventDetails>>,
    delay: Mutex<Duration>,
    event_fetches: AtomicUsize,
    detail_fetches: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::with_events(Vec::new())
    }
}

impl MockApi {
    pub(crate) fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(Ok(events)),
            details: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            event_fetches: AtomicUsize::new(0),
            detail_fetches: AtomicUsize::new(0),
        }
    }

    /// Every response is delayed by `delay` (virtual time under `start_paused`)
    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn set_events(&self, events: Vec<Event>) {
        *self.events.lock().unwrap() = Ok(events);
    }

    pub(crate) fn fail_events(&self, message: &str) {
        *self.events.lock().unwrap() = Err(message.to_string());
    }

    pub(crate) fn set_details(&self, id: EventId, details: EventDetails) {
        self.details.lock().unwrap().insert(id, details);
    }

    pub(crate) fn event_fetches(&self) -> usize {
        self.event_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn detail_fetches(&self) -> usize {
        self.detail_fetches.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Duration {
        *self.delay.lock().unwrap()
    }
}

impl EventApi for MockApi {
    fn fetch_all_events(&self) -> BoxFuture<'_, Result<Vec<Event>>> {
        self.event_fetches.fetch_add(1, Ordering::SeqCst);
        // Snapshot at request time
        let response = self.events.lock().unwrap().clone();
        let delay = self.delay();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response.map_err(EngineError::Transport)
        })
    }

    fn fetch_event_details<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<EventDetails>> {
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        let response = self.details.lock().unwrap().get(id).cloned();
        let delay = self.delay();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response.ok_or_else(|| EngineError::NotFound(id.clone()))
        })
    }
}
