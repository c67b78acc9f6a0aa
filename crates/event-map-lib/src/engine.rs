//! MapEngine - Control loop tying the store, cache, tracker and selection together
//!
//! One tokio task owns all engine state. It processes, one at a time:
//!
//! - map signals sent through a [`MapHandle`],
//! - completions of fetches it spawned,
//! - debounce deadlines of the [`ViewportTracker`].
//!
//! After every step the current [`MapView`] is published on a watch channel.
//! Fetches are never cancelled; their results are applied whenever they land.

use crate::{
    Activation, Bounds, Clustering, Config, DetailCache, DetailLookup, EngineError, Event,
    EventApi, EventDetails, EventId, EventStore, ItemContext, RefreshTicket, RenderableItem,
    Result, SelectionCoordinator, TrackerAction, ViewportTracker, cluster_events,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Snapshot of everything a renderer needs
#[derive(Debug, Clone, Default, Serialize)]
pub struct MapView {
    pub clustering: Arc<Clustering>,
    /// A catalog refresh is in flight
    pub is_loading: bool,
    pub active_selection: Option<EventId>,
    pub active_selection_details: Option<Arc<EventDetails>>,
    /// Details of the active selection are being fetched
    pub is_loading_details: bool,
    pub current_zoom: u8,
    pub is_map_moving: bool,
    /// Events left out of clustering because of unusable coordinates
    pub excluded_events: usize,
    /// Size of the loaded catalog
    pub event_count: usize,
}

impl MapView {
    /// Items to draw at the current zoom
    #[inline]
    pub fn items(&self) -> &[RenderableItem] {
        &self.clustering.items
    }

    // Clusterings are compared by identity, they are rebuilt rather than mutated
    fn same_as(&self, other: &MapView) -> bool {
        Arc::ptr_eq(&self.clustering, &other.clustering)
            && self.is_loading == other.is_loading
            && self.active_selection == other.active_selection
            && self.active_selection_details == other.active_selection_details
            && self.is_loading_details == other.is_loading_details
            && self.current_zoom == other.current_zoom
            && self.is_map_moving == other.is_map_moving
            && self.excluded_events == other.excluded_events
            && self.event_count == other.event_count
    }
}

#[derive(Debug)]
enum Signal {
    Bounds(Bounds),
    Zoom(u8),
    DragStart,
    DragEnd,
    Activate {
        id: EventId,
        context: ItemContext,
        reply: oneshot::Sender<Activation>,
    },
    Deactivate,
    Refresh,
    Shutdown,
}

#[derive(Debug)]
enum Completion {
    Events {
        ticket: RefreshTicket,
        result: Result<Vec<Event>>,
    },
    Details {
        id: EventId,
        result: Result<EventDetails>,
    },
}

/// Engine state, run by [`MapEngine::run`]
pub struct MapEngine {
    api: Arc<dyn EventApi>,
    config: Config,
    store: EventStore,
    details: DetailCache,
    tracker: ViewportTracker,
    selection: SelectionCoordinator,
    clustering: Arc<Clustering>,
    /// (store generation, zoom) the current clustering was computed for
    clustered_for: Option<(u64, u8)>,
    signals: mpsc::UnboundedReceiver<Signal>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    view: watch::Sender<MapView>,
}

impl MapEngine {
    /// Create an engine and the handle controlling it
    ///
    /// Nothing happens until [`MapEngine::run`] is awaited.
    pub fn new(api: Arc<dyn EventApi>, config: Config) -> Result<(Self, MapHandle)> {
        config.validate()?;

        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let initial = MapView {
            current_zoom: config.initial_zoom,
            ..MapView::default()
        };
        let (view, view_rx) = watch::channel(initial);

        let engine = Self {
            api,
            store: EventStore::new(),
            details: DetailCache::from_config(&config),
            tracker: ViewportTracker::new(&config),
            selection: SelectionCoordinator::new(),
            clustering: Arc::new(Clustering::default()),
            clustered_for: None,
            config,
            signals,
            completion_tx,
            completions,
            view,
        };
        let handle = MapHandle {
            signals: signal_tx,
            view: view_rx,
        };
        Ok((engine, handle))
    }

    /// Create an engine and run it on a new tokio task
    pub fn spawn(api: Arc<dyn EventApi>, config: Config) -> Result<(MapHandle, JoinHandle<()>)> {
        let (engine, handle) = Self::new(api, config)?;
        let task = tokio::spawn(engine.run());
        Ok((handle, task))
    }

    /// Run until [`MapHandle::shutdown`] is called or every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Map engine started");
        self.start_refresh();
        self.publish();

        loop {
            let deadline = self.tracker.next_deadline();
            tokio::select! {
                signal = self.signals.recv() => match signal {
                    Some(Signal::Shutdown) | None => break,
                    Some(signal) => self.handle_signal(signal),
                },
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
                _ = sleep_until_deadline(deadline) => {}
            }
            self.run_due_tasks();
            self.publish();
        }

        tracing::info!("Map engine stopped");
    }

    fn handle_signal(&mut self, signal: Signal) {
        let now = Instant::now();
        match signal {
            Signal::Bounds(bounds) => self.tracker.bounds_changed(now, bounds),
            Signal::Zoom(zoom) => self.tracker.zoom_changed(now, zoom),
            Signal::DragStart => self.tracker.drag_started(),
            Signal::DragEnd => self.tracker.drag_ended(now),
            Signal::Activate { id, context, reply } => {
                let activation = self.activate(id, &context);
                // The caller may have stopped waiting
                let _ = reply.send(activation);
            }
            Signal::Deactivate => self.selection.on_deselect(),
            Signal::Refresh => self.start_refresh(),
            Signal::Shutdown => {}
        }
    }

    fn activate(&mut self, id: EventId, context: &ItemContext) -> Activation {
        let activation = self
            .selection
            .on_item_activated(id, context, &mut self.details);
        if let Activation::Selected {
            id,
            lookup: DetailLookup::Fetch,
        } = &activation
        {
            self.start_detail_fetch(id.clone());
        }
        activation
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Events { ticket, result } => {
                if self.store.finish_refresh(ticket, result) {
                    self.selection.reconcile(&self.store, &self.details);
                }
            }
            Completion::Details { id, result } => {
                self.details.complete(id, result);
                self.selection.reconcile(&self.store, &self.details);
            }
        }
    }

    fn run_due_tasks(&mut self) {
        for action in self.tracker.poll(Instant::now()) {
            match action {
                TrackerAction::Refresh(_) => self.start_refresh(),
                TrackerAction::ZoomApplied(_) | TrackerAction::DragSettled => {}
            }
        }
    }

    fn start_refresh(&mut self) {
        let ticket = self.store.begin_refresh();
        let api = Arc::clone(&self.api);
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_all_events().await;
            let _ = completions.send(Completion::Events { ticket, result });
        });
    }

    fn start_detail_fetch(&mut self, id: EventId) {
        let api = Arc::clone(&self.api);
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_event_details(&id).await;
            let _ = completions.send(Completion::Details { id, result });
        });
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn recluster(&mut self) {
        let key = (self.store.generation(), self.tracker.zoom());
        if self.clustered_for == Some(key) {
            return;
        }
        self.clustering = Arc::new(cluster_events(
            self.store.events(),
            self.tracker.zoom(),
            &self.config,
        ));
        self.clustered_for = Some(key);
    }

    fn publish(&mut self) {
        profiling::scope!("engine::publish");
        self.recluster();

        let active = self.selection.active().cloned();
        let next = MapView {
            clustering: Arc::clone(&self.clustering),
            is_loading: self.store.is_loading(),
            active_selection_details: active.as_ref().and_then(|id| self.details.peek(id)),
            is_loading_details: active
                .as_ref()
                .is_some_and(|id| self.details.is_pending(id)),
            active_selection: active,
            current_zoom: self.tracker.zoom(),
            is_map_moving: self.tracker.is_map_moving(),
            excluded_events: self.clustering.excluded,
            event_count: self.store.len(),
        };

        self.view.send_if_modified(|view| {
            if view.same_as(&next) {
                return false;
            }
            *view = next;
            true
        });
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle feeding map signals into a running [`MapEngine`]
///
/// Every method fails with [`EngineError::EngineClosed`] once the engine has
/// stopped.
#[derive(Debug, Clone)]
pub struct MapHandle {
    signals: mpsc::UnboundedSender<Signal>,
    view: watch::Receiver<MapView>,
}

impl MapHandle {
    fn send(&self, signal: Signal) -> Result<()> {
        self.signals
            .send(signal)
            .map_err(|_| EngineError::EngineClosed)
    }

    pub fn report_bounds(&self, bounds: Bounds) -> Result<()> {
        self.send(Signal::Bounds(bounds))
    }

    pub fn report_zoom(&self, zoom: u8) -> Result<()> {
        self.send(Signal::Zoom(zoom))
    }

    pub fn report_drag_start(&self) -> Result<()> {
        self.send(Signal::DragStart)
    }

    pub fn report_drag_end(&self) -> Result<()> {
        self.send(Signal::DragEnd)
    }

    /// Activate a map item and wait for the engine's decision
    pub async fn activate_item(&self, id: EventId, context: ItemContext) -> Result<Activation> {
        let (reply, response) = oneshot::channel();
        self.send(Signal::Activate { id, context, reply })?;
        response.await.map_err(|_| EngineError::EngineClosed)
    }

    pub fn deactivate(&self) -> Result<()> {
        self.send(Signal::Deactivate)
    }

    /// Refetch the catalog regardless of viewport movement
    pub fn refresh(&self) -> Result<()> {
        self.send(Signal::Refresh)
    }

    /// Stop the engine after the signals already queued
    pub fn shutdown(&self) -> Result<()> {
        self.send(Signal::Shutdown)
    }

    /// Latest published view
    pub fn view(&self) -> MapView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change
    pub fn subscribe(&self) -> watch::Receiver<MapView> {
        self.view.clone()
    }
}
