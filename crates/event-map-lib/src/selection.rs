//! Selection handling and cluster expansion
//!
//! Activating a singleton selects it and looks up its details. Activating a
//! cluster never selects anything: it yields a [`ClusterExpansion`] that the
//! map surface turns into a zoom-in via [`ClusterExpansion::plan`].

use crate::{
    Bounds, Cluster, Config, DetailCache, DetailLookup, EngineError, Event, EventId, EventStore,
    LatLng, RenderableItem, Result,
};
use geo::{BoundingRect, MultiPoint, Point};
use serde::Serialize;
use std::sync::Arc;

/// What kind of item an activation came from
#[derive(Debug, Clone, PartialEq)]
pub enum ItemContext {
    Singleton,
    Cluster(Cluster),
}

impl ItemContext {
    /// Context for activating `item`
    pub fn of(item: &RenderableItem) -> Self {
        match item {
            RenderableItem::Singleton(_) => Self::Singleton,
            RenderableItem::Cluster(cluster) => Self::Cluster(cluster.clone()),
        }
    }
}

/// Directive to zoom into a cluster's members
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterExpansion {
    pub cluster_id: String,
    pub members: Vec<Arc<Event>>,
}

/// Map command computed from a [`ClusterExpansion`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpansionPlan {
    /// Bounding box of the members with usable coordinates
    pub bounds: Bounds,
    pub center: LatLng,
    pub target_zoom: u8,
    pub valid_members: usize,
    pub skipped_members: usize,
}

impl ClusterExpansion {
    pub fn new(cluster: &Cluster) -> Self {
        Self {
            cluster_id: cluster.id.clone(),
            members: cluster.members.clone(),
        }
    }

    /// Bounding region, center and zoom level for the expansion
    ///
    /// Members without finite coordinates are skipped. Fails with
    /// [`EngineError::EmptyClusterExpansion`] if none are left, in which case
    /// no map command should be issued.
    pub fn plan(&self, current_zoom: u8, config: &Config) -> Result<ExpansionPlan> {
        let points: MultiPoint<f64> = self
            .members
            .iter()
            .filter(|event| event.has_valid_coordinates())
            .map(|event| Point::new(event.lng, event.lat))
            .collect();
        let valid_members = points.0.len();
        let skipped_members = self.members.len() - valid_members;
        if skipped_members > 0 {
            tracing::warn!(
                "Skipping {} members of {} with unusable coordinates",
                skipped_members,
                self.cluster_id
            );
        }

        let rect = points
            .bounding_rect()
            .ok_or_else(|| EngineError::EmptyClusterExpansion {
                cluster_id: self.cluster_id.clone(),
            })?;
        let bounds = Bounds::from_rect(rect);

        Ok(ExpansionPlan {
            bounds,
            center: bounds.center(),
            target_zoom: config.expansion_zoom(current_zoom),
            valid_members,
            skipped_members,
        })
    }
}

/// Result of activating an item
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// A cluster was activated; the selection is unchanged
    ExpandCluster(ClusterExpansion),
    /// The event was already selected and its details are cached
    Unchanged,
    /// The event became the active selection
    Selected { id: EventId, lookup: DetailLookup },
}

/// Tracks the single active selection
#[derive(Debug, Clone, Default)]
pub struct SelectionCoordinator {
    active: Option<EventId>,
}

impl SelectionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn active(&self) -> Option<&EventId> {
        self.active.as_ref()
    }

    /// Handle a tap on a map item
    pub fn on_item_activated(
        &mut self,
        id: EventId,
        context: &ItemContext,
        cache: &mut DetailCache,
    ) -> Activation {
        if let ItemContext::Cluster(cluster) = context {
            tracing::debug!("Expanding {} ({} events)", cluster.id, cluster.count);
            return Activation::ExpandCluster(ClusterExpansion::new(cluster));
        }

        if self.active.as_ref() == Some(&id) && cache.contains(&id) {
            return Activation::Unchanged;
        }

        tracing::debug!("Selected event {}", id);
        let lookup = cache.begin(&id);
        self.active = Some(id.clone());
        Activation::Selected { id, lookup }
    }

    /// Clear the selection; cached details are kept
    pub fn on_deselect(&mut self) {
        self.active = None;
    }

    /// Drop the selection if the event is not in the catalog and nothing is pending for it
    ///
    /// Returns `true` if the selection was cleared.
    pub fn reconcile(&mut self, store: &EventStore, cache: &DetailCache) -> bool {
        let Some(id) = &self.active else {
            return false;
        };
        if store.contains(id) || cache.is_pending(id) {
            return false;
        }
        tracing::debug!("Selected event {} is no longer in the catalog", id);
        self.active = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventDetails, cluster_events};

    fn cluster_of(coords: &[(f64, f64)]) -> Cluster {
        let events: Vec<Arc<Event>> = coords
            .iter()
            .enumerate()
            .map(|(i, &(lat, lng))| Arc::new(Event::new(i as i64, lat, lng)))
            .collect();
        let centroid_lat = coords.iter().map(|c| c.0).sum::<f64>() / coords.len() as f64;
        let centroid_lng = coords.iter().map(|c| c.1).sum::<f64>() / coords.len() as f64;
        Cluster {
            id: "cluster-0".to_string(),
            centroid: LatLng::new(centroid_lat, centroid_lng),
            count: events.len(),
            members: events,
        }
    }

    #[test]
    fn test_cluster_activation_expands() {
        let mut selection = SelectionCoordinator::new();
        let mut cache = DetailCache::unbounded();
        let cluster = cluster_of(&[(12.90, 77.50), (13.00, 77.60)]);

        let activation = selection.on_item_activated(
            EventId::from(0),
            &ItemContext::Cluster(cluster.clone()),
            &mut cache,
        );
        let Activation::ExpandCluster(expansion) = activation else {
            panic!("expected an expansion");
        };
        assert_eq!(expansion.cluster_id, "cluster-0");
        assert_eq!(expansion.members.len(), 2);
        assert!(selection.active().is_none());
        assert!(!cache.has_pending());

        let plan = expansion.plan(11, &Config::default()).unwrap();
        assert!((plan.center.lat - 12.95).abs() < 1e-9);
        assert!((plan.center.lng - 77.55).abs() < 1e-9);
        assert_eq!(plan.bounds, Bounds::new(13.00, 12.90, 77.60, 77.50));
        assert_eq!(plan.target_zoom, 14);
        assert_eq!(plan.valid_members, 2);
    }

    #[test]
    fn test_expansion_zoom_from_high_zoom() {
        let cluster = cluster_of(&[(1.0, 1.0), (1.001, 1.001)]);
        let plan = ClusterExpansion::new(&cluster)
            .plan(13, &Config::default())
            .unwrap();
        assert_eq!(plan.target_zoom, 16);
    }

    #[test]
    fn test_expansion_skips_invalid_members() {
        let cluster = cluster_of(&[(10.0, 20.0), (f64::NAN, 20.0), (10.004, 20.002)]);
        let plan = ClusterExpansion::new(&cluster)
            .plan(10, &Config::default())
            .unwrap();
        assert_eq!(plan.valid_members, 2);
        assert_eq!(plan.skipped_members, 1);
        assert!(plan.bounds.is_valid());
    }

    #[test]
    fn test_expansion_without_valid_members() {
        let cluster = cluster_of(&[(f64::NAN, 1.0), (2.0, f64::INFINITY)]);
        let result = ClusterExpansion::new(&cluster).plan(10, &Config::default());
        assert!(matches!(
            result,
            Err(EngineError::EmptyClusterExpansion { cluster_id }) if cluster_id == "cluster-0"
        ));
    }

    #[test]
    fn test_singleton_activation_selects() {
        let mut selection = SelectionCoordinator::new();
        let mut cache = DetailCache::unbounded();
        let id = EventId::from(3);

        let activation = selection.on_item_activated(id.clone(), &ItemContext::Singleton, &mut cache);
        assert_eq!(
            activation,
            Activation::Selected {
                id: id.clone(),
                lookup: DetailLookup::Fetch
            }
        );
        assert_eq!(selection.active(), Some(&id));

        // Re-activating while the fetch is in flight does not claim it again
        let again = selection.on_item_activated(id.clone(), &ItemContext::Singleton, &mut cache);
        assert!(matches!(
            again,
            Activation::Selected {
                lookup: DetailLookup::Pending,
                ..
            }
        ));

        cache.complete(id.clone(), Ok(EventDetails::default()));
        let cached = selection.on_item_activated(id, &ItemContext::Singleton, &mut cache);
        assert_eq!(cached, Activation::Unchanged);
    }

    #[test]
    fn test_switching_selection_uses_cache() {
        let mut selection = SelectionCoordinator::new();
        let mut cache = DetailCache::unbounded();
        for i in [1, 2] {
            let id = EventId::from(i);
            cache.begin(&id);
            cache.complete(id, Ok(EventDetails::default()));
        }

        selection.on_item_activated(EventId::from(1), &ItemContext::Singleton, &mut cache);
        let activation =
            selection.on_item_activated(EventId::from(2), &ItemContext::Singleton, &mut cache);
        assert!(matches!(
            activation,
            Activation::Selected {
                lookup: DetailLookup::Cached(_),
                ..
            }
        ));
        assert_eq!(selection.active(), Some(&EventId::from(2)));
    }

    #[test]
    fn test_deselect_keeps_cache() {
        let mut selection = SelectionCoordinator::new();
        let mut cache = DetailCache::unbounded();
        let id = EventId::from(5);
        selection.on_item_activated(id.clone(), &ItemContext::Singleton, &mut cache);
        cache.complete(id.clone(), Ok(EventDetails::default()));

        selection.on_deselect();
        assert!(selection.active().is_none());
        assert!(cache.contains(&id));
        // Idempotent
        selection.on_deselect();
        assert!(selection.active().is_none());
    }

    #[test]
    fn test_reconcile_after_refresh() {
        let mut store = EventStore::new();
        let ticket = store.begin_refresh();
        store.finish_refresh(ticket, Ok(vec![Event::new(1, 1.0, 1.0)]));

        let mut selection = SelectionCoordinator::new();
        let mut cache = DetailCache::unbounded();
        selection.on_item_activated(EventId::from(1), &ItemContext::Singleton, &mut cache);
        cache.complete(EventId::from(1), Ok(EventDetails::default()));
        assert!(!selection.reconcile(&store, &cache));

        let ticket = store.begin_refresh();
        store.finish_refresh(ticket, Ok(vec![Event::new(2, 1.0, 1.0)]));
        assert!(selection.reconcile(&store, &cache));
        assert!(selection.active().is_none());
    }

    #[test]
    fn test_reconcile_keeps_pending_selection() {
        let store = EventStore::new();
        let mut selection = SelectionCoordinator::new();
        let mut cache = DetailCache::unbounded();
        selection.on_item_activated(EventId::from(9), &ItemContext::Singleton, &mut cache);
        assert!(!selection.reconcile(&store, &cache));
        assert_eq!(selection.active(), Some(&EventId::from(9)));
    }

    #[test]
    fn test_context_of_item() {
        let config = Config::default();
        let events: Vec<Arc<Event>> = vec![
            Arc::new(Event::new(0, 5.0, 5.0)),
            Arc::new(Event::new(1, 5.001, 5.001)),
            Arc::new(Event::new(2, 6.0, 6.0)),
        ];
        let clustering = cluster_events(&events, 11, &config);
        assert!(matches!(ItemContext::of(&clustering.items[0]), ItemContext::Cluster(c) if c.count == 2));
        assert_eq!(ItemContext::of(&clustering.items[1]), ItemContext::Singleton);
    }
}
