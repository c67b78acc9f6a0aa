//! Zoom-dependent proximity clustering
//!
//! A clustering pass is a pure function of the event collection, the zoom
//! level and the configuration. Items have no identity across passes: cluster
//! ids are derived from the anchor's position in the collection and change
//! whenever the collection does.

use crate::{Config, Event, EventId, Linkage};
use serde::Serialize;
use std::sync::Arc;

/// A geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[inline]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    #[inline]
    fn of(event: &Event) -> Self {
        Self::new(event.lat, event.lng)
    }
}

/// A renderable item wrapping exactly one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Singleton {
    pub event: Arc<Event>,
    pub position: LatLng,
}

/// A synthetic grouping of two or more nearby events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// `cluster-{i}` where `i` is the anchor's index in the collection
    pub id: String,
    /// Unweighted mean of member coordinates
    pub centroid: LatLng,
    pub count: usize,
    /// Members in their original relative order, anchor first
    pub members: Vec<Arc<Event>>,
}

/// What the map surface draws: a single event or a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderableItem {
    Singleton(Singleton),
    Cluster(Cluster),
}

impl RenderableItem {
    /// Where the item is drawn
    pub fn position(&self) -> LatLng {
        match self {
            Self::Singleton(singleton) => singleton.position,
            Self::Cluster(cluster) => cluster.centroid,
        }
    }

    /// Number of events represented by this item
    pub fn event_count(&self) -> usize {
        match self {
            Self::Singleton(_) => 1,
            Self::Cluster(cluster) => cluster.count,
        }
    }

    #[inline]
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }

    /// Key a renderer can use for this pass (event id or cluster id)
    pub fn key(&self) -> String {
        match self {
            Self::Singleton(singleton) => singleton.event.id.to_string(),
            Self::Cluster(cluster) => cluster.id.clone(),
        }
    }

    /// Whether the item is, or contains, the given event
    pub fn contains(&self, id: &EventId) -> bool {
        match self {
            Self::Singleton(singleton) => &singleton.event.id == id,
            Self::Cluster(cluster) => cluster.members.iter().any(|event| &event.id == id),
        }
    }
}

/// Result of one clustering pass
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Clustering {
    pub items: Vec<RenderableItem>,
    /// Zoom level the pass ran at
    pub zoom: u8,
    /// Radius used, `None` when clustering was disabled
    pub radius_deg: Option<f64>,
    /// Events left out because their coordinates were not finite
    pub excluded: usize,
}

impl Clustering {
    /// Number of clusters in the pass
    pub fn cluster_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_cluster()).count()
    }

    /// Number of events represented across all items
    pub fn event_count(&self) -> usize {
        self.items.iter().map(RenderableItem::event_count).sum()
    }
}

/// Group events into renderable items for a zoom level
///
/// Events whose coordinates are not finite are excluded and counted. At or above
/// the clustering-disabled zoom every event becomes a [`Singleton`]. Below it,
/// events are scanned in order and each unprocessed event anchors a group that
/// absorbs every later unprocessed event within the zoom's radius on both axes
/// (see [`Linkage`] for how membership is tested).
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn cluster_events(events: &[Arc<Event>], zoom: u8, config: &Config) -> Clustering {
    let valid: Vec<(usize, &Arc<Event>)> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| event.has_valid_coordinates())
        .collect();

    let excluded = events.len() - valid.len();
    if excluded > 0 {
        tracing::warn!(
            "Excluding {} of {} events with unusable coordinates from clustering",
            excluded,
            events.len()
        );
    }

    let Some(radius) = config.cluster_radius(zoom) else {
        tracing::debug!(
            "Clustering disabled at zoom {} - showing {} individual markers",
            zoom,
            valid.len()
        );
        let items = valid
            .iter()
            .map(|(_, event)| singleton(event))
            .collect();
        return Clustering {
            items,
            zoom,
            radius_deg: None,
            excluded,
        };
    };

    let positions: Vec<LatLng> = valid.iter().map(|(_, event)| LatLng::of(event)).collect();
    let groups = match config.linkage {
        Linkage::Anchor => anchor_groups(&positions, radius),
        Linkage::Transitive => transitive_groups(&positions, radius),
    };

    let items: Vec<RenderableItem> = groups
        .into_iter()
        .map(|group| build_item(&valid, &positions, &group))
        .collect();

    let clustering = Clustering {
        items,
        zoom,
        radius_deg: Some(radius),
        excluded,
    };
    tracing::debug!(
        "Clustered {} events into {} items ({} clusters) at zoom {} (radius {}°)",
        valid.len(),
        clustering.items.len(),
        clustering.cluster_count(),
        zoom,
        radius
    );
    clustering
}

#[inline]
fn is_close(a: LatLng, b: LatLng, radius: f64) -> bool {
    (a.lat - b.lat).abs() < radius && (a.lng - b.lng).abs() < radius
}

/// Single-link grouping where every candidate is tested against the anchor only
fn anchor_groups(positions: &[LatLng], radius: f64) -> Vec<Vec<usize>> {
    let mut processed = vec![false; positions.len()];
    let mut groups = Vec::new();

    for anchor in 0..positions.len() {
        if processed[anchor] {
            continue;
        }
        processed[anchor] = true;
        let mut group = vec![anchor];

        for other in anchor + 1..positions.len() {
            if !processed[other] && is_close(positions[anchor], positions[other], radius) {
                processed[other] = true;
                group.push(other);
            }
        }
        groups.push(group);
    }
    groups
}

/// Grouping through chains of pairwise-close events, seeded in scan order
fn transitive_groups(positions: &[LatLng], radius: f64) -> Vec<Vec<usize>> {
    let mut processed = vec![false; positions.len()];
    let mut groups = Vec::new();

    for anchor in 0..positions.len() {
        if processed[anchor] {
            continue;
        }
        processed[anchor] = true;
        let mut group = vec![anchor];
        let mut frontier = vec![anchor];

        while let Some(member) = frontier.pop() {
            // Everything before the anchor already belongs to an earlier group
            for other in anchor + 1..positions.len() {
                if !processed[other] && is_close(positions[member], positions[other], radius) {
                    processed[other] = true;
                    group.push(other);
                    frontier.push(other);
                }
            }
        }
        group.sort_unstable();
        groups.push(group);
    }
    groups
}

fn singleton(event: &Arc<Event>) -> RenderableItem {
    RenderableItem::Singleton(Singleton {
        event: Arc::clone(event),
        position: LatLng::of(event),
    })
}

fn build_item(valid: &[(usize, &Arc<Event>)], positions: &[LatLng], group: &[usize]) -> RenderableItem {
    let (anchor_index, anchor) = valid[group[0]];
    if group.len() == 1 {
        return singleton(anchor);
    }

    let count = group.len();
    let (lat_sum, lng_sum) = group.iter().fold((0.0, 0.0), |(lat, lng), &member| {
        (lat + positions[member].lat, lng + positions[member].lng)
    });

    RenderableItem::Cluster(Cluster {
        id: format!("cluster-{anchor_index}"),
        centroid: LatLng::new(lat_sum / count as f64, lng_sum / count as f64),
        count,
        members: group.iter().map(|&member| Arc::clone(valid[member].1)).collect(),
    })
}
