//! Event Map Library - Clustering and Viewport Synchronization Engine
//!
//! This library turns a catalog of geolocated events into zoom-dependent map
//! items and keeps that catalog in sync with the viewport of an external map
//! surface. Rendering is not handled here: the engine consumes map signals and
//! publishes a [`MapView`] snapshot that a renderer draws.
//!
//! # Architecture
//!
//! - **[`EventStore`]**: Full-snapshot event collection with loading state
//! - **[`DetailCache`]**: Per-event detail memoization with fetch deduplication
//! - **[`cluster_events`]**: Pure proximity clustering for a zoom level
//! - **[`ViewportTracker`]**: Debounced bounds/zoom/drag state machine
//! - **[`SelectionCoordinator`]**: Active selection and cluster expansion
//! - **[`MapEngine`]**: Single control loop owning all of the above
//!
//! # Performance Characteristics
//!
//! - **Clustering**: O(N²) per pass, recomputed only when events or zoom change
//! - **Detail lookups**: O(1) for cached ids, one request per uncached id

pub mod api;
mod cluster;
mod config;
mod detail_cache;
mod engine;
mod event;
pub mod scheduler;
mod selection;
mod store;
mod viewport;

#[cfg(test)]
pub(crate) mod testing;

// Public API exports
pub use api::EventApi;
#[cfg(feature = "http")]
pub use api::HttpEventApi;
pub use cluster::{Cluster, Clustering, LatLng, RenderableItem, Singleton, cluster_events};
pub use config::{
    Config, DEFAULT_BOUNDS_DEBOUNCE, DEFAULT_CLUSTERING_DISABLED_ZOOM, DEFAULT_DRAG_SETTLE,
    DEFAULT_EXPANSION_ZOOM_STEP, DEFAULT_FALLBACK_RADIUS_DEG, DEFAULT_INITIAL_ZOOM,
    DEFAULT_RADIUS_STEPS, DEFAULT_REFRESH_THRESHOLD_DEG, DEFAULT_ZOOM_DEBOUNCE, Linkage,
    RadiusStep,
};
pub use detail_cache::{DetailCache, DetailLookup};
pub use engine::{MapEngine, MapHandle, MapView};
pub use event::{Event, EventDetails, EventId};
pub use selection::{
    Activation, ClusterExpansion, ExpansionPlan, ItemContext, SelectionCoordinator,
};
pub use store::{EventStore, RefreshTicket};
pub use viewport::{Bounds, TrackerAction, ViewportTracker};

/// Error types for the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Event {0} not found")]
    NotFound(EventId),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Cluster {cluster_id} has no members with valid coordinates")]
    EmptyClusterExpansion { cluster_id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Map engine has shut down")]
    EngineClosed,
}

impl EngineError {
    /// Whether this error came from the network layer.
    ///
    /// Transport failures are absorbed by the engine and never replace state.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::NotFound(_) => true,
            #[cfg(feature = "http")]
            Self::Http(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> Config = Config::default;
        let _: fn() -> DetailCache = DetailCache::unbounded;
        let _: fn(&Config) -> DetailCache = DetailCache::from_config;
        let _: fn() -> EventStore = EventStore::new;
    }

    #[test]
    fn test_transport_classification() {
        assert!(EngineError::Transport("refused".into()).is_transport());
        assert!(EngineError::NotFound(EventId::from(7)).is_transport());
        assert!(!EngineError::EngineClosed.is_transport());
        assert!(
            !EngineError::EmptyClusterExpansion {
                cluster_id: "cluster-0".into()
            }
            .is_transport()
        );
    }
}
