//! Engine configuration and the named tuning constants

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Quiet period after the last bounds report before a refresh is considered.
pub const DEFAULT_BOUNDS_DEBOUNCE: Duration = Duration::from_millis(3000);

/// Quiet period after the last zoom report before the zoom is applied.
pub const DEFAULT_ZOOM_DEBOUNCE: Duration = Duration::from_millis(300);

/// Delay between drag end and clearing the "map is moving" flag.
pub const DEFAULT_DRAG_SETTLE: Duration = Duration::from_millis(500);

/// Minimum movement of the north or east edge (degrees) that justifies a refresh.
pub const DEFAULT_REFRESH_THRESHOLD_DEG: f64 = 0.02;

/// Zoom level at and above which every event is rendered on its own.
pub const DEFAULT_CLUSTERING_DISABLED_ZOOM: u8 = 14;

/// Zoom-indexed clustering radii, highest zoom first.
pub const DEFAULT_RADIUS_STEPS: [RadiusStep; 3] = [
    RadiusStep {
        min_zoom: 13,
        radius_deg: 0.003,
    },
    RadiusStep {
        min_zoom: 12,
        radius_deg: 0.006,
    },
    RadiusStep {
        min_zoom: 11,
        radius_deg: 0.010,
    },
];

/// Radius used below the lowest step.
pub const DEFAULT_FALLBACK_RADIUS_DEG: f64 = 0.015;

/// Zoom levels added on top of the current zoom when a cluster is expanded.
pub const DEFAULT_EXPANSION_ZOOM_STEP: u8 = 3;

/// Zoom assumed until the map surface reports one.
pub const DEFAULT_INITIAL_ZOOM: u8 = 12;

/// One step of the radius step function: applies when `zoom >= min_zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusStep {
    pub min_zoom: u8,
    pub radius_deg: f64,
}

/// How group membership is decided during a clustering pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    /// Every member is compared only against the group's first-seen anchor.
    #[default]
    Anchor,
    /// Members join through any chain of pairwise-close events.
    Transitive,
}

/// Configuration for the map engine
///
/// All durations are (de)serialized as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debounce window for bounds reports
    #[serde(with = "duration_ms")]
    pub bounds_debounce: Duration,
    /// Debounce window for zoom reports
    #[serde(with = "duration_ms")]
    pub zoom_debounce: Duration,
    /// Settle delay after a drag ends
    #[serde(with = "duration_ms")]
    pub drag_settle: Duration,
    /// Viewport drift (degrees) on the north or east edge required to refresh
    pub refresh_threshold_deg: f64,
    /// Clustering is disabled at and above this zoom
    pub clustering_disabled_zoom: u8,
    /// Radius step function, highest `min_zoom` first
    pub radius_steps: Vec<RadiusStep>,
    /// Radius below the lowest step
    pub fallback_radius_deg: f64,
    /// Group membership rule
    pub linkage: Linkage,
    /// Zoom levels added when expanding a cluster
    pub expansion_zoom_step: u8,
    /// Zoom used before the first zoom report
    pub initial_zoom: u8,
    /// Bound on cached detail payloads. `None` keeps every entry for the session.
    pub detail_cache_capacity: Option<NonZeroUsize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bounds_debounce: DEFAULT_BOUNDS_DEBOUNCE,
            zoom_debounce: DEFAULT_ZOOM_DEBOUNCE,
            drag_settle: DEFAULT_DRAG_SETTLE,
            refresh_threshold_deg: DEFAULT_REFRESH_THRESHOLD_DEG,
            clustering_disabled_zoom: DEFAULT_CLUSTERING_DISABLED_ZOOM,
            radius_steps: DEFAULT_RADIUS_STEPS.to_vec(),
            fallback_radius_deg: DEFAULT_FALLBACK_RADIUS_DEG,
            linkage: Linkage::default(),
            expansion_zoom_step: DEFAULT_EXPANSION_ZOOM_STEP,
            initial_zoom: DEFAULT_INITIAL_ZOOM,
            detail_cache_capacity: None,
        }
    }
}

impl Config {
    /// Clustering radius in degrees for a zoom level.
    ///
    /// Returns `None` when clustering is disabled at this zoom.
    pub fn cluster_radius(&self, zoom: u8) -> Option<f64> {
        if zoom >= self.clustering_disabled_zoom {
            return None;
        }
        let radius = self
            .radius_steps
            .iter()
            .find(|step| zoom >= step.min_zoom)
            .map_or(self.fallback_radius_deg, |step| step.radius_deg);
        Some(radius)
    }

    /// Zoom a cluster expansion should land on, starting from `current_zoom`.
    ///
    /// Always reaches the clustering-disabled threshold.
    pub fn expansion_zoom(&self, current_zoom: u8) -> u8 {
        self.clustering_disabled_zoom
            .max(current_zoom.saturating_add(self.expansion_zoom_step))
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_threshold_deg.is_finite() && self.refresh_threshold_deg >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "refresh threshold must be a non-negative number, got {}",
                self.refresh_threshold_deg
            )));
        }
        if !(self.fallback_radius_deg.is_finite() && self.fallback_radius_deg > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "fallback radius must be positive, got {}",
                self.fallback_radius_deg
            )));
        }
        for step in &self.radius_steps {
            if !(step.radius_deg.is_finite() && step.radius_deg > 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "radius for zoom {} must be positive, got {}",
                    step.min_zoom, step.radius_deg
                )));
            }
        }
        if self
            .radius_steps
            .windows(2)
            .any(|pair| pair[0].min_zoom <= pair[1].min_zoom)
        {
            return Err(EngineError::InvalidConfig(
                "radius steps must be ordered by strictly decreasing min_zoom".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
