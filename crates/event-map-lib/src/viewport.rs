//! Viewport tracking: decides when map movement warrants a catalog refresh
//!
//! The tracker is a clock-driven state machine. Map signals are fed in with the
//! time they arrived, and [`ViewportTracker::poll`] returns whatever became due.
//! Three independent debouncers are kept:
//!
//! - bounds reports settle for `bounds_debounce` before the drift check runs,
//! - zoom reports settle for `zoom_debounce` before the zoom is applied,
//! - a drag end settles for `drag_settle` before the moving flag clears.
//!
//! Applying a zoom or settling a drag re-submits the current bounds, since both
//! shift the visible viewport.

use crate::scheduler::{Debounce, earliest};
use crate::{Config, LatLng};
use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Map viewport in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// Whether every edge is a finite number
    pub fn is_valid(&self) -> bool {
        [self.north, self.south, self.east, self.west]
            .iter()
            .all(|edge| edge.is_finite())
    }

    /// Whether the north or east edge moved more than `threshold_deg` from `baseline`
    #[inline]
    pub fn drifted_from(&self, baseline: &Bounds, threshold_deg: f64) -> bool {
        (self.north - baseline.north).abs() > threshold_deg
            || (self.east - baseline.east).abs() > threshold_deg
    }

    /// Center of the viewport
    pub fn center(&self) -> LatLng {
        let center = self.to_rect().center();
        LatLng::new(center.y, center.x)
    }

    /// Viewport of the same shape around `center` after zooming by `zoom_delta` levels
    ///
    /// Each level in halves the span, each level out doubles it.
    pub fn recentered(&self, center: LatLng, zoom_delta: i32) -> Bounds {
        let scale = 0.5_f64.powi(zoom_delta);
        let half_height = (self.north - self.south) * scale / 2.0;
        let half_width = (self.east - self.west) * scale / 2.0;
        Self::new(
            center.lat + half_height,
            center.lat - half_height,
            center.lng + half_width,
            center.lng - half_width,
        )
    }

    /// The viewport as a `geo` rectangle (x = longitude, y = latitude)
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }

    /// Build bounds from a `geo` rectangle (x = longitude, y = latitude)
    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.max().y, rect.min().y, rect.max().x, rect.min().x)
    }
}

/// Something the tracker decided when it was polled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerAction {
    /// The viewport settled far enough from the last refresh: refetch the catalog
    Refresh(Bounds),
    /// A debounced zoom level took effect
    ZoomApplied(u8),
    /// The drag settle delay elapsed and the map stopped moving
    DragSettled,
}

/// Debounced viewport state machine
#[derive(Debug, Clone)]
pub struct ViewportTracker {
    refresh_threshold_deg: f64,
    /// Last reported bounds
    current: Option<Bounds>,
    /// Bounds that triggered the last refresh (the first report seeds it)
    last_refresh: Option<Bounds>,
    zoom: u8,
    map_moving: bool,
    bounds_debounce: Debounce<Bounds>,
    zoom_debounce: Debounce<u8>,
    drag_settle: Debounce<()>,
}

impl ViewportTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            refresh_threshold_deg: config.refresh_threshold_deg,
            current: None,
            last_refresh: None,
            zoom: config.initial_zoom,
            map_moving: false,
            bounds_debounce: Debounce::new(config.bounds_debounce),
            zoom_debounce: Debounce::new(config.zoom_debounce),
            drag_settle: Debounce::new(config.drag_settle),
        }
    }

    /// The map surface reported new viewport bounds
    pub fn bounds_changed(&mut self, now: Instant, bounds: Bounds) {
        if !bounds.is_valid() {
            tracing::warn!("Ignoring bounds report with non-finite edges: {:?}", bounds);
            return;
        }
        self.current = Some(bounds);

        if self.last_refresh.is_none() {
            tracing::debug!("Initial bounds set - skipping refresh");
            self.last_refresh = Some(bounds);
            return;
        }

        if self.bounds_debounce.schedule(now, bounds) {
            tracing::trace!("Bounds report superseded a pending refresh check");
        }
    }

    /// The map surface reported a new zoom level
    pub fn zoom_changed(&mut self, now: Instant, zoom: u8) {
        self.zoom_debounce.schedule(now, zoom);
    }

    /// The user started dragging the map
    pub fn drag_started(&mut self) {
        self.map_moving = true;
        self.drag_settle.cancel();
    }

    /// The user released the map
    pub fn drag_ended(&mut self, now: Instant) {
        self.drag_settle.schedule(now, ());
    }

    /// Run every task that is due at `now`
    pub fn poll(&mut self, now: Instant) -> Vec<TrackerAction> {
        let mut actions = Vec::new();

        if let Some(zoom) = self.zoom_debounce.poll(now) {
            if zoom != self.zoom {
                tracing::debug!("Zoom changed to {}", zoom);
            }
            self.zoom = zoom;
            actions.push(TrackerAction::ZoomApplied(zoom));
            self.reevaluate_bounds(now);
        }

        if self.drag_settle.poll(now).is_some() {
            self.map_moving = false;
            actions.push(TrackerAction::DragSettled);
            self.reevaluate_bounds(now);
        }

        if let Some(bounds) = self.bounds_debounce.poll(now)
            && self.settle_bounds(bounds)
        {
            actions.push(TrackerAction::Refresh(bounds));
        }

        actions
    }

    /// Earliest time at which [`ViewportTracker::poll`] has something to do
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.bounds_debounce.deadline(),
            self.zoom_debounce.deadline(),
            self.drag_settle.deadline(),
        ])
    }

    #[inline]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[inline]
    pub fn is_map_moving(&self) -> bool {
        self.map_moving
    }

    #[inline]
    pub fn current_bounds(&self) -> Option<Bounds> {
        self.current
    }

    #[inline]
    pub fn last_refresh_bounds(&self) -> Option<Bounds> {
        self.last_refresh
    }

    fn reevaluate_bounds(&mut self, now: Instant) {
        if let Some(bounds) = self.current {
            self.bounds_changed(now, bounds);
        }
    }

    /// Drift check for settled bounds; moves the baseline when it passes
    ///
    /// Only scheduled once [`ViewportTracker::bounds_changed`] has seeded the baseline.
    fn settle_bounds(&mut self, bounds: Bounds) -> bool {
        let baseline = self.last_refresh.unwrap_or(bounds);
        if bounds.drifted_from(&baseline, self.refresh_threshold_deg) {
            tracing::info!(
                "Significant movement (Δnorth {:.4}°, Δeast {:.4}°) - refreshing events",
                bounds.north - baseline.north,
                bounds.east - baseline.east
            );
            self.last_refresh = Some(bounds);
            true
        } else {
            tracing::debug!("Viewport settled within refresh threshold - no refresh");
            false
        }
    }
}
