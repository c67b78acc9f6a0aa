//! Replay of recorded map signals against a live engine
//!
//! A script is JSON lines, one timed signal per line:
//!
//! ```text
//! {"at_ms": 0,    "signal": "bounds", "north": 13.15, "south": 12.75, "east": 77.85, "west": 77.35}
//! {"at_ms": 400,  "signal": "zoom", "level": 13}
//! {"at_ms": 900,  "signal": "drag_start"}
//! {"at_ms": 1400, "signal": "drag_end"}
//! {"at_ms": 2000, "signal": "activate", "id": 42}
//! {"at_ms": 2500, "signal": "activate", "cluster": "cluster-3"}
//! {"at_ms": 4000, "signal": "deactivate"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Timestamps are relative
//! to the start of the replay and must not decrease.

use crate::error::{AppError, Result};
use event_map_lib::{
    Activation, Bounds, Config, EventId, ItemContext, MapHandle, MapView, RenderableItem,
};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// One timed map signal
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub signal: ScriptSignal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ScriptSignal {
    Bounds(Bounds),
    Zoom {
        level: u8,
    },
    DragStart,
    DragEnd,
    /// Tap on an event marker (`id`) or a cluster marker (`cluster`)
    Activate {
        #[serde(default)]
        id: Option<EventId>,
        #[serde(default)]
        cluster: Option<String>,
    },
    Deactivate,
    Refresh,
}

/// Parse a replay script
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>> {
    let mut steps: Vec<ScriptStep> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let step: ScriptStep = serde_json::from_str(line).map_err(|e| AppError::Script {
            line: line_number,
            message: e.to_string(),
        })?;

        if let ScriptSignal::Activate { id, cluster } = &step.signal
            && id.is_some() == cluster.is_some()
        {
            return Err(AppError::Script {
                line: line_number,
                message: "activate needs exactly one of \"id\" or \"cluster\"".to_string(),
            });
        }
        if let Some(previous) = steps.last()
            && step.at_ms < previous.at_ms
        {
            return Err(AppError::Script {
                line: line_number,
                message: format!(
                    "at_ms {} is earlier than the previous step ({})",
                    step.at_ms, previous.at_ms
                ),
            });
        }
        steps.push(step);
    }

    Ok(steps)
}

/// Play `steps` against the engine behind `handle`, writing a line per view change to `out`
///
/// Keeps watching for `settle` after the last step so that pending debounces
/// and fetches show up.
pub async fn run_script(
    handle: &MapHandle,
    config: &Config,
    steps: &[ScriptStep],
    settle: Duration,
    out: &mut impl Write,
) -> Result<()> {
    let start = Instant::now();
    let mut views = handle.subscribe();
    // Last viewport reported to the engine, moved along by cluster expansions
    let mut bounds = None;
    writeln!(out, "{}", describe(start, &views.borrow_and_update()))?;

    for step in steps {
        let due = start + Duration::from_millis(step.at_ms);
        watch_until(&mut views, start, due, out).await?;
        writeln!(out, "[{:>6} ms] >> {}", elapsed_ms(start), describe_signal(&step.signal))?;
        apply(handle, config, &views, &mut bounds, &step.signal, out).await?;
    }

    watch_until(&mut views, start, Instant::now() + settle, out).await?;
    Ok(())
}

async fn apply(
    handle: &MapHandle,
    config: &Config,
    views: &watch::Receiver<MapView>,
    bounds: &mut Option<Bounds>,
    signal: &ScriptSignal,
    out: &mut impl Write,
) -> Result<()> {
    match signal {
        ScriptSignal::Bounds(reported) => {
            *bounds = Some(*reported);
            handle.report_bounds(*reported)?;
        }
        ScriptSignal::Zoom { level } => handle.report_zoom(*level)?,
        ScriptSignal::DragStart => handle.report_drag_start()?,
        ScriptSignal::DragEnd => handle.report_drag_end()?,
        ScriptSignal::Deactivate => handle.deactivate()?,
        ScriptSignal::Refresh => handle.refresh()?,
        ScriptSignal::Activate { id, cluster } => {
            let Some((id, context)) = resolve_target(&views.borrow(), id.as_ref(), cluster.as_deref())
            else {
                writeln!(out, "             no item matches this activation")?;
                return Ok(());
            };
            let activation = handle.activate_item(id, context).await?;
            let current_zoom = views.borrow().current_zoom;
            handle_activation(handle, config, activation, current_zoom, bounds, out)?;
        }
    }
    Ok(())
}

/// Find the item a tap refers to in the current view
fn resolve_target(
    view: &MapView,
    id: Option<&EventId>,
    cluster: Option<&str>,
) -> Option<(EventId, ItemContext)> {
    if let Some(key) = cluster {
        let item = view.items().iter().find(|item| item.key() == key)?;
        let RenderableItem::Cluster(cluster) = item else {
            return None;
        };
        let first = cluster.members.first()?;
        return Some((first.id.clone(), ItemContext::of(item)));
    }

    let id = id?;
    let item = view.items().iter().find(|item| item.contains(id));
    // Events hidden in a cluster can still be selected directly
    let context = match item {
        Some(item @ RenderableItem::Singleton(_)) => ItemContext::of(item),
        _ => ItemContext::Singleton,
    };
    Some((id.clone(), context))
}

/// Act as the map surface: recenter and zoom in the way an expansion asks for
fn handle_activation(
    handle: &MapHandle,
    config: &Config,
    activation: Activation,
    current_zoom: u8,
    bounds: &mut Option<Bounds>,
    out: &mut impl Write,
) -> Result<()> {
    match activation {
        Activation::ExpandCluster(expansion) => {
            match expansion.plan(current_zoom, config) {
                Ok(plan) => {
                    writeln!(
                        out,
                        "             expand {} ({} members): center {:.5},{:.5} -> zoom {}",
                        expansion.cluster_id,
                        plan.valid_members,
                        plan.center.lat,
                        plan.center.lng,
                        plan.target_zoom
                    )?;
                    if let Some(current) = bounds.as_mut() {
                        let zoom_delta = i32::from(plan.target_zoom) - i32::from(current_zoom);
                        *current = current.recentered(plan.center, zoom_delta);
                        writeln!(out, "             {}", describe_bounds(current))?;
                        handle.report_bounds(*current)?;
                    }
                    handle.report_zoom(plan.target_zoom)?;
                }
                Err(e) => {
                    tracing::warn!("Not expanding cluster: {}", e);
                    writeln!(out, "             {}", e)?;
                }
            }
        }
        Activation::Unchanged => writeln!(out, "             already selected")?,
        Activation::Selected { id, .. } => writeln!(out, "             selected {}", id)?,
    }
    Ok(())
}

async fn watch_until(
    views: &mut watch::Receiver<MapView>,
    start: Instant,
    deadline: Instant,
    out: &mut impl Write,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            changed = views.changed() => {
                if changed.is_err() {
                    // Engine gone, nothing more will change
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                let line = describe(start, &views.borrow_and_update());
                writeln!(out, "{}", line)?;
            }
        }
    }
    Ok(())
}

fn elapsed_ms(start: Instant) -> u128 {
    start.elapsed().as_millis()
}

/// One-line summary of a view
pub fn describe(start: Instant, view: &MapView) -> String {
    let mut line = format!(
        "[{:>6} ms] zoom {} | {} items ({} clusters) from {} events",
        elapsed_ms(start),
        view.current_zoom,
        view.items().len(),
        view.clustering.cluster_count(),
        view.event_count
    );
    if view.excluded_events > 0 {
        line.push_str(&format!(", {} excluded", view.excluded_events));
    }
    if view.is_loading {
        line.push_str(" | loading");
    }
    if view.is_map_moving {
        line.push_str(" | moving");
    }
    if let Some(id) = &view.active_selection {
        match (&view.active_selection_details, view.is_loading_details) {
            (Some(details), _) => line.push_str(&format!(" | selected {} \"{}\"", id, details.name)),
            (None, true) => line.push_str(&format!(" | selected {} (details loading)", id)),
            (None, false) => line.push_str(&format!(" | selected {} (no details)", id)),
        }
    }
    line
}

fn describe_bounds(b: &Bounds) -> String {
    format!(
        "bounds N {:.4} S {:.4} E {:.4} W {:.4}",
        b.north, b.south, b.east, b.west
    )
}

fn describe_signal(signal: &ScriptSignal) -> String {
    match signal {
        ScriptSignal::Bounds(bounds) => describe_bounds(bounds),
        ScriptSignal::Zoom { level } => format!("zoom {}", level),
        ScriptSignal::DragStart => "drag start".to_string(),
        ScriptSignal::DragEnd => "drag end".to_string(),
        ScriptSignal::Activate { id: Some(id), .. } => format!("activate {}", id),
        ScriptSignal::Activate { cluster, .. } => {
            format!("activate {}", cluster.as_deref().unwrap_or("?"))
        }
        ScriptSignal::Deactivate => "deactivate".to_string(),
        ScriptSignal::Refresh => "refresh".to_string(),
    }
}
