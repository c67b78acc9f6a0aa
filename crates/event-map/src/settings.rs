use crate::error::AppError;
use clap::{Parser, Subcommand, ValueEnum};
use event_map_lib::api::DEFAULT_BASE_URL;
use event_map_lib::{Config, EventId, Linkage};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Event Map - Cluster a catalog of geolocated events and replay map interaction against it
pub struct Settings {
    /// Base URL of the catalog backend
    #[clap(long, global = true, default_value = DEFAULT_BASE_URL)]
    pub api_base_url: String,

    /// JSON file with engine configuration (durations in milliseconds)
    #[clap(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[clap(flatten)]
    pub tuning: Tuning,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the catalog once and print the clustered items for a zoom level
    Snapshot {
        /// Zoom level to cluster at (defaults to the configured initial zoom)
        #[clap(short, long)]
        zoom: Option<u8>,

        /// Print the clustering as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Fetch and print the details of one event
    Details {
        /// Event id (integers are sent as numbers, anything else as text)
        #[clap(value_parser = parse_event_id)]
        id: EventId,
    },
    /// Play a JSON-lines script of timed map signals and print every view change
    Replay {
        /// Script file, one `{"at_ms": .., "signal": ..}` object per line
        #[clap(value_name = "FILE")]
        script: PathBuf,

        /// How long to keep watching after the last signal (defaults to the bounds debounce plus one second)
        #[clap(long)]
        settle_ms: Option<u64>,
    },
}

/// Overrides applied on top of the defaults and the configuration file
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Tuning {
    /// Quiet period before a bounds report is checked for drift
    #[clap(long, global = true, value_name = "MS")]
    pub bounds_debounce_ms: Option<u64>,

    /// Quiet period before a zoom report takes effect
    #[clap(long, global = true, value_name = "MS")]
    pub zoom_debounce_ms: Option<u64>,

    /// Delay between drag end and the map counting as settled
    #[clap(long, global = true, value_name = "MS")]
    pub drag_settle_ms: Option<u64>,

    /// North/east edge movement in degrees that triggers a refresh
    #[clap(long, global = true, value_name = "DEG")]
    pub refresh_threshold: Option<f64>,

    /// Zoom level at and above which clustering is disabled
    #[clap(long, global = true)]
    pub clustering_disabled_zoom: Option<u8>,

    /// Clustering radius below the lowest radius step
    #[clap(long, global = true, value_name = "DEG")]
    pub fallback_radius: Option<f64>,

    /// Group membership rule
    #[clap(long, global = true, value_enum)]
    pub linkage: Option<LinkageArg>,

    /// Zoom levels added when a cluster is expanded
    #[clap(long, global = true)]
    pub expansion_zoom_step: Option<u8>,

    /// Zoom level assumed before the first zoom report
    #[clap(long, global = true)]
    pub initial_zoom: Option<u8>,

    /// Maximum number of cached detail payloads (unbounded when omitted)
    #[clap(long, global = true)]
    pub detail_cache_capacity: Option<NonZeroUsize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkageArg {
    Anchor,
    Transitive,
}

impl From<LinkageArg> for Linkage {
    fn from(arg: LinkageArg) -> Self {
        match arg {
            LinkageArg::Anchor => Linkage::Anchor,
            LinkageArg::Transitive => Linkage::Transitive,
        }
    }
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Engine configuration: defaults, then the configuration file, then flags
    pub async fn engine_config(&self) -> Result<Config, AppError> {
        let config = match &self.config {
            Some(path) => load_config(path).await?,
            None => Config::default(),
        };
        let config = self.tuning.apply(config);
        config.validate()?;
        Ok(config)
    }
}

impl Tuning {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(ms) = self.bounds_debounce_ms {
            config.bounds_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.zoom_debounce_ms {
            config.zoom_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.drag_settle_ms {
            config.drag_settle = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.refresh_threshold {
            config.refresh_threshold_deg = threshold;
        }
        if let Some(zoom) = self.clustering_disabled_zoom {
            config.clustering_disabled_zoom = zoom;
        }
        if let Some(radius) = self.fallback_radius {
            config.fallback_radius_deg = radius;
        }
        if let Some(linkage) = self.linkage {
            config.linkage = linkage.into();
        }
        if let Some(step) = self.expansion_zoom_step {
            config.expansion_zoom_step = step;
        }
        if let Some(zoom) = self.initial_zoom {
            config.initial_zoom = zoom;
        }
        if let Some(capacity) = self.detail_cache_capacity {
            config.detail_cache_capacity = Some(capacity);
        }
        config
    }
}

async fn load_config(path: &Path) -> Result<Config, AppError> {
    let text = tokio::fs::read_to_string(path).await?;
    let config = serde_json::from_str(&text)?;
    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Integers become numeric ids, anything else a text id
pub fn parse_event_id(raw: &str) -> Result<EventId, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("event id must not be empty".to_string());
    }
    Ok(raw
        .parse::<i64>()
        .map(EventId::Int)
        .unwrap_or_else(|_| EventId::from(raw)))
}
