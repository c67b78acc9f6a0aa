use crate::error::{AppError, Result};
use crate::replay;
use crate::settings::{Command, Settings};
use event_map_lib::{
    Clustering, Config, DetailCache, EventApi, EventId, EventStore, HttpEventApi, MapEngine,
    RenderableItem, cluster_events,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run the selected subcommand
pub async fn run(settings: Settings) -> Result<()> {
    let config = settings.engine_config().await?;
    let api = HttpEventApi::new(&settings.api_base_url)?;
    tracing::debug!("Using catalog backend at {}", api.base_url());

    match settings.command {
        Command::Snapshot { zoom, json } => {
            let zoom = zoom.unwrap_or(config.initial_zoom);
            snapshot(&api, &config, zoom, json).await
        }
        Command::Details { id } => details(&api, &config, id).await,
        Command::Replay { script, settle_ms } => {
            let settle = settle_ms
                .map(Duration::from_millis)
                .unwrap_or(config.bounds_debounce + Duration::from_secs(1));
            replay_file(Arc::new(api), config, &script, settle).await
        }
    }
}

async fn snapshot(api: &dyn EventApi, config: &Config, zoom: u8, json: bool) -> Result<()> {
    let mut store = EventStore::new();
    let events = store.fetch_all(api).await;
    if let Some(error) = store.last_error() {
        return Err(AppError::Fetch(error.to_string()));
    }

    let clustering = cluster_events(&events, zoom, config);
    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &clustering)?;
        writeln!(stdout)?;
    } else {
        print_clustering(&mut stdout, &clustering)?;
    }
    Ok(())
}

fn print_clustering(out: &mut impl Write, clustering: &Clustering) -> Result<()> {
    match clustering.radius_deg {
        Some(radius) => writeln!(
            out,
            "zoom {}: {} items ({} clusters), radius {}°",
            clustering.zoom,
            clustering.items.len(),
            clustering.cluster_count(),
            radius
        )?,
        None => writeln!(
            out,
            "zoom {}: {} items, clustering disabled",
            clustering.zoom,
            clustering.items.len()
        )?,
    }
    if clustering.excluded > 0 {
        writeln!(out, "{} events without usable coordinates left out", clustering.excluded)?;
    }

    for item in &clustering.items {
        let position = item.position();
        match item {
            RenderableItem::Singleton(singleton) => writeln!(
                out,
                "  event   {:<12} {:>10.5},{:>10.5}",
                singleton.event.id.to_string(),
                position.lat,
                position.lng
            )?,
            RenderableItem::Cluster(cluster) => writeln!(
                out,
                "  cluster {:<12} {:>10.5},{:>10.5}  {} events",
                cluster.id, position.lat, position.lng, cluster.count
            )?,
        }
    }
    Ok(())
}

async fn details(api: &dyn EventApi, config: &Config, id: EventId) -> Result<()> {
    let mut cache = DetailCache::from_config(config);
    let details = cache
        .get(api, &id)
        .await
        .ok_or(AppError::DetailsUnavailable(id))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, details.as_ref())?;
    writeln!(stdout)?;
    Ok(())
}

async fn replay_file(
    api: Arc<dyn EventApi>,
    config: Config,
    script: &Path,
    settle: Duration,
) -> Result<()> {
    let text = tokio::fs::read_to_string(script).await?;
    let steps = replay::parse_script(&text)?;
    tracing::info!("Replaying {} signals from {}", steps.len(), script.display());

    let (handle, task) = MapEngine::spawn(api, config.clone())?;
    let mut stdout = std::io::stdout();
    replay::run_script(&handle, &config, &steps, settle, &mut stdout).await?;

    handle.shutdown()?;
    if let Err(e) = task.await {
        tracing::warn!("Map engine task ended abnormally: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_map_lib::Event;

    #[test]
    fn test_print_clustering() {
        let events: Vec<Arc<Event>> = vec![
            Arc::new(Event::new(1, 12.9700, 77.5900)),
            Arc::new(Event::new(2, 12.9710, 77.5905)),
            Arc::new(Event::new(3, 13.2000, 77.8000)),
            Arc::new(Event::new(4, f64::NAN, 77.8000)),
        ];
        let clustering = cluster_events(&events, 12, &Config::default());

        let mut out = Vec::new();
        print_clustering(&mut out, &clustering).unwrap();
        let output = String::from_utf8(out).unwrap();

        assert!(output.starts_with("zoom 12: 2 items (1 clusters)"), "{output}");
        assert!(output.contains("1 events without usable coordinates"), "{output}");
        assert!(output.contains("cluster cluster-0"), "{output}");
        assert!(output.contains("2 events"), "{output}");
        assert!(output.contains("event   3"), "{output}");
    }

    #[test]
    fn test_print_without_clustering() {
        let events = vec![Arc::new(Event::new(1, 1.0, 1.0))];
        let clustering = cluster_events(&events, 16, &Config::default());
        let mut out = Vec::new();
        print_clustering(&mut out, &clustering).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("clustering disabled"));
    }
}
