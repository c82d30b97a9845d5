//! Zone Royale Round Server
//!
//! Runs the round coordinator behind a WebSocket server.
//! `zone-royale-server demo` plays one local round instead.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zone_royale::{
    VERSION, CoordinatorConfig, ServerConfig, MemoryStore, RoundCoordinator,
    core::clock::{ManualClock, SystemClock},
    network::{ChangeNotifier, GameServer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Zone Royale Server v{}", VERSION);

    let coordinator_config = CoordinatorConfig::from_env();
    info!(
        "Round duration: {:?}, active window: {:?}, zone radius: {} km",
        coordinator_config.round_duration,
        coordinator_config.active_window,
        coordinator_config.zone.radius_km
    );

    if std::env::args().nth(1).as_deref() == Some("demo") {
        return demo_round(coordinator_config).await;
    }

    let server_config = ServerConfig::from_env();

    let store = match &server_config.snapshot_path {
        Some(path) if path.exists() => {
            let store = MemoryStore::load_snapshot(path)
                .await
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            info!("Restored {} rounds from {}", store.round_count().await, path.display());
            Arc::new(store)
        }
        _ => Arc::new(MemoryStore::new()),
    };

    let coordinator = Arc::new(RoundCoordinator::new(
        coordinator_config,
        store.clone(),
        Arc::new(SystemClock),
        ChangeNotifier::default(),
    ));

    let persister = server_config.snapshot_path.clone().map(|path| {
        info!("Persisting round changes to {}", path.display());
        tokio::spawn(store.clone().persist_changes(coordinator.notifier().subscribe(), path))
    });

    let server = Arc::new(GameServer::new(server_config.clone(), coordinator));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_server.shutdown(),
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    server.run().await.context("server failed")?;
    if let Some(persister) = persister {
        persister.abort();
        let _ = persister.await;
    }

    if let Some(path) = &server_config.snapshot_path {
        store
            .save_snapshot(path)
            .await
            .with_context(|| format!("saving snapshot {}", path.display()))?;
        info!("Saved {} rounds to {}", store.round_count().await, path.display());
    }

    info!("Server stopped");
    Ok(())
}

/// Play one round against a manual clock and log the outcome.
async fn demo_round(config: CoordinatorConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Round ===");

    let clock = Arc::new(ManualClock::at_unix(chrono::Utc::now().timestamp()));
    let round_duration = config.round_duration;
    let coordinator = RoundCoordinator::new(
        config,
        Arc::new(MemoryStore::new()),
        clock.clone(),
        ChangeNotifier::default(),
    );

    let round = coordinator.start_round().await?.into_round();
    info!("Round #{} ({})", round.number(), round.id());

    let guesses = [
        ("paris", 48.8566, 2.3522),
        ("tokyo", 35.6762, 139.6503),
        ("nairobi", -1.2921, 36.8219),
        ("lima", -12.0464, -77.0428),
        ("sydney", -33.8688, 151.2093),
        ("reykjavik", 64.1466, -21.9426),
    ];
    for (player, lat, lng) in guesses {
        coordinator.submit(round.id(), player, lat, lng).await?;
    }

    clock.advance(chrono::Duration::from_std(round_duration)?);
    let result = coordinator.tick().await?;
    let round = result.round.context("round did not advance")?;

    let zone = round.zone();
    info!("Zone: {} r={} km", zone.center, zone.radius_km);
    for submission in round.submissions().iter() {
        info!(
            "{:>10} at {}: {:.0} km from center, {}",
            submission.player_id,
            submission.position,
            submission.position.distance_km(&zone.center),
            if submission.alive.as_option() == Some(true) { "alive" } else { "dead" }
        );
    }

    let summary = round.summary();
    info!("{} players, {} alive, {} dead", summary.players, summary.alive, summary.dead);
    info!("State Hash: {}", hex::encode(round.compute_hash()));
    Ok(())
}
