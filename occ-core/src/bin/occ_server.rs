//! `occ-server`: wires the engine's components together and runs them
//! under tokio — CLI parsing, persistence backend selection, background
//! workers, and the HTTP surface, the way the teacher's service binaries
//! compose their `main` (`attachment_service.rs`'s `Cli` + state load +
//! `ShutdownSignals` shape, adapted to tokio tasks + a `CancellationToken`).

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use occ_core::admission::Engine;
use occ_core::config::{Cli, EngineConfig};
use occ_core::directory::StaticDirectory;
use occ_core::facade::Facade;
use occ_core::forecaster::Forecaster;
use occ_core::http::{self, AppState, HealthState};
use occ_core::notifications::NotificationHub;
use occ_core::persistence::{InMemoryStore, PersistenceStore, SledStore};
use occ_core::{status_scheduler, sweeper};
use occ_utils::SystemClock;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    occ_utils::init_tracing();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing the process-wide metrics recorder")?;

    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir;
    }

    let store: Arc<dyn PersistenceStore> = match &config.data_dir {
        Some(path) => {
            tracing::info!(path = %path.display(), "opening sled-backed persistence store");
            Arc::new(SledStore::open(path).context("opening sled store")?)
        }
        None => {
            tracing::info!("no --data-dir given; using an in-memory persistence store");
            Arc::new(InMemoryStore::new())
        }
    };

    let directory = Arc::new(StaticDirectory::new());
    let notifications = Arc::new(NotificationHub::new());
    let forecaster = Arc::new(Forecaster::new(config.forecaster, config.max_capacity as i64));
    let clock = Arc::new(SystemClock);
    let health = Arc::new(HealthState::new(config.persistence_unavailable_threshold));

    let engine = Arc::new(
        Engine::new(
            store,
            directory.clone(),
            notifications.clone(),
            forecaster,
            clock,
            health.clone(),
            config.ranker_weights,
            config.ranker_constants,
            chrono::Duration::from_std(config.session_length).context("session_length out of range")?,
            config.max_capacity,
        )
        .await
        .context("starting engine")?,
    );

    let shutdown = CancellationToken::new();

    let sweeper_handle = tokio::spawn(sweeper::run(
        engine.clone(),
        sweeper::SweeperConfig { interval: config.sweep_interval },
        shutdown.clone(),
    ));
    let scheduler_handle = tokio::spawn(status_scheduler::run(
        engine.clone(),
        status_scheduler::StatusSchedulerConfig { interval: config.status_scheduler_interval },
        shutdown.clone(),
    ));

    let facade = Arc::new(Facade::new(engine));
    let app_state = AppState { facade, directory, notifications, health, prometheus_handle };

    let server_shutdown = shutdown.clone();
    tokio::select! {
        result = http::serve(config.listen, app_state) => {
            result.context("http server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    server_shutdown.cancel();
    let _ = tokio::join!(sweeper_handle, scheduler_handle);
    Ok(())
}
