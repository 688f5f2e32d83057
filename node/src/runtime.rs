// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wiring of store, coordinator, background tasks and router.

use crate::config::Config;
use crate::coordinator::IngestCoordinator;
use crate::errors::NodeError;
use crate::retention::RetentionSweeper;
use crate::server::build_router;
use axum::Router;
use logpulse_kernel::RetentionWindow;
use logpulse_persistence::ChunkStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct NodeRuntime {
    config: Config,
    store: Arc<ChunkStore>,
    coordinator: Arc<IngestCoordinator>,
    shutdown_tx: watch::Sender<bool>,
    flush_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

impl NodeRuntime {
    /// Open storage and spawn the flush loop and retention sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: Config) -> Result<Self, NodeError> {
        config.validate()?;

        let store = Arc::new(ChunkStore::open(config.store_options())?);
        tracing::info!(
            root = ?store.root(),
            open_chunk = %store.open_chunk_id(),
            "Chunk store opened"
        );

        let coordinator = Arc::new(IngestCoordinator::new(store.clone(), &config.ingest));
        let sweeper = Arc::new(RetentionSweeper::new(
            store.clone(),
            RetentionWindow::from_days(config.storage.retention_days),
            config.storage.sweep_interval(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flush_task = coordinator.clone().spawn_flush_loop(shutdown_rx.clone());
        let sweep_task = sweeper.spawn(shutdown_rx);

        Ok(Self {
            config,
            store,
            coordinator,
            shutdown_tx,
            flush_task,
            sweep_task,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<IngestCoordinator> {
        &self.coordinator
    }

    pub fn router(&self) -> Router {
        build_router(self.coordinator.clone(), &self.config.auth, &self.config.rate_limit)
    }

    /// Signal shutdown, then wait for the final drain and the sweeper.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.flush_task.await {
            tracing::error!("Flush loop ended abnormally: {}", e);
        }
        if let Err(e) = self.sweep_task.await {
            tracing::error!("Retention sweeper ended abnormally: {}", e);
        }
    }
}
