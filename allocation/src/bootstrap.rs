//! Infrastructure setup: database pool, migrations, components and the
//! background reclaimer.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env();
//! config.validate()?;
//! let service = RaffleService::from_config(config).await?;
//!
//! let catalog = service.orchestrator.catalog().await?;
//! service.shutdown().await;
//! ```

use crate::config::Config;
use crate::ledger::ReservationReclaimer;
use crate::orchestrator::AllocationOrchestrator;
use raffle_core::{SystemClock, TicketStore};
use raffle_postgres::PostgresTicketStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running raffle backed by `PostgreSQL`.
pub struct RaffleService {
    /// Application configuration
    pub config: Arc<Config>,

    /// Entry point for claims, purchases and queries
    pub orchestrator: AllocationOrchestrator,

    /// The durable store
    pub store: Arc<PostgresTicketStore>,

    shutdown_tx: broadcast::Sender<()>,
    reclaimer: Option<JoinHandle<()>>,
}

impl RaffleService {
    /// Connect, migrate, and start the reclaimer.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - Database connection fails
    /// - Database migrations fail
    pub async fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let policy = config.raffle.policy()?;

        info!("Connecting to raffle database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;

        let store = Arc::new(
            PostgresTicketStore::from_pool(pool).with_lock_timeout(config.postgres.lock_timeout()),
        );

        info!("Running raffle migrations...");
        store.migrate().await?;
        info!("Raffle migrations complete");

        let dyn_store: Arc<dyn TicketStore> = store.clone();
        let orchestrator = AllocationOrchestrator::new(dyn_store, Arc::new(SystemClock), policy);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let reclaimer = config.raffle.reclaim_interval().and_then(|interval| {
            ReservationReclaimer::new(orchestrator.ledger().clone(), interval, shutdown_rx).spawn()
        });

        info!(range = %policy.range, "Raffle ready");
        Ok(Self {
            config: Arc::new(config),
            orchestrator,
            store,
            shutdown_tx,
            reclaimer,
        })
    }

    /// Stop background tasks and close the pool.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.reclaimer {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => info!("Reclaimer stopped gracefully"),
                Ok(Err(e)) => warn!(error = %e, "Reclaimer task failed"),
                Err(_) => warn!("Reclaimer shutdown timed out"),
            }
        }

        self.store.pool().close().await;
        info!("Raffle shut down");
    }
}
