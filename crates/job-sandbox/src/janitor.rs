//! Background sweep of expired job workspaces.

use crate::store::JobStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

/// Periodically removes jobs whose last access is older than the store's TTL.
#[derive(Clone, Debug)]
pub struct Janitor {
    store: JobStore,
    interval: Duration,
}

impl Janitor {
    /// Sweep every `interval`. A zero interval falls back to the policy's recommendation.
    pub fn new(store: JobStore, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            store.expiry_policy().recommended_sweep_interval()
        } else {
            interval
        };
        Self { store, interval }
    }

    /// Sweep at the cadence recommended by the store's expiry policy.
    pub fn with_recommended_interval(store: JobStore) -> Self {
        let interval = store.expiry_policy().recommended_sweep_interval();
        Self { store, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `cancellation_token` fires. Sweep errors never end the loop.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        if !self.store.expiry_policy().enabled() {
            info!("Job expiry disabled, janitor not started");
            return;
        }

        info!(
            "Starting job janitor (ttl: {:?}, interval: {:?})",
            self.store.expiry_policy().ttl(),
            self.interval
        );
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = cancellation_token.cancelled() => {
                    info!("Job janitor received cancellation signal, shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn [`Janitor::run`] onto the runtime.
    pub fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancellation_token).await })
    }

    /// One sweep pass; returns how many jobs were removed.
    pub async fn sweep_once(&self) -> usize {
        match self.store.sweep().await {
            Ok(0) => {
                trace!("Janitor sweep removed nothing");
                0
            }
            Ok(removed) => {
                info!("Janitor removed {} expired job(s)", removed);
                removed
            }
            Err(e) => {
                warn!("Janitor sweep failed: {}", e);
                0
            }
        }
    }
}
