//! Periodic reconciliation sweep worker.
//!
//! Hosts that run their own scheduler can call `Reconciler::sweep_once`
//! directly; this worker is the in-process alternative, polling on a fixed
//! interval until a shutdown signal arrives. A failed cycle is logged and
//! the loop keeps going; one bad cycle must not stop reconciliation.

use crate::reconcile::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the worker wakes up to reconcile outstanding payments.
    pub poll_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
        }
    }
}

impl SweepConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("XPAY_SWEEP_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg
    }
}

pub struct SweepWorker {
    reconciler: Arc<Reconciler>,
    config: SweepConfig,
}

impl SweepWorker {
    pub fn new(reconciler: Arc<Reconciler>, config: SweepConfig) -> Self {
        Self { reconciler, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "reconciliation sweep worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation sweep worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let report = self.reconciler.sweep_once().await;
                    if report.errors > 0 {
                        warn!(errors = report.errors, "sweep cycle finished with errors");
                    }
                }
            }
        }

        info!("reconciliation sweep worker stopped");
    }
}
