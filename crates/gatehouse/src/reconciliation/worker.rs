//! Background reconciliation: one pass at startup, then on a fixed interval and whenever a
//! [`SyncHandle`] requests one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::engine::ReconciliationEngine;
use crate::identity::IdentityStore;
use crate::registration::ApprovalHook;

/// Requests on-demand passes from the background worker.
///
/// Requests made while one is already queued are coalesced into it.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<()>,
}

impl SyncHandle {
    /// Returns false once the worker has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl ApprovalHook for SyncHandle {
    fn approved(&self, username: &str) {
        if !self.trigger() {
            debug!(username, "reconciliation worker stopped; approval not propagated");
        }
    }
}

/// Spawn the worker. A zero `every` disables the schedule and leaves only triggered passes.
///
/// The worker exits once every [`SyncHandle`] has been dropped.
pub fn spawn_worker<S>(
    engine: Arc<ReconciliationEngine<S>>,
    every: Duration,
) -> (SyncHandle, JoinHandle<()>)
where
    S: IdentityStore + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(run(engine, every, rx));
    (SyncHandle { tx }, task)
}

async fn run<S>(engine: Arc<ReconciliationEngine<S>>, every: Duration, mut rx: mpsc::Receiver<()>)
where
    S: IdentityStore + 'static,
{
    info!(interval_secs = every.as_secs(), "reconciliation worker started");
    // Failures are logged by the engine and retried on the next pass.
    let _ = engine.sync().await;

    let mut schedule = (!every.is_zero()).then(|| {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    loop {
        tokio::select! {
            _ = async {
                match schedule.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                debug!("scheduled reconciliation pass");
            }
            request = rx.recv() => {
                if request.is_none() {
                    break;
                }
                debug!("requested reconciliation pass");
            }
        }
        let _ = engine.sync().await;
    }

    info!("reconciliation worker stopped");
}
