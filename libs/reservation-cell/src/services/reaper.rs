use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::error::ReservationError;
use crate::models::ReservationPolicy;
use crate::services::lock_manager::{classify, retry_store};
use crate::store::ReservationStore;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Periodically deletes locks that passed their deadline without confirmation.
///
/// Only rows already expired at sweep time are touched, so it can run next to
/// live lock and confirm traffic.
pub struct LockReaper {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    policy: ReservationPolicy,
    sweep_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl LockReaper {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        policy: ReservationPolicy,
        sweep_interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            clock,
            policy,
            sweep_interval: sweep_interval.clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL),
            shutdown,
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<u64, ReservationError> {
        let now = self.clock.now();
        let purged = retry_store(&self.policy, "purge_expired_locks", || {
            self.store.purge_expired_locks(now)
        })
        .await
        .map_err(classify)?;

        if purged > 0 {
            info!("Reaped {} expired locks", purged);
        } else {
            debug!("No expired locks to reap");
        }
        Ok(purged)
    }

    /// Spawns the sweep loop; it runs until [`LockReaper::shutdown`] is called.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut stop = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Lock reaper started, sweeping every {:?}", self.sweep_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!("Lock sweep failed: {}", e);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Lock reaper stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
