//! Periodic topology refresh
//!
//! Two states, inactive and active. Activation happens at most once; the
//! recurring task then runs until [`RefreshScheduler::cancel`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ClusterResult;

/// Work executed once per period
#[async_trait]
pub trait PeriodicRefresh: Send + Sync {
    /// Whether the owner still wants refreshes (not shut down, option enabled)
    fn is_active(&self) -> bool;

    /// One refresh round; returns whether the topology changed
    async fn refresh(&self) -> ClusterResult<bool>;
}

pub struct RefreshScheduler {
    period: Duration,
    activated: AtomicBool,
    cancelled: AtomicBool,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            activated: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start the recurring task unless it was already started
    ///
    /// Returns `true` only for the call that scheduled the task. The task
    /// holds `target` weakly and stops once it is dropped. The first round
    /// runs one period after activation.
    pub fn activate(&self, target: Weak<dyn PeriodicRefresh>) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        if self
            .activated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot schedule topology refresh outside a runtime: {}", e);
                self.activated.store(false, Ordering::Release);
                return false;
            }
        };

        let period = self.period;
        let shutdown = self.shutdown.clone();
        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("Topology refresh task stopped");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                let Some(owner) = target.upgrade() else {
                    debug!("Topology refresh owner dropped, stopping");
                    break;
                };
                if !owner.is_active() {
                    debug!("Topology refresh is disabled, skipping period");
                    continue;
                }
                match owner.refresh().await {
                    Ok(true) => debug!("Topology refresh applied a new view"),
                    Ok(false) => {}
                    Err(e) => warn!("Topology refresh failed: {}", e),
                }
            }
        });

        *self.handle.lock() = Some(task);
        info!("Topology refresh scheduled every {:?}", period);
        true
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    /// Whether the recurring task is running
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the recurring task; no round starts after this returns
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
