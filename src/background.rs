//! Periodic retention sweeps for the limiters and the monitor

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::middleware::RequestLimiters;
use crate::monitor::{CleanupReport, SecurityMonitor};
use crate::observability::SecurityMetrics;
use crate::shutdown::ShutdownNotifier;

/// Background task manager for stale-state cleanup
pub struct BackgroundTaskManager {
    limiters: RequestLimiters,
    monitor: Arc<SecurityMonitor>,
    metrics: Arc<SecurityMetrics>,
    limiter_interval: Duration,
    monitor_interval: Duration,
}

impl BackgroundTaskManager {
    pub fn new(
        limiters: RequestLimiters,
        monitor: Arc<SecurityMonitor>,
        metrics: Arc<SecurityMetrics>,
        limiter_interval: Duration,
        monitor_interval: Duration,
    ) -> Self {
        Self {
            limiters,
            monitor,
            metrics,
            limiter_interval,
            monitor_interval,
        }
    }

    /// Start both sweeps; they stop when `shutdown` fires
    pub fn start(self: Arc<Self>, shutdown: ShutdownNotifier) -> BackgroundTasks {
        let manager = self.clone();
        let mut stop = shutdown.clone();
        let limiter_task = tokio::spawn(async move {
            let mut ticker = interval(manager.limiter_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_limiters().await;
                    }
                    _ = stop.wait() => break,
                }
            }
            debug!("Rate limiter sweep stopped");
        });

        let manager = self;
        let mut stop = shutdown;
        let monitor_task = tokio::spawn(async move {
            let mut ticker = interval(manager.monitor_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_monitor().await;
                    }
                    _ = stop.wait() => break,
                }
            }
            debug!("Monitor retention sweep stopped");
        });

        info!("Background cleanup tasks started");
        BackgroundTasks {
            handles: vec![limiter_task, monitor_task],
        }
    }

    /// Drop idle limiter entries across every request class
    pub async fn sweep_limiters(&self) -> usize {
        let mut removed = 0;
        for limiter in self.limiters.all() {
            removed += limiter.cleanup_expired().await;
        }

        if removed > 0 {
            info!("Limiter sweep: removed {} idle entries", removed);
        } else {
            debug!("Limiter sweep: nothing to remove");
        }
        self.metrics.record_cleanup(removed);
        removed
    }

    /// Apply the monitor's retention period
    pub async fn sweep_monitor(&self) -> CleanupReport {
        let report = self.monitor.cleanup_expired().await;
        self.metrics.record_cleanup(report.total());
        report
    }
}

/// Handles of the running sweeps
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every sweep to observe shutdown
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
    }

    /// Stop every sweep without waiting
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
