//! Wiring of the security components from configuration

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::background::{BackgroundTaskManager, BackgroundTasks};
use crate::config::Config;
use crate::middleware::{CsrfProtection, RequestLimiters, SecurityMiddleware};
use crate::monitor::SecurityMonitor;
use crate::observability::SecurityMetrics;
use crate::shutdown::ShutdownNotifier;
use crate::validation::InputValidator;

/// Shared handles to every security component
#[derive(Clone)]
pub struct SecurityContext {
    pub config: Arc<Config>,
    pub limiters: RequestLimiters,
    pub monitor: Arc<SecurityMonitor>,
    pub validator: Arc<InputValidator>,
    pub csrf: Arc<CsrfProtection>,
    pub metrics: Arc<SecurityMetrics>,
    pub middleware: Arc<SecurityMiddleware>,
}

impl SecurityContext {
    pub fn from_config(config: Config) -> Self {
        let limiters = RequestLimiters::from_settings(&config.rate_limits);
        let monitor = Arc::new(SecurityMonitor::new(config.monitor.clone()));
        let validator = Arc::new(InputValidator::new(config.validator.clone()));
        let csrf = Arc::new(CsrfProtection::new(config.csrf.clone()));
        let metrics = Arc::new(SecurityMetrics::new());

        let middleware = Arc::new(SecurityMiddleware::new(
            limiters.clone(),
            csrf.clone(),
            validator.clone(),
            monitor.clone(),
            metrics.clone(),
        ));

        info!(
            csrf_enabled = config.csrf.enabled,
            "Security components initialized"
        );

        Self {
            config: Arc::new(config),
            limiters,
            monitor,
            validator,
            csrf,
            metrics,
            middleware,
        }
    }

    /// Start the periodic cleanup sweeps
    pub fn start_background_tasks(&self, shutdown: ShutdownNotifier) -> BackgroundTasks {
        let manager = Arc::new(BackgroundTaskManager::new(
            self.limiters.clone(),
            self.monitor.clone(),
            self.metrics.clone(),
            Duration::from_secs(self.config.rate_limits.cleanup_interval_secs),
            self.config.monitor.cleanup_interval(),
        ));
        manager.start(shutdown)
    }
}
