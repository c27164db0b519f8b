//! Graceful shutdown handling

use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a shutdown notifier
    pub fn subscribe(&self) -> ShutdownNotifier {
        ShutdownNotifier {
            receiver: self.sender.subscribe(),
        }
    }

    /// Wait for Ctrl+C or SIGTERM, then notify every subscriber
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
        }

        self.shutdown();
    }

    /// Trigger shutdown manually
    pub fn shutdown(&self) {
        info!("Shutdown triggered");
        self.sender.send_replace(true);
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown notifier for components
#[derive(Clone)]
pub struct ShutdownNotifier {
    receiver: watch::Receiver<bool>,
}

impl ShutdownNotifier {
    /// Resolve once shutdown has been signaled, immediately if it already was
    pub async fn wait(&mut self) {
        // A dropped coordinator counts as shutdown
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}
