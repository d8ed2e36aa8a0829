//! HTTP host for the authentication strategy.
//!
//! Serves the request and callback phases under `/auth/{name}`, keeps
//! sessions in memory, and shuts down gracefully on Ctrl-C or SIGTERM.

mod router;
mod sessions;

pub use router::{AppState, create_router};
pub use sessions::{
    DEFAULT_SESSION_TTL, SessionStore, session_cookie, session_id_from_headers, spawn_reaper,
};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::{Config, DiceConfig};
use crate::dice::DiceStrategy;
use crate::{Error, Result};

/// dice-auth server
pub struct Server {
    config: Config,
    strategy: DiceStrategy,
}

impl Server {
    /// Validate configuration and build the strategy.
    pub fn new(config: Config) -> Result<Self> {
        let dice = DiceConfig::from_options(config.dice.clone())?;
        let strategy = DiceStrategy::new(dice)?;
        Ok(Self { config, strategy })
    }

    /// Server around an already-built strategy.
    #[must_use]
    pub fn with_strategy(config: Config, strategy: DiceStrategy) -> Self {
        Self { config, strategy }
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let dice = self.strategy.config();
        let request_path = dice.request_path();
        let callback_path = dice.callback_path.clone();
        let cas_server = dice.cas_server.clone();

        let session_ttl = self.config.server.session_ttl;
        let sessions = Arc::new(SessionStore::new(session_ttl));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        spawn_reaper(Arc::clone(&sessions), reap_interval(session_ttl), shutdown_rx);

        let state = Arc::new(AppState::with_sessions(
            self.strategy,
            self.config.server.session_cookie.clone(),
            sessions,
        ));
        let app = create_router(state, self.config.server.request_timeout);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("DICE-AUTH v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(directory = %cas_server, "Directory");
        info!(session_ttl = ?session_ttl, "Sessions");
        info!("  GET {request_path}  (request phase)");
        info!("  GET {callback_path}  (callback phase)");
        info!("  GET {request_path}/identity  (stored identity)");
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let _ = shutdown_tx.send(());
        info!("Server stopped");
        Ok(())
    }
}

/// Reap at most once a minute and at least once a second.
fn reap_interval(session_ttl: Duration) -> Duration {
    session_ttl.clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_interval_is_bounded() {
        assert_eq!(reap_interval(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(reap_interval(Duration::from_secs(30)), Duration::from_secs(30));
        assert_eq!(reap_interval(DEFAULT_SESSION_TTL), Duration::from_secs(60));
    }
}
