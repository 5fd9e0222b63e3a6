//! The forwarding proxy.
//!
//! Every request, whatever its method or path, is buffered, scanned for PII,
//! and then either rejected or forwarded to the configured target with the
//! upstream response streamed back. See [`forward::handle`] for the pipeline
//! and [`relay`] for how completion is recorded.

pub mod forward;
pub mod relay;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, WiretapsError};
use crate::pii::detector::PiiDetector;
use crate::policy::config::ProxyConfig;
use crate::sink::EventSink;
use forward::ProxyState;

pub struct ProxyServer {
    state: ProxyState,
}

impl ProxyServer {
    /// Build the server, compiling the detector from `config`.
    pub fn new(config: ProxyConfig, sink: EventSink) -> Result<Self> {
        let detector = PiiDetector::from_config(&config)?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WiretapsError::Upstream(e.to_string()))?;

        Ok(Self {
            state: ProxyState {
                config: Arc::new(config),
                detector: Arc::new(detector),
                client,
                sink,
            },
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }

    /// The axum router serving every path through the proxy pipeline.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(forward::handle)
            .with_state(self.state.clone())
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.state.config.listen_addr()).await?;
        info!(
            "wiretaps proxy listening on {} -> {} (mode: {}, {} patterns)",
            listener.local_addr()?,
            self.state.config.target_url,
            self.state.config.mode_name(),
            self.state.detector.registry().len()
        );
        Ok(listener)
    }

    /// Start the proxy server in the background and return the actual bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("proxy server stopped: {}", e);
            }
        });

        Ok(local_addr)
    }

    /// Serve on `listener` until `shutdown` resolves and open connections finish.
    ///
    /// Consumes the server so its [`EventSink`] handle is released on return.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
