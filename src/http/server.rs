//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::{LimiterError, Result};
use crate::ratelimit::RateLimiter;

/// HTTP server for the admission service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Deadline for a request waiting on admission
    admission_timeout: Duration,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>, admission_timeout: Duration) -> Self {
        Self {
            addr,
            rate_limiter,
            admission_timeout,
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves. The
    /// limiter is not stopped here; its owner does that once the server has
    /// returned.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            LimiterError::Io(e)
        })?;

        info!(
            addr = %listener.local_addr()?,
            algorithm = %self.rate_limiter.algorithm(),
            "Starting HTTP server with graceful shutdown"
        );

        let app = router(self.rate_limiter, self.admission_timeout);
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                LimiterError::Io(e)
            })
    }
}
