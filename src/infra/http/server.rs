//! Listener lifecycle for the preview server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind preview server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

/// Serves one router on at most one socket at a time.
pub struct PreviewServer {
    router: Router,
    graceful_shutdown: Duration,
    running: Option<Running>,
}

impl PreviewServer {
    pub fn new(router: Router, graceful_shutdown: Duration) -> Self {
        Self {
            router,
            graceful_shutdown,
            running: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start serving on `addr`, stopping any current listener first.
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        self.stop().await;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let serve = axum::serve(listener, self.router.clone().into_make_service())
            .with_graceful_shutdown(async move {
                let _ = signal.await;
            });
        let task = tokio::spawn(async move { serve.await });

        info!(
            target = "livemark::http::server",
            addr = %local,
            "Preview server listening"
        );
        self.running = Some(Running {
            addr: local,
            shutdown,
            task,
        });
        Ok(local)
    }

    /// Stop serving and wait until the socket is released. Connections still
    /// open after the graceful timeout are dropped.
    pub async fn stop(&mut self) {
        let Some(Running {
            addr,
            shutdown,
            mut task,
        }) = self.running.take()
        else {
            return;
        };

        let _ = shutdown.send(());
        match tokio::time::timeout(self.graceful_shutdown, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => {
                error!(target = "livemark::http::server", addr = %addr, error = %err, "Server error")
            }
            Ok(Err(err)) => {
                error!(target = "livemark::http::server", addr = %addr, error = %err, "Server task failed")
            }
            Err(_) => {
                warn!(
                    target = "livemark::http::server",
                    addr = %addr,
                    timeout_ms = self.graceful_shutdown.as_millis() as u64,
                    "Graceful shutdown timed out; dropping connections"
                );
                task.abort();
                let _ = task.await;
            }
        }
        info!(target = "livemark::http::server", addr = %addr, "Preview server stopped");
    }

    /// Rebind only when `addr` differs from the current listener.
    pub async fn reconfigure(&mut self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        match self.local_addr() {
            Some(current) if current == addr => Ok(current),
            _ => self.bind(addr).await,
        }
    }
}
