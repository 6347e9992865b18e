//! TCP listener and tablegate server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::gateway::Gateway;
use crate::server::handler::handle_connection;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON-lines request server
pub struct TablegateServer {
    listener: TcpListener,
    addr: SocketAddr,
    gateway: Gateway,
    next_conn_id: AtomicU32,
}

impl TablegateServer {
    /// Bind the listen socket
    pub async fn bind(addr: SocketAddr, gateway: Gateway) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            listener,
            addr,
            gateway,
            next_conn_id: AtomicU32::new(1),
        })
    }

    /// Get the bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let gateway = self.gateway.clone();
        let connection_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            handle_connection(stream, peer_addr, connection_id, gateway).await;
        });
    }

    /// Run the server (blocking)
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.addr, "tablegate listening");

        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            self.spawn_connection(stream, peer_addr);
        }
    }

    /// Run the server with shutdown signal
    pub async fn run_with_shutdown(
        self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!(addr = %self.addr, "tablegate listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer_addr) = result?;
                    self.spawn_connection(stream, peer_addr);
                }
                _ = &mut shutdown_rx => {
                    tracing::info!("tablegate server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Server handle for testing
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub shutdown_tx: oneshot::Sender<()>,
}

impl ServerHandle {
    /// Shutdown the server
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Start a server in the background for testing
///
/// Binding to port 0 picks a free port; the handle carries the real address.
pub async fn start_test_server(
    addr: SocketAddr,
    gateway: Gateway,
) -> Result<ServerHandle, ServerError> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = TablegateServer::bind(addr, gateway).await?;
    let actual_addr = server.addr();

    tokio::spawn(async move {
        if let Err(e) = server.run_with_shutdown(shutdown_rx).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        addr: actual_addr,
        shutdown_tx,
    })
}
