//! TCP console server

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::protocol::{DebugCommand, DebugResponse};

/// Trait that the application implements to handle console commands
pub trait DebugHandler: Send + Sync + 'static {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse;
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind console on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Console server handle - keep this alive to keep the server running
pub struct DebugServer {
    handle: tokio::task::JoinHandle<()>,
    local_addr: Option<SocketAddr>,
}

impl DebugServer {
    /// Start the console on the given localhost port.
    /// Returns immediately -- server runs in background; bind failures
    /// are logged.
    pub fn start(handler: Arc<Mutex<dyn DebugHandler>>, port: u16) -> Self {
        let handle = tokio::spawn(async move {
            let addr = format!("127.0.0.1:{}", port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    log::info!("Console listening on {}", addr);
                    accept_loop(listener, handler).await;
                }
                Err(e) => log::error!("Failed to bind console on {}: {}", addr, e),
            }
        });

        Self {
            handle,
            local_addr: None,
        }
    }

    /// Bind first, then serve in the background. Use port 0 for an
    /// ephemeral port and read it back with [`DebugServer::local_addr`].
    pub async fn bind(handler: Arc<Mutex<dyn DebugHandler>>, addr: &str) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        log::info!("Console listening on {}", local_addr);

        let handle = tokio::spawn(accept_loop(listener, handler));
        Ok(Self {
            handle,
            local_addr: Some(local_addr),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<Mutex<dyn DebugHandler>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::info!("Console client connected from {}", peer);
                let handler = handler.clone();
                tokio::spawn(async move {
                    handle_connection(stream, handler).await;
                    log::info!("Console client disconnected: {}", peer);
                });
            }
            Err(e) => {
                log::error!("Console accept error: {}", e);
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<Mutex<dyn DebugHandler>>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // Connection closed
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<DebugCommand>(trimmed) {
                    Ok(cmd) => {
                        log::debug!("Console command: {:?}", cmd);
                        let mut h = handler.lock().await;
                        h.handle_command(cmd)
                    }
                    Err(e) => DebugResponse::error(format!("Invalid command JSON: {}", e)),
                };

                let mut resp_json = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!("{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}", e)
                });
                resp_json.push('\n');

                if let Err(e) = writer.write_all(resp_json.as_bytes()).await {
                    log::error!("Console write error: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    log::error!("Console flush error: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Console read error: {}", e);
                break;
            }
        }
    }
}
