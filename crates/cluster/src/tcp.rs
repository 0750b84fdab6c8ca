//! RESP over TCP

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use resp::{encode_to_vec, AsyncRespParser, Command, RespValue, DEFAULT_MAX_FRAME_SIZE};
use rr_core::Endpoint;

use crate::error::{ClusterError, ClusterResult};
use crate::transport::{NodeConnection, Transport};

/// Opens plain TCP connections speaking RESP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    max_frame_size: usize,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Limit the size of a single reply
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint) -> ClusterResult<Arc<dyn NodeConnection>> {
        let connect = async {
            match endpoint.resolved {
                Some(addr) => TcpStream::connect(addr).await,
                None => TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await,
            }
        };
        let stream = tokio::time::timeout(endpoint.timeout, connect)
            .await
            .map_err(|_| ClusterError::connection(endpoint, "connect timed out"))?
            .map_err(|e| ClusterError::connection(endpoint, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ClusterError::connection(endpoint, e))?;

        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        debug!("Connected to {} ({:?})", endpoint, peer);

        Ok(Arc::new(TcpConnection {
            endpoint: endpoint.addr(),
            peer,
            io: Mutex::new(Some(Io {
                writer,
                parser: AsyncRespParser::with_max_bytes(reader, self.max_frame_size),
            })),
            open: AtomicBool::new(true),
        }))
    }
}

struct Io {
    writer: OwnedWriteHalf,
    parser: AsyncRespParser<OwnedReadHalf>,
}

/// Marks the connection closed unless the request/reply exchange completes,
/// including when the dispatch future is dropped midway
struct Exchange<'a> {
    open: &'a AtomicBool,
    finished: bool,
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.open.store(false, Ordering::Release);
        }
    }
}

/// One TCP connection; requests are sent one at a time
pub struct TcpConnection {
    endpoint: String,
    peer: Option<SocketAddr>,
    io: Mutex<Option<Io>>,
    open: AtomicBool,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl NodeConnection for TcpConnection {
    async fn dispatch(&self, command: Command) -> ClusterResult<RespValue> {
        let mut guard = self.io.lock().await;
        if !self.is_open() {
            // An abandoned exchange may still have a reply in flight
            *guard = None;
        }
        let Some(io) = guard.as_mut() else {
            return Err(ClusterError::connection(&self.endpoint, "connection closed"));
        };

        let request = encode_to_vec(&command.to_resp());
        let mut exchange = Exchange {
            open: &self.open,
            finished: false,
        };
        let result = async {
            io.writer.write_all(&request).await?;
            io.writer.flush().await?;
            io.parser.parse().await
        }
        .await;

        match result {
            Ok(reply) => {
                exchange.finished = true;
                Ok(reply)
            }
            Err(e) => {
                // The stream position is unknown after a failed exchange
                *guard = None;
                Err(ClusterError::connection(&self.endpoint, e))
            }
        }
    }

    async fn auth(&self, password: &str) -> ClusterResult<()> {
        let reply = self
            .dispatch(Command::new("AUTH").arg(password.to_string()))
            .await?;
        match reply {
            RespValue::Error(msg) => Err(ClusterError::Auth {
                endpoint: self.endpoint.clone(),
                reason: String::from_utf8_lossy(&msg).into_owned(),
            }),
            _ => Ok(()),
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(mut io) = self.io.lock().await.take() {
            let _ = io.writer.shutdown().await;
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
