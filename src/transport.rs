//! Sockets used by the session: a throwaway UDP socket per discovery
//! broadcast, one long-lived TCP listener for the controller's callback, and
//! one outbound TCP stream per session.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::Config;
use crate::{Error, Result};

/// An established TCP exchange with the controller.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read at most `max_bytes`. An empty buffer means the peer sent nothing
    /// (EOF); no data within `wait` is `Error::Timeout`.
    async fn receive(&mut self, max_bytes: usize, wait: Duration) -> Result<Vec<u8>>;

    /// Shut down the write half and release the socket, which also drops the
    /// read half. Never fails and is safe to call on an already closed
    /// connection.
    async fn close_gracefully(&mut self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    type Conn: Connection + 'static;

    /// Fire-and-forget; the caller decides whether to retry.
    async fn broadcast_discovery(&self, payload: &[u8]) -> Result<()>;

    /// Accept one connection on the persistent listener.
    async fn await_inbound_connection(&self, wait: Duration) -> Result<Self::Conn>;

    async fn dial_remote(&self, addr: SocketAddr, wait: Duration) -> Result<Self::Conn>;
}

#[derive(Debug)]
pub struct TokioTransport {
    listener: TcpListener,
    broadcast_target: SocketAddr,
    io_timeout: Duration,
}

impl TokioTransport {
    /// Bind the callback listener (address reuse, backlog 1). The listener
    /// lives as long as the transport.
    pub async fn bind(config: &Config, io_timeout: Duration) -> Result<Self> {
        let addr = config.listen_addr();
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1)?;
        debug!(addr = %listener.local_addr()?, "listening for controller callback");
        Ok(Self {
            listener,
            broadcast_target: config.broadcast_target(),
            io_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Transport for TokioTransport {
    type Conn = TcpConnection;

    async fn broadcast_discovery(&self, payload: &[u8]) -> Result<()> {
        let bind = if self.broadcast_target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        let sent = timeout(self.io_timeout, socket.send_to(payload, self.broadcast_target)).await??;
        trace!(bytes = sent, target = %self.broadcast_target, "discovery broadcast sent");
        Ok(())
    }

    async fn await_inbound_connection(&self, wait: Duration) -> Result<TcpConnection> {
        let (stream, peer) = timeout(wait, self.listener.accept()).await??;
        debug!(%peer, "new connection on listener");
        Ok(TcpConnection::new(stream, peer, self.io_timeout))
    }

    async fn dial_remote(&self, addr: SocketAddr, wait: Duration) -> Result<TcpConnection> {
        let stream = timeout(wait, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;
        debug!(peer = %addr, "connected to controller");
        Ok(TcpConnection::new(stream, addr, wait))
    }
}

#[derive(Debug)]
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    io_timeout: Duration,
}

impl TcpConnection {
    fn new(stream: TcpStream, peer: SocketAddr, io_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            peer,
            io_timeout,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        timeout(self.io_timeout, stream.write_all(bytes)).await??;
        Ok(())
    }

    async fn receive(&mut self, max_bytes: usize, wait: Duration) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let mut buf = vec![0u8; max_bytes];
        let n = timeout(wait, stream.read(&mut buf)).await??;
        buf.truncate(n);
        Ok(buf)
    }

    async fn close_gracefully(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        // dropping the stream closes the read half
        match timeout(self.io_timeout, stream.shutdown()).await {
            Ok(Ok(())) => trace!(peer = %self.peer, "connection shut down"),
            Ok(Err(e)) => trace!(peer = %self.peer, "shutdown failed: {e}"),
            Err(_) => trace!(peer = %self.peer, "shutdown timed out"),
        }
    }
}
