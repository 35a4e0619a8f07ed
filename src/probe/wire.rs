//! Deadline-bounded socket primitives shared by every probe.
//!
//! UDP sockets are bind-connected to the remote peer before they reach a
//! probe, so `send`/`recv` have the same shape as TCP and datagrams from
//! other peers are dropped by the OS.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, Instant};
use tokio_rustls::client::TlsStream;

use crate::probe::error::ProbeError;

/// Read cap for a single `recv` chunk.
pub const RECV_CAP: usize = 4096;

/// Larger cap for header-heavy protocols (HTTP).
pub const HTTP_RECV_CAP: usize = 16384;

/// One probe attempt's connection. Exclusively owned by the attempt; the
/// dispatcher closes it (by drop) on every exit path.
pub enum ProbeConn {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Udp(UdpSocket),
}

impl ProbeConn {
    /// Write all of `data` before `deadline` elapses.
    pub async fn send(&mut self, data: &[u8], deadline: Duration) -> Result<(), ProbeError> {
        let write = match self {
            ProbeConn::Tcp(stream) => timeout(deadline, stream.write_all(data)).await,
            ProbeConn::Tls(stream) => timeout(deadline, stream.write_all(data)).await,
            ProbeConn::Udp(socket) => {
                return match timeout(deadline, socket.send(data)).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(ProbeError::Io(e)),
                    Err(_) => Err(ProbeError::WriteTimeout(deadline)),
                };
            }
        };
        match write {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => Err(ProbeError::WriteTimeout(deadline)),
        }
    }

    /// Read one chunk of up to `cap` bytes. A deadline that passes with
    /// nothing on the wire yields an empty buffer; the probe decides what
    /// silence means.
    pub async fn recv_cap(&mut self, cap: usize, deadline: Duration) -> Result<Vec<u8>, ProbeError> {
        let mut buf = vec![0u8; cap];
        let read = match self {
            ProbeConn::Tcp(stream) => timeout(deadline, stream.read(&mut buf)).await,
            ProbeConn::Tls(stream) => timeout(deadline, stream.read(&mut buf)).await,
            ProbeConn::Udp(socket) => timeout(deadline, socket.recv(&mut buf)).await,
        };
        match read {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub async fn recv(&mut self, deadline: Duration) -> Result<Vec<u8>, ProbeError> {
        self.recv_cap(RECV_CAP, deadline).await
    }

    /// Send then receive under one shared deadline.
    pub async fn send_recv(&mut self, data: &[u8], deadline: Duration) -> Result<Vec<u8>, ProbeError> {
        let started = Instant::now();
        self.send(data, deadline).await?;
        let remaining = deadline.saturating_sub(started.elapsed());
        self.recv(remaining).await
    }
}

/// Fresh random 2-byte transaction id for protocols that echo one back
/// (NetBIOS-NS, DNS).
pub fn transaction_id() -> [u8; 2] {
    rand::random()
}

/// Locate `needle` inside `haystack`, byte-wise.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
