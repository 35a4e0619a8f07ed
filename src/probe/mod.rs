//! The fingerprint engine's probe layer: the contract every protocol probe
//! satisfies, the canonical input (`Target`) and output (`Service`) of one
//! probe attempt, and the wire/TLS plumbing probes share.

pub mod error;
pub mod metadata;
pub mod registry;
pub mod services;
pub mod tls;
pub mod wire;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::ProbeError;
pub use metadata::ServiceMetadata;
pub use wire::ProbeConn;

/// Socket kind a probe needs. `TcpTls` rides an ordinary TCP connection the
/// dispatcher has already wrapped; on the wire the transport string stays
/// `"tcp"` and the service carries `tls: true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
    TcpTls,
}

impl Transport {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Transport::Tcp | Transport::TcpTls => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One endpoint to fingerprint. Ephemeral per discovery hit.
#[derive(Debug, Clone)]
pub struct Target {
    /// Server name for protocols that embed one (TLS SNI, the Minecraft
    /// handshake). Defaults to the resolved address text when absent.
    pub host: Option<String>,
    pub addr: SocketAddr,
    pub transport: Transport,
}

impl Target {
    pub fn new(addr: SocketAddr, transport: Transport) -> Self {
        Self { host: None, addr, transport }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn ip(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn server_name(&self) -> String {
        self.host.clone().unwrap_or_else(|| self.addr.ip().to_string())
    }
}

/// An identified service. `raw` is the canonical JSON encoding of `metadata`:
/// decoding `raw` under the `protocol` tag reproduces `metadata`.
#[derive(Debug, Clone)]
pub struct Service {
    pub protocol: &'static str,
    pub ip: String,
    pub port: u16,
    pub transport: Transport,
    pub tls: bool,
    pub version: Option<String>,
    pub raw: serde_json::Value,
    pub metadata: ServiceMetadata,
}

impl Service {
    pub fn from_metadata(
        target: &Target,
        metadata: ServiceMetadata,
        tls: bool,
        version: Option<String>,
        transport: Transport,
    ) -> Self {
        let raw = serde_json::to_value(&metadata).unwrap_or(serde_json::Value::Null);
        Self {
            protocol: metadata.protocol(),
            ip: target.ip(),
            port: target.port(),
            transport,
            tls,
            version,
            raw,
            metadata,
        }
    }
}

/// Contract every protocol probe satisfies.
///
/// `run` drives the wire exchange exactly once against a connection the
/// dispatcher owns. Probes must not close the connection, must not retry,
/// and must finish within `deadline`. `Ok(None)` means "this peer does not
/// speak my protocol"; `Err` means an I/O failure occurred, which is not a
/// negative identification.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    /// Stable identifier, also the `protocol` tag of emitted services.
    fn name(&self) -> &'static str;

    fn transport(&self) -> Transport;

    /// Candidate ordering tie-breaker; lower runs first. Stable across runs.
    fn priority(&self) -> i32;

    /// Whether this probe prefers the given port. Drives fast-mode and
    /// candidate ordering.
    fn port_priority(&self, port: u16) -> bool;

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError>;
}
