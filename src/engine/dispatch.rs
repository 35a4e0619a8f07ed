//! The dispatcher: for one target, order the candidate probes, give each a
//! fresh deadline-bounded connection, and stop at the first identification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use super::ScanConfig;
use crate::probe::registry::ProbeRegistry;
use crate::probe::{tls, ProbeConn, Service, ServiceProbe, Target, Transport};

/// Try candidate probes in deterministic order until one identifies the
/// peer. Transient failures (connect refused, handshake failure, probe I/O
/// errors, contained panics) skip to the next candidate; nothing here aborts
/// the scan.
pub async fn scan_target(
    registry: &ProbeRegistry,
    target: &Target,
    config: &ScanConfig,
    cancel: &AtomicBool,
) -> Option<Service> {
    let mut candidates = registry.with_affinity(target.transport, target.port());
    if !config.fast_mode {
        candidates.extend(registry.without_affinity(target.transport, target.port()));
    }

    for probe in candidates {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }

        let conn = match open_connection(probe.as_ref(), target, config.default_timeout).await {
            Ok(conn) => conn,
            Err(err) => {
                // Includes TLS alerts like unrecognized_name: a connect
                // failure, not a protocol miss.
                debug!(probe = probe.name(), target = %target.addr, %err, "connect failed");
                continue;
            }
        };

        // Each attempt runs in its own task so a panicking probe is contained
        // and the socket still drops on every exit path.
        let deadline = config.default_timeout;
        let task_probe = Arc::clone(&probe);
        let task_target = target.clone();
        let attempt = tokio::spawn(async move {
            let mut conn = conn;
            task_probe.run(&mut conn, deadline, &task_target).await
        });

        match attempt.await {
            Ok(Ok(Some(service))) => return Some(service),
            Ok(Ok(None)) => {}
            Ok(Err(err)) if err.is_peer_refusal() => {
                debug!(probe = probe.name(), target = %target.addr, "peer refused probe");
            }
            Ok(Err(err)) => {
                debug!(probe = probe.name(), target = %target.addr, %err, "probe failed");
            }
            Err(join_err) => {
                debug!(probe = probe.name(), target = %target.addr, %join_err, "probe aborted");
            }
        }
    }

    None
}

async fn open_connection(
    probe: &dyn ServiceProbe,
    target: &Target,
    deadline: Duration,
) -> anyhow::Result<ProbeConn> {
    match probe.transport() {
        Transport::Udp => {
            let bind_addr = if target.addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind_addr).await?;
            socket.connect(target.addr).await?;
            Ok(ProbeConn::Udp(socket))
        }
        Transport::Tcp => {
            let stream = timeout(deadline, TcpStream::connect(target.addr)).await??;
            Ok(ProbeConn::Tcp(stream))
        }
        Transport::TcpTls => {
            let stream = timeout(deadline, TcpStream::connect(target.addr)).await??;
            let sni = tls::server_name(&target.server_name())
                .ok_or_else(|| anyhow::anyhow!("invalid SNI host {:?}", target.server_name()))?;
            let stream = timeout(deadline, tls::connector().connect(sni, stream)).await??;
            Ok(ProbeConn::Tls(Box::new(stream)))
        }
    }
}
