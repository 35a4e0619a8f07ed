//! TCP connect-scan discovery. This is the external collaborator side of the
//! pipeline: it only decides which `(host, port)` tuples exist and hands them
//! to the stream driver. No raw sockets, no stealth techniques.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use crate::engine::PortHit;
use crate::probe::registry::ProbeRegistry;
use crate::probe::Transport;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub connect_timeout: Duration,
    pub parallelism: usize,
    /// Also emit UDP hits for scanned ports that have a UDP probe affinity.
    pub include_udp: bool,
    pub show_progress: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            parallelism: 256,
            include_udp: false,
            show_progress: false,
        }
    }
}

async fn port_is_open(addr: SocketAddr, deadline: Duration) -> bool {
    matches!(timeout(deadline, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Probe every `(target, port)` pair with a bounded connect scan, sending a
/// hit down `tx` for each open port. UDP hits piggyback on the scanned port
/// list: UDP has no cheap openness test, so the fingerprint probe itself is
/// the test and discovery just nominates affinity ports.
pub async fn run(
    targets: &[IpAddr],
    ports: &[u16],
    config: &DiscoveryConfig,
    registry: &ProbeRegistry,
    cancel: &Arc<AtomicBool>,
    tx: mpsc::Sender<PortHit>,
) -> Result<()> {
    let progress = if config.show_progress {
        let bar = ProgressBar::new((targets.len() * ports.len()) as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ports ({eta})")?,
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let pool = Arc::new(Semaphore::new(config.parallelism.max(1)));
    let mut tasks = Vec::new();

    for &ip in targets {
        for &port in ports {
            if cancel.load(Ordering::Relaxed) {
                break;
            }

            if config.include_udp && registry.has_affinity(Transport::Udp, port) {
                let _ = tx.send(PortHit::udp(ip, port)).await;
            }

            let permit = pool.clone().acquire_owned().await?;
            let deadline = config.connect_timeout;
            let tx = tx.clone();
            let progress = progress.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                if port_is_open(SocketAddr::new(ip, port), deadline).await {
                    let _ = tx.send(PortHit::tcp(ip, port)).await;
                }
                progress.inc(1);
            }));
        }
    }

    join_all(tasks).await;
    progress.finish_and_clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_discovery_reports_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut registry = ProbeRegistry::new();
        crate::probe::registry::register_all_probes(&mut registry).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = Arc::new(AtomicBool::new(false));
        let config = DiscoveryConfig {
            connect_timeout: Duration::from_millis(500),
            ..DiscoveryConfig::default()
        };
        run(&[addr.ip()], &[addr.port()], &config, &registry, &cancel, tx)
            .await
            .unwrap();

        let hit = rx.recv().await.unwrap();
        assert_eq!(hit, PortHit::tcp(addr.ip(), addr.port()));
        assert!(rx.recv().await.is_none());
    }
}
