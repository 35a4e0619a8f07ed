//! The fingerprint engine: scan configuration, the dispatcher and the stream
//! driver that connects discovery hits to the event callback.

pub mod dispatch;
pub mod events;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::probe::registry::{register_all_probes, ProbeRegistry};
use crate::probe::{Target, Transport};
pub use events::ServiceEvent;

/// Knobs for one scan run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Per-probe deadline, applied to connect, TLS handshake and every read
    /// or write inside a probe.
    pub default_timeout: Duration,
    /// Only try probes whose port affinity matches the target port.
    pub fast_mode: bool,
    /// Dispatch UDP discovery hits; off by default.
    pub include_udp: bool,
    /// Emit diagnostic lines on stderr.
    pub verbose: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(2),
            fast_mode: false,
            include_udp: false,
            verbose: false,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            bail!("default timeout must be positive");
        }
        Ok(())
    }
}

/// One open port reported by the discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortHit {
    pub ip: IpAddr,
    pub port: u16,
    /// Discovery transport hint; TCP unless discovery says otherwise.
    pub transport: Transport,
}

impl PortHit {
    pub fn tcp(ip: IpAddr, port: u16) -> Self {
        Self { ip, port, transport: Transport::Tcp }
    }

    pub fn udp(ip: IpAddr, port: u16) -> Self {
        Self { ip, port, transport: Transport::Udp }
    }
}

/// Receives discovery hits, runs the dispatcher for each on a bounded worker
/// pool, and forwards identified services to the event callback.
///
/// The callback is invoked from whichever worker identified the service, so
/// it must be thread-safe (`Send + Sync`). The registry is immutable once
/// the driver is built.
pub struct StreamDriver {
    registry: Arc<ProbeRegistry>,
    config: ScanConfig,
    workers: usize,
    cancel: Arc<AtomicBool>,
}

impl StreamDriver {
    pub fn new(config: ScanConfig, workers: usize) -> Result<Self> {
        let mut registry = ProbeRegistry::new();
        register_all_probes(&mut registry)?;
        Self::with_registry(registry, config, workers)
    }

    /// Build against a caller-supplied registry (tests, embedders).
    pub fn with_registry(registry: ProbeRegistry, config: ScanConfig, workers: usize) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            bail!("probe registry is empty");
        }
        Ok(Self {
            registry: Arc::new(registry),
            config,
            workers: workers.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    /// Flag observed before each new target and between probe candidates.
    /// Setting it stops the scan without emitting further events.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Fingerprint a single discovery hit inline. UDP hits are dropped
    /// unless the configuration enables them.
    pub async fn fingerprint(&self, hit: &PortHit) -> Option<ServiceEvent> {
        if hit.transport == Transport::Udp && !self.config.include_udp {
            return None;
        }
        let target = Target::new(SocketAddr::new(hit.ip, hit.port), hit.transport);
        let service =
            dispatch::scan_target(&self.registry, &target, &self.config, &self.cancel).await?;
        Some(ServiceEvent::from_service(&service, Utc::now()))
    }

    /// Drain `hits` until the channel closes or the scan is cancelled,
    /// fingerprinting each hit on the worker pool. Events are delivered to
    /// `on_event` exactly once per identified service.
    pub async fn run<F>(&self, mut hits: mpsc::Receiver<PortHit>, on_event: F) -> Result<()>
    where
        F: Fn(ServiceEvent) + Send + Sync + 'static,
    {
        let on_event = Arc::new(on_event);
        let pool = Arc::new(Semaphore::new(self.workers));
        let mut tasks = Vec::new();

        while let Some(hit) = hits.recv().await {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            if hit.transport == Transport::Udp && !self.config.include_udp {
                continue;
            }

            let permit = pool.clone().acquire_owned().await?;
            let registry = Arc::clone(&self.registry);
            let config = self.config.clone();
            let cancel = Arc::clone(&self.cancel);
            let on_event = Arc::clone(&on_event);

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let target = Target::new(SocketAddr::new(hit.ip, hit.port), hit.transport);
                if let Some(service) =
                    dispatch::scan_target(&registry, &target, &config, &cancel).await
                {
                    on_event(ServiceEvent::from_service(&service, Utc::now()));
                }
            }));
        }

        for joined in join_all(tasks).await {
            if let Err(err) = joined {
                debug!(%err, "fingerprint worker aborted");
            }
        }
        Ok(())
    }
}
