use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::Instant;

use portprobe::engine::{dispatch, PortHit, ScanConfig, StreamDriver};
use portprobe::probe::metadata::EmptyMetadata;
use portprobe::probe::registry::{register_all_probes, ProbeRegistry};
use portprobe::probe::services::banner::FtpProbe;
use portprobe::probe::services::minecraft::MinecraftJavaProbe;
use portprobe::probe::services::udp::{NtpProbe, SnmpProbe};
use portprobe::probe::{
    ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport,
};

fn config(timeout_ms: u64) -> ScanConfig {
    ScanConfig {
        default_timeout: Duration::from_millis(timeout_ms),
        ..ScanConfig::default()
    }
}

fn tcp_target(addr: SocketAddr) -> Target {
    Target::new(addr, Transport::Tcp)
}

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

fn full_registry() -> ProbeRegistry {
    let mut registry = ProbeRegistry::new();
    register_all_probes(&mut registry).unwrap();
    registry
}

/// A peer that writes `banner` on every accepted connection, then closes.
async fn scripted_tcp_peer(banner: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let _ = stream.write_all(banner).await;
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            });
        }
    });
    addr
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.push(v as u8);
            return;
        }
        buf.push((v & 0x7F) as u8 | 0x80);
        v >>= 7;
    }
}

fn minecraft_status_frame(json: &str) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, 0);
    write_varint(&mut body, json.len() as i32);
    body.extend_from_slice(json.as_bytes());

    let mut frame = Vec::new();
    write_varint(&mut frame, body.len() as i32);
    frame.extend_from_slice(&body);
    frame
}

/// A Minecraft peer: consume the handshake and status request, then answer
/// with the given status JSON.
async fn minecraft_peer(status_json: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 256];
                // The status request frame is [0x01, 0x00]; stop once it arrives.
                while !request.ends_with(&[0x01, 0x00]) {
                    match tokio::time::timeout(
                        Duration::from_millis(500),
                        stream.read(&mut chunk),
                    )
                    .await
                    {
                        Ok(Ok(n)) if n > 0 => request.extend_from_slice(&chunk[..n]),
                        _ => break,
                    }
                }
                let _ = stream.write_all(&minecraft_status_frame(status_json)).await;
                let _ = stream.flush().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_ftp_banner_end_to_end() {
    let addr = scripted_tcp_peer(b"220 ProFTPD 1.3.6 Server ready\r\n").await;
    let registry = full_registry();
    let cancel = no_cancel();

    let service = dispatch::scan_target(&registry, &tcp_target(addr), &config(800), &cancel)
        .await
        .expect("ftp peer should be identified");

    assert_eq!(service.protocol, "ftp");
    assert_eq!(service.port, addr.port());
    assert_eq!(
        service.raw["banner"].as_str().unwrap(),
        "220 ProFTPD 1.3.6 Server ready\r\n"
    );
}

#[tokio::test]
async fn test_minecraft_java_happy_path() {
    const STATUS: &str = r#"{"version":{"name":"1.20.4","protocol":765},"players":{"max":20,"online":3},"description":{"text":"hello"},"favicon":"data:image/png;base64,AAAA","enforcesSecureChat":true}"#;

    let addr = minecraft_peer(STATUS).await;
    let driver = StreamDriver::new(config(1500), 4).unwrap();
    let event = driver
        .fingerprint(&PortHit::tcp(addr.ip(), addr.port()))
        .await
        .expect("minecraft peer should be identified");

    assert_eq!(event.protocol, "minecraft-java");
    assert_eq!(event.port, addr.port());
    assert_eq!(event.transport, "tcp");
    assert!(!event.tls);
    assert_eq!(event.metadata["versionName"], "1.20.4");
    assert_eq!(event.metadata["protocolVersion"], 765);
    assert_eq!(event.metadata["playersOnline"], 3);
    assert_eq!(event.metadata["playersMax"], 20);
    assert_eq!(event.metadata["enforcesSecure"], true);
    assert_eq!(event.metadata["description"]["text"], "hello");
}

#[tokio::test]
async fn test_non_minecraft_peer_is_a_silent_miss() {
    let addr = scripted_tcp_peer(b"not minecraft").await;

    let mut registry = ProbeRegistry::new();
    registry.register(Arc::new(MinecraftJavaProbe)).unwrap();
    registry.register(Arc::new(FtpProbe)).unwrap();
    let cancel = no_cancel();

    let service =
        dispatch::scan_target(&registry, &tcp_target(addr), &config(500), &cancel).await;
    assert!(service.is_none());
}

fn snmp_response(description: &str) -> Vec<u8> {
    const OID: [u8; 8] = [0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00];
    let mut response = vec![0x30, 0x52, 0x02, 0x01, 0x00, 0x04, 0x06];
    let community_at = response.len();
    response.extend_from_slice(b"public");
    response.extend_from_slice(&[0xa2, 0x45, 0x02, 0x04, 0xff, 0xff, 0xff, 0xff]);
    response.extend_from_slice(&[0x02, 0x01, 0x00, 0x02, 0x01, 0x00]);
    response.extend_from_slice(&[0x30, 0x37, 0x30, 0x35, 0x06, 0x08]);
    response.extend_from_slice(&OID);
    response.extend_from_slice(&[0x04, 0x2b]);
    while response.len() < community_at + 33 {
        response.push(0x00);
    }
    response.extend_from_slice(description.as_bytes());
    response
}

/// A UDP peer answering every datagram with `response`.
async fn scripted_udp_peer(response: Vec<u8>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((_, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&response, peer).await;
        }
    });
    addr
}

#[tokio::test]
async fn test_snmp_udp_end_to_end() {
    const DESCRIPTION: &str = "Linux core-sw 5.15.0 #1 SMP x86_64";
    let addr = scripted_udp_peer(snmp_response(DESCRIPTION)).await;

    let mut registry = ProbeRegistry::new();
    registry.register(Arc::new(SnmpProbe)).unwrap();
    let cancel = no_cancel();
    let target = Target::new(addr, Transport::Udp);

    let service = dispatch::scan_target(&registry, &target, &config(800), &cancel)
        .await
        .expect("snmp peer should be identified");

    assert_eq!(service.protocol, "SNMP");
    assert_eq!(service.transport, Transport::Udp);
    assert_eq!(service.version.as_deref(), Some(DESCRIPTION));
}

#[tokio::test]
async fn test_ntp_server_mode_is_identified() {
    let mut response = vec![0u8; 48];
    response[0] = 0x24; // LI 0, VN 4, mode 4 (server)
    let addr = scripted_udp_peer(response).await;

    let mut registry = ProbeRegistry::new();
    registry.register(Arc::new(NtpProbe)).unwrap();
    let cancel = no_cancel();
    let target = Target::new(addr, Transport::Udp);

    let service = dispatch::scan_target(&registry, &target, &config(800), &cancel)
        .await
        .expect("ntp peer should be identified");
    assert_eq!(service.protocol, "ntp");
}

#[tokio::test]
async fn test_ntp_client_mode_is_not_identified() {
    let mut response = vec![0u8; 48];
    response[0] = 0x23; // mode 3 (client) is not a server answer
    let addr = scripted_udp_peer(response).await;

    let mut registry = ProbeRegistry::new();
    registry.register(Arc::new(NtpProbe)).unwrap();
    let cancel = no_cancel();
    let target = Target::new(addr, Transport::Udp);

    let service = dispatch::scan_target(&registry, &target, &config(500), &cancel).await;
    assert!(service.is_none());
}

/// Probe double for dispatcher-behavior tests: records whether it ran, and
/// optionally identifies the peer.
struct RecordingProbe {
    name: &'static str,
    priority: i32,
    affinity: Option<u16>,
    identifies: bool,
    invoked: Arc<AtomicBool>,
}

#[async_trait]
impl ServiceProbe for RecordingProbe {
    fn name(&self) -> &'static str {
        self.name
    }
    fn transport(&self) -> Transport {
        Transport::Tcp
    }
    fn priority(&self) -> i32 {
        self.priority
    }
    fn port_priority(&self, port: u16) -> bool {
        self.affinity == Some(port)
    }
    async fn run(
        &self,
        _conn: &mut ProbeConn,
        _deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        self.invoked.store(true, Ordering::SeqCst);
        if self.identifies {
            let metadata = ServiceMetadata::Echo(EmptyMetadata {});
            Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
        } else {
            Ok(None)
        }
    }
}

async fn idle_tcp_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let _hold = stream;
                tokio::time::sleep(Duration::from_secs(10)).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_fast_mode_only_runs_affinity_matches() {
    let addr = idle_tcp_peer().await;
    let matching = Arc::new(AtomicBool::new(false));
    let other = Arc::new(AtomicBool::new(false));

    let mut registry = ProbeRegistry::new();
    registry
        .register(Arc::new(RecordingProbe {
            name: "affinity-probe",
            priority: 1,
            affinity: Some(addr.port()),
            identifies: false,
            invoked: Arc::clone(&matching),
        }))
        .unwrap();
    registry
        .register(Arc::new(RecordingProbe {
            name: "other-probe",
            priority: 70,
            affinity: None,
            identifies: false,
            invoked: Arc::clone(&other),
        }))
        .unwrap();

    let config = ScanConfig { fast_mode: true, ..config(500) };
    let cancel = no_cancel();
    let service = dispatch::scan_target(&registry, &tcp_target(addr), &config, &cancel).await;

    assert!(service.is_none());
    assert!(matching.load(Ordering::SeqCst));
    assert!(!other.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_first_match_short_circuits() {
    let addr = idle_tcp_peer().await;
    let winner_ran = Arc::new(AtomicBool::new(false));
    let loser_ran = Arc::new(AtomicBool::new(false));

    let mut registry = ProbeRegistry::new();
    registry
        .register(Arc::new(RecordingProbe {
            name: "winner",
            priority: 10,
            affinity: None,
            identifies: true,
            invoked: Arc::clone(&winner_ran),
        }))
        .unwrap();
    registry
        .register(Arc::new(RecordingProbe {
            name: "loser",
            priority: 20,
            affinity: None,
            identifies: true,
            invoked: Arc::clone(&loser_ran),
        }))
        .unwrap();

    let cancel = no_cancel();
    let service = dispatch::scan_target(&registry, &tcp_target(addr), &config(500), &cancel)
        .await
        .expect("winner should identify");

    assert_eq!(service.port, addr.port());
    assert!(winner_ran.load(Ordering::SeqCst));
    assert!(!loser_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_silent_peer_honors_timeout() {
    let addr = idle_tcp_peer().await;
    let mut registry = ProbeRegistry::new();
    registry.register(Arc::new(FtpProbe)).unwrap();
    let cancel = no_cancel();

    let started = Instant::now();
    let service = dispatch::scan_target(&registry, &tcp_target(addr), &config(400), &cancel).await;
    let elapsed = started.elapsed();

    assert!(service.is_none());
    // One candidate: the connect is instant, the probe read burns the deadline.
    assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let addr = scripted_tcp_peer(b"220 vsFTPd 3.0.5\r\n").await;
    let registry = full_registry();
    let cancel = no_cancel();

    let first = dispatch::scan_target(&registry, &tcp_target(addr), &config(800), &cancel)
        .await
        .unwrap();
    let second = dispatch::scan_target(&registry, &tcp_target(addr), &config(800), &cancel)
        .await
        .unwrap();

    assert_eq!(first.protocol, second.protocol);
    assert_eq!(first.raw, second.raw);
}

#[tokio::test]
async fn test_cancellation_stops_before_any_candidate() {
    let addr = idle_tcp_peer().await;
    let invoked = Arc::new(AtomicBool::new(false));

    let mut registry = ProbeRegistry::new();
    registry
        .register(Arc::new(RecordingProbe {
            name: "never-runs",
            priority: 1,
            affinity: None,
            identifies: true,
            invoked: Arc::clone(&invoked),
        }))
        .unwrap();

    let cancel = AtomicBool::new(true);
    let service = dispatch::scan_target(&registry, &tcp_target(addr), &config(500), &cancel).await;

    assert!(service.is_none());
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stream_driver_delivers_events() {
    let addr = scripted_tcp_peer(b"220 ProFTPD 1.3.6 Server ready\r\n").await;
    let driver = StreamDriver::new(config(800), 4).unwrap();

    let (hit_tx, hit_rx) = mpsc::channel(8);
    let (event_tx, mut event_rx) = mpsc::channel(8);

    hit_tx.send(PortHit::tcp(addr.ip(), addr.port())).await.unwrap();
    drop(hit_tx);

    driver
        .run(hit_rx, move |event| {
            let _ = event_tx.try_send(event);
        })
        .await
        .unwrap();

    let event = event_rx.recv().await.expect("one event should be delivered");
    assert_eq!(event.protocol, "ftp");
    assert_eq!(event.ip, addr.ip().to_string());
    assert!(event_rx.recv().await.is_none());
}
