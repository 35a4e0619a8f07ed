//! Process-wide probe table. Populated once at startup through
//! [`register_all_probes`]; immutable afterwards, so readers need no
//! synchronization.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::probe::{ServiceProbe, Transport};

pub struct ProbeRegistry {
    probes: Vec<Arc<dyn ServiceProbe>>,
}

/// A plain TCP target may be served by a TCP probe or a TLS-wrapped one; UDP
/// and TLS targets take only their own kind.
fn compatible(probe: Transport, target: Transport) -> bool {
    match target {
        Transport::Tcp => matches!(probe, Transport::Tcp | Transport::TcpTls),
        Transport::TcpTls => probe == Transport::TcpTls,
        Transport::Udp => probe == Transport::Udp,
    }
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self { probes: Vec::new() }
    }

    /// Add a probe. Names key metrics and the protocol tag, so duplicates
    /// are rejected.
    pub fn register(&mut self, probe: Arc<dyn ServiceProbe>) -> Result<()> {
        if self.probes.iter().any(|p| p.name() == probe.name()) {
            bail!("probe {:?} registered twice", probe.name());
        }
        self.probes.push(probe);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    fn ordered(mut probes: Vec<Arc<dyn ServiceProbe>>) -> Vec<Arc<dyn ServiceProbe>> {
        // Equal priorities fall back to the name so candidate order is
        // deterministic across runs.
        probes.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        probes
    }

    /// All probes usable for a target transport, in priority order.
    pub fn by_transport(&self, transport: Transport) -> Vec<Arc<dyn ServiceProbe>> {
        Self::ordered(
            self.probes
                .iter()
                .filter(|p| compatible(p.transport(), transport))
                .cloned()
                .collect(),
        )
    }

    /// Probes that prefer `port`, in priority order.
    pub fn with_affinity(&self, transport: Transport, port: u16) -> Vec<Arc<dyn ServiceProbe>> {
        Self::ordered(
            self.probes
                .iter()
                .filter(|p| compatible(p.transport(), transport) && p.port_priority(port))
                .cloned()
                .collect(),
        )
    }

    /// Probes that do not prefer `port`, in priority order.
    pub fn without_affinity(&self, transport: Transport, port: u16) -> Vec<Arc<dyn ServiceProbe>> {
        Self::ordered(
            self.probes
                .iter()
                .filter(|p| compatible(p.transport(), transport) && !p.port_priority(port))
                .cloned()
                .collect(),
        )
    }

    /// Whether any probe of the given transport prefers `port`. Discovery
    /// uses this to decide which ports are worth a UDP hit.
    pub fn has_affinity(&self, transport: Transport, port: u16) -> bool {
        self.probes
            .iter()
            .any(|p| compatible(p.transport(), transport) && p.port_priority(port))
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register every built-in probe. Explicit registration replaces the
/// module-initializer side effects this design is usually built on; call it
/// once at program start and treat the registry as immutable afterwards.
pub fn register_all_probes(registry: &mut ProbeRegistry) -> Result<()> {
    use super::services::banner::{FtpProbe, RsyncProbe, SshProbe, TelnetProbe, VncProbe};
    use super::services::database::{
        MssqlProbe, MysqlProbe, OracleProbe, PostgresProbe, RedisProbe,
    };
    use super::services::mail::{
        ImapProbe, ImapsProbe, Pop3Probe, Pop3sProbe, SmtpProbe, SmtpsProbe,
    };
    use super::services::messaging::{KafkaProbe, MqttProbe};
    use super::services::minecraft::MinecraftJavaProbe;
    use super::services::system::{
        EchoProbe, JdwpProbe, LdapProbe, LdapsProbe, ModbusProbe, RdpProbe, RtspProbe,
    };
    use super::services::udp::{
        DhcpProbe, DnsProbe, IpmiProbe, IpsecProbe, NetbiosProbe, NtpProbe, SnmpProbe, StunProbe,
    };
    use super::services::web::{HttpProbe, HttpsProbe};

    registry.register(Arc::new(MinecraftJavaProbe))?;
    registry.register(Arc::new(FtpProbe))?;
    registry.register(Arc::new(SshProbe))?;
    registry.register(Arc::new(TelnetProbe))?;
    registry.register(Arc::new(VncProbe))?;
    registry.register(Arc::new(RsyncProbe))?;
    registry.register(Arc::new(SmtpProbe))?;
    registry.register(Arc::new(SmtpsProbe))?;
    registry.register(Arc::new(Pop3Probe))?;
    registry.register(Arc::new(Pop3sProbe))?;
    registry.register(Arc::new(ImapProbe))?;
    registry.register(Arc::new(ImapsProbe))?;
    registry.register(Arc::new(HttpProbe))?;
    registry.register(Arc::new(HttpsProbe))?;
    registry.register(Arc::new(RedisProbe))?;
    registry.register(Arc::new(MysqlProbe))?;
    registry.register(Arc::new(PostgresProbe))?;
    registry.register(Arc::new(MssqlProbe))?;
    registry.register(Arc::new(OracleProbe))?;
    registry.register(Arc::new(LdapProbe))?;
    registry.register(Arc::new(LdapsProbe))?;
    registry.register(Arc::new(RdpProbe))?;
    registry.register(Arc::new(RtspProbe))?;
    registry.register(Arc::new(MqttProbe))?;
    registry.register(Arc::new(KafkaProbe))?;
    registry.register(Arc::new(ModbusProbe))?;
    registry.register(Arc::new(JdwpProbe))?;
    registry.register(Arc::new(EchoProbe))?;
    registry.register(Arc::new(SnmpProbe))?;
    registry.register(Arc::new(DnsProbe))?;
    registry.register(Arc::new(IpmiProbe))?;
    registry.register(Arc::new(StunProbe))?;
    registry.register(Arc::new(DhcpProbe))?;
    registry.register(Arc::new(IpsecProbe))?;
    registry.register(Arc::new(NetbiosProbe))?;
    registry.register(Arc::new(NtpProbe))?;
    Ok(())
}
