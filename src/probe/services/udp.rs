//! UDP probes. Every one of these sends a canonical datagram and applies a
//! small identification predicate to whatever comes back; silence is a miss,
//! never an error.

use std::time::Duration;

use async_trait::async_trait;

use crate::probe::metadata::{EmptyMetadata, NetbiosMetadata};
use crate::probe::wire::{self, find_subsequence};
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

/// OID 1.3.6.1.2.1.1.1.0 (sysDescr) as it appears inside the request and is
/// echoed back by the agent.
const SNMP_OID: [u8; 8] = [0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00];

/// SNMPv1 GET, community "public", request id -1.
const SNMP_GET: [u8; 43] = [
    0x30, 0x29, // SEQUENCE
    0x02, 0x01, 0x00, // version: 1
    0x04, 0x06, // community
    0x70, 0x75, 0x62, 0x6c, 0x69, 0x63, // "public"
    0xa0, // PDU type: GET
    0x1c,
    0x02, 0x04, 0xff, 0xff, 0xff, 0xff, // request id: -1
    0x02, 0x01, 0x00, // error status
    0x02, 0x01, 0x00, // error index
    0x30, 0x0e, 0x30, 0x0c, 0x06, 0x08, 0x2b, 0x06, // varbind: sysDescr.0
    0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
];

/// The sysDescr string starts this far past the echoed community string.
const SNMP_INFO_OFFSET: usize = 33;

pub(crate) fn parse_snmp_response(response: &[u8]) -> Option<String> {
    let community = find_subsequence(response, b"public")?;
    if find_subsequence(response, &SNMP_OID).is_none() {
        return None;
    }
    let begin = community + SNMP_INFO_OFFSET;
    if begin < response.len() {
        Some(String::from_utf8_lossy(&response[begin..]).into_owned())
    } else {
        Some(String::new())
    }
}

pub struct SnmpProbe;

#[async_trait]
impl ServiceProbe for SnmpProbe {
    fn name(&self) -> &'static str {
        "SNMP"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        81
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 161
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(&SNMP_GET, deadline).await?;
        if response.is_empty() {
            return Ok(None);
        }

        let Some(description) = parse_snmp_response(&response) else {
            return Ok(None);
        };

        let metadata = ServiceMetadata::Snmp(EmptyMetadata {});
        Ok(Some(Service::from_metadata(
            target,
            metadata,
            false,
            Some(description),
            Transport::Udp,
        )))
    }
}

pub struct NtpProbe;

#[async_trait]
impl ServiceProbe for NtpProbe {
    fn name(&self) -> &'static str {
        "ntp"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        800
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 123
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        // NTPv4 client packet, RFC 5905 §7.3: leap unknown, version 4, mode 3.
        let mut request = [0u8; 48];
        request[0] = 0xe3;
        request[2] = 0x0a;
        request[3] = 0xf8;

        let response = conn.send_recv(&request, deadline).await?;
        if response.is_empty() {
            return Ok(None);
        }

        // Server-mode reply of exactly one packet.
        if response.len() != 48 || response[0] & 0x07 != 4 {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Ntp(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

/// Wildcard node-status query body: flags, one question, the all-A encoded
/// name, NBSTAT, class IN.
const NETBIOS_QUERY_BODY: [u8; 47] = [
    0x00, 0x10, // flags: broadcast
    0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x20, 0x43, 0x4b, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
    0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41, 0x41,
    0x41, 0x41, 0x00,
    0x00, 0x21, // NBSTAT
    0x00, 0x01, // IN
];

/// The name sits 7 bytes past the 5-NUL marker and ends at the first run of
/// three spaces; anything else means the reply was not a name response.
pub(crate) fn parse_netbios_name(response: &[u8]) -> Option<String> {
    let begin = find_subsequence(response, &[0x00; 5])? + 7;
    let end = find_subsequence(response, &[0x20; 3])?;
    if end < begin || begin >= response.len() || end >= response.len() {
        return None;
    }
    Some(String::from_utf8_lossy(&response[begin..end]).into_owned())
}

pub struct NetbiosProbe;

#[async_trait]
impl ServiceProbe for NetbiosProbe {
    fn name(&self) -> &'static str {
        "netbios-ns"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        700
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 137
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let mut request = Vec::with_capacity(50);
        request.extend_from_slice(&wire::transaction_id());
        request.extend_from_slice(&NETBIOS_QUERY_BODY);

        let response = conn.send_recv(&request, deadline).await?;
        if response.is_empty() {
            return Ok(None);
        }

        let Some(name) = parse_netbios_name(&response) else {
            return Ok(None);
        };

        let metadata = ServiceMetadata::Netbios(NetbiosMetadata { netbios_name: name });
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

pub struct IpmiProbe;

#[async_trait]
impl ServiceProbe for IpmiProbe {
    fn name(&self) -> &'static str {
        "ipmi"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        300
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 623
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        // RMCP Presence Ping (ASF, message type 0x80).
        const PRESENCE_PING: [u8; 12] = [
            0x06, 0x00, 0xff, 0x06, // RMCP: version, reserved, seq, class ASF
            0x00, 0x00, 0x11, 0xbe, // ASF IANA enterprise number
            0x80, 0x00, 0x00, 0x00, // presence ping, tag, reserved, data len
        ];

        let response = conn.send_recv(&PRESENCE_PING, deadline).await?;
        // Presence Pong carries the same enterprise number and type 0x40.
        if response.len() < 12 || response[4..8] != [0x00, 0x00, 0x11, 0xbe] || response[8] != 0x40
        {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Ipmi(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

pub struct DnsProbe;

#[async_trait]
impl ServiceProbe for DnsProbe {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        100
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 53
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let transaction_id = wire::transaction_id();
        // version.bind TXT CH: resolvers answer it, and even refusals echo
        // the transaction id with the response bit set.
        let mut request = Vec::with_capacity(30);
        request.extend_from_slice(&transaction_id);
        request.extend_from_slice(&[
            0x00, 0x00, // flags: standard query
            0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        request.extend_from_slice(b"\x07version\x04bind\x00");
        request.extend_from_slice(&[0x00, 0x10, 0x00, 0x03]); // TXT, CH

        let response = conn.send_recv(&request, deadline).await?;
        if response.len() < 12 || response[0..2] != transaction_id || response[2] & 0x80 == 0 {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Dns(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

pub struct StunProbe;

#[async_trait]
impl ServiceProbe for StunProbe {
    fn name(&self) -> &'static str {
        "stun"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        400
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 3478
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        const MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xa4, 0x42];

        let tx: [u8; 12] = rand::random();
        let mut request = Vec::with_capacity(20);
        request.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]); // binding request, no attributes
        request.extend_from_slice(&MAGIC_COOKIE);
        request.extend_from_slice(&tx);

        let response = conn.send_recv(&request, deadline).await?;
        // Binding success response with our cookie and transaction id.
        if response.len() < 20
            || response[0..2] != [0x01, 0x01]
            || response[4..8] != MAGIC_COOKIE
            || response[8..20] != tx
        {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Stun(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

pub struct DhcpProbe;

#[async_trait]
impl ServiceProbe for DhcpProbe {
    fn name(&self) -> &'static str {
        "dhcp"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        500
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 67
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

        let xid: [u8; 4] = rand::random();
        let chaddr: [u8; 6] = rand::random();

        let mut request = vec![0u8; 236];
        request[0] = 0x01; // BOOTREQUEST
        request[1] = 0x01; // ethernet
        request[2] = 0x06; // hardware address length
        request[4..8].copy_from_slice(&xid);
        request[10] = 0x80; // broadcast flag
        request[28..34].copy_from_slice(&chaddr);
        request.extend_from_slice(&MAGIC_COOKIE);
        request.extend_from_slice(&[0x35, 0x01, 0x01]); // message type: DISCOVER
        request.push(0xff); // end option

        let response = conn.send_recv(&request, deadline).await?;
        // BOOTREPLY with our transaction id and the cookie in place.
        if response.len() < 240
            || response[0] != 0x02
            || response[4..8] != xid
            || response[236..240] != MAGIC_COOKIE
        {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Dhcp(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

pub struct IpsecProbe;

#[async_trait]
impl ServiceProbe for IpsecProbe {
    fn name(&self) -> &'static str {
        "ipsec"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn priority(&self) -> i32 {
        600
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 500
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let initiator_cookie: [u8; 8] = rand::random();

        // Bare ISAKMP header, identity-protection exchange. Responders echo
        // the initiator cookie in whatever they send back.
        let mut request = Vec::with_capacity(28);
        request.extend_from_slice(&initiator_cookie);
        request.extend_from_slice(&[0u8; 8]); // responder cookie
        request.push(0x01); // next payload: SA
        request.push(0x10); // version 1.0
        request.push(0x02); // exchange: identity protection
        request.push(0x00); // flags
        request.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // message id
        request.extend_from_slice(&28u32.to_be_bytes()); // length

        let response = conn.send_recv(&request, deadline).await?;
        if response.len() < 28 || response[0..8] != initiator_cookie {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Ipsec(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Udp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A plausible agent reply: header garbage, the echoed community, the
    /// OID, and a sysDescr exactly 33 bytes past "public".
    fn snmp_fixture(description: &str) -> Vec<u8> {
        let mut response = vec![0x30, 0x52, 0x02, 0x01, 0x00, 0x04, 0x06];
        let community_at = response.len();
        response.extend_from_slice(b"public");
        response.extend_from_slice(&[0xa2, 0x45]);
        response.extend_from_slice(&[0x02, 0x04, 0xff, 0xff, 0xff, 0xff]);
        response.extend_from_slice(&[0x02, 0x01, 0x00, 0x02, 0x01, 0x00]);
        response.extend_from_slice(&[0x30, 0x37, 0x30, 0x35, 0x06, 0x08]);
        response.extend_from_slice(&SNMP_OID);
        response.extend_from_slice(&[0x04, 0x2b]);
        // Pad so the description starts exactly community_at + 33.
        while response.len() < community_at + 6 + SNMP_INFO_OFFSET - 6 {
            response.push(0x00);
        }
        assert_eq!(response.len(), community_at + SNMP_INFO_OFFSET);
        response.extend_from_slice(description.as_bytes());
        response
    }

    #[test]
    fn test_snmp_description_offset() {
        let response = snmp_fixture("Linux sw1 5.15.0 #1 SMP x86_64");
        assert_eq!(
            parse_snmp_response(&response).as_deref(),
            Some("Linux sw1 5.15.0 #1 SMP x86_64")
        );
    }

    #[test]
    fn test_snmp_requires_community_and_oid() {
        assert!(parse_snmp_response(b"no community here").is_none());
        // Community present but no OID echo.
        assert!(parse_snmp_response(b"......public......").is_none());
    }

    #[test]
    fn test_snmp_probe_bytes_carry_community_and_oid() {
        assert!(find_subsequence(&SNMP_GET, b"public").is_some());
        assert!(find_subsequence(&SNMP_GET, &SNMP_OID).is_some());
        assert_eq!(SNMP_GET[0], 0x30);
    }

    #[test]
    fn test_netbios_name_extraction() {
        let mut response = vec![0xaa, 0xbb, 0x84, 0x00];
        response.extend_from_slice(&[0x00; 5]); // marker
        response.extend_from_slice(&[0x01, 0x02]); // skipped by the +7 offset
        response.extend_from_slice(b"FILESRV");
        response.extend_from_slice(&[0x20, 0x20, 0x20]);
        response.extend_from_slice(&[0x00, 0x64]);
        assert_eq!(parse_netbios_name(&response).as_deref(), Some("FILESRV"));
    }

    #[test]
    fn test_netbios_accepts_zero_length_name() {
        // End marker right where the name would start: empty name, still a
        // well-formed reply.
        let response = [0x00, 0x00, 0x00, 0x00, 0x00, 0xaa, 0xbb, 0x20, 0x20, 0x20, 0x41];
        assert_eq!(parse_netbios_name(&response).as_deref(), Some(""));
    }

    #[test]
    fn test_netbios_rejects_missing_or_inverted_markers() {
        assert!(parse_netbios_name(b"no markers at all").is_none());

        // Spaces before the NUL marker: end < begin.
        let mut inverted = Vec::new();
        inverted.extend_from_slice(&[0x20; 3]);
        inverted.extend_from_slice(&[0x00; 5]);
        inverted.extend_from_slice(b"LATE");
        assert!(parse_netbios_name(&inverted).is_none());
    }
}
