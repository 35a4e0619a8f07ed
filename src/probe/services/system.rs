//! Probes for management and infrastructure protocols that answer a fixed
//! probe packet with a magic header: Modbus, RDP, LDAP(S), RTSP, JDWP, Echo.

use std::time::Duration;

use async_trait::async_trait;

use crate::probe::metadata::{BannerMetadata, EmptyMetadata, ModbusMetadata};
use crate::probe::wire;
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

fn modbus_request(transaction_id: [u8; 2]) -> Vec<u8> {
    vec![
        transaction_id[0],
        transaction_id[1],
        0x00, 0x00, // protocol id: modbus
        0x00, 0x05, // remaining length
        0xff, // unit id
        0x2b, // function: encapsulated interface transport
        0x0e, // MEI: read device identification
        0x01, // basic device identification
        0x00, // object id: VendorName
    ]
}

/// Walk the device-identification object list of a 0x2B response. Object ids
/// 0..=2 are VendorName, ProductCode and MajorMinorRevision.
fn parse_device_identification(response: &[u8]) -> ModbusMetadata {
    let mut metadata = ModbusMetadata::default();
    let Some(object_count) = response.get(13).copied() else {
        return metadata;
    };

    let mut cursor = 14;
    for _ in 0..object_count {
        let Some(&object_id) = response.get(cursor) else { break };
        let Some(&length) = response.get(cursor + 1) else { break };
        let Some(value) = response.get(cursor + 2..cursor + 2 + length as usize) else { break };
        let text = String::from_utf8_lossy(value).into_owned();
        match object_id {
            0x00 => metadata.vendor = Some(text),
            0x01 => metadata.product = Some(text),
            0x02 => metadata.revision = Some(text),
            _ => {}
        }
        cursor += 2 + length as usize;
    }
    metadata
}

pub struct ModbusProbe;

#[async_trait]
impl ServiceProbe for ModbusProbe {
    fn name(&self) -> &'static str {
        "modbus"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        200
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 502
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let transaction_id = wire::transaction_id();
        let response = conn.send_recv(&modbus_request(transaction_id), deadline).await?;
        // A well-formed MBAP reply echoes our transaction id and protocol 0.
        if response.len() < 8
            || response[0..2] != transaction_id
            || response[2..4] != [0x00, 0x00]
        {
            return Ok(None);
        }

        let metadata = if response[7] == 0x2b {
            parse_device_identification(&response)
        } else {
            ModbusMetadata::default()
        };
        let version = metadata.revision.clone();
        Ok(Some(Service::from_metadata(
            target,
            ServiceMetadata::Modbus(metadata),
            false,
            version,
            Transport::Tcp,
        )))
    }
}

pub struct RdpProbe;

#[async_trait]
impl ServiceProbe for RdpProbe {
    fn name(&self) -> &'static str {
        "rdp"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        140
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 3389
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        // X.224 connection request carrying an RDP negotiation request.
        const CONNECTION_REQUEST: [u8; 19] = [
            0x03, 0x00, 0x00, 0x13, // TPKT
            0x0e, 0xe0, 0x00, 0x00, 0x00, 0x00, 0x00, // X.224 CR
            0x01, 0x00, 0x08, 0x00, 0x03, 0x00, 0x00, 0x00, // RDP_NEG_REQ
        ];

        let response = conn.send_recv(&CONNECTION_REQUEST, deadline).await?;
        // TPKT header back, X.224 connection confirm.
        if response.len() < 6 || response[0] != 0x03 || response[1] != 0x00 || response[5] != 0xd0 {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Rdp(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

/// Anonymous LDAPv3 simple bind.
const LDAP_BIND_REQUEST: [u8; 14] = [
    0x30, 0x0c, // SEQUENCE, len 12
    0x02, 0x01, 0x01, // message id 1
    0x60, 0x07, // bindRequest, len 7
    0x02, 0x01, 0x03, // version 3
    0x04, 0x00, // empty bind DN
    0x80, 0x00, // empty simple credentials
];

fn is_ldap_bind_response(response: &[u8]) -> bool {
    // BER SEQUENCE followed by a bindResponse (0x61) within the envelope.
    response.len() >= 7
        && response[0] == 0x30
        && response[..response.len().min(12)].contains(&0x61)
}

pub struct LdapProbe;

#[async_trait]
impl ServiceProbe for LdapProbe {
    fn name(&self) -> &'static str {
        "ldap"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        130
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 389
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(&LDAP_BIND_REQUEST, deadline).await?;
        if !is_ldap_bind_response(&response) {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Ldap(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct LdapsProbe;

#[async_trait]
impl ServiceProbe for LdapsProbe {
    fn name(&self) -> &'static str {
        "ldaps"
    }

    fn transport(&self) -> Transport {
        Transport::TcpTls
    }

    fn priority(&self) -> i32 {
        131
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 636
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(&LDAP_BIND_REQUEST, deadline).await?;
        if !is_ldap_bind_response(&response) {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Ldaps(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, true, None, Transport::TcpTls)))
    }
}

pub struct RtspProbe;

#[async_trait]
impl ServiceProbe for RtspProbe {
    fn name(&self) -> &'static str {
        "rtsp"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        160
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 554
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn
            .send_recv(b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n", deadline)
            .await?;
        let text = String::from_utf8_lossy(&response);
        if !text.starts_with("RTSP/1.0") {
            return Ok(None);
        }

        let banner = text.lines().next().unwrap_or_default().to_string();
        let metadata = ServiceMetadata::Rtsp(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct JdwpProbe;

#[async_trait]
impl ServiceProbe for JdwpProbe {
    fn name(&self) -> &'static str {
        "jdwp"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        210
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 5005 || port == 8000
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        const HANDSHAKE: &[u8] = b"JDWP-Handshake";

        let response = conn.send_recv(HANDSHAKE, deadline).await?;
        if !response.starts_with(HANDSHAKE) {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Jdwp(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct EchoProbe;

#[async_trait]
impl ServiceProbe for EchoProbe {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        220
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 7
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let payload: [u8; 16] = rand::random();
        let response = conn.send_recv(&payload, deadline).await?;
        if response != payload {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Echo(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modbus_request_frames_mbap() {
        let packet = modbus_request([0xab, 0xcd]);
        assert_eq!(packet.len(), 11);
        assert_eq!(&packet[0..2], &[0xab, 0xcd]);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]) as usize, packet.len() - 6);
    }

    #[test]
    fn test_device_identification_objects() {
        // MBAP + 2B/0E response carrying vendor and product objects.
        let mut response = vec![
            0xab, 0xcd, 0x00, 0x00, 0x00, 0x00, 0xff, 0x2b, 0x0e, 0x01, 0x01, 0x00, 0x00,
            0x02, // two objects
        ];
        response.extend_from_slice(&[0x00, 0x04]);
        response.extend_from_slice(b"Acme");
        response.extend_from_slice(&[0x01, 0x03]);
        response.extend_from_slice(b"PLC");

        let metadata = parse_device_identification(&response);
        assert_eq!(metadata.vendor.as_deref(), Some("Acme"));
        assert_eq!(metadata.product.as_deref(), Some("PLC"));
        assert!(metadata.revision.is_none());
    }

    #[test]
    fn test_ldap_bind_response_predicate() {
        let response = [0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00];
        assert!(is_ldap_bind_response(&response));
        assert!(!is_ldap_bind_response(b"HTTP/1.1 400 Bad Request"));
        assert!(!is_ldap_bind_response(&[]));
    }
}
