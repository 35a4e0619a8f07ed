//! Database probes. Redis and MySQL announce themselves; the others answer a
//! canonical handshake packet with a distinctive frame.

use std::time::Duration;

use async_trait::async_trait;

use crate::probe::metadata::{BannerMetadata, EmptyMetadata, MssqlMetadata};
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

pub struct RedisProbe;

#[async_trait]
impl ServiceProbe for RedisProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        80
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 6379
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(b"*1\r\n$4\r\nPING\r\n", deadline).await?;
        if response.is_empty() {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&response);
        let line = text.lines().next().unwrap_or_default();
        // +PONG from an open instance, -NOAUTH/-ERR from a protected one.
        if !(line.starts_with("+PONG") || line.starts_with("-NOAUTH") || line.starts_with("-ERR"))
        {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Redis(BannerMetadata::new(line.to_string()));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

/// Pull the server version out of a MySQL handshake packet: 3-byte little-
/// endian payload length, sequence byte, protocol 10, then a NUL-terminated
/// version string.
fn parse_mysql_greeting(response: &[u8]) -> Option<String> {
    if response.len() < 6 {
        return None;
    }
    let payload_len =
        u32::from_le_bytes([response[0], response[1], response[2], 0]) as usize;
    if payload_len == 0 || response.len() < 4 + payload_len.min(5) {
        return None;
    }

    let payload = &response[4..];
    match payload.first() {
        Some(0x0a) => {
            let version_bytes = payload[1..].iter().take_while(|b| **b != 0).copied().collect::<Vec<_>>();
            if version_bytes.is_empty() {
                return None;
            }
            Some(String::from_utf8_lossy(&version_bytes).into_owned())
        }
        // Access-denied error packet still identifies the speaker.
        Some(0xff) => Some(String::new()),
        _ => None,
    }
}

pub struct MysqlProbe;

#[async_trait]
impl ServiceProbe for MysqlProbe {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        90
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 3306
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.recv(deadline).await?;
        let Some(version) = parse_mysql_greeting(&response) else {
            return Ok(None);
        };

        let metadata = ServiceMetadata::Mysql(BannerMetadata::new(version.clone()));
        let version = (!version.is_empty()).then_some(version);
        Ok(Some(Service::from_metadata(target, metadata, false, version, Transport::Tcp)))
    }
}

pub struct PostgresProbe;

#[async_trait]
impl ServiceProbe for PostgresProbe {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        100
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 5432
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        // SSLRequest: length 8, magic 80877103. Every postgres answers it
        // with a single S or N before any authentication.
        const SSL_REQUEST: [u8; 8] = [0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f];

        let response = conn.send_recv(&SSL_REQUEST, deadline).await?;
        let identified = match response.as_slice() {
            [b'S'] | [b'N'] => true,
            // Pre-9.x servers reply with an ErrorResponse frame instead.
            [b'E', rest @ ..] => rest.len() >= 4,
            _ => false,
        };
        if !identified {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Postgresql(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

fn mssql_prelogin() -> Vec<u8> {
    // TDS PRELOGIN: one VERSION option, terminator, six version bytes.
    let mut packet = vec![
        0x12, 0x01, // type PRELOGIN, status EOM
        0x00, 0x14, // length 20
        0x00, 0x00, 0x01, 0x00, // spid, packet id, window
        0x00, // option: VERSION
        0x00, 0x06, // offset into payload
        0x00, 0x06, // length
        0xff, // option terminator
    ];
    packet.extend_from_slice(&[0x10, 0x00, 0x00, 0x00, 0x00, 0x00]);
    packet
}

/// Version option out of a PRELOGIN response payload, when well-formed.
fn parse_mssql_version(response: &[u8]) -> Option<String> {
    let payload = response.get(8..)?;
    let mut cursor = 0;
    while let Some(&token) = payload.get(cursor) {
        if token == 0xff {
            return None;
        }
        let offset = u16::from_be_bytes([*payload.get(cursor + 1)?, *payload.get(cursor + 2)?]) as usize;
        let length = u16::from_be_bytes([*payload.get(cursor + 3)?, *payload.get(cursor + 4)?]) as usize;
        if token == 0x00 && length >= 4 {
            let version = payload.get(offset..offset + 4)?;
            return Some(format!(
                "{}.{}.{}",
                version[0],
                version[1],
                u16::from_be_bytes([version[2], version[3]])
            ));
        }
        cursor += 5;
    }
    None
}

pub struct MssqlProbe;

#[async_trait]
impl ServiceProbe for MssqlProbe {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        110
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 1433
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(&mssql_prelogin(), deadline).await?;
        // PRELOGIN responses come back as a tabular-result frame.
        if response.len() < 9 || response[0] != 0x04 {
            return Ok(None);
        }

        let version = parse_mssql_version(&response);
        let metadata = ServiceMetadata::Mssql(MssqlMetadata { version: version.clone() });
        Ok(Some(Service::from_metadata(target, metadata, false, version, Transport::Tcp)))
    }
}

fn oracle_connect() -> Vec<u8> {
    let connect_data = b"(CONNECT_DATA=(COMMAND=version))";
    let mut packet = Vec::with_capacity(58 + connect_data.len());
    packet.extend_from_slice(&((58 + connect_data.len()) as u16).to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00]); // checksum
    packet.push(0x01); // CONNECT
    packet.push(0x00); // flags
    packet.extend_from_slice(&[0x00, 0x00]); // header checksum
    packet.extend_from_slice(&[0x01, 0x36]); // version 310
    packet.extend_from_slice(&[0x01, 0x2c]); // lowest compatible 300
    packet.extend_from_slice(&[0x00, 0x00]); // service options
    packet.extend_from_slice(&[0x08, 0x00]); // session data unit
    packet.extend_from_slice(&[0x7f, 0xff]); // max transmission data unit
    packet.extend_from_slice(&[0x7f, 0x08]); // NT protocol characteristics
    packet.extend_from_slice(&[0x00, 0x00]); // line turnaround
    packet.extend_from_slice(&[0x00, 0x01]); // hardware byte order
    packet.extend_from_slice(&(connect_data.len() as u16).to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x3a]); // connect data offset = 58
    packet.resize(58, 0x00);
    packet.extend_from_slice(connect_data);
    packet
}

pub struct OracleProbe;

#[async_trait]
impl ServiceProbe for OracleProbe {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        120
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 1521
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(&oracle_connect(), deadline).await?;
        // TNS packet type: ACCEPT, REFUSE, REDIRECT or RESEND all mean a
        // listener is on the other end.
        if response.len() < 8 || !matches!(response[4], 2 | 4 | 5 | 11) {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Oracle(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}
