//! Minecraft Java Edition status probe.
//!
//! The protocol frames every packet as `varint(len(body)) || body`, where the
//! varint is the 7-bit-per-byte encoding with a continuation bit. The status
//! exchange is two packets (handshake, status request) answered by a single
//! frame whose payload is a JSON document.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::probe::metadata::MinecraftJavaMetadata;
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

// Broadly accepted protocol version for status pings (1.16.5).
const HANDSHAKE_PROTOCOL: i32 = 754;

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
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

/// Decode one varint from the front of `input`, advancing it. `None` when the
/// input runs dry or the encoding exceeds five bytes.
pub(crate) fn read_varint(input: &mut &[u8]) -> Option<i32> {
    let mut result: u32 = 0;
    for i in 0..5 {
        let (&byte, rest) = input.split_first()?;
        *input = rest;
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some(result as i32);
        }
    }
    None
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

fn frame(body: Vec<u8>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + 5);
    write_varint(&mut packet, body.len() as i32);
    packet.extend_from_slice(&body);
    packet
}

fn encode_handshake(host: &str, port: u16) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, 0); // packet id
    write_varint(&mut body, HANDSHAKE_PROTOCOL);
    write_string(&mut body, host);
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, 1); // next state: status
    frame(body)
}

fn encode_status_request() -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, 0); // packet id
    frame(body)
}

#[derive(Debug, Default, Deserialize)]
struct StatusVersion {
    #[serde(default)]
    name: String,
    #[serde(default)]
    protocol: i32,
}

#[derive(Debug, Default, Deserialize)]
struct StatusPlayers {
    #[serde(default)]
    max: i32,
    #[serde(default)]
    online: i32,
}

#[derive(Debug, Default, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    version: StatusVersion,
    #[serde(default)]
    players: StatusPlayers,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    favicon: String,
    #[serde(default, rename = "enforcesSecureChat")]
    enforces_secure_chat: bool,
}

/// Unwrap `varint(len) || varint(0) || varint(jsonLen) || json` into the
/// status document.
fn decode_status_frame(mut frame: &[u8]) -> Option<StatusResponse> {
    let length = read_varint(&mut frame)?;
    if length <= 0 || frame.len() < length as usize {
        return None;
    }
    let mut payload = &frame[..length as usize];

    let packet_id = read_varint(&mut payload)?;
    if packet_id != 0 {
        return None;
    }

    let json_len = read_varint(&mut payload)?;
    if json_len < 0 || payload.len() < json_len as usize {
        return None;
    }

    serde_json::from_slice(&payload[..json_len as usize]).ok()
}

pub struct MinecraftJavaProbe;

#[async_trait]
impl ServiceProbe for MinecraftJavaProbe {
    fn name(&self) -> &'static str {
        "minecraft-java"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        1
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 25565
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let started = Instant::now();
        let host = target.server_name();

        conn.send(&encode_handshake(&host, target.port()), deadline).await?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let mut response = conn.send_recv(&encode_status_request(), remaining).await?;
        if response.is_empty() {
            return Ok(None);
        }

        // The status JSON (favicon included) routinely exceeds one read; keep
        // pulling chunks until the advertised frame is complete or time runs out.
        while !frame_complete(&response) {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            let chunk = conn.recv(remaining).await?;
            if chunk.is_empty() {
                break;
            }
            response.extend_from_slice(&chunk);
        }

        let Some(status) = decode_status_frame(&response) else {
            return Ok(None);
        };

        let version = status.version.name.clone();
        let metadata = ServiceMetadata::MinecraftJava(MinecraftJavaMetadata {
            version_name: status.version.name,
            protocol_version: status.version.protocol,
            players_online: status.players.online,
            players_max: status.players.max,
            description: status.description,
            favicon: status.favicon,
            enforces_secure: status.enforces_secure_chat,
        });
        let version = (!version.is_empty()).then_some(version);
        Ok(Some(Service::from_metadata(target, metadata, false, version, Transport::Tcp)))
    }
}

fn frame_complete(buf: &[u8]) -> bool {
    let mut cursor = buf;
    match read_varint(&mut cursor) {
        Some(length) if length >= 0 => cursor.len() >= length as usize,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: i32) -> i32 {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        let mut slice = buf.as_slice();
        let decoded = read_varint(&mut slice).unwrap();
        assert!(slice.is_empty(), "trailing bytes for {value}");
        decoded
    }

    #[test]
    fn test_varint_round_trip_law() {
        for value in [0, 1, 127, 128, 255, 2_097_151, i32::MAX] {
            assert_eq!(round_trip(value), value);
        }
        // Negative values occupy the full five bytes.
        assert_eq!(round_trip(-1), -1);
        assert_eq!(round_trip(i32::MIN), i32::MIN);
    }

    #[test]
    fn test_varint_known_encodings() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 128);
        assert_eq!(buf, vec![0x80, 0x01]);

        buf.clear();
        write_varint(&mut buf, 2_097_151);
        assert_eq!(buf, vec![0xFF, 0xFF, 0x7F]);

        buf.clear();
        write_varint(&mut buf, -1);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_varint_rejects_overlong_encodings() {
        let mut input: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(read_varint(&mut input).is_none());

        let mut truncated: &[u8] = &[0x80];
        assert!(read_varint(&mut truncated).is_none());
    }

    #[test]
    fn test_handshake_layout() {
        let packet = encode_handshake("mc.example.com", 25565);
        let mut cursor = packet.as_slice();
        let frame_len = read_varint(&mut cursor).unwrap();
        assert_eq!(frame_len as usize, cursor.len());
        assert_eq!(read_varint(&mut cursor), Some(0)); // packet id
        assert_eq!(read_varint(&mut cursor), Some(HANDSHAKE_PROTOCOL));
        let host_len = read_varint(&mut cursor).unwrap() as usize;
        assert_eq!(&cursor[..host_len], b"mc.example.com");
        assert_eq!(&cursor[host_len..host_len + 2], &25565u16.to_be_bytes());
    }

    pub(crate) fn encode_status_response(status_json: &str) -> Vec<u8> {
        let mut body = Vec::new();
        write_varint(&mut body, 0);
        write_varint(&mut body, status_json.len() as i32);
        body.extend_from_slice(status_json.as_bytes());
        frame(body)
    }

    #[test]
    fn test_status_frame_decodes_fixture() {
        let doc = json!({
            "version": {"name": "1.20.4", "protocol": 765},
            "players": {"max": 20, "online": 3},
            "description": {"text": "hello"},
            "favicon": "data:image/png;base64,AAAA",
            "enforcesSecureChat": true
        })
        .to_string();

        let status = decode_status_frame(&encode_status_response(&doc)).unwrap();
        assert_eq!(status.version.name, "1.20.4");
        assert_eq!(status.version.protocol, 765);
        assert_eq!(status.players.online, 3);
        assert_eq!(status.players.max, 20);
        assert!(status.enforces_secure_chat);
        assert_eq!(status.description, json!({"text": "hello"}));
    }

    #[test]
    fn test_status_frame_rejects_garbage() {
        assert!(decode_status_frame(b"not minecraft").is_none());
        assert!(decode_status_frame(&[]).is_none());
        // Valid frame, wrong packet id.
        let mut body = Vec::new();
        write_varint(&mut body, 1);
        assert!(decode_status_frame(&frame(body)).is_none());
    }

    #[test]
    fn test_frame_complete_tracks_advertised_length() {
        let packet = encode_status_response("{}");
        assert!(frame_complete(&packet));
        assert!(!frame_complete(&packet[..packet.len() - 1]));
    }
}
