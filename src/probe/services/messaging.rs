//! Message broker probes: MQTT and Kafka both answer a canonical client
//! hello with a short, unmistakable frame.

use std::time::Duration;

use async_trait::async_trait;

use crate::probe::metadata::EmptyMetadata;
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

fn mqtt_connect() -> Vec<u8> {
    let client_id = b"portprobe";
    // Variable header: protocol name "MQTT", level 4, clean session, 60s keepalive.
    let mut body = vec![0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3c];
    body.extend_from_slice(&(client_id.len() as u16).to_be_bytes());
    body.extend_from_slice(client_id);

    let mut packet = vec![0x10, body.len() as u8];
    packet.extend_from_slice(&body);
    packet
}

pub struct MqttProbe;

#[async_trait]
impl ServiceProbe for MqttProbe {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        180
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 1883
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.send_recv(&mqtt_connect(), deadline).await?;
        // CONNACK: fixed header 0x20, remaining length 2. Any return code
        // identifies the broker.
        if response.len() < 4 || response[0] != 0x20 || response[1] != 0x02 {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Mqtt(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

fn kafka_api_versions(correlation_id: i32) -> Vec<u8> {
    let client_id = b"portprobe";
    let mut payload = Vec::new();
    payload.extend_from_slice(&18i16.to_be_bytes()); // ApiVersions
    payload.extend_from_slice(&0i16.to_be_bytes()); // version 0
    payload.extend_from_slice(&correlation_id.to_be_bytes());
    payload.extend_from_slice(&(client_id.len() as i16).to_be_bytes());
    payload.extend_from_slice(client_id);

    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    packet.extend_from_slice(&payload);
    packet
}

pub struct KafkaProbe;

#[async_trait]
impl ServiceProbe for KafkaProbe {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        190
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 9092
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let correlation_id = i32::from_be_bytes(rand::random::<[u8; 4]>()) & 0x7fff_ffff;
        let response = conn
            .send_recv(&kafka_api_versions(correlation_id), deadline)
            .await?;
        // Brokers echo the correlation id right after the length prefix.
        if response.len() < 8 || response[4..8] != correlation_id.to_be_bytes() {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Kafka(EmptyMetadata {});
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_connect_frame() {
        let packet = mqtt_connect();
        assert_eq!(packet[0], 0x10);
        assert_eq!(packet[1] as usize, packet.len() - 2);
        assert_eq!(&packet[4..8], b"MQTT");
    }

    #[test]
    fn test_kafka_request_layout() {
        let packet = kafka_api_versions(0x01020304);
        let framed = i32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]) as usize;
        assert_eq!(framed, packet.len() - 4);
        assert_eq!(&packet[4..6], &18i16.to_be_bytes());
        assert_eq!(&packet[8..12], &0x01020304i32.to_be_bytes());
    }
}
