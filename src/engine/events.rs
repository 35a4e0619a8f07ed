//! The event record handed to consumers, one per identified service.
//! Field names are a stable wire contract; do not rename them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::Service;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    pub tls: bool,
    pub transport: String,
    pub metadata: serde_json::Value,
}

impl ServiceEvent {
    pub fn from_service(service: &Service, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ip: service.ip.clone(),
            port: service.port,
            protocol: service.protocol.to_string(),
            tls: service.tls,
            transport: service.transport.wire_name().to_string(),
            metadata: service.raw.clone(),
        }
    }
}
