//! The closed set of protocol tags and their metadata payloads.
//!
//! Every identified service carries exactly one metadata variant, chosen by
//! its protocol tag. The tag set lives here and nowhere else; decoding a raw
//! payload back into its variant goes through [`ServiceMetadata::from_raw`].
//! Consumers that see a tag they do not know should treat the payload as
//! opaque JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTO_MINECRAFT_JAVA: &str = "minecraft-java";
pub const PROTO_FTP: &str = "ftp";
pub const PROTO_SSH: &str = "ssh";
pub const PROTO_TELNET: &str = "telnet";
pub const PROTO_SMTP: &str = "smtp";
pub const PROTO_SMTPS: &str = "smtps";
pub const PROTO_POP3: &str = "pop3";
pub const PROTO_POP3S: &str = "pop3s";
pub const PROTO_IMAP: &str = "imap";
pub const PROTO_IMAPS: &str = "imaps";
pub const PROTO_HTTP: &str = "http";
pub const PROTO_HTTPS: &str = "https";
pub const PROTO_REDIS: &str = "redis";
pub const PROTO_MYSQL: &str = "mysql";
pub const PROTO_POSTGRESQL: &str = "postgresql";
pub const PROTO_MSSQL: &str = "mssql";
pub const PROTO_ORACLE: &str = "oracle";
pub const PROTO_LDAP: &str = "ldap";
pub const PROTO_LDAPS: &str = "ldaps";
pub const PROTO_RDP: &str = "rdp";
pub const PROTO_VNC: &str = "vnc";
pub const PROTO_RTSP: &str = "rtsp";
pub const PROTO_RSYNC: &str = "rsync";
pub const PROTO_MQTT: &str = "mqtt";
pub const PROTO_KAFKA: &str = "kafka";
pub const PROTO_MODBUS: &str = "modbus";
pub const PROTO_JDWP: &str = "jdwp";
pub const PROTO_ECHO: &str = "echo";
// Tag casing is part of the wire contract; SNMP has always been uppercase.
pub const PROTO_SNMP: &str = "SNMP";
pub const PROTO_DNS: &str = "dns";
pub const PROTO_IPMI: &str = "ipmi";
pub const PROTO_STUN: &str = "stun";
pub const PROTO_DHCP: &str = "dhcp";
pub const PROTO_IPSEC: &str = "ipsec";
pub const PROTO_NETBIOS: &str = "netbios-ns";
pub const PROTO_NTP: &str = "ntp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BannerMetadata {
    pub banner: String,
}

impl BannerMetadata {
    pub fn new(banner: impl Into<String>) -> Self {
        Self { banner: banner.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HttpMetadata {
    /// Full status line, e.g. `HTTP/1.1 200 OK`.
    pub status: String,
    /// Response headers, keys lowercased, repeated headers joined.
    pub headers: BTreeMap<String, String>,
    /// FNV-1a 64-bit digest of whatever body bytes arrived, hex encoded.
    pub body_hash: String,
    /// Technology tags extracted from headers and body.
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MinecraftJavaMetadata {
    #[serde(rename = "versionName")]
    pub version_name: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: i32,
    #[serde(rename = "playersOnline")]
    pub players_online: i32,
    #[serde(rename = "playersMax")]
    pub players_max: i32,
    /// Either a chat object or a plain string; servers disagree.
    pub description: Value,
    pub favicon: String,
    #[serde(rename = "enforcesSecure")]
    pub enforces_secure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetbiosMetadata {
    pub netbios_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModbusMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MssqlMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Protocols identified purely by a magic reply carry no extra fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EmptyMetadata {}

/// Protocol-specific payload of an identified service. Closed sum: one
/// variant per supported protocol tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServiceMetadata {
    MinecraftJava(MinecraftJavaMetadata),
    Http(HttpMetadata),
    Https(HttpMetadata),
    Netbios(NetbiosMetadata),
    Modbus(ModbusMetadata),
    Mssql(MssqlMetadata),
    Ftp(BannerMetadata),
    Ssh(BannerMetadata),
    Telnet(BannerMetadata),
    Smtp(BannerMetadata),
    Smtps(BannerMetadata),
    Pop3(BannerMetadata),
    Pop3s(BannerMetadata),
    Imap(BannerMetadata),
    Imaps(BannerMetadata),
    Redis(BannerMetadata),
    Mysql(BannerMetadata),
    Vnc(BannerMetadata),
    Rtsp(BannerMetadata),
    Rsync(BannerMetadata),
    Postgresql(EmptyMetadata),
    Oracle(EmptyMetadata),
    Ldap(EmptyMetadata),
    Ldaps(EmptyMetadata),
    Rdp(EmptyMetadata),
    Mqtt(EmptyMetadata),
    Kafka(EmptyMetadata),
    Jdwp(EmptyMetadata),
    Echo(EmptyMetadata),
    Snmp(EmptyMetadata),
    Dns(EmptyMetadata),
    Ipmi(EmptyMetadata),
    Stun(EmptyMetadata),
    Dhcp(EmptyMetadata),
    Ipsec(EmptyMetadata),
    Ntp(EmptyMetadata),
}

impl ServiceMetadata {
    /// The protocol tag naming this variant.
    pub fn protocol(&self) -> &'static str {
        match self {
            ServiceMetadata::MinecraftJava(_) => PROTO_MINECRAFT_JAVA,
            ServiceMetadata::Http(_) => PROTO_HTTP,
            ServiceMetadata::Https(_) => PROTO_HTTPS,
            ServiceMetadata::Netbios(_) => PROTO_NETBIOS,
            ServiceMetadata::Modbus(_) => PROTO_MODBUS,
            ServiceMetadata::Mssql(_) => PROTO_MSSQL,
            ServiceMetadata::Ftp(_) => PROTO_FTP,
            ServiceMetadata::Ssh(_) => PROTO_SSH,
            ServiceMetadata::Telnet(_) => PROTO_TELNET,
            ServiceMetadata::Smtp(_) => PROTO_SMTP,
            ServiceMetadata::Smtps(_) => PROTO_SMTPS,
            ServiceMetadata::Pop3(_) => PROTO_POP3,
            ServiceMetadata::Pop3s(_) => PROTO_POP3S,
            ServiceMetadata::Imap(_) => PROTO_IMAP,
            ServiceMetadata::Imaps(_) => PROTO_IMAPS,
            ServiceMetadata::Redis(_) => PROTO_REDIS,
            ServiceMetadata::Mysql(_) => PROTO_MYSQL,
            ServiceMetadata::Vnc(_) => PROTO_VNC,
            ServiceMetadata::Rtsp(_) => PROTO_RTSP,
            ServiceMetadata::Rsync(_) => PROTO_RSYNC,
            ServiceMetadata::Postgresql(_) => PROTO_POSTGRESQL,
            ServiceMetadata::Oracle(_) => PROTO_ORACLE,
            ServiceMetadata::Ldap(_) => PROTO_LDAP,
            ServiceMetadata::Ldaps(_) => PROTO_LDAPS,
            ServiceMetadata::Rdp(_) => PROTO_RDP,
            ServiceMetadata::Mqtt(_) => PROTO_MQTT,
            ServiceMetadata::Kafka(_) => PROTO_KAFKA,
            ServiceMetadata::Jdwp(_) => PROTO_JDWP,
            ServiceMetadata::Echo(_) => PROTO_ECHO,
            ServiceMetadata::Snmp(_) => PROTO_SNMP,
            ServiceMetadata::Dns(_) => PROTO_DNS,
            ServiceMetadata::Ipmi(_) => PROTO_IPMI,
            ServiceMetadata::Stun(_) => PROTO_STUN,
            ServiceMetadata::Dhcp(_) => PROTO_DHCP,
            ServiceMetadata::Ipsec(_) => PROTO_IPSEC,
            ServiceMetadata::Ntp(_) => PROTO_NTP,
        }
    }

    /// Decode a raw metadata payload under the variant named by `protocol`.
    /// Unknown tags yield `None`; the caller keeps the payload opaque.
    pub fn from_raw(protocol: &str, raw: &Value) -> Option<ServiceMetadata> {
        fn decode<T: serde::de::DeserializeOwned>(raw: &Value) -> Option<T> {
            serde_json::from_value(raw.clone()).ok()
        }

        match protocol {
            PROTO_MINECRAFT_JAVA => decode(raw).map(ServiceMetadata::MinecraftJava),
            PROTO_HTTP => decode(raw).map(ServiceMetadata::Http),
            PROTO_HTTPS => decode(raw).map(ServiceMetadata::Https),
            PROTO_NETBIOS => decode(raw).map(ServiceMetadata::Netbios),
            PROTO_MODBUS => decode(raw).map(ServiceMetadata::Modbus),
            PROTO_MSSQL => decode(raw).map(ServiceMetadata::Mssql),
            PROTO_FTP => decode(raw).map(ServiceMetadata::Ftp),
            PROTO_SSH => decode(raw).map(ServiceMetadata::Ssh),
            PROTO_TELNET => decode(raw).map(ServiceMetadata::Telnet),
            PROTO_SMTP => decode(raw).map(ServiceMetadata::Smtp),
            PROTO_SMTPS => decode(raw).map(ServiceMetadata::Smtps),
            PROTO_POP3 => decode(raw).map(ServiceMetadata::Pop3),
            PROTO_POP3S => decode(raw).map(ServiceMetadata::Pop3s),
            PROTO_IMAP => decode(raw).map(ServiceMetadata::Imap),
            PROTO_IMAPS => decode(raw).map(ServiceMetadata::Imaps),
            PROTO_REDIS => decode(raw).map(ServiceMetadata::Redis),
            PROTO_MYSQL => decode(raw).map(ServiceMetadata::Mysql),
            PROTO_VNC => decode(raw).map(ServiceMetadata::Vnc),
            PROTO_RTSP => decode(raw).map(ServiceMetadata::Rtsp),
            PROTO_RSYNC => decode(raw).map(ServiceMetadata::Rsync),
            PROTO_POSTGRESQL => decode(raw).map(ServiceMetadata::Postgresql),
            PROTO_ORACLE => decode(raw).map(ServiceMetadata::Oracle),
            PROTO_LDAP => decode(raw).map(ServiceMetadata::Ldap),
            PROTO_LDAPS => decode(raw).map(ServiceMetadata::Ldaps),
            PROTO_RDP => decode(raw).map(ServiceMetadata::Rdp),
            PROTO_MQTT => decode(raw).map(ServiceMetadata::Mqtt),
            PROTO_KAFKA => decode(raw).map(ServiceMetadata::Kafka),
            PROTO_JDWP => decode(raw).map(ServiceMetadata::Jdwp),
            PROTO_ECHO => decode(raw).map(ServiceMetadata::Echo),
            PROTO_SNMP => decode(raw).map(ServiceMetadata::Snmp),
            PROTO_DNS => decode(raw).map(ServiceMetadata::Dns),
            PROTO_IPMI => decode(raw).map(ServiceMetadata::Ipmi),
            PROTO_STUN => decode(raw).map(ServiceMetadata::Stun),
            PROTO_DHCP => decode(raw).map(ServiceMetadata::Dhcp),
            PROTO_IPSEC => decode(raw).map(ServiceMetadata::Ipsec),
            PROTO_NTP => decode(raw).map(ServiceMetadata::Ntp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_variants() -> Vec<ServiceMetadata> {
        vec![
            ServiceMetadata::MinecraftJava(MinecraftJavaMetadata {
                version_name: "1.20.4".into(),
                protocol_version: 765,
                players_online: 3,
                players_max: 20,
                description: json!({"text": "hello"}),
                favicon: "data:image/png;base64,AAAA".into(),
                enforces_secure: true,
            }),
            ServiceMetadata::Http(HttpMetadata {
                status: "HTTP/1.1 200 OK".into(),
                headers: [("server".to_string(), "nginx/1.24.0".to_string())]
                    .into_iter()
                    .collect(),
                body_hash: "cbf29ce484222325".into(),
                technologies: vec!["nginx".into()],
            }),
            ServiceMetadata::Https(HttpMetadata::default()),
            ServiceMetadata::Netbios(NetbiosMetadata { netbios_name: "FILESRV".into() }),
            ServiceMetadata::Modbus(ModbusMetadata {
                vendor: Some("Schneider Electric".into()),
                product: Some("BMX".into()),
                revision: None,
            }),
            ServiceMetadata::Mssql(MssqlMetadata { version: Some("16.0.1000".into()) }),
            ServiceMetadata::Ftp(BannerMetadata::new("220 ProFTPD ready\r\n")),
            ServiceMetadata::Ssh(BannerMetadata::new("SSH-2.0-OpenSSH_9.6")),
            ServiceMetadata::Telnet(BannerMetadata::new("\u{fffd}\u{fffd}")),
            ServiceMetadata::Smtp(BannerMetadata::new("220 mail ESMTP")),
            ServiceMetadata::Smtps(BannerMetadata::new("220 mail ESMTP")),
            ServiceMetadata::Pop3(BannerMetadata::new("+OK POP3 ready")),
            ServiceMetadata::Pop3s(BannerMetadata::new("+OK POP3 ready")),
            ServiceMetadata::Imap(BannerMetadata::new("* OK IMAP4rev1")),
            ServiceMetadata::Imaps(BannerMetadata::new("* OK IMAP4rev1")),
            ServiceMetadata::Redis(BannerMetadata::new("+PONG")),
            ServiceMetadata::Mysql(BannerMetadata::new("8.0.36")),
            ServiceMetadata::Vnc(BannerMetadata::new("RFB 003.008")),
            ServiceMetadata::Rtsp(BannerMetadata::new("RTSP/1.0 200 OK")),
            ServiceMetadata::Rsync(BannerMetadata::new("@RSYNCD: 31.0")),
            ServiceMetadata::Postgresql(EmptyMetadata {}),
            ServiceMetadata::Oracle(EmptyMetadata {}),
            ServiceMetadata::Ldap(EmptyMetadata {}),
            ServiceMetadata::Ldaps(EmptyMetadata {}),
            ServiceMetadata::Rdp(EmptyMetadata {}),
            ServiceMetadata::Mqtt(EmptyMetadata {}),
            ServiceMetadata::Kafka(EmptyMetadata {}),
            ServiceMetadata::Jdwp(EmptyMetadata {}),
            ServiceMetadata::Echo(EmptyMetadata {}),
            ServiceMetadata::Snmp(EmptyMetadata {}),
            ServiceMetadata::Dns(EmptyMetadata {}),
            ServiceMetadata::Ipmi(EmptyMetadata {}),
            ServiceMetadata::Stun(EmptyMetadata {}),
            ServiceMetadata::Dhcp(EmptyMetadata {}),
            ServiceMetadata::Ipsec(EmptyMetadata {}),
            ServiceMetadata::Ntp(EmptyMetadata {}),
        ]
    }

    #[test]
    fn test_every_variant_round_trips_through_raw() {
        for metadata in sample_variants() {
            let raw = serde_json::to_value(&metadata).unwrap();
            let decoded = ServiceMetadata::from_raw(metadata.protocol(), &raw)
                .unwrap_or_else(|| panic!("no decode for {}", metadata.protocol()));
            assert_eq!(decoded, metadata, "round-trip failed for {}", metadata.protocol());
        }
    }

    #[test]
    fn test_unknown_tag_is_opaque() {
        assert!(ServiceMetadata::from_raw("gopher", &json!({})).is_none());
    }

    #[test]
    fn test_minecraft_field_names_follow_wire_contract() {
        let raw = serde_json::to_value(&MinecraftJavaMetadata::default()).unwrap();
        let obj = raw.as_object().unwrap();
        for key in ["versionName", "protocolVersion", "playersOnline", "playersMax", "enforcesSecure"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_protocol_tags_are_unique() {
        let mut tags: Vec<&str> = sample_variants().iter().map(|m| m.protocol()).collect();
        let before = tags.len();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), before);
    }
}
