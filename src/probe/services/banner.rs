//! Probes for services that announce themselves with a greeting line:
//! receive up to one chunk within the deadline, match a grammar anchored at
//! offset 0, extract the banner.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::probe::metadata::BannerMetadata;
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

fn ftp_grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{3}[- ](.*)\r").unwrap())
}

fn ssh_grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^SSH-\d\.\d-([^\r\n]+)").unwrap())
}

pub struct FtpProbe;

#[async_trait]
impl ServiceProbe for FtpProbe {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        10
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 21
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.recv(deadline).await?;
        if response.is_empty() {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&response);
        if ftp_grammar().captures(&text).is_none() {
            return Ok(None);
        }

        let metadata = ServiceMetadata::Ftp(BannerMetadata::new(text.into_owned()));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct SshProbe;

#[async_trait]
impl ServiceProbe for SshProbe {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        20
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 22
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.recv(deadline).await?;
        if response.is_empty() {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&response);
        let Some(captures) = ssh_grammar().captures(&text) else {
            return Ok(None);
        };
        let version = captures.get(1).map(|m| m.as_str().to_string());

        let banner = text.lines().next().unwrap_or_default().to_string();
        let metadata = ServiceMetadata::Ssh(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, version, Transport::Tcp)))
    }
}

pub struct TelnetProbe;

#[async_trait]
impl ServiceProbe for TelnetProbe {
    fn name(&self) -> &'static str {
        "telnet"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        30
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 23
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.recv(deadline).await?;
        // Telnet servers open with IAC option negotiation (0xFF verb option).
        if response.len() < 3 || response[0] != 0xFF {
            return Ok(None);
        }

        let metadata =
            ServiceMetadata::Telnet(BannerMetadata::new(String::from_utf8_lossy(&response).into_owned()));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct VncProbe;

#[async_trait]
impl ServiceProbe for VncProbe {
    fn name(&self) -> &'static str {
        "vnc"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        150
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 5900 || port == 5901
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.recv(deadline).await?;
        let text = String::from_utf8_lossy(&response);
        if !text.starts_with("RFB ") {
            return Ok(None);
        }

        let banner = text.lines().next().unwrap_or_default().to_string();
        let version = banner.strip_prefix("RFB ").map(|v| v.trim().to_string());
        let metadata = ServiceMetadata::Vnc(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, version, Transport::Tcp)))
    }
}

pub struct RsyncProbe;

#[async_trait]
impl ServiceProbe for RsyncProbe {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        170
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 873
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let response = conn.recv(deadline).await?;
        let text = String::from_utf8_lossy(&response);
        if !text.starts_with("@RSYNCD:") {
            return Ok(None);
        }

        let banner = text.lines().next().unwrap_or_default().to_string();
        let version = banner.strip_prefix("@RSYNCD:").map(|v| v.trim().to_string());
        let metadata = ServiceMetadata::Rsync(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, version, Transport::Tcp)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ftp_grammar_matches_status_banner() {
        let captures = ftp_grammar().captures("220 ProFTPD 1.3.6 Server ready\r\n").unwrap();
        assert_eq!(captures.get(1).unwrap().as_str(), "ProFTPD 1.3.6 Server ready");
        assert!(ftp_grammar().captures("not ftp at all").is_none());
        // Anchored: a status code later in the stream does not count.
        assert!(ftp_grammar().captures("x220 nope\r\n").is_none());
    }

    #[test]
    fn test_ftp_grammar_accepts_multiline_marker() {
        assert!(ftp_grammar().captures("220-welcome\r\n220 ready\r\n").is_some());
    }

    #[test]
    fn test_ssh_grammar_extracts_software_version() {
        let captures = ssh_grammar().captures("SSH-2.0-OpenSSH_9.6p1 Ubuntu\r\n").unwrap();
        assert_eq!(captures.get(1).unwrap().as_str(), "OpenSSH_9.6p1 Ubuntu");
        assert!(ssh_grammar().captures("HTTP/1.1 200 OK").is_none());
    }
}
