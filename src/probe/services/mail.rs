//! Mail protocol probes. Each family has a plaintext and an implicit-TLS
//! variant; the dispatcher hands the TLS variants an already-negotiated
//! stream, so the exchanges below are identical on both.

use std::time::Duration;

use async_trait::async_trait;

use crate::probe::metadata::BannerMetadata;
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

/// SMTP greeting plus an EHLO round-trip. A lone `220` banner is not enough:
/// FTP speaks the same status grammar.
async fn smtp_exchange(
    conn: &mut ProbeConn,
    deadline: Duration,
) -> Result<Option<String>, ProbeError> {
    let greeting = conn.recv(deadline).await?;
    let banner = String::from_utf8_lossy(&greeting);
    if !banner.starts_with("220") {
        return Ok(None);
    }
    let banner = banner.lines().next().unwrap_or_default().to_string();

    let reply = conn.send_recv(b"EHLO portprobe.local\r\n", deadline).await?;
    if !reply.starts_with(b"250") {
        return Ok(None);
    }
    Ok(Some(banner))
}

async fn pop3_exchange(
    conn: &mut ProbeConn,
    deadline: Duration,
) -> Result<Option<String>, ProbeError> {
    let greeting = conn.recv(deadline).await?;
    let banner = String::from_utf8_lossy(&greeting);
    if !banner.starts_with("+OK") {
        return Ok(None);
    }
    Ok(Some(banner.lines().next().unwrap_or_default().to_string()))
}

async fn imap_exchange(
    conn: &mut ProbeConn,
    deadline: Duration,
) -> Result<Option<String>, ProbeError> {
    let greeting = conn.recv(deadline).await?;
    let banner = String::from_utf8_lossy(&greeting);
    if !banner.starts_with("* OK") {
        return Ok(None);
    }
    Ok(Some(banner.lines().next().unwrap_or_default().to_string()))
}

pub struct SmtpProbe;

#[async_trait]
impl ServiceProbe for SmtpProbe {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        40
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 25 || port == 587
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let Some(banner) = smtp_exchange(conn, deadline).await? else {
            return Ok(None);
        };
        let metadata = ServiceMetadata::Smtp(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct SmtpsProbe;

#[async_trait]
impl ServiceProbe for SmtpsProbe {
    fn name(&self) -> &'static str {
        "smtps"
    }

    fn transport(&self) -> Transport {
        Transport::TcpTls
    }

    fn priority(&self) -> i32 {
        41
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 465
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let Some(banner) = smtp_exchange(conn, deadline).await? else {
            return Ok(None);
        };
        let metadata = ServiceMetadata::Smtps(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, true, None, Transport::TcpTls)))
    }
}

pub struct Pop3Probe;

#[async_trait]
impl ServiceProbe for Pop3Probe {
    fn name(&self) -> &'static str {
        "pop3"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        50
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 110
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let Some(banner) = pop3_exchange(conn, deadline).await? else {
            return Ok(None);
        };
        let metadata = ServiceMetadata::Pop3(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct Pop3sProbe;

#[async_trait]
impl ServiceProbe for Pop3sProbe {
    fn name(&self) -> &'static str {
        "pop3s"
    }

    fn transport(&self) -> Transport {
        Transport::TcpTls
    }

    fn priority(&self) -> i32 {
        51
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 995
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let Some(banner) = pop3_exchange(conn, deadline).await? else {
            return Ok(None);
        };
        let metadata = ServiceMetadata::Pop3s(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, true, None, Transport::TcpTls)))
    }
}

pub struct ImapProbe;

#[async_trait]
impl ServiceProbe for ImapProbe {
    fn name(&self) -> &'static str {
        "imap"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        60
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 143
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let Some(banner) = imap_exchange(conn, deadline).await? else {
            return Ok(None);
        };
        let metadata = ServiceMetadata::Imap(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, false, None, Transport::Tcp)))
    }
}

pub struct ImapsProbe;

#[async_trait]
impl ServiceProbe for ImapsProbe {
    fn name(&self) -> &'static str {
        "imaps"
    }

    fn transport(&self) -> Transport {
        Transport::TcpTls
    }

    fn priority(&self) -> i32 {
        61
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 993
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let Some(banner) = imap_exchange(conn, deadline).await? else {
            return Ok(None);
        };
        let metadata = ServiceMetadata::Imaps(BannerMetadata::new(banner));
        Ok(Some(Service::from_metadata(target, metadata, true, None, Transport::TcpTls)))
    }
}
