//! HTTP and HTTPS probes: one minimal GET, headers parsed, body run through
//! the technology fingerprint table.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::probe::metadata::HttpMetadata;
use crate::probe::wire::HTTP_RECV_CAP;
use crate::probe::{ProbeConn, ProbeError, Service, ServiceMetadata, ServiceProbe, Target, Transport};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; portprobe/0.1)";

/// Header needles: (header name, needle, technology tag).
const HEADER_SIGNS: &[(&str, &str, &str)] = &[
    ("server", "nginx", "nginx"),
    ("server", "apache", "apache"),
    ("server", "microsoft-iis", "iis"),
    ("server", "cloudflare", "cloudflare"),
    ("server", "gunicorn", "gunicorn"),
    ("server", "jetty", "jetty"),
    ("server", "coyote", "tomcat"),
    ("server", "caddy", "caddy"),
    ("server", "lighttpd", "lighttpd"),
    ("x-powered-by", "php", "php"),
    ("x-powered-by", "express", "express"),
    ("x-powered-by", "asp.net", "aspnet"),
    ("x-powered-by", "next.js", "nextjs"),
    ("x-generator", "drupal", "drupal"),
];

/// Body needles: (needle, technology tag). Matched against the lowercased body.
const BODY_SIGNS: &[(&str, &str)] = &[
    ("wp-content", "wordpress"),
    ("wp-includes", "wordpress"),
    ("/sites/default/files", "drupal"),
    ("joomla", "joomla"),
    ("data-reactroot", "react"),
    ("ng-version", "angular"),
    ("grafana", "grafana"),
    ("jenkins", "jenkins"),
    ("phpmyadmin", "phpmyadmin"),
    ("kibana", "kibana"),
];

pub(crate) struct ParsedResponse {
    pub status: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Match the response against the fingerprint tables. Tags come back sorted
/// and deduplicated so emitted metadata is stable.
pub(crate) fn fingerprint_technologies(
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> Vec<String> {
    let mut tags = Vec::new();

    for (header, needle, tag) in HEADER_SIGNS {
        if let Some(value) = headers.get(*header) {
            if value.to_lowercase().contains(needle) {
                tags.push(tag.to_string());
            }
        }
    }

    let body_text = String::from_utf8_lossy(body).to_lowercase();
    for (needle, tag) in BODY_SIGNS {
        if body_text.contains(needle) {
            tags.push(tag.to_string());
        }
    }

    tags.sort();
    tags.dedup();
    tags
}

/// 64-bit FNV-1a over the body bytes, hex encoded. Cheap, allocation-free
/// and stable; this is a correlation key, not a cryptographic digest.
pub(crate) fn body_digest(body: &[u8]) -> String {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let hash = body
        .iter()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME));
    format!("{hash:016x}")
}

pub(crate) fn parse_response(raw: &[u8]) -> Option<ParsedResponse> {
    if !raw.starts_with(b"HTTP/") {
        return None;
    }

    let header_end = crate::probe::wire::find_subsequence(raw, b"\r\n\r\n");
    let head = String::from_utf8_lossy(match header_end {
        Some(end) => &raw[..end],
        None => raw,
    });

    let mut lines = head.lines();
    let status = lines.next()?.trim_end().to_string();

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_lowercase();
        let value = value.trim().to_string();
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let body = header_end.map(|end| raw[end + 4..].to_vec()).unwrap_or_default();
    Some(ParsedResponse { status, headers, body })
}

/// Send the GET and read until the blank line separating headers from body
/// shows up, or the shared deadline runs out.
async fn fetch(
    conn: &mut ProbeConn,
    deadline: Duration,
    host: &str,
) -> Result<Vec<u8>, ProbeError> {
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\n\r\n"
    );

    let started = Instant::now();
    conn.send(request.as_bytes(), deadline).await?;

    let mut response = Vec::new();
    loop {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        let chunk = conn.recv_cap(HTTP_RECV_CAP, remaining).await?;
        if chunk.is_empty() {
            break;
        }
        response.extend_from_slice(&chunk);
        if crate::probe::wire::find_subsequence(&response, b"\r\n\r\n").is_some() {
            break;
        }
    }
    Ok(response)
}

fn build_metadata(parsed: ParsedResponse) -> (HttpMetadata, Option<String>) {
    let version = parsed.headers.get("server").cloned();
    let technologies = fingerprint_technologies(&parsed.headers, &parsed.body);
    let metadata = HttpMetadata {
        status: parsed.status,
        body_hash: body_digest(&parsed.body),
        headers: parsed.headers,
        technologies,
    };
    (metadata, version)
}

pub struct HttpProbe;

#[async_trait]
impl ServiceProbe for HttpProbe {
    fn name(&self) -> &'static str {
        "http"
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn priority(&self) -> i32 {
        70
    }

    fn port_priority(&self, port: u16) -> bool {
        matches!(port, 80 | 8000 | 8080 | 8888)
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let raw = fetch(conn, deadline, &target.server_name()).await?;
        let Some(parsed) = parse_response(&raw) else {
            return Ok(None);
        };
        let (metadata, version) = build_metadata(parsed);
        Ok(Some(Service::from_metadata(
            target,
            ServiceMetadata::Http(metadata),
            false,
            version,
            Transport::Tcp,
        )))
    }
}

pub struct HttpsProbe;

#[async_trait]
impl ServiceProbe for HttpsProbe {
    fn name(&self) -> &'static str {
        "https"
    }

    fn transport(&self) -> Transport {
        Transport::TcpTls
    }

    fn priority(&self) -> i32 {
        71
    }

    fn port_priority(&self, port: u16) -> bool {
        port == 443 || port == 8443
    }

    async fn run(
        &self,
        conn: &mut ProbeConn,
        deadline: Duration,
        target: &Target,
    ) -> Result<Option<Service>, ProbeError> {
        let raw = fetch(conn, deadline, &target.server_name()).await?;
        let Some(parsed) = parse_response(&raw) else {
            return Ok(None);
        };
        let (metadata, version) = build_metadata(parsed);
        Ok(Some(Service::from_metadata(
            target,
            ServiceMetadata::Https(metadata),
            true,
            version,
            Transport::TcpTls,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nServer: nginx/1.24.0\r\nContent-Type: text/html\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n<html><body class=\"wp-content\"></body></html>";

    #[test]
    fn test_parse_response_splits_status_headers_body() {
        let parsed = parse_response(RESPONSE).unwrap();
        assert_eq!(parsed.status, "HTTP/1.1 200 OK");
        assert_eq!(parsed.headers.get("server").unwrap(), "nginx/1.24.0");
        assert_eq!(parsed.headers.get("set-cookie").unwrap(), "a=1, b=2");
        assert!(parsed.body.starts_with(b"<html>"));
    }

    #[test]
    fn test_parse_response_rejects_non_http() {
        assert!(parse_response(b"SSH-2.0-OpenSSH_9.6\r\n").is_none());
        assert!(parse_response(b"").is_none());
    }

    #[test]
    fn test_technology_fingerprints() {
        let parsed = parse_response(RESPONSE).unwrap();
        let tags = fingerprint_technologies(&parsed.headers, &parsed.body);
        assert_eq!(tags, vec!["nginx".to_string(), "wordpress".to_string()]);
    }

    #[test]
    fn test_body_digest_is_stable() {
        // FNV-1a offset basis for the empty input.
        assert_eq!(body_digest(b""), "cbf29ce484222325");
        assert_eq!(body_digest(b"hello"), body_digest(b"hello"));
        assert_ne!(body_digest(b"hello"), body_digest(b"hello!"));
    }
}
