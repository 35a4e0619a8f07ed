//! Target and port expression parsing for the CLI surface.

use std::net::{IpAddr, Ipv4Addr};

use anyhow::{anyhow, Result};
use ipnet::IpNet;

const MAX_RANGE: u32 = 10_000;

/// Expand a comma-separated target expression: plain addresses, hostnames,
/// CIDR blocks and `a.b.c.d-a.b.c.e` ranges.
pub fn parse_targets(spec: &str) -> Result<Vec<IpAddr>> {
    let mut targets = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('/') {
            targets.extend(parse_cidr(part)?);
        } else if part.contains('-') && !part.contains(':') {
            targets.extend(parse_range(part)?);
        } else {
            targets.push(parse_single(part)?);
        }
    }

    if targets.is_empty() {
        return Err(anyhow!("target is empty"));
    }

    targets.sort();
    targets.dedup();
    Ok(targets)
}

fn parse_cidr(cidr: &str) -> Result<Vec<IpAddr>> {
    let network: IpNet = cidr
        .parse()
        .map_err(|_| anyhow!("invalid CIDR notation: {}", cidr))?;

    match network {
        IpNet::V4(net) => Ok(net.hosts().map(IpAddr::V4).collect()),
        // IPv6 blocks are passed through host-by-host with a hard cap; there
        // is no address arithmetic to scan them exhaustively.
        IpNet::V6(net) => Ok(net.hosts().take(1024).map(IpAddr::V6).collect()),
    }
}

fn parse_range(range: &str) -> Result<Vec<IpAddr>> {
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| anyhow!("invalid range: {}", range))?;
    let start: IpAddr = start.trim().parse().map_err(|_| anyhow!("invalid start IP: {}", start))?;
    let end: IpAddr = end.trim().parse().map_err(|_| anyhow!("invalid end IP: {}", end))?;

    match (start, end) {
        (IpAddr::V4(start), IpAddr::V4(end)) => {
            let (start, end) = (u32::from(start), u32::from(end));
            if start > end {
                return Err(anyhow!("range start must not exceed its end"));
            }
            if end - start > MAX_RANGE {
                return Err(anyhow!("range too large (max {} addresses)", MAX_RANGE));
            }
            Ok((start..=end).map(|ip| IpAddr::V4(Ipv4Addr::from(ip))).collect())
        }
        _ => Err(anyhow!("ranges are IPv4 only")),
    }
}

fn parse_single(target: &str) -> Result<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    use std::net::ToSocketAddrs;
    format!("{target}:0")
        .to_socket_addrs()
        .map_err(|_| anyhow!("failed to resolve hostname: {}", target))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow!("no address found for hostname: {}", target))
}

/// Expand a port expression: `80`, `22,80,443`, `8000-8100`, `-` for all.
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    if spec.trim() == "-" {
        return Ok((1..=u16::MAX).collect());
    }

    let mut ports = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start.trim().parse().map_err(|_| anyhow!("invalid port: {}", start))?;
            let end: u16 = end.trim().parse().map_err(|_| anyhow!("invalid port: {}", end))?;
            if start > end || start == 0 {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse().map_err(|_| anyhow!("invalid port: {}", part))?;
            if port == 0 {
                return Err(anyhow!("port 0 is not scannable"));
            }
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(anyhow!("no ports to scan"));
    }

    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}
