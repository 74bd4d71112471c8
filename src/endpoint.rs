//! Endpoint model: target parsing, classification, and applicable-check
//! derivation.
//!
//! An endpoint is classified into one of four variants from its raw form:
//!
//! - `8.8.8.8`                 bare IP literal
//! - `1.1.1.1:53`              IP plus port (TCP by default, UDP on request)
//! - `google.com`              DNS hostname
//! - `https://example.com/up`  HTTP(S) URL
//!
//! The variant alone determines which probe layers apply; everything
//! downstream (scheduler fan-out, primary-check selection) works off the
//! derived [`Endpoint::checks`] set.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One probe layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckKind {
    Dns,
    Icmp,
    Tcp,
    Udp,
    Http,
}

impl CheckKind {
    /// Upper-case short name used in the latency column and problem lines.
    pub fn short_name(self) -> &'static str {
        match self {
            CheckKind::Dns => "DNS",
            CheckKind::Icmp => "ICMP",
            CheckKind::Tcp => "TCP",
            CheckKind::Udp => "UDP",
            CheckKind::Http => "HTTP",
        }
    }

    /// Display priority for primary-check selection: Http > Tcp > Udp > Dns > Icmp.
    pub fn display_priority(self) -> u8 {
        match self {
            CheckKind::Http => 5,
            CheckKind::Tcp => 4,
            CheckKind::Udp => 3,
            CheckKind::Dns => 2,
            CheckKind::Icmp => 1,
        }
    }

    /// Suppression level: a failure is hidden when a strictly higher level
    /// succeeded. Tcp and Udp share a level.
    pub fn suppression_level(self) -> u8 {
        match self {
            CheckKind::Http => 3,
            CheckKind::Tcp | CheckKind::Udp => 2,
            CheckKind::Dns => 1,
            CheckKind::Icmp => 0,
        }
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dns" => Ok(CheckKind::Dns),
            "icmp" => Ok(CheckKind::Icmp),
            "tcp" => Ok(CheckKind::Tcp),
            "udp" => Ok(CheckKind::Udp),
            "http" => Ok(CheckKind::Http),
            other => Err(format!("unknown check type {other:?}")),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Address-family restriction for DNS filtering and ICMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersionPref {
    #[default]
    Any,
    V4,
    V6,
}

impl IpVersionPref {
    pub fn admits(self, addr: IpAddr) -> bool {
        match self {
            IpVersionPref::Any => true,
            IpVersionPref::V4 => addr.is_ipv4(),
            IpVersionPref::V6 => addr.is_ipv6(),
        }
    }
}

/// Transport protocol for IP:port targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

/// Endpoint variant. The variant fully determines the applicable checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    Ip(IpAddr),
    IpPort {
        addr: IpAddr,
        port: u16,
        protocol: PortProtocol,
    },
    Domain {
        host: String,
    },
    Http {
        url: String,
        scheme: String,
        host: String,
        port: u16,
        path: String,
    },
}

/// One raw entry from `endpoints.targets`: either a bare string or a
/// structured record with overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawTarget {
    Url(String),
    Detailed {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip_version: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_check_type: Option<String>,
    },
}

/// A fully classified monitoring target.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Stable identifier derived from the normalized target; timeline key.
    pub id: String,
    /// Display name; defaults to the normalized target.
    pub label: String,
    pub kind: EndpointKind,
    pub ip_version: IpVersionPref,
    /// Applicable probe layers, in display-priority order (lowest first).
    pub checks: Vec<CheckKind>,
    pub primary_override: Option<CheckKind>,
}

impl Endpoint {
    /// Parse one raw entry. `index` is only used to report errors.
    pub fn from_raw(raw: &RawTarget, index: usize) -> Result<Endpoint, ConfigError> {
        let (url, name, protocol, ip_version, primary) = match raw {
            RawTarget::Url(u) => (u.as_str(), None, None, None, None),
            RawTarget::Detailed {
                url,
                name,
                protocol,
                ip_version,
                primary_check_type,
            } => (
                url.as_str(),
                name.as_deref(),
                protocol.as_deref(),
                *ip_version,
                primary_check_type.as_deref(),
            ),
        };

        let url = url.trim();
        if url.is_empty() {
            return Err(ConfigError::entry(index, "empty target"));
        }

        let ip_version = match ip_version {
            None => IpVersionPref::Any,
            Some(4) => IpVersionPref::V4,
            Some(6) => IpVersionPref::V6,
            Some(other) => {
                return Err(ConfigError::entry(
                    index,
                    format!("ip_version must be 4 or 6, got {other}"),
                ))
            }
        };

        let protocol = match protocol {
            None => None,
            Some("tcp") => Some(PortProtocol::Tcp),
            Some("udp") => Some(PortProtocol::Udp),
            Some(other) => {
                return Err(ConfigError::entry(
                    index,
                    format!("unknown protocol {other:?} (expected \"tcp\" or \"udp\")"),
                ))
            }
        };

        let kind = classify(url, protocol).map_err(|msg| ConfigError::entry(index, msg))?;

        if protocol.is_some() && !matches!(kind, EndpointKind::IpPort { .. }) {
            return Err(ConfigError::entry(
                index,
                "protocol override only applies to ip:port targets",
            ));
        }

        let literal = match &kind {
            EndpointKind::Ip(addr) => Some(*addr),
            EndpointKind::IpPort { addr, .. } => Some(*addr),
            _ => None,
        };
        if let Some(addr) = literal {
            if !ip_version.admits(addr) {
                return Err(ConfigError::entry(
                    index,
                    format!("ip_version conflicts with literal address {addr}"),
                ));
            }
        }

        let id = normalized_id(&kind);
        let label = name.map(str::to_owned).unwrap_or_else(|| display_name(&kind));
        let checks = applicable_checks(&kind);

        let primary_override = match primary {
            None => None,
            Some(s) => {
                let kind_requested: CheckKind = s
                    .parse()
                    .map_err(|msg: String| ConfigError::entry(index, msg))?;
                if !checks.contains(&kind_requested) {
                    return Err(ConfigError::entry(
                        index,
                        format!(
                            "primary_check_type {:?} is not applicable to this target \
                             (applicable: {})",
                            s,
                            checks
                                .iter()
                                .map(|c| c.short_name())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    ));
                }
                Some(kind_requested)
            }
        };

        Ok(Endpoint {
            id,
            label,
            kind,
            ip_version,
            checks,
            primary_override,
        })
    }

    /// Hostname used for DNS and ICMP probes on hostname-based variants.
    pub fn host(&self) -> Option<&str> {
        match &self.kind {
            EndpointKind::Domain { host } | EndpointKind::Http { host, .. } => Some(host),
            _ => None,
        }
    }

    /// The IP literal for address-based variants.
    pub fn literal_ip(&self) -> Option<IpAddr> {
        match &self.kind {
            EndpointKind::Ip(addr) => Some(*addr),
            EndpointKind::IpPort { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// TCP ports probed each tick. Domains probe both well-known web ports.
    pub fn tcp_ports(&self) -> Vec<u16> {
        match &self.kind {
            EndpointKind::IpPort {
                port,
                protocol: PortProtocol::Tcp,
                ..
            } => vec![*port],
            EndpointKind::Domain { .. } => vec![80, 443],
            EndpointKind::Http { port, .. } => vec![*port],
            _ => Vec::new(),
        }
    }

    pub fn udp_port(&self) -> Option<u16> {
        match &self.kind {
            EndpointKind::IpPort {
                port,
                protocol: PortProtocol::Udp,
                ..
            } => Some(*port),
            _ => None,
        }
    }

    pub fn http_url(&self) -> Option<&str> {
        match &self.kind {
            EndpointKind::Http { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// Classify a raw target string. Order matters: URL schemes first, then
/// `host:port` forms, then bare IP literals, and finally DNS hostnames.
fn classify(url: &str, protocol: Option<PortProtocol>) -> Result<EndpointKind, String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return parse_http_url(url);
    }

    // Bracketed IPv6 with port: [::1]:8080
    if let Some(rest) = url.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| format!("malformed bracketed address {url:?}"))?;
        let addr: IpAddr = host
            .parse()
            .map_err(|_| format!("invalid IPv6 literal {host:?}"))?;
        let port = parse_port(port)?;
        return Ok(EndpointKind::IpPort {
            addr,
            port,
            protocol: protocol.unwrap_or_default(),
        });
    }

    // IPv4 with port. A lone colon distinguishes `1.1.1.1:53` from a bare
    // IPv6 literal, which always contains at least two.
    if url.matches(':').count() == 1 {
        let (host, port) = url.split_once(':').expect("counted one colon");
        if let Ok(addr) = host.parse::<IpAddr>() {
            let port = parse_port(port)?;
            return Ok(EndpointKind::IpPort {
                addr,
                port,
                protocol: protocol.unwrap_or_default(),
            });
        }
        return Err(format!("malformed target {url:?}"));
    }

    if let Ok(addr) = url.parse::<IpAddr>() {
        return Ok(EndpointKind::Ip(addr));
    }

    if !is_plausible_hostname(url) {
        return Err(format!("malformed target {url:?}"));
    }

    Ok(EndpointKind::Domain {
        host: url.to_ascii_lowercase(),
    })
}

/// Minimal URL decomposition for http/https targets. Only the pieces the
/// probes need: scheme, host, optional port, path.
fn parse_http_url(url: &str) -> Result<EndpointKind, String> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| format!("malformed URL {url:?}"))?;
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        other => return Err(format!("unsupported scheme {other:?}")),
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(format!("URL {url:?} has no host"));
    }

    let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
        let (host, after) = v6
            .split_once(']')
            .ok_or_else(|| format!("malformed IPv6 authority in {url:?}"))?;
        match after.strip_prefix(':') {
            Some(p) => (host.to_string(), parse_port(p)?),
            None if after.is_empty() => (host.to_string(), default_port),
            None => return Err(format!("malformed IPv6 authority in {url:?}")),
        }
    } else if let Some((host, port)) = authority.rsplit_once(':') {
        (host.to_ascii_lowercase(), parse_port(port)?)
    } else {
        (authority.to_ascii_lowercase(), default_port)
    };

    if host.is_empty() {
        return Err(format!("URL {url:?} has no host"));
    }

    Ok(EndpointKind::Http {
        url: url.to_string(),
        scheme: scheme.to_string(),
        host,
        port,
        path: path.to_string(),
    })
}

fn parse_port(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(format!("invalid port {s:?}")),
    }
}

fn is_plausible_hostname(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 253
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        && !s.starts_with('.')
        && !s.ends_with('.')
}

/// The exhaustive variant-to-checks table.
fn applicable_checks(kind: &EndpointKind) -> Vec<CheckKind> {
    match kind {
        EndpointKind::Ip(_) => vec![CheckKind::Icmp],
        EndpointKind::IpPort {
            protocol: PortProtocol::Tcp,
            ..
        } => vec![CheckKind::Icmp, CheckKind::Tcp],
        EndpointKind::IpPort {
            protocol: PortProtocol::Udp,
            ..
        } => vec![CheckKind::Icmp, CheckKind::Udp],
        EndpointKind::Domain { .. } => vec![CheckKind::Icmp, CheckKind::Dns, CheckKind::Tcp],
        EndpointKind::Http { .. } => vec![
            CheckKind::Icmp,
            CheckKind::Dns,
            CheckKind::Tcp,
            CheckKind::Http,
        ],
    }
}

fn normalized_id(kind: &EndpointKind) -> String {
    match kind {
        EndpointKind::Ip(addr) => addr.to_string(),
        EndpointKind::IpPort {
            addr,
            port,
            protocol,
        } => {
            let proto = match protocol {
                PortProtocol::Tcp => "tcp",
                PortProtocol::Udp => "udp",
            };
            match addr {
                IpAddr::V4(v4) => format!("{v4}:{port}/{proto}"),
                IpAddr::V6(v6) => format!("[{v6}]:{port}/{proto}"),
            }
        }
        EndpointKind::Domain { host } => host.clone(),
        EndpointKind::Http {
            scheme, host, port, path, ..
        } => format!("{scheme}://{host}:{port}{path}"),
    }
}

fn display_name(kind: &EndpointKind) -> String {
    match kind {
        EndpointKind::Ip(addr) => addr.to_string(),
        EndpointKind::IpPort { addr, port, .. } => match addr {
            IpAddr::V4(v4) => format!("{v4}:{port}"),
            IpAddr::V6(v6) => format!("[{v6}]:{port}"),
        },
        EndpointKind::Domain { host } => host.clone(),
        EndpointKind::Http { host, .. } => host.clone(),
    }
}

/// Parse the whole target list, failing on the first bad entry.
pub fn parse_targets(raw: &[RawTarget]) -> Result<Vec<Endpoint>, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::Invalid(
            "no targets configured in endpoints.targets".into(),
        ));
    }
    raw.iter()
        .enumerate()
        .map(|(i, entry)| Endpoint::from_raw(entry, i))
        .collect()
}
