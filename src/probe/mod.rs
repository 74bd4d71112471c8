//! Probe adapters: one module per check kind, a shared [`Prober`] owning the
//! process-wide resources (HTTP client, DNS resolvers, ICMP capability), and
//! the typed [`CheckResult`] every adapter reduces to.
//!
//! Adapters never fail upward. Every outcome, including timeouts and denied
//! capabilities, is a [`CheckResult`] with a [`ProbeStatus`]; only the
//! scheduler decides what a failure means for the endpoint.

mod dns;
mod http;
mod icmp;
mod tcp;
mod udp;

pub use icmp::detect_icmp_capability;

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::Config;
use crate::endpoint::{CheckKind, IpVersionPref};

/// Detail string placed on results synthesized for layers that could not run
/// because name resolution failed that tick. The problems view filters on it.
pub const DNS_CASCADE_DETAIL: &str = "dns failed";

/// Outcome classification for a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    Timeout,
    Refused,
    Unreachable,
    NameError,
    /// Protocol-level failure; carries the HTTP status when one exists.
    ProtocolError { code: Option<u16> },
    CapabilityDenied,
    Canceled,
}

impl ProbeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeStatus::Ok)
    }

    /// A completed, unsuccessful probe. Canceled probes never completed and
    /// count as neither success nor failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, ProbeStatus::Ok | ProbeStatus::Canceled)
    }
}

/// One probe outcome. Owned by the bucket it lands in.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub started_at: Instant,
    pub wall_time: DateTime<Utc>,
    /// Wall latency in milliseconds; present only on success.
    pub latency_ms: Option<f64>,
    pub status: ProbeStatus,
    /// Short human-readable note for logs and problem lines.
    pub detail: String,
    /// Addresses from a successful DNS probe, family-filtered, in answer order.
    pub resolved: Vec<IpAddr>,
    /// A UDP "no rejection observed" success; rendered distinctly.
    pub unverified: bool,
}

impl CheckResult {
    pub fn ok(kind: CheckKind, started_at: Instant, latency_ms: f64) -> Self {
        CheckResult {
            kind,
            started_at,
            wall_time: Utc::now(),
            // Negative latencies only arise from clock trouble; clamp.
            latency_ms: Some(latency_ms.max(0.0)),
            status: ProbeStatus::Ok,
            detail: String::new(),
            resolved: Vec::new(),
            unverified: false,
        }
    }

    pub fn fail(
        kind: CheckKind,
        started_at: Instant,
        status: ProbeStatus,
        detail: impl Into<String>,
    ) -> Self {
        CheckResult {
            kind,
            started_at,
            wall_time: Utc::now(),
            latency_ms: None,
            status,
            detail: detail.into(),
            resolved: Vec::new(),
            unverified: false,
        }
    }

    pub fn canceled(kind: CheckKind, started_at: Instant) -> Self {
        Self::fail(kind, started_at, ProbeStatus::Canceled, "canceled")
    }

    /// Synthesized failure for a layer that depends on name resolution.
    pub fn dns_cascade(kind: CheckKind, started_at: Instant) -> Self {
        Self::fail(
            kind,
            started_at,
            ProbeStatus::Unreachable,
            DNS_CASCADE_DETAIL,
        )
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Canonical message for the problems block, e.g. `HTTP 503`,
    /// `ICMP unreachable`, `DNS timeout`.
    pub fn problem_message(&self) -> String {
        let kind = self.kind.short_name();
        match &self.status {
            ProbeStatus::Ok | ProbeStatus::Canceled => String::new(),
            ProbeStatus::Timeout => format!("{kind} timeout"),
            ProbeStatus::Refused => format!("{kind} refused"),
            ProbeStatus::Unreachable => format!("{kind} unreachable"),
            ProbeStatus::NameError => format!("{kind} name error"),
            ProbeStatus::ProtocolError { code: Some(code) } => format!("{kind} {code}"),
            ProbeStatus::ProtocolError { code: None } => format!("{kind} error"),
            ProbeStatus::CapabilityDenied => format!("{kind} unavailable"),
        }
    }
}

/// Work order for a single probe attempt.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    Dns {
        host: String,
        family: IpVersionPref,
    },
    Icmp {
        addr: IpAddr,
    },
    /// Connect to each port; the results merge into one TCP layer outcome.
    Tcp {
        addr: IpAddr,
        ports: Vec<u16>,
    },
    Udp {
        addr: IpAddr,
        port: u16,
    },
    Http {
        url: String,
    },
}

/// Process-scoped probe resources, shared by every endpoint and tick.
pub struct Prober {
    http_client: reqwest::Client,
    resolver: dns::Resolvers,
    icmp_available: bool,
}

impl Prober {
    pub fn new(cfg: &Config, icmp_available: bool) -> anyhow::Result<Self> {
        Ok(Prober {
            http_client: http::build_client(cfg.timeout)?,
            resolver: dns::Resolvers::new(&cfg.custom_dns_servers)?,
            icmp_available,
        })
    }

    pub fn icmp_available(&self) -> bool {
        self.icmp_available
    }

    /// Run one probe to completion, honoring `deadline`. Never panics the
    /// caller: internal errors come back as `ProtocolError`.
    pub async fn probe(&self, target: ProbeTarget, deadline: Instant) -> CheckResult {
        let started_at = Instant::now();
        match target {
            ProbeTarget::Dns { host, family } => {
                self.resolver.probe(&host, family, started_at, deadline).await
            }
            ProbeTarget::Icmp { addr } => {
                if !self.icmp_available {
                    return CheckResult::fail(
                        CheckKind::Icmp,
                        started_at,
                        ProbeStatus::CapabilityDenied,
                        "raw sockets unavailable",
                    );
                }
                icmp::probe(addr, started_at, deadline).await
            }
            ProbeTarget::Tcp { addr, ports } => {
                tcp::probe_ports(addr, &ports, started_at, deadline).await
            }
            ProbeTarget::Udp { addr, port } => udp::probe(addr, port, started_at, deadline).await,
            ProbeTarget::Http { url } => {
                http::probe(&self.http_client, &url, started_at, deadline).await
            }
        }
    }

    /// Resolve a hostname outside of an explicit DNS check (used when the
    /// DNS layer is disabled but address-based probes still need a target).
    pub async fn resolve_host(
        &self,
        host: &str,
        family: IpVersionPref,
        deadline: Instant,
    ) -> Option<IpAddr> {
        self.resolver.resolve_one(host, family, deadline).await
    }
}

/// Remaining time budget before `deadline`, zero if already past.
pub(crate) fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

pub(crate) fn elapsed_ms(started_at: Instant) -> f64 {
    started_at.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(kind: CheckKind, status: ProbeStatus) -> CheckResult {
        CheckResult::fail(kind, Instant::now(), status, "")
    }

    #[test]
    fn canceled_is_neither_success_nor_failure() {
        let r = CheckResult::canceled(CheckKind::Tcp, Instant::now());
        assert!(!r.is_ok());
        assert!(!r.is_failure());
    }

    #[test]
    fn problem_messages_are_canonical() {
        let http_503 = result_with(
            CheckKind::Http,
            ProbeStatus::ProtocolError { code: Some(503) },
        );
        assert_eq!(http_503.problem_message(), "HTTP 503");

        let icmp = result_with(CheckKind::Icmp, ProbeStatus::Unreachable);
        assert_eq!(icmp.problem_message(), "ICMP unreachable");

        let dns = result_with(CheckKind::Dns, ProbeStatus::Timeout);
        assert_eq!(dns.problem_message(), "DNS timeout");
    }

    #[test]
    fn latency_clamped_non_negative() {
        let r = CheckResult::ok(CheckKind::Tcp, Instant::now(), -3.0);
        assert_eq!(r.latency_ms, Some(0.0));
    }

    #[test]
    fn cascade_results_carry_the_marker() {
        let r = CheckResult::dns_cascade(CheckKind::Tcp, Instant::now());
        assert_eq!(r.detail, DNS_CASCADE_DETAIL);
        assert_eq!(r.status, ProbeStatus::Unreachable);
    }
}
