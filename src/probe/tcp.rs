//! TCP connect probe.
//!
//! Success is a completed handshake; the connection is dropped immediately.
//! Domain endpoints probe both web ports each tick; the attempts run
//! concurrently and merge into a single TCP-layer outcome.

use std::net::{IpAddr, SocketAddr};

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use super::{elapsed_ms, CheckResult, ProbeStatus};
use crate::endpoint::CheckKind;

pub(crate) async fn probe_ports(
    addr: IpAddr,
    ports: &[u16],
    started_at: Instant,
    deadline: Instant,
) -> CheckResult {
    let attempts = ports
        .iter()
        .map(|port| connect(SocketAddr::new(addr, *port), started_at, deadline));
    merge(join_all(attempts).await, started_at)
}

async fn connect(addr: SocketAddr, started_at: Instant, deadline: Instant) -> CheckResult {
    let attempt_start = Instant::now();
    match timeout_at(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let latency = elapsed_ms(attempt_start);
            drop(stream);
            CheckResult::ok(CheckKind::Tcp, started_at, latency)
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => CheckResult::fail(
            CheckKind::Tcp,
            started_at,
            ProbeStatus::Refused,
            format!("connection refused on port {}", addr.port()),
        ),
        Ok(Err(e)) => CheckResult::fail(
            CheckKind::Tcp,
            started_at,
            ProbeStatus::Unreachable,
            format!("port {}: {e}", addr.port()),
        ),
        Err(_elapsed) => CheckResult::fail(
            CheckKind::Tcp,
            started_at,
            ProbeStatus::Timeout,
            format!("connect timeout on port {}", addr.port()),
        ),
    }
}

/// Collapse per-port attempts into one layer outcome: any success wins (the
/// fastest one); otherwise the earliest-tried failure stands.
fn merge(results: Vec<CheckResult>, started_at: Instant) -> CheckResult {
    let best_ok = results
        .iter()
        .filter(|r| r.is_ok())
        .min_by(|a, b| {
            let a_ms = a.latency_ms.unwrap_or(f64::INFINITY);
            let b_ms = b.latency_ms.unwrap_or(f64::INFINITY);
            a_ms.partial_cmp(&b_ms).unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();

    best_ok.or_else(|| results.into_iter().next()).unwrap_or_else(|| {
        CheckResult::fail(
            CheckKind::Tcp,
            started_at,
            ProbeStatus::ProtocolError { code: None },
            "no ports to probe",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_fastest_success() {
        let now = Instant::now();
        let slow = CheckResult::ok(CheckKind::Tcp, now, 32.0);
        let fast = CheckResult::ok(CheckKind::Tcp, now, 30.0);
        let merged = merge(vec![slow, fast], now);
        assert_eq!(merged.latency_ms, Some(30.0));
    }

    #[test]
    fn merge_prefers_success_over_failure() {
        let now = Instant::now();
        let failed = CheckResult::fail(CheckKind::Tcp, now, ProbeStatus::Refused, "port 80");
        let ok = CheckResult::ok(CheckKind::Tcp, now, 12.0);
        let merged = merge(vec![failed, ok], now);
        assert!(merged.is_ok());
    }

    #[test]
    fn merge_all_failed_keeps_earliest_attempt() {
        let now = Instant::now();
        let first = CheckResult::fail(CheckKind::Tcp, now, ProbeStatus::Refused, "port 80");
        let second = CheckResult::fail(CheckKind::Tcp, now, ProbeStatus::Timeout, "port 443");
        let merged = merge(vec![first, second], now);
        assert_eq!(merged.status, ProbeStatus::Refused);
        assert_eq!(merged.detail, "port 80");
    }

    #[tokio::test]
    async fn refused_port_maps_to_refused() {
        // Bind a listener to learn a free port, then close it so nothing is
        // listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        let result = probe_ports("127.0.0.1".parse().unwrap(), &[port], Instant::now(), deadline).await;
        assert_eq!(result.status, ProbeStatus::Refused);
    }

    #[tokio::test]
    async fn listening_port_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        let result = probe_ports("127.0.0.1".parse().unwrap(), &[port], Instant::now(), deadline).await;
        assert!(result.is_ok(), "{:?}", result.status);
        assert!(result.latency_ms.unwrap() >= 0.0);
    }
}
