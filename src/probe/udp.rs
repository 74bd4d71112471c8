//! UDP reachability probe.
//!
//! UDP has no handshake, so the probe sends a zero-payload datagram and
//! waits for either any reply or an ICMP port-unreachable (surfaced as
//! `ECONNREFUSED` on a connected socket). Silence until the deadline is an
//! *unverified* success: nothing rejected us, but nothing confirmed the
//! service either. The dashboard renders those samples distinctly.

use std::net::IpAddr;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use super::{elapsed_ms, CheckResult, ProbeStatus};
use crate::endpoint::CheckKind;

pub(crate) async fn probe(
    addr: IpAddr,
    port: u16,
    started_at: Instant,
    deadline: Instant,
) -> CheckResult {
    let bind_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(e) => {
            return CheckResult::fail(
                CheckKind::Udp,
                started_at,
                ProbeStatus::Unreachable,
                format!("bind: {e}"),
            )
        }
    };
    if let Err(e) = socket.connect((addr, port)).await {
        return CheckResult::fail(
            CheckKind::Udp,
            started_at,
            ProbeStatus::Unreachable,
            format!("connect: {e}"),
        );
    }
    if let Err(e) = socket.send(&[]).await {
        return CheckResult::fail(
            CheckKind::Udp,
            started_at,
            ProbeStatus::Unreachable,
            format!("send: {e}"),
        );
    }

    let mut buf = [0u8; 512];
    match timeout_at(deadline, socket.recv(&mut buf)).await {
        Ok(Ok(_n)) => CheckResult::ok(CheckKind::Udp, started_at, elapsed_ms(started_at)),
        // A connected UDP socket reports ICMP port-unreachable as refused.
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => CheckResult::fail(
            CheckKind::Udp,
            started_at,
            ProbeStatus::Refused,
            format!("port {port} unreachable"),
        ),
        Ok(Err(e)) => CheckResult::fail(
            CheckKind::Udp,
            started_at,
            ProbeStatus::Unreachable,
            format!("recv: {e}"),
        ),
        Err(_elapsed) => {
            let mut result = CheckResult::ok(CheckKind::Udp, started_at, 0.0);
            result.unverified = true;
            result.detail = format!("no response from port {port}");
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn reply_yields_verified_ok() {
        // Tiny echo peer.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            if let Ok((_, peer)) = server.recv_from(&mut buf).await {
                let _ = server.send_to(b"pong", peer).await;
            }
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        let result = probe("127.0.0.1".parse().unwrap(), port, Instant::now(), deadline).await;
        assert!(result.is_ok());
        assert!(!result.unverified);
        assert!(result.latency_ms.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn silence_yields_unverified_ok_with_zero_latency() {
        // A bound socket that never answers.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let deadline = Instant::now() + Duration::from_millis(200);
        let result = probe("127.0.0.1".parse().unwrap(), port, Instant::now(), deadline).await;
        assert!(result.is_ok());
        assert!(result.unverified);
        assert_eq!(result.latency_ms, Some(0.0));
        drop(server);
    }
}
