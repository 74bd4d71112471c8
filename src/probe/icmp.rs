//! ICMP echo probe using native sockets.
//!
//! Tries a RAW socket first (privileged), then DGRAM (unprivileged on Linux
//! with `ping_group_range`, and on macOS). The blocking echo runs inside
//! `spawn_blocking` so send/recv timing is not at the mercy of the async
//! scheduler. Capability is probed once at startup; when neither socket type
//! can be created, ICMP checks are disabled for the whole run.

use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::time::Instant;

use super::{remaining, CheckResult, ProbeStatus};
use crate::endpoint::CheckKind;

/// Sequence counter so concurrent echoes to the same host stay distinct.
static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Probe raw-socket availability once at startup.
pub fn detect_icmp_capability() -> bool {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP probe: RAW socket available (privileged)");
        return true;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP probe: DGRAM socket available (unprivileged)");
        return true;
    }
    tracing::warn!("ICMP probe: no socket capability, disabling ICMP checks");
    false
}

/// One echo request/reply against `addr`, bounded by `deadline`.
pub(crate) async fn probe(addr: IpAddr, started_at: Instant, deadline: Instant) -> CheckResult {
    let budget = remaining(deadline);
    if budget.is_zero() {
        return CheckResult::fail(CheckKind::Icmp, started_at, ProbeStatus::Timeout, "no time budget");
    }

    let outcome = tokio::task::spawn_blocking(move || blocking_echo(addr, budget)).await;
    match outcome {
        Ok(Echo::Reply(rtt_ms)) => CheckResult::ok(CheckKind::Icmp, started_at, rtt_ms),
        Ok(Echo::Failed(status, detail)) => {
            CheckResult::fail(CheckKind::Icmp, started_at, status, detail)
        }
        Err(join_err) => CheckResult::fail(
            CheckKind::Icmp,
            started_at,
            ProbeStatus::ProtocolError { code: None },
            format!("internal: {join_err}"),
        ),
    }
}

enum Echo {
    Reply(f64),
    Failed(ProbeStatus, String),
}

fn blocking_echo(addr: IpAddr, budget: Duration) -> Echo {
    match addr {
        IpAddr::V4(v4) => blocking_echo_v4(v4, budget),
        IpAddr::V6(v6) => blocking_echo_v6(v6, budget),
    }
}

fn open_socket(domain: Domain, protocol: Protocol) -> Result<Socket, Echo> {
    Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                Echo::Failed(ProbeStatus::CapabilityDenied, e.to_string())
            } else {
                Echo::Failed(ProbeStatus::Unreachable, format!("socket: {e}"))
            }
        })
}

fn blocking_echo_v4(ip: Ipv4Addr, budget: Duration) -> Echo {
    let socket = match open_socket(Domain::IPV4, Protocol::ICMPV4) {
        Ok(s) => s,
        Err(failed) => return failed,
    };
    if let Err(e) = socket
        .set_read_timeout(Some(budget))
        .and_then(|_| socket.set_write_timeout(Some(budget)))
    {
        return Echo::Failed(ProbeStatus::Unreachable, format!("socket: {e}"));
    }
    let dest = SocketAddr::new(IpAddr::V4(ip), 0);
    if let Err(e) = socket.connect(&dest.into()) {
        return Echo::Failed(ProbeStatus::Unreachable, format!("connect: {e}"));
    }

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request_v4(identifier, sequence);
    let start = std::time::Instant::now();

    if let Err(e) = socket.send(&packet) {
        return classify_send_error(e);
    }

    // Replies for other sockets can land here too; keep reading until ours
    // shows up or the budget runs out.
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e) => return classify_recv_error(e),
        };
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let elapsed = start.elapsed();
        if elapsed >= budget {
            return Echo::Failed(ProbeStatus::Timeout, "echo reply timed out".into());
        }

        // RAW sockets deliver the IP header, DGRAM sockets do not.
        let offset = if !buf.is_empty() && buf[0] >> 4 == 4 { 20 } else { 0 };
        if len < offset + 8 {
            continue;
        }
        let reply_type = buf[offset];
        let reply_id = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
        let reply_seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);

        match reply_type {
            // Echo Reply
            0 if reply_id == identifier && reply_seq == sequence => {
                return Echo::Reply(elapsed.as_secs_f64() * 1000.0);
            }
            // Destination Unreachable / Time Exceeded
            3 | 11 => {
                return Echo::Failed(
                    ProbeStatus::Unreachable,
                    format!("icmp error type {reply_type}"),
                );
            }
            _ => continue,
        }
    }
}

fn blocking_echo_v6(ip: Ipv6Addr, budget: Duration) -> Echo {
    let socket = match open_socket(Domain::IPV6, Protocol::ICMPV6) {
        Ok(s) => s,
        Err(failed) => return failed,
    };
    if let Err(e) = socket
        .set_read_timeout(Some(budget))
        .and_then(|_| socket.set_write_timeout(Some(budget)))
    {
        return Echo::Failed(ProbeStatus::Unreachable, format!("socket: {e}"));
    }
    let dest = SocketAddr::new(IpAddr::V6(ip), 0);
    if let Err(e) = socket.connect(&dest.into()) {
        return Echo::Failed(ProbeStatus::Unreachable, format!("connect: {e}"));
    }

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request_v6(identifier, sequence);
    let start = std::time::Instant::now();

    if let Err(e) = socket.send(&packet) {
        return classify_send_error(e);
    }

    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e) => return classify_recv_error(e),
        };
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let elapsed = start.elapsed();
        if elapsed >= budget {
            return Echo::Failed(ProbeStatus::Timeout, "echo reply timed out".into());
        }
        if len < 8 {
            continue;
        }

        let reply_type = buf[0];
        let reply_id = u16::from_be_bytes([buf[4], buf[5]]);
        let reply_seq = u16::from_be_bytes([buf[6], buf[7]]);

        match reply_type {
            // Echo Reply
            129 if reply_id == identifier && reply_seq == sequence => {
                return Echo::Reply(elapsed.as_secs_f64() * 1000.0);
            }
            // Destination Unreachable / Time Exceeded
            1 | 3 => {
                return Echo::Failed(
                    ProbeStatus::Unreachable,
                    format!("icmpv6 error type {reply_type}"),
                );
            }
            _ => continue,
        }
    }
}

fn classify_send_error(e: std::io::Error) -> Echo {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            Echo::Failed(ProbeStatus::CapabilityDenied, e.to_string())
        }
        _ => Echo::Failed(ProbeStatus::Unreachable, format!("send: {e}")),
    }
}

fn classify_recv_error(e: std::io::Error) -> Echo {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            Echo::Failed(ProbeStatus::Timeout, "echo reply timed out".into())
        }
        _ => Echo::Failed(ProbeStatus::Unreachable, format!("recv: {e}")),
    }
}

/// ICMP Echo Request, type 8 code 0, 56-byte payload.
fn build_echo_request_v4(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = 8;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// ICMPv6 Echo Request, type 128 code 0. The kernel fills the checksum.
fn build_echo_request_v6(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = 128;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;

    while i < data.len() - 1 {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_layout() {
        let packet = build_echo_request_v4(0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
    }

    #[test]
    fn echo_request_v6_layout() {
        let packet = build_echo_request_v6(0xBEEF, 7);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[4..6], [0xBE, 0xEF]);
        assert_eq!(packet[6..8], [0x00, 0x07]);
    }

    #[test]
    fn checksum_verifies_round_trip() {
        let packet = build_echo_request_v4(0x1234, 0x0001);
        // Summing a packet that includes its own checksum yields 0xFFFF.
        let mut sum: u32 = 0;
        for pair in packet.chunks(2) {
            sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        assert_eq!(sum as u16, 0xFFFF);
    }

    #[test]
    fn sequence_numbers_advance() {
        let (_, a) = next_echo_id();
        let (_, b) = next_echo_id();
        assert_ne!(a, b);
    }
}
