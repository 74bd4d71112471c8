//! HTTP(S) probe.
//!
//! Issues a GET and measures request-to-response-headers latency. Any status
//! below 300 counts as success; 300+ (after up to five followed redirects)
//! is a protocol failure carrying the status code. The client is built once
//! and shared by every HTTP probe so its connection pool is process-scoped.

use std::time::Duration;

use tokio::time::Instant;

use super::{elapsed_ms, remaining, CheckResult, ProbeStatus};
use crate::endpoint::CheckKind;

const MAX_REDIRECTS: usize = 5;

pub(crate) fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(timeout)
        .user_agent(concat!("hydraping/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

pub(crate) async fn probe(
    client: &reqwest::Client,
    url: &str,
    started_at: Instant,
    deadline: Instant,
) -> CheckResult {
    let budget = remaining(deadline);
    if budget.is_zero() {
        return CheckResult::fail(
            CheckKind::Http,
            started_at,
            ProbeStatus::Timeout,
            "no time budget",
        );
    }

    // `send` resolves once response headers arrive; the body is not read.
    match client.get(url).timeout(budget).send().await {
        Ok(response) => {
            let latency = elapsed_ms(started_at);
            let status = response.status().as_u16();
            if status < 300 {
                CheckResult::ok(CheckKind::Http, started_at, latency)
            } else {
                CheckResult::fail(
                    CheckKind::Http,
                    started_at,
                    ProbeStatus::ProtocolError { code: Some(status) },
                    format!("HTTP {status}"),
                )
            }
        }
        Err(e) if e.is_timeout() => CheckResult::fail(
            CheckKind::Http,
            started_at,
            ProbeStatus::Timeout,
            "request timed out",
        ),
        Err(e) if e.is_redirect() => CheckResult::fail(
            CheckKind::Http,
            started_at,
            ProbeStatus::ProtocolError { code: None },
            format!("redirect limit ({MAX_REDIRECTS}) exceeded"),
        ),
        Err(e) => CheckResult::fail(
            CheckKind::Http,
            started_at,
            ProbeStatus::Unreachable,
            e.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unresolvable_host_is_unreachable() {
        let client = build_client(Duration::from_millis(500)).unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);
        let result = probe(
            &client,
            "http://host.invalid/",
            Instant::now(),
            deadline,
        )
        .await;
        assert!(matches!(
            result.status,
            ProbeStatus::Unreachable | ProbeStatus::Timeout
        ));
    }

    #[tokio::test]
    async fn local_status_codes_classify() {
        // One-shot HTTP server answering 503.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let client = build_client(Duration::from_secs(2)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let url = format!("http://127.0.0.1:{port}/health");
        let result = probe(&client, &url, Instant::now(), deadline).await;
        assert_eq!(
            result.status,
            ProbeStatus::ProtocolError { code: Some(503) }
        );
        assert_eq!(result.problem_message(), "HTTP 503");
    }
}
