//! Probe scheduler: aligned ticks, concurrent fan-out, hard deadlines.
//!
//! Tick `k` fires at `t0 + k * interval` on the monotonic clock, so the
//! cadence never drifts with probe duration. Each tick spawns one task per
//! endpoint; inside it, name resolution runs first (when applicable) and the
//! remaining layers run concurrently. Every probe carries the deadline
//! `min(tick + timeout, next_tick)`, so no probe outlives its tick, and a
//! slow endpoint never delays another.
//!
//! The endpoint task assembles the whole tick into one bucket and appends it
//! in a single call; readers never observe a partial tick.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use crate::config::Config;
use crate::endpoint::{CheckKind, Endpoint};
use crate::probe::{CheckResult, ProbeStatus, ProbeTarget, Prober};
use crate::timeline::{SampleBucket, TimelineStore};

/// Extra time allowed for endpoint tasks to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

pub struct Scheduler {
    endpoints: Arc<Vec<Endpoint>>,
    prober: Arc<Prober>,
    store: Arc<TimelineStore>,
    interval: Duration,
    timeout: Duration,
    disabled: Arc<HashSet<CheckKind>>,
    shutdown: broadcast::Sender<()>,
}

impl Scheduler {
    /// Build a scheduler. The disabled-check set is fixed for the run: CLI
    /// flags plus ICMP when the capability probe failed at startup.
    pub fn new(
        cfg: &Config,
        prober: Arc<Prober>,
        store: Arc<TimelineStore>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let mut disabled = cfg.disabled_checks.clone();
        if !prober.icmp_available() {
            disabled.insert(CheckKind::Icmp);
        }
        Scheduler {
            endpoints: Arc::new(cfg.endpoints.clone()),
            prober,
            store,
            interval: cfg.interval,
            timeout: cfg.timeout,
            disabled: Arc::new(disabled),
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let t0 = Instant::now();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut inflight: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut tick: u64 = 0;

        tracing::info!(
            endpoints = self.endpoints.len(),
            interval = ?self.interval,
            timeout = ?self.timeout,
            "scheduler started"
        );

        loop {
            let tick_time = tick_instant(t0, self.interval, tick);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep_until(tick_time) => {}
            }

            let next_tick = tick_instant(t0, self.interval, tick + 1);
            let deadline = probe_deadline(tick_time, self.timeout, next_tick);

            for endpoint in self.endpoints.iter() {
                // The previous tick's task is deadline-bounded and finishes
                // before now; abort any straggler so bucket appends for this
                // endpoint stay in tick order.
                if let Some(handle) = inflight.remove(&endpoint.id) {
                    if !handle.is_finished() {
                        tracing::warn!(endpoint = %endpoint.id, tick, "aborting straggler tick task");
                        handle.abort();
                    }
                }

                let task = EndpointTick {
                    endpoint: endpoint.clone(),
                    tick,
                    deadline,
                    next_tick,
                    prober: Arc::clone(&self.prober),
                    store: Arc::clone(&self.store),
                    disabled: Arc::clone(&self.disabled),
                    shutdown: self.shutdown.subscribe(),
                };
                inflight.insert(endpoint.id.clone(), tokio::spawn(task.run()));
            }

            tick += 1;
        }

        // Let in-flight tasks record their cancellations and append.
        for (_, handle) in inflight {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }
        tracing::info!(ticks = tick, "scheduler stopped");
    }
}

fn tick_instant(t0: Instant, interval: Duration, tick: u64) -> Instant {
    t0 + interval.mul_f64(tick as f64)
}

/// Per-probe deadline: the configured timeout, clamped to the tick barrier.
fn probe_deadline(tick_time: Instant, timeout: Duration, next_tick: Instant) -> Instant {
    std::cmp::min(tick_time + timeout, next_tick)
}

/// One endpoint's work for one tick.
struct EndpointTick {
    endpoint: Endpoint,
    tick: u64,
    deadline: Instant,
    next_tick: Instant,
    prober: Arc<Prober>,
    store: Arc<TimelineStore>,
    disabled: Arc<HashSet<CheckKind>>,
    shutdown: broadcast::Receiver<()>,
}

impl EndpointTick {
    async fn run(mut self) {
        let mut bucket = SampleBucket::empty(self.tick);
        let active: Vec<CheckKind> = self
            .endpoint
            .checks
            .iter()
            .copied()
            .filter(|kind| !self.disabled.contains(kind))
            .collect();

        // Endpoints whose every check is disabled still tick: explicit empty
        // buckets keep the graph scrolling.
        if active.is_empty() {
            self.store.append(&self.endpoint.id, bucket);
            return;
        }

        let mut address: Option<IpAddr> = self.endpoint.literal_ip();
        let mut resolution_failed = false;

        // Stage 1: name resolution for hostname-based endpoints. The
        // explicit DNS check doubles as the resolution step; with the DNS
        // layer disabled, resolution still happens, just unrecorded.
        if let Some(host) = self.endpoint.host() {
            let started = Instant::now();
            if active.contains(&CheckKind::Dns) {
                let target = ProbeTarget::Dns {
                    host: host.to_string(),
                    family: self.endpoint.ip_version,
                };
                let result = tokio::select! {
                    r = self.prober.probe(target, self.deadline) => r,
                    _ = self.shutdown.recv() => CheckResult::canceled(CheckKind::Dns, started),
                };
                let canceled = result.status == ProbeStatus::Canceled;
                if result.is_ok() {
                    address = result.resolved.first().copied();
                } else {
                    resolution_failed = true;
                }
                bucket.insert(result);

                if canceled {
                    for kind in active.iter().filter(|k| **k != CheckKind::Dns) {
                        bucket.insert(CheckResult::canceled(*kind, started));
                    }
                    self.store.append(&self.endpoint.id, bucket);
                    return;
                }
            } else {
                address = self
                    .prober
                    .resolve_host(host, self.endpoint.ip_version, self.deadline)
                    .await;
                resolution_failed = address.is_none();
            }
        }

        // Stage 2: the remaining layers, concurrently. A failed resolution
        // synthesizes unreachable results instead of probing blind.
        let stage_start = Instant::now();
        let mut pending: HashSet<CheckKind> = HashSet::new();
        let mut probes: FuturesUnordered<BoxFuture<'static, CheckResult>> = FuturesUnordered::new();

        for kind in active.iter().copied().filter(|k| *k != CheckKind::Dns) {
            if resolution_failed {
                bucket.insert(CheckResult::dns_cascade(kind, stage_start));
                continue;
            }
            let Some(target) = probe_target(&self.endpoint, kind, address) else {
                bucket.insert(CheckResult::fail(
                    kind,
                    stage_start,
                    ProbeStatus::ProtocolError { code: None },
                    "internal: no probe target",
                ));
                continue;
            };

            let prober = Arc::clone(&self.prober);
            let deadline = self.deadline;
            pending.insert(kind);
            probes.push(
                async move {
                    // A panicking adapter must not take the tick down.
                    match AssertUnwindSafe(prober.probe(target, deadline))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => CheckResult::fail(
                            kind,
                            stage_start,
                            ProbeStatus::ProtocolError { code: None },
                            "internal",
                        ),
                    }
                }
                .boxed(),
            );
        }

        let barrier = sleep_until(self.next_tick);
        tokio::pin!(barrier);

        while !pending.is_empty() {
            tokio::select! {
                Some(result) = probes.next() => {
                    pending.remove(&result.kind);
                    bucket.insert(result);
                }
                _ = &mut barrier => {
                    for kind in pending.drain() {
                        bucket.insert(CheckResult::canceled(kind, stage_start));
                    }
                }
                _ = self.shutdown.recv() => {
                    for kind in pending.drain() {
                        bucket.insert(CheckResult::canceled(kind, stage_start));
                    }
                }
            }
        }

        self.store.append(&self.endpoint.id, bucket);
    }
}

/// Map a check kind to its concrete probe work order.
fn probe_target(endpoint: &Endpoint, kind: CheckKind, address: Option<IpAddr>) -> Option<ProbeTarget> {
    match kind {
        CheckKind::Icmp => address.map(|addr| ProbeTarget::Icmp { addr }),
        CheckKind::Tcp => {
            let ports = endpoint.tcp_ports();
            match (address, ports.is_empty()) {
                (Some(addr), false) => Some(ProbeTarget::Tcp { addr, ports }),
                _ => None,
            }
        }
        CheckKind::Udp => match (address, endpoint.udp_port()) {
            (Some(addr), Some(port)) => Some(ProbeTarget::Udp { addr, port }),
            _ => None,
        },
        CheckKind::Http => endpoint.http_url().map(|url| ProbeTarget::Http {
            url: url.to_string(),
        }),
        CheckKind::Dns => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RawTarget;

    fn endpoint(raw: &str) -> Endpoint {
        Endpoint::from_raw(&RawTarget::Url(raw.into()), 0).unwrap()
    }

    fn config_for(targets: &[&str], interval_ms: u64) -> Config {
        Config {
            endpoints: targets.iter().copied().map(endpoint).collect(),
            custom_dns_servers: Vec::new(),
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(interval_ms),
            graph_width: 0,
            disabled_checks: HashSet::from([CheckKind::Icmp]),
        }
    }

    #[test]
    fn deadline_clamped_to_tick_barrier() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);
        let tick_time = tick_instant(t0, interval, 3);
        let next_tick = tick_instant(t0, interval, 4);

        // Timeout longer than the interval: the barrier wins.
        let d = probe_deadline(tick_time, Duration::from_secs(5), next_tick);
        assert_eq!(d, next_tick);

        // Short timeout stands on its own.
        let d = probe_deadline(tick_time, Duration::from_millis(100), next_tick);
        assert_eq!(d, tick_time + Duration::from_millis(100));
    }

    #[test]
    fn ticks_are_aligned_not_cumulative() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(250);
        assert_eq!(tick_instant(t0, interval, 0), t0);
        assert_eq!(tick_instant(t0, interval, 4), t0 + Duration::from_secs(1));
    }

    #[test]
    fn probe_targets_per_kind() {
        let ep = endpoint("example.com");
        let addr: IpAddr = "93.184.216.34".parse().unwrap();

        match probe_target(&ep, CheckKind::Tcp, Some(addr)) {
            Some(ProbeTarget::Tcp { ports, .. }) => assert_eq!(ports, vec![80, 443]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(probe_target(&ep, CheckKind::Tcp, None).is_none());
        assert!(probe_target(&ep, CheckKind::Http, Some(addr)).is_none());

        let http = endpoint("https://example.com/health");
        match probe_target(&http, CheckKind::Http, None) {
            Some(ProbeTarget::Http { url }) => assert_eq!(url, "https://example.com/health"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tick_produces_one_bucket_per_endpoint() {
        // Local listener so the TCP probe has something real to hit.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = format!("127.0.0.1:{port}");

        let cfg = config_for(&[target.as_str()], 250);
        let id = cfg.endpoints[0].id.clone();
        let prober = Arc::new(Prober::new(&cfg, false).unwrap());
        let store = Arc::new(TimelineStore::new(
            16,
            cfg.endpoints.iter().map(|e| e.id.clone()),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = Scheduler::new(&cfg, prober, Arc::clone(&store), shutdown_tx.clone()).spawn();

        // Let two ticks fire, then stop.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        let snap = store.snapshot();
        let buckets = snap.buckets(&id);
        assert!(buckets.len() >= 2, "expected at least 2 buckets, got {}", buckets.len());

        // Contiguous from tick 0, each with the TCP layer present (ICMP is
        // disabled in this config).
        for (i, bucket) in buckets.iter().enumerate() {
            assert_eq!(bucket.index, i as u64);
            let tcp = bucket.get(CheckKind::Tcp).expect("tcp result present");
            assert!(tcp.is_ok(), "{:?} {}", tcp.status, tcp.detail);
            assert!(bucket.get(CheckKind::Icmp).is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_checks_disabled_yields_empty_buckets() {
        let cfg = Config {
            disabled_checks: HashSet::from([CheckKind::Icmp]),
            ..config_for(&["192.0.2.1"], 250)
        };
        let id = cfg.endpoints[0].id.clone();
        let prober = Arc::new(Prober::new(&cfg, false).unwrap());
        let store = Arc::new(TimelineStore::new(
            16,
            cfg.endpoints.iter().map(|e| e.id.clone()),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = Scheduler::new(&cfg, prober, Arc::clone(&store), shutdown_tx.clone()).spawn();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

        let snap = store.snapshot();
        let buckets = snap.buckets(&id);
        assert!(!buckets.is_empty());
        assert!(buckets.iter().all(|b| b.is_empty()));
    }
}
