//! Timeline store: the only shared mutable state in the process.
//!
//! One bucket ring per endpoint, keyed by endpoint id. The scheduler appends
//! finished buckets; the render loop takes point-in-time snapshots. Appends
//! go through one lock so readers never observe a partially written bucket.

mod bucket;
mod ring;

pub use bucket::SampleBucket;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::endpoint::CheckKind;

use ring::Ring;

pub struct TimelineStore {
    inner: RwLock<HashMap<String, Ring>>,
    window: AtomicU64,
    /// Bumped on every append; lets the UI redraw only when data changed.
    version: AtomicU64,
}

impl TimelineStore {
    pub fn new(window: usize, endpoint_ids: impl IntoIterator<Item = String>) -> Self {
        let window = window.max(1);
        let rings = endpoint_ids
            .into_iter()
            .map(|id| (id, Ring::new(window)))
            .collect();
        TimelineStore {
            inner: RwLock::new(rings),
            window: AtomicU64::new(window as u64),
            version: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> usize {
        self.window.load(Ordering::Relaxed) as usize
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Append a completed bucket for one endpoint. The single mutator.
    pub fn append(&self, endpoint_id: &str, bucket: SampleBucket) {
        let mut rings = self.inner.write().expect("timeline lock poisoned");
        match rings.get_mut(endpoint_id) {
            Some(ring) => ring.append(bucket),
            None => tracing::warn!(endpoint_id, "append for unknown endpoint"),
        }
        drop(rings);
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Grow or shrink every ring, keeping the newest buckets. Used when
    /// `graph_width = 0` and the terminal is resized.
    pub fn resize(&self, window: usize) {
        let window = window.max(1);
        if window == self.window() {
            return;
        }
        let mut rings = self.inner.write().expect("timeline lock poisoned");
        for ring in rings.values_mut() {
            ring.resize(window);
        }
        self.window.store(window as u64, Ordering::Relaxed);
        drop(rings);
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every timeline, oldest bucket first.
    pub fn snapshot(&self) -> Snapshot {
        let rings = self.inner.read().expect("timeline lock poisoned");
        Snapshot {
            timelines: rings
                .iter()
                .map(|(id, ring)| (id.clone(), ring.to_vec()))
                .collect(),
        }
    }
}

/// Consistent read view handed to the dashboard.
#[derive(Debug, Clone)]
pub struct Snapshot {
    timelines: HashMap<String, Vec<SampleBucket>>,
}

impl Snapshot {
    pub fn buckets(&self, endpoint_id: &str) -> &[SampleBucket] {
        self.timelines
            .get(endpoint_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The newest bucket that actually holds results.
    pub fn latest_sampled(&self, endpoint_id: &str) -> Option<&SampleBucket> {
        self.buckets(endpoint_id)
            .iter()
            .rev()
            .find(|b| !b.is_empty())
    }
}

/// Windowed per-endpoint statistics derived from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    /// Failed primary picks as a share of completed ones, in percent.
    pub packet_loss_pct: f64,
    /// Latency of the newest successful primary pick, if the most recent
    /// sampled bucket succeeded.
    pub latency_last: Option<f64>,
    /// Mean over successful primary picks in the window.
    pub latency_mean: Option<f64>,
}

pub fn aggregates(buckets: &[SampleBucket], override_kind: Option<CheckKind>) -> Aggregates {
    let mut completed = 0u32;
    let mut failed = 0u32;
    let mut latency_sum = 0.0;
    let mut successes = 0u32;

    for bucket in buckets {
        let Some(pick) = bucket.primary_pick(override_kind) else {
            continue;
        };
        if pick.is_failure() {
            completed += 1;
            failed += 1;
        } else if pick.is_ok() {
            completed += 1;
            successes += 1;
            latency_sum += pick.latency_ms.unwrap_or(0.0);
        }
        // Canceled picks are no-samples either way.
    }

    let latency_last = buckets
        .iter()
        .rev()
        .find(|b| !b.is_empty())
        .and_then(|b| b.primary_pick(override_kind))
        .filter(|pick| pick.is_ok())
        .and_then(|pick| pick.latency_ms);

    Aggregates {
        packet_loss_pct: if completed == 0 {
            0.0
        } else {
            failed as f64 / completed as f64 * 100.0
        },
        latency_last,
        latency_mean: (successes > 0).then(|| latency_sum / successes as f64),
    }
}
