//! One tick's worth of probe results for one endpoint, and the rules that
//! reduce it to a single displayable outcome.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::endpoint::CheckKind;
use crate::probe::{CheckResult, DNS_CASCADE_DETAIL};

/// Per-tick aggregate: at most one result per check kind. The scheduler
/// merges multi-port TCP attempts before insertion, so the map shape holds
/// for every endpoint variant.
#[derive(Debug, Clone)]
pub struct SampleBucket {
    /// Monotonic tick number, 0-based from scheduler start.
    pub index: u64,
    /// Wall-clock stamp for rendering; scheduling itself is monotonic-only.
    pub wall_time: DateTime<Utc>,
    results: BTreeMap<CheckKind, CheckResult>,
}

impl SampleBucket {
    pub fn empty(index: u64) -> Self {
        SampleBucket {
            index,
            wall_time: Utc::now(),
            results: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, result: CheckResult) {
        self.results.insert(result.kind, result);
    }

    pub fn get(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.results.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.values()
    }

    /// The check whose result represents this bucket in the UI.
    ///
    /// Selection order: an override whose result exists; else the
    /// highest-priority completed layer when at least one layer succeeded
    /// (a failure above every success dominates: an HTTP 503 represents the
    /// endpoint even though TCP connected); else, when everything failed,
    /// the lowest-priority failure so the graph still shows something
    /// broken; else nothing.
    pub fn primary_pick(&self, override_kind: Option<CheckKind>) -> Option<&CheckResult> {
        if let Some(kind) = override_kind {
            if let Some(result) = self.results.get(&kind) {
                return Some(result);
            }
        }

        let completed = || self.results.values().filter(|r| r.is_ok() || r.is_failure());

        if completed().any(|r| r.is_ok()) {
            completed().max_by_key(|r| r.kind.display_priority())
        } else {
            completed().min_by_key(|r| r.kind.display_priority())
        }
    }

    /// Actionable problem messages for this bucket, highest layer first.
    ///
    /// A failure is suppressed when a strictly higher layer succeeded, and
    /// synthesized resolution-cascade failures are hidden so a DNS outage
    /// surfaces as exactly one entry.
    pub fn problems(&self) -> Vec<String> {
        let top_success = self
            .results
            .values()
            .filter(|r| r.is_ok())
            .map(|r| r.kind.suppression_level())
            .max();
        // Cascade-marked failures are descendants of a DNS failure recorded
        // in the same bucket; only then do they collapse into that entry.
        let dns_failed = self
            .results
            .get(&CheckKind::Dns)
            .map(|r| r.is_failure())
            .unwrap_or(false);

        let mut failures: Vec<&CheckResult> = self
            .results
            .values()
            .filter(|r| r.is_failure())
            .filter(|r| !(dns_failed && r.detail == DNS_CASCADE_DETAIL))
            .filter(|r| match top_success {
                Some(level) => level <= r.kind.suppression_level(),
                None => true,
            })
            .collect();
        failures.sort_by_key(|r| std::cmp::Reverse(r.kind.display_priority()));
        failures.iter().map(|r| r.problem_message()).collect()
    }
}
