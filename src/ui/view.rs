//! Dashboard view-model: pure flattening of a timeline snapshot into
//! renderable rows, computed once per frame. Keeping this free of terminal
//! types makes the layout and formatting rules testable without a TTY.

use crate::endpoint::Endpoint;
use crate::timeline::{aggregates, Snapshot};

use super::graph::{cell_for, latency_color, CellColor, GraphCell};

/// Width of the latency column, sized for `"%6.1fms (ICMP)"`.
pub const LATENCY_COLUMN_WIDTH: u16 = 15;
/// Below this many cells the graph is dropped and only label + latency show.
pub const MIN_GRAPH_WIDTH: u16 = 8;
/// Label column share of the terminal width.
const LABEL_SHARE: f64 = 0.4;
/// Spaces separating the three columns.
const COLUMN_GAP: u16 = 2;

#[derive(Debug, Clone)]
pub struct RowModel {
    pub label: String,
    /// Oldest to newest, always exactly `graph_width` cells.
    pub cells: Vec<GraphCell>,
    pub latency_text: String,
    pub latency_color: CellColor,
}

#[derive(Debug, Clone)]
pub struct FrameModel {
    pub rows: Vec<RowModel>,
    /// Fully formatted problem lines, in endpoint order.
    pub problems: Vec<String>,
    /// One-time global notices (e.g. ICMP disabled), shown with the problems.
    pub notices: Vec<String>,
    pub label_width: u16,
    pub graph_width: u16,
    pub show_graph: bool,
}

/// Build the frame for the current snapshot and terminal width.
pub fn build(
    endpoints: &[Endpoint],
    snapshot: &Snapshot,
    notices: &[String],
    term_width: u16,
) -> FrameModel {
    let max_label = endpoints
        .iter()
        .map(|e| e.label.chars().count())
        .max()
        .unwrap_or(0) as u16;
    let label_width = max_label.min((term_width as f64 * LABEL_SHARE) as u16).max(1);

    let graph_width = term_width
        .saturating_sub(label_width)
        .saturating_sub(LATENCY_COLUMN_WIDTH)
        .saturating_sub(COLUMN_GAP);
    let show_graph = graph_width >= MIN_GRAPH_WIDTH;

    let rows = endpoints
        .iter()
        .map(|endpoint| build_row(endpoint, snapshot, graph_width as usize, show_graph))
        .collect();

    let mut problems = Vec::new();
    for endpoint in endpoints {
        if let Some(bucket) = snapshot.latest_sampled(&endpoint.id) {
            for message in bucket.problems() {
                problems.push(format!("  • {}: {}", endpoint.label, message));
            }
        }
    }

    FrameModel {
        rows,
        problems,
        notices: notices.iter().map(|n| format!("  • {n}")).collect(),
        label_width,
        graph_width,
        show_graph,
    }
}

fn build_row(
    endpoint: &Endpoint,
    snapshot: &Snapshot,
    graph_width: usize,
    show_graph: bool,
) -> RowModel {
    let buckets = snapshot.buckets(&endpoint.id);
    let stats = aggregates(buckets, endpoint.primary_override);

    let cells = if show_graph {
        // Newest bucket in the rightmost cell; missing leading history pads
        // with dim dots, which is what makes the graph scroll in from the
        // right as the window fills.
        let visible = buckets.len().min(graph_width);
        let mut cells = vec![GraphCell::EMPTY; graph_width - visible];
        cells.extend(
            buckets[buckets.len() - visible..]
                .iter()
                .map(|b| cell_for(b.primary_pick(endpoint.primary_override))),
        );
        cells
    } else {
        Vec::new()
    };

    let (latency_text, latency_color) = latency_column(endpoint, snapshot, stats.latency_last);

    RowModel {
        label: endpoint.label.clone(),
        cells,
        latency_text,
        latency_color,
    }
}

/// Current-latency column: `"%6.1fms (%s)"` for a successful pick, `FAIL`
/// for a completed failure, `-` before any sample lands.
fn latency_column(
    endpoint: &Endpoint,
    snapshot: &Snapshot,
    latency_last: Option<f64>,
) -> (String, CellColor) {
    let pick = snapshot
        .latest_sampled(&endpoint.id)
        .and_then(|b| b.primary_pick(endpoint.primary_override));

    match pick {
        Some(result) if result.is_ok() => {
            let ms = latency_last.unwrap_or(0.0);
            let text = format!("{:>6.1}ms ({})", ms, result.kind.short_name());
            let color = if result.unverified {
                CellColor::DimYellow
            } else {
                latency_color(ms)
            };
            (text, color)
        }
        Some(result) if result.is_failure() => (
            format!("{:>6} ({})", "FAIL", result.kind.short_name()),
            CellColor::Red,
        ),
        _ => (format!("{:>6}", "-"), CellColor::Dim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{CheckKind, RawTarget};
    use crate::probe::{CheckResult, ProbeStatus};
    use crate::timeline::{SampleBucket, TimelineStore};
    use tokio::time::Instant;

    fn endpoint(raw: &str) -> Endpoint {
        Endpoint::from_raw(&RawTarget::Url(raw.into()), 0).unwrap()
    }

    fn store_with(endpoint: &Endpoint, buckets: Vec<SampleBucket>) -> TimelineStore {
        let store = TimelineStore::new(64, [endpoint.id.clone()]);
        for b in buckets {
            store.append(&endpoint.id, b);
        }
        store
    }

    fn ok_bucket(index: u64, kind: CheckKind, latency: f64) -> SampleBucket {
        let mut b = SampleBucket::empty(index);
        b.insert(CheckResult::ok(kind, Instant::now(), latency));
        b
    }

    #[test]
    fn layout_reserves_label_latency_and_gap() {
        let eps = vec![endpoint("example.com")];
        let store = store_with(&eps[0], vec![]);
        let model = build(&eps, &store.snapshot(), &[], 80);

        assert_eq!(model.label_width, 11); // "example.com"
        assert_eq!(model.graph_width, 80 - 11 - 15 - 2);
        assert!(model.show_graph);
    }

    #[test]
    fn narrow_terminal_drops_graph() {
        let eps = vec![endpoint("example.com")];
        let store = store_with(&eps[0], vec![]);
        let model = build(&eps, &store.snapshot(), &[], 30);
        assert!(!model.show_graph);
        assert!(model.rows[0].cells.is_empty());
    }

    #[test]
    fn long_labels_capped_at_forty_percent() {
        let raw = RawTarget::Detailed {
            url: "8.8.8.8".into(),
            name: Some("a-very-long-descriptive-endpoint-name-indeed".into()),
            protocol: None,
            ip_version: None,
            primary_check_type: None,
        };
        let eps = vec![Endpoint::from_raw(&raw, 0).unwrap()];
        let store = store_with(&eps[0], vec![]);
        let model = build(&eps, &store.snapshot(), &[], 100);
        assert_eq!(model.label_width, 40);
    }

    #[test]
    fn young_timeline_pads_left_with_dots() {
        let ep = endpoint("8.8.8.8");
        let buckets = (0..3)
            .map(|i| ok_bucket(i, CheckKind::Icmp, 10.0))
            .collect();
        let store = store_with(&ep, buckets);
        let eps = vec![ep];
        let model = build(&eps, &store.snapshot(), &[], 60);

        let cells = &model.rows[0].cells;
        assert_eq!(cells.len(), model.graph_width as usize);
        let pad = cells.len() - 3;
        assert!(cells[..pad].iter().all(|c| *c == GraphCell::EMPTY));
        assert!(cells[pad..].iter().all(|c| c.glyph == '▁'));
    }

    #[test]
    fn latency_text_formats_success() {
        let ep = endpoint("https://example.com/");
        let mut b = SampleBucket::empty(0);
        b.insert(CheckResult::ok(CheckKind::Http, Instant::now(), 120.0));
        let store = store_with(&ep, vec![b]);
        let eps = vec![ep];
        let model = build(&eps, &store.snapshot(), &[], 80);

        assert_eq!(model.rows[0].latency_text, " 120.0ms (HTTP)");
        assert_eq!(model.rows[0].latency_color, CellColor::Orange);
    }

    #[test]
    fn latency_text_unverified_udp() {
        let raw = RawTarget::Detailed {
            url: "1.1.1.1:53".into(),
            name: None,
            protocol: Some("udp".into()),
            ip_version: None,
            primary_check_type: None,
        };
        let ep = Endpoint::from_raw(&raw, 0).unwrap();
        let mut b = SampleBucket::empty(0);
        let mut r = CheckResult::ok(CheckKind::Udp, Instant::now(), 0.0);
        r.unverified = true;
        b.insert(r);
        let store = store_with(&ep, vec![b]);
        let eps = vec![ep];
        let model = build(&eps, &store.snapshot(), &[], 80);

        assert_eq!(model.rows[0].latency_text, "   0.0ms (UDP)");
        assert_eq!(model.rows[0].latency_color, CellColor::DimYellow);
        // The graph cell for the same sample is a dim yellow dot.
        assert_eq!(
            model.rows[0].cells.last().unwrap().color,
            CellColor::DimYellow
        );
    }

    #[test]
    fn latency_text_failure() {
        let ep = endpoint("8.8.8.8");
        let mut b = SampleBucket::empty(0);
        b.insert(CheckResult::fail(
            CheckKind::Icmp,
            Instant::now(),
            ProbeStatus::Timeout,
            "t/o",
        ));
        let store = store_with(&ep, vec![b]);
        let eps = vec![ep];
        let model = build(&eps, &store.snapshot(), &[], 80);

        assert_eq!(model.rows[0].latency_text, "  FAIL (ICMP)");
        assert_eq!(model.rows[0].latency_color, CellColor::Red);
    }

    #[test]
    fn problems_lines_carry_labels() {
        let ep = endpoint("https://api.example.com/health");
        let mut b = SampleBucket::empty(0);
        b.insert(CheckResult::ok(CheckKind::Tcp, Instant::now(), 10.0));
        b.insert(CheckResult::fail(
            CheckKind::Http,
            Instant::now(),
            ProbeStatus::ProtocolError { code: Some(503) },
            "HTTP 503",
        ));
        let store = store_with(&ep, vec![b]);
        let eps = vec![ep];
        let model = build(&eps, &store.snapshot(), &[], 80);

        assert_eq!(model.problems, vec!["  • api.example.com: HTTP 503"]);
    }

    #[test]
    fn notices_formatted_like_problem_lines() {
        let eps = vec![endpoint("8.8.8.8")];
        let store = store_with(&eps[0], vec![]);
        let notices = vec!["ICMP unavailable (insufficient privileges)".to_string()];
        let model = build(&eps, &store.snapshot(), &notices, 80);
        assert_eq!(
            model.notices,
            vec!["  • ICMP unavailable (insufficient privileges)"]
        );
        // No per-endpoint problem lines for the disabled check.
        assert!(model.problems.is_empty());
    }
}
