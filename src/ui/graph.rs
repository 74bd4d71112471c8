//! Sparkline cell derivation.
//!
//! Each bucket becomes one cell: a block glyph whose height bins the primary
//! latency at 25 ms per step, colored by the 50/100/200 ms thresholds.
//! Failures are a red `!`; empty, canceled, and unverified-UDP samples are
//! low-information dots.

use crate::probe::{CheckResult, ProbeStatus};

/// Block glyphs, shortest to tallest.
pub const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
pub const PLACEHOLDER: char = '.';
pub const FAILURE_GLYPH: char = '!';

/// Milliseconds per glyph step.
pub const BIN_SIZE_MS: f64 = 25.0;

/// Latency color thresholds in milliseconds.
pub const GREEN_MAX_MS: f64 = 50.0;
pub const YELLOW_MAX_MS: f64 = 100.0;
pub const ORANGE_MAX_MS: f64 = 200.0;

/// Semantic cell color; mapped to terminal styles at render time so the
/// `NO_COLOR` fallback stays in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellColor {
    Dim,
    DimYellow,
    Green,
    Yellow,
    Orange,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphCell {
    pub glyph: char,
    pub color: CellColor,
}

impl GraphCell {
    pub const EMPTY: GraphCell = GraphCell {
        glyph: PLACEHOLDER,
        color: CellColor::Dim,
    };
}

/// Derive the cell for one bucket's primary pick.
pub fn cell_for(pick: Option<&CheckResult>) -> GraphCell {
    let Some(result) = pick else {
        return GraphCell::EMPTY;
    };
    match &result.status {
        ProbeStatus::Canceled => GraphCell::EMPTY,
        ProbeStatus::Ok if result.unverified => GraphCell {
            glyph: PLACEHOLDER,
            color: CellColor::DimYellow,
        },
        ProbeStatus::Ok => {
            let latency = result.latency_ms.unwrap_or(0.0);
            let bin = ((latency / BIN_SIZE_MS) as usize).min(BLOCKS.len() - 1);
            GraphCell {
                glyph: BLOCKS[bin],
                color: latency_color(latency),
            }
        }
        _ => GraphCell {
            glyph: FAILURE_GLYPH,
            color: CellColor::Red,
        },
    }
}

/// Color for a successful latency, shared by graph cells and the latency
/// column text.
pub fn latency_color(latency_ms: f64) -> CellColor {
    if latency_ms < GREEN_MAX_MS {
        CellColor::Green
    } else if latency_ms < YELLOW_MAX_MS {
        CellColor::Yellow
    } else if latency_ms < ORANGE_MAX_MS {
        CellColor::Orange
    } else {
        CellColor::Red
    }
}
