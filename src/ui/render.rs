//! Terminal drawing of a [`FrameModel`] with ratatui.
//!
//! All layout decisions were made in the view-model; this module only turns
//! cells and strings into styled spans. Color resolution happens here so the
//! `NO_COLOR` fallback degrades the whole frame uniformly.

use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::graph::CellColor;
use super::view::{FrameModel, LATENCY_COLUMN_WIDTH};

/// 256-color orange; ratatui has no named orange.
const ORANGE: Color = Color::Indexed(208);

fn style_for(color: CellColor, color_enabled: bool) -> Style {
    if !color_enabled {
        return Style::default();
    }
    match color {
        CellColor::Dim => Style::default().add_modifier(Modifier::DIM),
        CellColor::DimYellow => Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::DIM),
        CellColor::Green => Style::default().fg(Color::Green),
        CellColor::Yellow => Style::default().fg(Color::Yellow),
        CellColor::Orange => Style::default().fg(ORANGE),
        CellColor::Red => Style::default().fg(Color::Red),
    }
}

pub fn draw(frame: &mut Frame, model: &FrameModel, color_enabled: bool) {
    let area = frame.area();
    let mut lines: Vec<Line> = Vec::with_capacity(model.rows.len() + model.problems.len() + 3);

    for row in &model.rows {
        let mut spans: Vec<Span> = Vec::with_capacity(row.cells.len() + 4);

        spans.push(Span::styled(
            pad_label(&row.label, model.label_width as usize),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::raw(" "));

        if model.show_graph {
            for cell in &row.cells {
                spans.push(Span::styled(
                    cell.glyph.to_string(),
                    style_for(cell.color, color_enabled),
                ));
            }
            spans.push(Span::raw(" "));
        }

        spans.push(Span::styled(
            format!("{:>width$}", row.latency_text, width = LATENCY_COLUMN_WIDTH as usize),
            style_for(row.latency_color, color_enabled),
        ));

        lines.push(Line::from(spans));
    }

    if !model.problems.is_empty() || !model.notices.is_empty() {
        lines.push(Line::raw(""));
        lines.push(Line::styled(
            "Problems:",
            if color_enabled {
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            },
        ));
        for notice in &model.notices {
            lines.push(Line::styled(
                notice.clone(),
                style_for(CellColor::Yellow, color_enabled),
            ));
        }
        for problem in &model.problems {
            lines.push(Line::styled(
                problem.clone(),
                style_for(CellColor::Red, color_enabled),
            ));
        }
    }

    let paragraph = Paragraph::new(Text::from(lines));
    frame.render_widget(paragraph, Rect::new(0, 0, area.width, area.height));
}

/// Left-pad (right-align) the label into its column, truncating from the
/// front so the most specific part of a long name stays visible.
fn pad_label(label: &str, width: usize) -> String {
    let count = label.chars().count();
    if count <= width {
        format!("{label:>width$}")
    } else {
        label.chars().skip(count - width).collect()
    }
}
