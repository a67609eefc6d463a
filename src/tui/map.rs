use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::canvas::{Canvas, Context, Line as CanvasLine, Points},
    widgets::{Block, Borders},
    Frame,
};

use super::state::UiState;
use crate::model::Dataset;
use crate::render::{ColorToken, HighlightMap};

/// Map center used when there is nothing to fit.
const DEFAULT_CENTER: (f64, f64) = (10.803451, 106.719046);
const DEFAULT_SPAN: f64 = 0.01;

/// Geographic window shown by the map canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    /// Longitude range.
    pub x_bounds: [f64; 2],
    /// Latitude range.
    pub y_bounds: [f64; 2],
}

impl MapView {
    /// Fit the dataset with a 10% margin, or a window around the default center.
    pub fn fit(dataset: Option<&Dataset>) -> Self {
        let Some(b) = dataset.and_then(Dataset::bounds) else {
            let (lat, lon) = DEFAULT_CENTER;
            return Self {
                x_bounds: [lon - DEFAULT_SPAN, lon + DEFAULT_SPAN],
                y_bounds: [lat - DEFAULT_SPAN, lat + DEFAULT_SPAN],
            };
        };
        let pad_lon = ((b.max_lon - b.min_lon) * 0.1).max(DEFAULT_SPAN / 10.0);
        let pad_lat = ((b.max_lat - b.min_lat) * 0.1).max(DEFAULT_SPAN / 10.0);
        Self {
            x_bounds: [b.min_lon - pad_lon, b.max_lon + pad_lon],
            y_bounds: [b.min_lat - pad_lat, b.max_lat + pad_lat],
        }
    }

    /// Geographic position of a terminal cell inside the canvas `inner` area.
    pub fn to_geo(&self, inner: Rect, col: u16, row: u16) -> Option<(f64, f64)> {
        if inner.width == 0
            || inner.height == 0
            || col < inner.x
            || row < inner.y
            || col >= inner.x + inner.width
            || row >= inner.y + inner.height
        {
            return None;
        }
        let fx = (f64::from(col - inner.x) + 0.5) / f64::from(inner.width);
        let fy = (f64::from(row - inner.y) + 0.5) / f64::from(inner.height);
        let lon = self.x_bounds[0] + fx * (self.x_bounds[1] - self.x_bounds[0]);
        let lat = self.y_bounds[1] - fy * (self.y_bounds[1] - self.y_bounds[0]);
        Some((lat, lon))
    }

    /// Entity drawn within one cell of (`lat`, `lon`), closest first.
    pub fn entity_near<'a>(
        &self,
        dataset: &'a Dataset,
        inner: Rect,
        lat: f64,
        lon: f64,
    ) -> Option<&'a str> {
        let cell_lon = (self.x_bounds[1] - self.x_bounds[0]) / f64::from(inner.width.max(1));
        let cell_lat = (self.y_bounds[1] - self.y_bounds[0]) / f64::from(inner.height.max(1));
        dataset
            .entities
            .iter()
            .filter_map(|e| {
                let dx = (e.lon - lon).abs() / cell_lon;
                let dy = (e.lat - lat).abs() / cell_lat;
                (dx <= 1.0 && dy <= 1.0).then_some((dx * dx + dy * dy, e.id.as_str()))
            })
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, id)| id)
    }
}

pub fn token_color(token: ColorToken) -> Color {
    let (r, g, b) = token.rgb();
    Color::Rgb(r, g, b)
}

/// Helper function to draw a line on a canvas
fn draw_line(ctx: &mut Context, x1: f64, y1: f64, x2: f64, y2: f64, color: Color) {
    ctx.draw(&CanvasLine {
        x1,
        y1,
        x2,
        y2,
        color,
    });
}

/// Entities marked on top of the highlight colors.
struct Marks {
    start: Option<String>,
    end: Option<String>,
    cursor: Option<String>,
}

fn paint(ctx: &mut Context, dataset: &Dataset, highlights: &HighlightMap, marks: &Marks) {
    // Relations first so entity markers stay on top.
    for rel in &dataset.relations {
        let (Some(a), Some(b)) = (dataset.entity(&rel.source), dataset.entity(&rel.target)) else {
            continue;
        };
        let token = highlights
            .relation_color(&rel.source, &rel.target)
            .unwrap_or(ColorToken::Edge);
        draw_line(ctx, a.lon, a.lat, b.lon, b.lat, token_color(token));
    }
    ctx.layer();

    for e in &dataset.entities {
        let token = highlights.entity_color(&e.id).unwrap_or(ColorToken::Default);
        ctx.draw(&Points {
            coords: &[(e.lon, e.lat)],
            color: token_color(token),
        });
    }

    for (id, token, mark) in [
        (marks.start.as_deref(), ColorToken::Start, "S"),
        (marks.end.as_deref(), ColorToken::End, "E"),
    ] {
        if let Some(e) = id.and_then(|id| dataset.entity(id)) {
            ctx.print(
                e.lon,
                e.lat,
                Span::styled(mark, Style::default().fg(token_color(token))),
            );
        }
    }

    if let Some(e) = marks.cursor.as_deref().and_then(|id| dataset.entity(id)) {
        ctx.print(e.lon, e.lat, Span::styled("◆", Style::default().fg(Color::White)));
    }
}

pub fn draw_map(area: Rect, f: &mut Frame, state: &UiState) {
    let view = MapView::fit(state.dataset.as_ref());
    let title = Line::from(vec![
        Span::raw("Map "),
        Span::styled(
            if state.dataset_source.is_empty() {
                "(no dataset)".to_string()
            } else {
                format!("({})", state.dataset_source)
            },
            Style::default().fg(Color::Gray),
        ),
    ]);
    let block = Block::default().borders(Borders::ALL).title(title);

    let highlights = state.highlights.snapshot();
    let dataset = state.dataset.clone().unwrap_or_default();
    let marks = Marks {
        start: state.start.clone(),
        end: state.end.clone(),
        cursor: state.cursor_entity().map(str::to_string),
    };
    let canvas = Canvas::default()
        .block(block)
        .x_bounds(view.x_bounds)
        .y_bounds(view.y_bounds)
        .paint(move |ctx| paint(ctx, &dataset, &highlights, &marks));
    f.render_widget(canvas, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;

    fn dataset() -> Dataset {
        Dataset {
            entities: vec![
                Entity {
                    id: "a".into(),
                    lat: 10.0,
                    lon: 106.0,
                    label: None,
                },
                Entity {
                    id: "b".into(),
                    lat: 11.0,
                    lon: 107.0,
                    label: None,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_pads_bounds() {
        let view = MapView::fit(Some(&dataset()));
        assert!((view.x_bounds[0] - 105.9).abs() < 1e-9);
        assert!((view.y_bounds[1] - 11.1).abs() < 1e-9);

        let empty = MapView::fit(None);
        assert!(empty.y_bounds[0] < DEFAULT_CENTER.0 && DEFAULT_CENTER.0 < empty.y_bounds[1]);
    }

    #[test]
    fn test_cell_to_geo_and_hit_test() {
        let view = MapView {
            x_bounds: [106.0, 107.0],
            y_bounds: [10.0, 11.0],
        };
        let inner = Rect::new(1, 1, 10, 10);
        assert_eq!(view.to_geo(inner, 0, 5), None);

        let (lat, lon) = view.to_geo(inner, 1, 10).expect("inside");
        assert!((lon - 106.05).abs() < 1e-9);
        assert!((lat - 10.05).abs() < 1e-9);
        assert_eq!(view.entity_near(&dataset(), inner, lat, lon), Some("a"));

        let (lat, lon) = view.to_geo(inner, 6, 5).expect("inside");
        assert_eq!(view.entity_near(&dataset(), inner, lat, lon), None);
    }
}
