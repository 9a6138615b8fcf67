use std::collections::HashMap;

use geo::{BoundingRect, Contains, Geometry, MultiPolygon, Point, Polygon};
use geojson::Feature;
use ratatui::layout::Rect as TuiRect;
use ratatui::style::Color;
use ratatui::widgets::canvas::{Canvas, Line, Points};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;
use tracing::warn;

use quartieri::join::feature_key;

/// Grid used to sample fill points, in cells across the map bounds.
const FILL_COLUMNS: usize = 160;
const FILL_ROWS: usize = 80;

/// Planar area of the outer ring (shoelace).
fn poly_area(poly: &Polygon<f64>) -> f64 {
    let coords = &poly.exterior().0;
    let mut sum = 0.0;
    for window in coords.windows(2) {
        let (a, b) = (window[0], window[1]);
        sum += a.x * b.y - b.x * a.y;
    }
    (sum * 0.5).abs()
}

/// Drops islands smaller than a fifth of the largest part.
fn drop_slivers(mp: MultiPolygon<f64>) -> MultiPolygon<f64> {
    if mp.0.len() <= 1 {
        return mp;
    }
    let areas: Vec<f64> = mp.0.iter().map(poly_area).collect();
    let threshold = areas.iter().copied().fold(0.0, f64::max) * 0.20;
    let kept: Vec<Polygon<f64>> = mp
        .0
        .iter()
        .zip(&areas)
        .filter(|(_, area)| **area >= threshold)
        .map(|(poly, _)| poly.clone())
        .collect();
    if kept.is_empty() { mp } else { MultiPolygon(kept) }
}

struct Item {
    key: String,
    shape: MultiPolygon<f64>,
    fill: Vec<(f64, f64)>,
}

/// Projected neighbourhood boundaries, keyed by join key.
pub struct MapView {
    items: Vec<Item>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

impl MapView {
    pub fn new(features: &[Feature], join_field: &str) -> Self {
        let mut items = Vec::new();
        for feature in features {
            let Some(gj) = &feature.geometry else {
                continue;
            };
            let key = feature_key(feature, join_field).unwrap_or_default();
            let geom: Geometry<f64> = match gj.value.clone().try_into() {
                Ok(geom) => geom,
                Err(e) => {
                    warn!("skipping geometry of {key}: {e}");
                    continue;
                }
            };
            let shape = match geom {
                Geometry::Polygon(p) => p.into(),
                Geometry::MultiPolygon(m) => m,
                _ => continue,
            };
            items.push(Item {
                key,
                shape: drop_slivers(shape),
                fill: Vec::new(),
            });
        }

        let (mut minx, mut miny, mut maxx, mut maxy) =
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for item in &items {
            if let Some(rect) = item.shape.bounding_rect() {
                minx = minx.min(rect.min().x);
                miny = miny.min(rect.min().y);
                maxx = maxx.max(rect.max().x);
                maxy = maxy.max(rect.max().y);
            }
        }
        if !(minx < maxx && miny < maxy) {
            return Self {
                items,
                x_bounds: [0.0, 1.0],
                y_bounds: [0.0, 1.0],
            };
        }

        let dx = (maxx - minx) / FILL_COLUMNS as f64;
        let dy = (maxy - miny) / FILL_ROWS as f64;
        for item in &mut items {
            let Some(rect) = item.shape.bounding_rect() else {
                continue;
            };
            let c0 = ((rect.min().x - minx) / dx).floor() as usize;
            let c1 = ((rect.max().x - minx) / dx).ceil() as usize;
            let r0 = ((rect.min().y - miny) / dy).floor() as usize;
            let r1 = ((rect.max().y - miny) / dy).ceil() as usize;
            for r in r0..=r1.min(FILL_ROWS) {
                for c in c0..=c1.min(FILL_COLUMNS) {
                    let (x, y) = (minx + (c as f64 + 0.5) * dx, miny + (r as f64 + 0.5) * dy);
                    if item.shape.contains(&Point::new(x, y)) {
                        item.fill.push((x, y));
                    }
                }
            }
        }

        Self {
            items,
            x_bounds: [minx, maxx],
            y_bounds: [miny, maxy],
        }
    }

    pub fn feature_count(&self) -> usize {
        self.items.len()
    }

    /// Fills each shape with its color from `fills`, then draws every
    /// boundary, then redraws the `outlines` on top in their own color.
    pub fn render(
        &self,
        f: &mut Frame,
        area: TuiRect,
        title: &str,
        fills: &HashMap<String, Color>,
        outlines: &[(&str, Color)],
    ) {
        let canvas = Canvas::default()
            .block(Block::default().title(title.to_string()).borders(Borders::ALL))
            .x_bounds(self.x_bounds)
            .y_bounds(self.y_bounds)
            .paint(|ctx| {
                for item in &self.items {
                    if let Some(&color) = fills.get(&item.key) {
                        ctx.draw(&Points {
                            coords: &item.fill,
                            color,
                        });
                    }
                }
                ctx.layer();
                for item in &self.items {
                    draw_outline(ctx, &item.shape, Color::Gray);
                }
                for (key, color) in outlines {
                    for item in self.items.iter().filter(|i| i.key == *key) {
                        draw_outline(ctx, &item.shape, *color);
                    }
                }
            });
        f.render_widget(canvas, area);
    }
}

fn draw_outline(ctx: &mut ratatui::widgets::canvas::Context<'_>, shape: &MultiPolygon<f64>, color: Color) {
    for poly in &shape.0 {
        for window in poly.exterior().0.windows(2) {
            let (a, b) = (window[0], window[1]);
            ctx.draw(&Line {
                x1: a.x,
                y1: a.y,
                x2: b.x,
                y2: b.y,
                color,
            });
        }
    }
}
