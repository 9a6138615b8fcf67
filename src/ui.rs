use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Bar, BarChart, BarGroup, Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use serde_json::Value;

use quartieri::selection::{LayerView, Phase};

use crate::state::{AppState, MenuItem, Panel};

/// Rounds to `sig` significant figures below one, to an integer otherwise.
pub fn sig_figs(n: f64, sig: usize) -> String {
    if !n.is_finite() {
        return "n/d".to_string();
    }
    if n == 0.0 || n.abs() >= 1.0 {
        return format!("{:.0}", n.round());
    }
    let magnitude = n.abs().log10().floor() as i32;
    let decimals = (sig as i32 - 1 - magnitude).max(0) as usize;
    format!("{n:.decimals$}")
}

pub fn format_value(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => "n/d".to_string(),
        Some(Value::Number(n)) => n.as_f64().map_or_else(|| n.to_string(), |f| sig_figs(f, 2)),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn border_style(state: &AppState, panel: Panel) -> Style {
    if state.active_panel == panel {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn panel_block<'a>(state: &AppState, panel: Panel, title: String) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(state, panel))
        .title(title)
}

pub fn draw(f: &mut Frame, state: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(f.area());

    draw_menu(f, state, chunks[0]);
    draw_map(f, state, chunks[1]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(45),
            Constraint::Percentage(30),
        ])
        .split(chunks[2]);
    draw_legend(f, state, right[0]);
    draw_ranking(f, state, right[1]);
    draw_details(f, state, right[2]);
}

fn draw_menu(f: &mut Frame, state: &AppState, area: Rect) {
    let current_city = state.selection.phase().city();
    let current_layer = state.view().map(|v| (v.layer.owner_id(), v.layer.id.as_str()));
    let items: Vec<ListItem> = state
        .menu
        .iter()
        .map(|item| match item {
            MenuItem::City(city) => {
                let style = if current_city == Some(city.as_str()) {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(city.clone()).style(style)
            }
            MenuItem::Category(name) => {
                ListItem::new(format!("─ {name}")).style(Style::default().fg(Color::DarkGray))
            }
            MenuItem::Indicator { owner, id, label } => {
                let shown = current_layer == Some((owner.as_str(), id.as_str()));
                let mark = if shown { "● " } else { "  " };
                ListItem::new(format!("{mark}{label}"))
            }
        })
        .collect();
    let mut list_state = ListState::default();
    list_state.select(Some(state.menu_cursor));
    let list = List::new(items)
        .block(panel_block(state, Panel::Menu, "Menu".into()))
        .highlight_symbol(">> ")
        .highlight_style(Style::default().fg(Color::Red));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_map(f: &mut Frame, state: &AppState, area: Rect) {
    let phase = state.selection.phase();
    let (Some(map), Some(view)) = (&state.map, state.view()) else {
        let text = match phase {
            Phase::Failed { city, error } => format!("{city}: impossibile caricare la mappa\n\n{error}"),
            Phase::NoCity => "Scegli una città".to_string(),
            _ => "Caricamento…".to_string(),
        };
        let txt = Paragraph::new(text)
            .block(panel_block(state, Panel::Map, "Mappa".into()))
            .wrap(Wrap { trim: true });
        f.render_widget(txt, area);
        return;
    };

    let mut title = format!("{} – {}", view.city, view.layer.label);
    if phase.is_loading() {
        title.push_str(" (caricamento…)");
    }
    let highlight = view.scale.highlight().parse().unwrap_or(Color::White);
    let hovered = state.hovered();
    let mut outlines: Vec<(&str, Color)> = Vec::new();
    if let Some(key) = hovered.as_deref() {
        outlines.push((key, highlight));
    }
    if let Some(key) = state.clicked.as_deref() {
        outlines.push((key, AppState::click_color()));
    }
    map.render(f, area, &title, &state.fills, &outlines);
}

fn draw_legend(f: &mut Frame, state: &AppState, area: Rect) {
    let lines: Vec<Line> = match state.view() {
        Some(view) => view
            .scale
            .stops()
            .iter()
            .map(|stop| {
                let color = stop.color.parse().unwrap_or(Color::Reset);
                Line::from(vec![
                    Span::styled("██ ", Style::default().fg(color)),
                    Span::raw(sig_figs(stop.value, 2)),
                ])
            })
            .collect(),
        None => vec![Line::from("-")],
    };
    let legend = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Legenda"));
    f.render_widget(legend, area);
}

/// Bar length in thousandths of the domain, so the minimum stays visible.
fn bar_length(view: &LayerView, value: Option<f64>) -> u64 {
    let Some(v) = value else {
        return 0;
    };
    let stops = view.scale.stops();
    let (min, max) = match (stops.first(), stops.last()) {
        (Some(lo), Some(_)) => {
            let max = view
                .features
                .iter()
                .filter_map(|f| view.value(f))
                .fold(lo.value, f64::max);
            (lo.value, max)
        }
        _ => return 0,
    };
    if max <= min {
        return 1000;
    }
    (100.0 + (v - min) / (max - min) * 900.0).clamp(0.0, 1000.0) as u64
}

fn draw_ranking(f: &mut Frame, state: &AppState, area: Rect) {
    let block = panel_block(state, Panel::Ranking, "Classifica".into());
    let Some(view) = state.view() else {
        f.render_widget(block, area);
        return;
    };
    let ranked = view.ranked();
    let rows = area.height.saturating_sub(2).max(1) as usize;
    let first = state.ranking_cursor.saturating_sub(rows - 1);
    let highlight = view.scale.highlight().parse().unwrap_or(Color::White);

    let bars: Vec<Bar> = ranked
        .iter()
        .enumerate()
        .skip(first)
        .take(rows)
        .map(|(i, (key, value))| {
            let color = match value {
                Some(v) => view.scale.color_for(*v).parse().unwrap_or(Color::Gray),
                None => Color::DarkGray,
            };
            let style = if i == state.ranking_cursor {
                Style::default().fg(highlight)
            } else {
                Style::default().fg(color)
            };
            Bar::default()
                .value(bar_length(view, *value))
                .label(Line::from(key.clone()))
                .text_value(value.map_or_else(|| "n/d".to_string(), |v| sig_figs(v, 2)))
                .style(style)
        })
        .collect();
    let chart = BarChart::default()
        .block(block)
        .direction(Direction::Horizontal)
        .bar_width(1)
        .bar_gap(0)
        .max(1000)
        .data(BarGroup::default().bars(&bars));
    f.render_widget(chart, area);
}

fn draw_details(f: &mut Frame, state: &AppState, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    match (state.clicked.as_deref(), state.view()) {
        (Some(key), Some(view)) => {
            lines.push(Line::styled(
                format!("{} {key}", view.source.join_field),
                Style::default().fg(AppState::click_color()),
            ));
            for (label, value) in state.selection.details(key) {
                lines.push(Line::from(format!("{label}: {}", format_value(value.as_ref()))));
            }
            if let Some(ds) = view.layer.data_source.as_deref() {
                lines.push(Line::from(format!("Fonte: {ds}")));
            }
        }
        _ => {
            if let Some(view) = state.view() {
                if let Some(description) = view.layer.description.as_deref() {
                    lines.push(Line::from(description.to_string()));
                }
                if let Some(report) = &view.report {
                    lines.push(Line::from(format!(
                        "{} di {} quartieri con dati",
                        report.matched, report.features
                    )));
                }
            }
            lines.extend(AppState::HELP_TEXT.lines().map(Line::from));
            lines.extend(
                state
                    .selection
                    .diagnostics()
                    .map(|d| Line::styled(d.to_string(), Style::default().fg(Color::Yellow))),
            );
        }
    }
    let details = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Dettagli"))
        .wrap(Wrap { trim: true });
    f.render_widget(details, area);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(1234.56, "1235")]
    #[case(1.4, "1")]
    #[case(0.012345, "0.012")]
    #[case(0.5, "0.50")]
    #[case(-0.25, "-0.25")]
    #[case(0.0, "0")]
    #[case(f64::NAN, "n/d")]
    fn rounds_like_the_dashboard(#[case] n: f64, #[case] expected: &str) {
        assert_eq!(sig_figs(n, 2), expected);
    }

    #[test]
    fn formats_cells() {
        assert_eq!(format_value(None), "n/d");
        assert_eq!(format_value(Some(&Value::Null)), "n/d");
        assert_eq!(format_value(Some(&json!(42.4))), "42");
        assert_eq!(format_value(Some(&json!("Centro"))), "Centro");
        assert_eq!(format_value(Some(&json!(true))), "true");
    }
}
