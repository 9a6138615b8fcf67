use std::collections::HashMap;

use crossterm::event::KeyCode;
use ratatui::style::Color;

use quartieri::config::CLICK_COLOR;
use quartieri::selection::{FetchOutcome, FetchRequest, LayerView, Phase, Selection};

use crate::map_draw::MapView;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Panel {
    Menu,
    Map,
    Ranking,
}

/// Rows of the left-hand menu.
#[derive(Clone, Debug, PartialEq)]
pub enum MenuItem {
    City(String),
    Category(String),
    Indicator {
        owner: String,
        id: String,
        label: String,
    },
}

#[derive(Debug, PartialEq)]
pub enum Action {
    None,
    Quit,
    Fetch(Vec<FetchRequest>),
}

pub struct AppState {
    pub selection: Selection,
    pub menu: Vec<MenuItem>,
    pub menu_cursor: usize,
    pub ranking_cursor: usize,
    /// Join key of the clicked neighbourhood.
    pub clicked: Option<String>,
    pub active_panel: Panel,
    pub map: Option<MapView>,
    pub fills: HashMap<String, Color>,
    map_owner: Option<(String, String)>,
    shown_layer: Option<(String, String)>,
}

impl AppState {
    pub const HELP_TEXT: &'static str = "\
Tab: cambia pannello
↑/↓: scorri
Enter: seleziona
Esc: deseleziona
q: esci";

    pub fn new(selection: Selection) -> Self {
        let mut state = Self {
            selection,
            menu: Vec::new(),
            menu_cursor: 0,
            ranking_cursor: 0,
            clicked: None,
            active_panel: Panel::Menu,
            map: None,
            fills: HashMap::new(),
            map_owner: None,
            shown_layer: None,
        };
        state.refresh();
        state
    }

    pub fn start(&mut self, city: &str) -> Vec<FetchRequest> {
        let requests = self.selection.select_city(city);
        self.refresh();
        requests
    }

    pub fn apply(&mut self, outcome: FetchOutcome) -> Vec<FetchRequest> {
        let requests = self.selection.apply(outcome);
        self.refresh();
        requests
    }

    pub fn view(&self) -> Option<&LayerView> {
        self.selection.view().map(|v| &**v)
    }

    pub fn handle_input(&mut self, key: KeyCode) -> Action {
        use KeyCode::*;
        match key {
            Char('q') => return Action::Quit,
            Tab => {
                self.active_panel = match self.active_panel {
                    Panel::Menu => Panel::Map,
                    Panel::Map => Panel::Ranking,
                    Panel::Ranking => Panel::Menu,
                };
            }
            Esc => self.clicked = None,
            Up => match self.active_panel {
                Panel::Menu => self.menu_cursor = self.menu_cursor.saturating_sub(1),
                Panel::Map | Panel::Ranking => {
                    self.ranking_cursor = self.ranking_cursor.saturating_sub(1)
                }
            },
            Down => match self.active_panel {
                Panel::Menu => {
                    if self.menu_cursor + 1 < self.menu.len() {
                        self.menu_cursor += 1;
                    }
                }
                Panel::Map | Panel::Ranking => {
                    let n = self.view().map_or(0, |v| v.features.len());
                    if self.ranking_cursor + 1 < n {
                        self.ranking_cursor += 1;
                    }
                }
            },
            Enter => {
                let requests = match self.active_panel {
                    Panel::Menu => self.choose_menu_item(),
                    Panel::Map | Panel::Ranking => {
                        self.click_ranked();
                        Vec::new()
                    }
                };
                self.refresh();
                if !requests.is_empty() {
                    return Action::Fetch(requests);
                }
            }
            _ => {}
        }
        Action::None
    }

    fn choose_menu_item(&mut self) -> Vec<FetchRequest> {
        match self.menu.get(self.menu_cursor).cloned() {
            Some(MenuItem::City(city)) => self.selection.select_city(&city),
            Some(MenuItem::Indicator { owner, id, .. }) => {
                let Some(city) = self.selection.phase().city().map(str::to_string) else {
                    return Vec::new();
                };
                let layer = self.selection.index().by_id(&city, &owner, &id).cloned();
                match layer {
                    Ok(layer) => self.selection.select_layer(&layer),
                    Err(_) => Vec::new(),
                }
            }
            Some(MenuItem::Category(_)) | None => Vec::new(),
        }
    }

    /// Toggles the click on the neighbourhood under the ranking cursor.
    fn click_ranked(&mut self) {
        let key = self
            .view()
            .and_then(|v| v.features.get(self.ranking_cursor).and_then(|f| v.key(f)));
        self.clicked = match key {
            Some(key) if self.clicked.as_deref() != Some(key.as_str()) => Some(key),
            _ => None,
        };
    }

    /// Key of the neighbourhood under the ranking cursor.
    pub fn hovered(&self) -> Option<String> {
        let view = self.view()?;
        view.key(view.features.get(self.ranking_cursor)?)
    }

    pub fn click_color() -> Color {
        CLICK_COLOR.parse().unwrap_or(Color::Red)
    }

    /// Brings menu, map and fills in line with the selection.
    fn refresh(&mut self) {
        self.menu = self.build_menu();
        self.menu_cursor = self.menu_cursor.min(self.menu.len().saturating_sub(1));

        let Some(view) = self.selection.view().cloned() else {
            self.map = None;
            self.map_owner = None;
            self.fills.clear();
            return;
        };

        let owner = (view.city.clone(), view.source.id.clone());
        if self.map_owner.as_ref() != Some(&owner) {
            self.map = Some(MapView::new(&view.features, view.join_field()));
            self.map_owner = Some(owner);
        }

        let layer = (view.layer.owner_id().to_string(), view.layer.id.clone());
        if self.shown_layer.as_ref() != Some(&layer) {
            self.clicked = None;
            self.ranking_cursor = 0;
            self.shown_layer = Some(layer);
        }
        self.ranking_cursor = self.ranking_cursor.min(view.features.len().saturating_sub(1));

        self.fills = view
            .features
            .iter()
            .filter_map(|f| {
                let key = view.key(f)?;
                let color = view.value(f).map(|v| view.scale.color_for(v))?;
                Some((key, color.parse().ok()?))
            })
            .collect();
    }

    fn build_menu(&self) -> Vec<MenuItem> {
        let index = self.selection.index();
        let mut menu: Vec<MenuItem> = index.cities().iter().cloned().map(MenuItem::City).collect();
        let city = match self.selection.phase() {
            Phase::NoCity => return menu,
            phase => phase.city().unwrap_or_default(),
        };
        for category in index.categories(city) {
            menu.push(MenuItem::Category(category.name.to_string()));
            menu.extend(category.indicators.iter().map(|d| MenuItem::Indicator {
                owner: d.owner_id().to_string(),
                id: d.id.clone(),
                label: d.label.clone(),
            }));
        }
        menu
    }
}
