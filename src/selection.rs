//! Selection state machine: which city and indicator are on screen.
//!
//! Transitions never perform I/O. They return the [`FetchRequest`]s they need
//! and the caller feeds the results back through [`Selection::apply`]. Every
//! request carries the [`Ticket`] it was issued under; results whose ticket
//! has been superseded by a newer selection are dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use geojson::{Feature, FeatureCollection};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{Layer, LayerDescriptor, Source};
use crate::config::{MAX_DIAGNOSTICS, default_palette};
use crate::data::{FetchError, layer_rows, resolve_url, source_features};
use crate::index::CatalogIndex;
use crate::join::{self, JoinReport, JoinStep, Row};
use crate::scale::{ColorScale, PaintSpec};

/// Selection generation a request was issued for.
///
/// `city` moves on every city (or source) change, `layer` on every change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ticket {
    pub city: u64,
    pub layer: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    Source,
    Layer,
    /// Table of the n-th layer of the loaded source, for eager enrichment.
    Enrichment(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub ticket: Ticket,
    pub payload: Payload,
    pub url: String,
}

impl FetchRequest {
    pub fn outcome(self, result: Result<Value, FetchError>) -> FetchOutcome {
        FetchOutcome {
            ticket: self.ticket,
            payload: self.payload,
            url: self.url,
            result,
        }
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub ticket: Ticket,
    pub payload: Payload,
    pub url: String,
    pub result: Result<Value, FetchError>,
}

/// Source features as fetched, shared by every layer view of the city.
#[derive(Debug)]
pub struct LoadedSource {
    pub city: String,
    pub source: Source,
    pub features: Arc<Vec<Feature>>,
}

/// Everything the renderers need for one (source, indicator) pair.
#[derive(Debug)]
pub struct LayerView {
    pub city: String,
    pub source: Source,
    pub layer: LayerDescriptor,
    /// Joined features, ranked by the indicator value.
    pub features: Vec<Feature>,
    pub scale: ColorScale,
    pub report: Option<JoinReport>,
}

impl LayerView {
    pub fn join_field(&self) -> &str {
        &self.source.join_field
    }

    pub fn key(&self, feature: &Feature) -> Option<String> {
        join::feature_key(feature, self.join_field())
    }

    pub fn value(&self, feature: &Feature) -> Option<f64> {
        join::numeric_value(feature, &self.layer.id)
    }

    pub fn find(&self, key: &str) -> Option<&Feature> {
        self.features
            .iter()
            .find(|f| self.key(f).as_deref() == Some(key))
    }

    pub fn ranked(&self) -> Vec<(String, Option<f64>)> {
        join::ranked_pairs(&self.features, self.join_field(), &self.layer.id)
    }

    pub fn paint(&self) -> PaintSpec {
        self.scale.paint(&self.layer.id)
    }

    /// Map center as `[lon, lat]`, when the source declares one.
    pub fn center(&self) -> Option<[f64; 2]> {
        self.source.center
    }

    pub fn zoom(&self) -> Option<f64> {
        self.source.zoom
    }

    pub fn feature_collection(&self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features.clone(),
            foreign_members: None,
        }
    }
}

#[derive(Debug)]
pub enum Phase {
    NoCity,
    CitySelected {
        city: String,
        source: Source,
        layer: LayerDescriptor,
    },
    SourceLoaded {
        loaded: Arc<LoadedSource>,
        layer: LayerDescriptor,
    },
    LayerLoaded {
        loaded: Arc<LoadedSource>,
        view: Arc<LayerView>,
    },
    /// Nothing could be shown for `city` and there is no earlier view.
    Failed { city: String, error: String },
}

impl Phase {
    pub fn city(&self) -> Option<&str> {
        match self {
            Self::NoCity => None,
            Self::CitySelected { city, .. } | Self::Failed { city, .. } => Some(city),
            Self::SourceLoaded { loaded, .. } | Self::LayerLoaded { loaded, .. } => {
                Some(&loaded.city)
            }
        }
    }

    /// Indicator being loaded or shown.
    pub fn layer(&self) -> Option<&LayerDescriptor> {
        match self {
            Self::CitySelected { layer, .. } | Self::SourceLoaded { layer, .. } => Some(layer),
            Self::LayerLoaded { view, .. } => Some(&view.layer),
            Self::NoCity | Self::Failed { .. } => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::CitySelected { .. } | Self::SourceLoaded { .. })
    }
}

/// Features of one source with every layer of the city joined in.
#[derive(Debug)]
pub struct Enriched {
    pub city: String,
    pub source_id: String,
    pub features: Vec<Feature>,
}

#[derive(Debug)]
struct PendingEnrichment {
    loaded: Arc<LoadedSource>,
    layers: Vec<Layer>,
    rows: Vec<Option<Vec<Row>>>,
}

pub struct Selection {
    index: Arc<CatalogIndex>,
    host: String,
    eager: bool,
    ticket: Ticket,
    phase: Phase,
    last_good: Option<(Arc<LoadedSource>, Arc<LayerView>)>,
    pending: Option<PendingEnrichment>,
    enriched: Option<Arc<Enriched>>,
    diagnostics: VecDeque<String>,
}

impl Selection {
    pub fn new(index: Arc<CatalogIndex>, host: impl Into<String>, eager: bool) -> Self {
        let mut selection = Self {
            host: host.into(),
            eager,
            ticket: Ticket::default(),
            phase: Phase::NoCity,
            last_good: None,
            pending: None,
            enriched: None,
            diagnostics: VecDeque::new(),
            index,
        };
        let menu_problems: Vec<String> = selection
            .index
            .catalog()
            .diagnostics()
            .iter()
            .map(ToString::to_string)
            .collect();
        for d in menu_problems {
            selection.push_diagnostic(d);
        }
        selection
    }

    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// The view to draw: the current one, or the last good one while loading.
    pub fn view(&self) -> Option<&Arc<LayerView>> {
        match &self.phase {
            Phase::LayerLoaded { view, .. } => Some(view),
            _ => self.last_good.as_ref().map(|(_, view)| view),
        }
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.iter().map(String::as_str)
    }

    pub fn enriched(&self) -> Option<&Enriched> {
        self.enriched.as_deref()
    }

    /// Every indicator of the shown source for the feature with `key`,
    /// as `(label, value)`.
    pub fn details(&self, key: &str) -> Vec<(String, Option<Value>)> {
        let Some(view) = self.view() else {
            return Vec::new();
        };
        let feature = self
            .enriched
            .as_deref()
            .filter(|e| e.city == view.city && e.source_id == view.source.id)
            .and_then(|e| {
                e.features
                    .iter()
                    .find(|f| view.key(f).as_deref() == Some(key))
            })
            .or_else(|| view.find(key));
        let Some(feature) = feature else {
            return Vec::new();
        };
        self.index
            .descriptors_in(&view.city)
            .into_iter()
            .filter(|d| d.source_id == view.source.id)
            .map(|d| (d.label.clone(), join::property(feature, &d.id).cloned()))
            .collect()
    }

    pub fn select_city(&mut self, city: &str) -> Vec<FetchRequest> {
        let retry = matches!(self.phase, Phase::Failed { .. });
        if self.phase.city() == Some(city) && !retry {
            return Vec::new();
        }
        if !self.index.has_city(city) {
            self.push_diagnostic(format!("unknown city {city}"));
            return Vec::new();
        }
        let Some(source) = self.index.default_source(city).cloned() else {
            return self.fail(city, format!("city {city} has no source"));
        };
        let layer = self
            .index
            .default_layer(city)
            .filter(|l| l.source_id == source.id)
            .or_else(|| {
                self.index
                    .descriptors_in(city)
                    .into_iter()
                    .find(|d| d.source_id == source.id)
            })
            .cloned();
        let Some(layer) = layer else {
            return self.fail(city, format!("source {} of {city} has no indicators", source.id));
        };
        info!("selecting {city}: source {}, layer {}", source.id, layer.id);
        self.enter_city(city.to_string(), source, layer)
    }

    pub fn select_layer(&mut self, layer: &LayerDescriptor) -> Vec<FetchRequest> {
        let same = |current: &LayerDescriptor| {
            current.id == layer.id && current.owner_id() == layer.owner_id()
        };
        let loaded = match &self.phase {
            Phase::NoCity | Phase::Failed { .. } => {
                self.push_diagnostic(format!("no city loaded for layer {}", layer.id));
                return Vec::new();
            }
            Phase::CitySelected { city, source, layer: current } => {
                if same(current) {
                    return Vec::new();
                }
                if *city != layer.city || source.id != layer.source_id {
                    let (city, source) = (city.clone(), source.clone());
                    return self.switch_source(&city, &source, layer);
                }
                let (city, source) = (city.clone(), source.clone());
                self.phase = Phase::CitySelected {
                    city,
                    source,
                    layer: layer.clone(),
                };
                return Vec::new();
            }
            Phase::SourceLoaded { loaded, layer: current } => {
                if same(current) {
                    return Vec::new();
                }
                Arc::clone(loaded)
            }
            Phase::LayerLoaded { loaded, view } => {
                if same(&view.layer) {
                    return Vec::new();
                }
                Arc::clone(loaded)
            }
        };

        if loaded.city != layer.city || loaded.source.id != layer.source_id {
            return self.switch_source(&loaded.city, &loaded.source, layer);
        }

        self.ticket.layer += 1;
        info!("{}: switching to layer {}", loaded.city, layer.id);
        match &layer.layer_url {
            None => {
                self.show(loaded, layer.clone(), None);
                Vec::new()
            }
            Some(url) => {
                let url = resolve_url(&self.host, url);
                self.phase = Phase::SourceLoaded {
                    loaded,
                    layer: layer.clone(),
                };
                vec![FetchRequest {
                    ticket: self.ticket,
                    payload: Payload::Layer,
                    url,
                }]
            }
        }
    }

    pub fn apply(&mut self, outcome: FetchOutcome) -> Vec<FetchRequest> {
        let FetchOutcome {
            ticket,
            payload,
            url,
            result,
        } = outcome;
        let current = match payload {
            Payload::Layer => ticket == self.ticket,
            Payload::Source | Payload::Enrichment(_) => ticket.city == self.ticket.city,
        };
        if !current {
            debug!("discarding stale {payload:?} result from {url}");
            return Vec::new();
        }
        match payload {
            Payload::Source => self.on_source(&url, result),
            Payload::Layer => self.on_layer(&url, result),
            Payload::Enrichment(i) => self.on_enrichment(i, &url, result),
        }
    }

    fn enter_city(&mut self, city: String, source: Source, layer: LayerDescriptor) -> Vec<FetchRequest> {
        self.ticket = Ticket {
            city: self.ticket.city + 1,
            layer: self.ticket.layer + 1,
        };
        self.pending = None;
        let url = resolve_url(&self.host, &source.url);
        self.phase = Phase::CitySelected {
            city,
            source,
            layer,
        };
        vec![FetchRequest {
            ticket: self.ticket,
            payload: Payload::Source,
            url,
        }]
    }

    /// Moves to the source `layer` belongs to, which needs a fresh fetch.
    fn switch_source(&mut self, city: &str, current: &Source, layer: &LayerDescriptor) -> Vec<FetchRequest> {
        if city != layer.city {
            self.push_diagnostic(format!(
                "layer {} belongs to {}, not {city}",
                layer.id, layer.city
            ));
            return Vec::new();
        }
        let source = self
            .index
            .catalog()
            .default_source(city, &layer.source_id)
            .cloned();
        match source {
            Ok(source) => {
                info!("{city}: switching from source {} to {}", current.id, source.id);
                self.enter_city(city.to_string(), source, layer.clone())
            }
            Err(e) => {
                self.push_diagnostic(e.to_string());
                Vec::new()
            }
        }
    }

    fn on_source(&mut self, url: &str, result: Result<Value, FetchError>) -> Vec<FetchRequest> {
        let Phase::CitySelected { city, source, layer } = &self.phase else {
            return Vec::new();
        };
        let (city, source, layer) = (city.clone(), source.clone(), layer.clone());
        let features = match result.and_then(|v| source_features(url, v)) {
            Ok(features) => features,
            Err(e) => return self.fail(&city, e.to_string()),
        };
        info!("{city}: {} features in source {}", features.len(), source.id);

        let loaded = Arc::new(LoadedSource {
            city,
            source,
            features: Arc::new(features),
        });
        let mut requests = Vec::new();
        match &layer.layer_url {
            None => self.show(Arc::clone(&loaded), layer, None),
            Some(layer_url) => {
                requests.push(FetchRequest {
                    ticket: self.ticket,
                    payload: Payload::Layer,
                    url: resolve_url(&self.host, layer_url),
                });
                self.phase = Phase::SourceLoaded {
                    loaded: Arc::clone(&loaded),
                    layer,
                };
            }
        }
        requests.extend(self.start_enrichment(loaded));
        requests
    }

    fn on_layer(&mut self, url: &str, result: Result<Value, FetchError>) -> Vec<FetchRequest> {
        let Phase::SourceLoaded { loaded, layer } = &self.phase else {
            return Vec::new();
        };
        let (loaded, layer) = (Arc::clone(loaded), layer.clone());
        match result.and_then(|v| layer_rows(url, v)) {
            Ok(rows) => {
                self.show(loaded, layer, Some(&rows));
                Vec::new()
            }
            Err(e) => self.fail_layer(&loaded, e.to_string()),
        }
    }

    /// A layer that fails over the source already on screen only undoes the
    /// layer change. The source and its eager enrichment stay current.
    fn fail_layer(&mut self, loaded: &Arc<LoadedSource>, error: String) -> Vec<FetchRequest> {
        let Some((good, view)) = self
            .last_good
            .as_ref()
            .filter(|(good, _)| Arc::ptr_eq(good, loaded))
            .map(|(good, view)| (Arc::clone(good), Arc::clone(view)))
        else {
            return self.fail(&loaded.city, error);
        };
        self.push_diagnostic(format!("{}: {error}", loaded.city));
        self.ticket.layer += 1;
        self.phase = Phase::LayerLoaded { loaded: good, view };
        Vec::new()
    }

    /// Joins (or reads natively) the indicator and makes it the current view.
    fn show(&mut self, loaded: Arc<LoadedSource>, layer: LayerDescriptor, rows: Option<&[Row]>) {
        let base = loaded.features.as_ref().clone();
        let (features, report) = match rows {
            Some(rows) => {
                let merged = join::merge(base, rows, &loaded.source.join_field, &layer.id);
                (merged.features, Some(merged.report))
            }
            None => (join::resolve_native(base, &layer.id), None),
        };
        if let Some(report) = &report {
            if report.count_mismatch() {
                self.push_diagnostic(format!(
                    "{}: {} rows for {} features",
                    layer.id, report.rows, report.features
                ));
            }
            if !report.unmatched.is_empty() {
                self.push_diagnostic(format!(
                    "{}: no data for {}",
                    layer.id,
                    report.unmatched.join(", ")
                ));
            }
        }

        let values: Vec<f64> = features
            .iter()
            .filter_map(|f| join::numeric_value(f, &layer.id))
            .collect();
        let palette = layer
            .colors
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(default_palette);
        let scale = ColorScale::build(&values, &palette).with_highlight(layer.highlight.as_deref());

        let view = Arc::new(LayerView {
            city: loaded.city.clone(),
            source: loaded.source.clone(),
            layer,
            features,
            scale,
            report,
        });
        self.last_good = Some((Arc::clone(&loaded), Arc::clone(&view)));
        self.phase = Phase::LayerLoaded { loaded, view };
    }

    fn start_enrichment(&mut self, loaded: Arc<LoadedSource>) -> Vec<FetchRequest> {
        self.pending = None;
        if !self.eager {
            return Vec::new();
        }
        let layers: Vec<Layer> = self
            .index
            .catalog()
            .layers_in(&loaded.city)
            .filter(|l| l.source_id == loaded.source.id)
            .cloned()
            .collect();
        let requests: Vec<FetchRequest> = layers
            .iter()
            .enumerate()
            .map(|(i, l)| FetchRequest {
                ticket: self.ticket,
                payload: Payload::Enrichment(i),
                url: resolve_url(&self.host, &l.url),
            })
            .collect();
        self.pending = Some(PendingEnrichment {
            rows: vec![None; layers.len()],
            loaded,
            layers,
        });
        self.finish_enrichment();
        requests
    }

    fn on_enrichment(
        &mut self,
        i: usize,
        url: &str,
        result: Result<Value, FetchError>,
    ) -> Vec<FetchRequest> {
        let rows = match result.and_then(|v| layer_rows(url, v)) {
            Ok(rows) => rows,
            Err(e) => {
                self.push_diagnostic(e.to_string());
                Vec::new()
            }
        };
        if let Some(slot) = self.pending.as_mut().and_then(|p| p.rows.get_mut(i)) {
            *slot = Some(rows);
        }
        self.finish_enrichment();
        Vec::new()
    }

    fn finish_enrichment(&mut self) {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|p| p.rows.iter().all(Option::is_some));
        if !ready {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        let tables: Vec<Vec<Row>> = pending.rows.into_iter().flatten().collect();
        let steps: Vec<JoinStep<'_>> = pending
            .layers
            .iter()
            .zip(&tables)
            .map(|(layer, rows)| JoinStep {
                rows,
                fields: layer.indicators.iter().map(|i| i.id.as_str()).collect(),
            })
            .collect();
        let loaded = &pending.loaded;
        let (features, _) = join::enrich(
            loaded.features.as_ref().clone(),
            &loaded.source.join_field,
            &steps,
        );
        info!("{}: enriched {} features with {} layers", loaded.city, features.len(), steps.len());
        self.enriched = Some(Arc::new(Enriched {
            city: loaded.city.clone(),
            source_id: loaded.source.id.clone(),
            features,
        }));
    }

    /// Keeps the last good view if there is one; otherwise the city fails.
    fn fail(&mut self, city: &str, error: String) -> Vec<FetchRequest> {
        self.push_diagnostic(format!("{city}: {error}"));
        self.ticket = Ticket {
            city: self.ticket.city + 1,
            layer: self.ticket.layer + 1,
        };
        self.pending = None;
        self.phase = match &self.last_good {
            Some((loaded, view)) => Phase::LayerLoaded {
                loaded: Arc::clone(loaded),
                view: Arc::clone(view),
            },
            None => Phase::Failed {
                city: city.to_string(),
                error,
            },
        };
        Vec::new()
    }

    fn push_diagnostic(&mut self, message: String) {
        warn!("{message}");
        if self.diagnostics.len() == MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(message);
    }
}
