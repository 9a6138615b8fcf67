//! Menu catalog: the declarative list of sources and layers per city.
//!
//! The raw menu is a JSON array whose entries are tagged by `type`. Parsing is
//! tolerant: anything wrong with a single entry becomes a [`Diagnostic`] and
//! the rest of the menu is still loaded.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// One queryable column of a source or layer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub colors: Option<Vec<String>>,
    #[serde(default)]
    pub highlight: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub raw: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A geographic dataset (feature collection) of one city.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub city: String,
    pub url: String,
    pub join_field: String,
    #[serde(default, deserialize_with = "lenient_center")]
    pub center: Option<[f64; 2]>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub zoom: Option<f64>,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
    #[serde(default)]
    pub default: bool,
}

/// A tabular dataset joined onto exactly one [`Source`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub city: String,
    pub source_id: String,
    pub url: String,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CatalogEntry {
    Source(Source),
    Layer(Layer),
}

/// An indicator flattened together with everything needed to load it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub id: String,
    pub label: String,
    pub category: String,
    pub city: String,
    pub source_id: String,
    pub source_url: String,
    pub join_field: String,
    /// `None` when the indicator is a native property of the source.
    pub layer_id: Option<String>,
    pub layer_url: Option<String>,
    pub data_source: Option<String>,
    pub default: bool,
    pub colors: Option<Vec<String>>,
    pub highlight: Option<String>,
    pub labels: Option<Vec<String>>,
    pub raw: Option<Value>,
    pub description: Option<String>,
}

impl LayerDescriptor {
    pub fn is_source_owned(&self) -> bool {
        self.layer_url.is_none()
    }

    /// Id of the menu entry that declares this indicator.
    pub fn owner_id(&self) -> &str {
        self.layer_id.as_deref().unwrap_or(&self.source_id)
    }

    fn from_source(source: &Source, ind: &Indicator) -> Self {
        Self {
            id: ind.id.clone(),
            label: ind.label.clone(),
            category: ind.category.clone(),
            city: source.city.clone(),
            source_id: source.id.clone(),
            source_url: source.url.clone(),
            join_field: source.join_field.clone(),
            layer_id: None,
            layer_url: None,
            data_source: ind.data_source.clone().or_else(|| source.data_source.clone()),
            default: ind.default,
            colors: ind.colors.clone(),
            highlight: ind.highlight.clone(),
            labels: ind.labels.clone(),
            raw: ind.raw.clone(),
            description: ind.description.clone(),
        }
    }

    fn from_layer(layer: &Layer, source: &Source, ind: &Indicator) -> Self {
        Self {
            layer_id: Some(layer.id.clone()),
            layer_url: Some(layer.url.clone()),
            data_source: ind.data_source.clone().or_else(|| layer.data_source.clone()),
            ..Self::from_source(source, ind)
        }
    }
}

/// Indicators of one city sharing a category, in menu order.
#[derive(Clone, Debug, PartialEq)]
pub struct Category<'a> {
    pub name: &'a str,
    pub indicators: Vec<&'a LayerDescriptor>,
}

/// Non-fatal problems found while loading the menu.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Diagnostic {
    #[error("menu entry {index}: unknown type {kind:?}, skipped")]
    UnknownEntryType { index: usize, kind: String },
    #[error("menu entry {index}: {reason}")]
    MalformedEntry { index: usize, reason: String },
    #[error("layer {layer} ({city}) references missing source {source_id}")]
    DanglingSource {
        layer: String,
        city: String,
        source_id: String,
    },
    #[error("layer {layer} ({city}) has no url")]
    MissingUrl { layer: String, city: String },
    #[error("city {city} has no default source")]
    MissingDefaultSource { city: String },
    #[error("city {city} has {count} default sources")]
    MultipleDefaultSources { city: String, count: usize },
    #[error("city {city} has no default layer")]
    MissingDefaultLayer { city: String },
    #[error("city {city} has {count} default layers")]
    MultipleDefaultLayers { city: String, count: usize },
    #[error("city {city} declares indicator {id} more than once")]
    DuplicateIndicator { city: String, id: String },
    #[error("menu declares no cities")]
    NoCities,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("menu document is not valid: {0}")]
    Parse(String),
    #[error("{0} not found in menu")]
    NotFound(String),
}

/// The parsed menu. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    sources: Vec<Source>,
    layers: Vec<Layer>,
    descriptors: Vec<LayerDescriptor>,
    cities: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Catalog {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CatalogError> {
        let doc: Value =
            serde_json::from_slice(bytes).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::parse(&doc)
    }

    pub fn parse(doc: &Value) -> Result<Self, CatalogError> {
        let Some(raw) = doc.as_array() else {
            return Err(CatalogError::Parse("expected an array of entries".into()));
        };

        let mut catalog = Self::default();
        let mut layers = Vec::new();
        for (index, item) in raw.iter().enumerate() {
            let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind != "source" && kind != "layer" {
                catalog.report(Diagnostic::UnknownEntryType {
                    index,
                    kind: kind.to_string(),
                });
                continue;
            }
            match CatalogEntry::deserialize(item) {
                Ok(CatalogEntry::Source(s)) => catalog.sources.push(s),
                Ok(CatalogEntry::Layer(l)) => layers.push(l),
                Err(e) => catalog.report(Diagnostic::MalformedEntry {
                    index,
                    reason: e.to_string(),
                }),
            }
        }

        for layer in layers {
            let known = catalog
                .sources
                .iter()
                .any(|s| s.city == layer.city && s.id == layer.source_id);
            if !known {
                catalog.report(Diagnostic::DanglingSource {
                    layer: layer.id.clone(),
                    city: layer.city.clone(),
                    source_id: layer.source_id.clone(),
                });
            } else if layer.url.trim().is_empty() {
                catalog.report(Diagnostic::MissingUrl {
                    layer: layer.id.clone(),
                    city: layer.city.clone(),
                });
            } else {
                catalog.layers.push(layer);
            }
        }

        catalog.flatten();
        catalog.validate();
        Ok(catalog)
    }

    /// Flattens indicators in menu order: sources first, then layers.
    fn flatten(&mut self) {
        let mut descriptors = Vec::new();
        for source in &self.sources {
            descriptors.extend(
                source
                    .indicators
                    .iter()
                    .map(|ind| LayerDescriptor::from_source(source, ind)),
            );
        }
        for layer in &self.layers {
            if let Some(source) = self.source_of(layer) {
                descriptors.extend(
                    layer
                        .indicators
                        .iter()
                        .map(|ind| LayerDescriptor::from_layer(layer, source, ind)),
                );
            }
        }
        self.descriptors = descriptors;

        let mut cities: Vec<String> = Vec::new();
        let seen = self
            .sources
            .iter()
            .map(|s| &s.city)
            .chain(self.layers.iter().map(|l| &l.city));
        for city in seen {
            if !cities.contains(city) {
                cities.push(city.clone());
            }
        }
        self.cities = cities;
    }

    fn validate(&mut self) {
        if self.cities.is_empty() {
            self.report(Diagnostic::NoCities);
        }
        for city in self.cities.clone() {
            let flagged = self.sources_in(&city).filter(|s| s.default).count();
            match flagged {
                1 => {}
                0 => self.report(Diagnostic::MissingDefaultSource { city: city.clone() }),
                count => self.report(Diagnostic::MultipleDefaultSources {
                    city: city.clone(),
                    count,
                }),
            }
            let flagged = self.descriptors_in(&city).filter(|d| d.default).count();
            match flagged {
                1 => {}
                0 => self.report(Diagnostic::MissingDefaultLayer { city: city.clone() }),
                count => self.report(Diagnostic::MultipleDefaultLayers {
                    city: city.clone(),
                    count,
                }),
            }

            let mut ids = HashSet::new();
            let duplicates: Vec<String> = self
                .descriptors_in(&city)
                .filter(|d| !ids.insert(d.id.as_str()))
                .map(|d| d.id.clone())
                .collect();
            for id in duplicates {
                self.report(Diagnostic::DuplicateIndicator {
                    city: city.clone(),
                    id,
                });
            }
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    fn source_of(&self, layer: &Layer) -> Option<&Source> {
        self.sources
            .iter()
            .find(|s| s.city == layer.city && s.id == layer.source_id)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn descriptors(&self) -> &[LayerDescriptor] {
        &self.descriptors
    }

    pub fn cities(&self) -> &[String] {
        &self.cities
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn sources_in<'a>(&'a self, city: &'a str) -> impl Iterator<Item = &'a Source> + 'a {
        self.sources.iter().filter(move |s| s.city == city)
    }

    pub fn layers_in<'a>(&'a self, city: &'a str) -> impl Iterator<Item = &'a Layer> + 'a {
        self.layers.iter().filter(move |l| l.city == city)
    }

    pub fn descriptors_in<'a>(
        &'a self,
        city: &'a str,
    ) -> impl Iterator<Item = &'a LayerDescriptor> + 'a {
        self.descriptors.iter().filter(move |d| d.city == city)
    }

    /// Groups a city's indicators by category, in order of first appearance.
    pub fn categories(&self, city: &str) -> Vec<Category<'_>> {
        let mut out: Vec<Category<'_>> = Vec::new();
        for d in self.descriptors.iter().filter(|d| d.city == city) {
            match out.iter_mut().find(|c| c.name == d.category) {
                Some(c) => c.indicators.push(d),
                None => out.push(Category {
                    name: &d.category,
                    indicators: vec![d],
                }),
            }
        }
        out
    }

    /// First indicator of `city` flagged as default.
    pub fn default_layer(&self, city: &str) -> Result<&LayerDescriptor, CatalogError> {
        self.descriptors
            .iter()
            .find(|d| d.city == city && d.default)
            .ok_or_else(|| CatalogError::NotFound(format!("default layer of {city}")))
    }

    pub fn default_source(&self, city: &str, source_id: &str) -> Result<&Source, CatalogError> {
        self.sources
            .iter()
            .find(|s| s.city == city && s.id == source_id)
            .ok_or_else(|| CatalogError::NotFound(format!("source {source_id} of {city}")))
    }
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(Value::deserialize(d)?.as_f64())
}

// Menu templates carry `"center": []` for unknown centers.
fn lenient_center<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[f64; 2]>, D::Error> {
    let v = Value::deserialize(d)?;
    let coords: Option<Vec<f64>> = v
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect());
    Ok(match coords.as_deref() {
        Some([lon, lat]) => Some([*lon, *lat]),
        _ => None,
    })
}
