//! Read-only lookups over a loaded [`Catalog`].

use std::collections::HashMap;

use crate::catalog::{Catalog, CatalogError, Category, LayerDescriptor, Source};

#[derive(Clone, Copy, Debug, Default)]
struct CityDefaults {
    source: Option<usize>,
    layer: Option<usize>,
}

/// Positions into the catalog's descriptor list, built once per menu.
#[derive(Debug)]
pub struct CatalogIndex {
    catalog: Catalog,
    by_label: HashMap<String, usize>,
    by_category: HashMap<String, Vec<usize>>,
    by_city: HashMap<String, Vec<usize>>,
    defaults: HashMap<String, CityDefaults>,
}

impl CatalogIndex {
    pub fn new(catalog: Catalog) -> Self {
        let mut by_label = HashMap::new();
        let mut by_category: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_city: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, d) in catalog.descriptors().iter().enumerate() {
            by_label.entry(d.label.clone()).or_insert(i);
            by_category.entry(d.category.clone()).or_default().push(i);
            by_city.entry(d.city.clone()).or_default().push(i);
        }

        // Zero or several flags fall back to the first candidate; the catalog
        // already reported the violation.
        let mut defaults = HashMap::new();
        for city in catalog.cities() {
            let sources = catalog.sources();
            let source = sources
                .iter()
                .position(|s| &s.city == city && s.default)
                .or_else(|| sources.iter().position(|s| &s.city == city));
            let in_city = by_city.get(city).map(Vec::as_slice).unwrap_or_default();
            let layer = in_city
                .iter()
                .copied()
                .find(|&i| catalog.descriptors()[i].default)
                .or_else(|| in_city.first().copied());
            defaults.insert(city.clone(), CityDefaults { source, layer });
        }

        Self {
            catalog,
            by_label,
            by_category,
            by_city,
            defaults,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cities(&self) -> &[String] {
        self.catalog.cities()
    }

    pub fn has_city(&self, city: &str) -> bool {
        self.defaults.contains_key(city)
    }

    pub fn categories(&self, city: &str) -> Vec<Category<'_>> {
        self.catalog.categories(city)
    }

    pub fn descriptors_in(&self, city: &str) -> Vec<&LayerDescriptor> {
        self.positions(city).iter().map(|&i| self.at(i)).collect()
    }

    pub fn by_label(&self, label: &str) -> Result<&LayerDescriptor, CatalogError> {
        self.by_label
            .get(label)
            .map(|&i| self.at(i))
            .ok_or_else(|| CatalogError::NotFound(format!("layer labelled {label:?}")))
    }

    /// Same as [`Self::by_label`] but restricted to one city.
    pub fn by_label_in(&self, city: &str, label: &str) -> Result<&LayerDescriptor, CatalogError> {
        self.positions(city)
            .iter()
            .map(|&i| self.at(i))
            .find(|d| d.label == label)
            .ok_or_else(|| CatalogError::NotFound(format!("layer labelled {label:?} in {city}")))
    }

    pub fn by_category(&self, category: &str) -> Vec<&LayerDescriptor> {
        self.by_category
            .get(category)
            .map(|v| v.iter().map(|&i| self.at(i)).collect())
            .unwrap_or_default()
    }

    /// Looks an indicator up by the id of its menu entry and its own id.
    pub fn by_id(
        &self,
        city: &str,
        owner_id: &str,
        indicator_id: &str,
    ) -> Result<&LayerDescriptor, CatalogError> {
        self.positions(city)
            .iter()
            .map(|&i| self.at(i))
            .find(|d| d.owner_id() == owner_id && d.id == indicator_id)
            .ok_or_else(|| CatalogError::NotFound(format!("{owner_id}/{indicator_id} in {city}")))
    }

    pub fn category_labels(&self, city: &str, category: &str) -> Vec<&str> {
        self.positions(city)
            .iter()
            .map(|&i| self.at(i))
            .filter(|d| d.category == category)
            .map(|d| d.label.as_str())
            .collect()
    }

    pub fn layer_ids(&self, city: &str) -> Vec<&str> {
        self.positions(city).iter().map(|&i| self.at(i).id.as_str()).collect()
    }

    pub fn layer_labels(&self, city: &str) -> Vec<&str> {
        self.positions(city).iter().map(|&i| self.at(i).label.as_str()).collect()
    }

    pub fn default_source(&self, city: &str) -> Option<&Source> {
        let i = self.defaults.get(city)?.source?;
        self.catalog.sources().get(i)
    }

    pub fn default_layer(&self, city: &str) -> Option<&LayerDescriptor> {
        let i = self.defaults.get(city)?.layer?;
        self.catalog.descriptors().get(i)
    }

    fn positions(&self, city: &str) -> &[usize] {
        self.by_city.get(city).map(Vec::as_slice).unwrap_or_default()
    }

    fn at(&self, i: usize) -> &LayerDescriptor {
        &self.catalog.descriptors()[i]
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::catalog::tests::milano_torino;

    fn index() -> CatalogIndex {
        CatalogIndex::new(Catalog::parse(&milano_torino()).unwrap())
    }

    #[test]
    fn parallel_ids_and_labels() {
        let idx = index();
        assert_eq!(
            idx.layer_ids("Milano"),
            ["AreaMQ", "tipiAlloggio", "densitaOccupati", "scuole"]
        );
        assert_eq!(
            idx.layer_labels("Milano"),
            ["Area (mq)", "Tipo di alloggi", "Densità di occupati", "Scuole"]
        );
        assert!(idx.layer_ids("Roma").is_empty());
    }

    #[test]
    fn label_category_and_id_lookups() {
        let idx = index();
        assert_eq!(idx.by_label("Scuole").unwrap().id, "scuole");
        assert!(idx.by_label("Nessuno").is_err());
        assert_eq!(
            idx.by_label_in("Torino", "Numero di residenti").unwrap().id,
            "residenti"
        );
        assert!(idx.by_label_in("Milano", "Numero di residenti").is_err());

        let vit: Vec<&str> = idx.by_category("Vitalità").iter().map(|d| d.id.as_str()).collect();
        assert_eq!(vit, ["tipiAlloggio", "densitaOccupati"]);
        assert_eq!(
            idx.category_labels("Milano", "Vitalità"),
            ["Tipo di alloggi", "Densità di occupati"]
        );

        assert_eq!(
            idx.by_id("Milano", "vitalitaMilano", "scuole").unwrap().label,
            "Scuole"
        );
        assert_eq!(
            idx.by_id("Milano", "quartieriMilano", "AreaMQ").unwrap().label,
            "Area (mq)"
        );
        assert!(idx.by_id("Milano", "quartieriMilano", "scuole").is_err());
    }

    #[test]
    fn resolves_flagged_defaults() {
        let idx = index();
        assert_eq!(idx.default_source("Milano").unwrap().id, "quartieriMilano");
        assert_eq!(idx.default_layer("Milano").unwrap().id, "densitaOccupati");
        assert_eq!(idx.default_source("Torino").unwrap().id, "quartieriTorino");
        assert_eq!(idx.default_layer("Torino").unwrap().id, "residenti");
        assert!(idx.default_source("Roma").is_none());
    }

    #[test]
    fn falls_back_to_first_match_without_flags() {
        let doc = json!([
            {"type": "source", "id": "a", "city": "X", "url": "a", "joinField": "K"},
            {"type": "source", "id": "b", "city": "X", "url": "b", "joinField": "K"},
            {"type": "layer", "id": "l", "city": "X", "sourceId": "b", "url": "l",
             "indicators": [
                {"id": "i1", "label": "I1", "category": "C", "default": true},
                {"id": "i2", "label": "I2", "category": "C", "default": true}
             ]}
        ]);
        let catalog = Catalog::parse(&doc).unwrap();
        assert_eq!(catalog.diagnostics().len(), 2);
        let idx = CatalogIndex::new(catalog);
        assert_eq!(idx.default_source("X").unwrap().id, "a");
        assert_eq!(idx.default_layer("X").unwrap().id, "i1");

        let doc = json!([
            {"type": "source", "id": "a", "city": "Y", "url": "a", "joinField": "K",
             "indicators": [{"id": "own", "label": "Own", "category": "C"}]}
        ]);
        let idx = CatalogIndex::new(Catalog::parse(&doc).unwrap());
        assert_eq!(idx.default_layer("Y").unwrap().id, "own");
    }
}
