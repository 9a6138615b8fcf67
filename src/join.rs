//! Joining layer tables onto source features.
//!
//! Rows are matched to features through the source's join field. Matched
//! values are written into the feature properties under the indicator id;
//! features without a match are left untouched.

use std::cmp::Ordering;
use std::collections::HashMap;

use geojson::Feature;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

/// One record of a layer table.
pub type Row = Map<String, Value>;

/// Placeholder the upstream exports use for missing array items.
pub const NAN_SENTINEL: &str = "NaN";

/// What a join matched and what it could not.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinReport {
    pub rows: usize,
    pub features: usize,
    pub matched: usize,
    /// Feature keys with no row. Features without a key show as `#<position>`.
    pub unmatched: Vec<String>,
    /// Row keys seen more than once; the first row wins.
    pub duplicate_keys: Vec<String>,
    /// Matched features whose value aggregated to no data.
    pub undefined: Vec<String>,
}

impl JoinReport {
    pub fn count_mismatch(&self) -> bool {
        self.rows != self.features
    }
}

#[derive(Clone, Debug)]
pub struct Merged {
    pub features: Vec<Feature>,
    pub report: JoinReport,
}

/// Normalized join key. Numbers and their string spelling match each other.
pub fn join_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reduces a cell to a scalar.
///
/// Arrays become the mean of their numeric items, skipping the `"NaN"`
/// sentinel. When nothing is left the result is `null`, meaning no data.
pub fn aggregate(v: &Value) -> Value {
    let Value::Array(items) = v else {
        return v.clone();
    };
    let (mut sum, mut count) = (0.0, 0usize);
    for item in items {
        match item {
            Value::String(s) if s == NAN_SENTINEL => {}
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    sum += f;
                    count += 1;
                }
            }
            other => debug!("ignoring non-numeric item {other} while averaging"),
        }
    }
    if count == 0 {
        return Value::Null;
    }
    Number::from_f64(sum / count as f64).map_or(Value::Null, Value::Number)
}

pub fn property<'a>(feature: &'a Feature, field: &str) -> Option<&'a Value> {
    feature.properties.as_ref()?.get(field)
}

/// Numeric value of `field`; `None` covers unset, `null` and non-numbers.
pub fn numeric_value(feature: &Feature, field: &str) -> Option<f64> {
    property(feature, field)?.as_f64().filter(|f| f.is_finite())
}

pub fn feature_key(feature: &Feature, join_field: &str) -> Option<String> {
    property(feature, join_field).and_then(join_key)
}

/// Writes `fields` of the matching row into every feature. Does not reorder.
fn write_fields(
    features: &mut [Feature],
    rows: &[Row],
    join_field: &str,
    fields: &[&str],
) -> JoinReport {
    let mut report = JoinReport {
        rows: rows.len(),
        features: features.len(),
        ..JoinReport::default()
    };

    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let Some(key) = row.get(join_field).and_then(join_key) else {
            continue;
        };
        if index.contains_key(&key) {
            report.duplicate_keys.push(key);
        } else {
            index.insert(key, i);
        }
    }

    for (n, feature) in features.iter_mut().enumerate() {
        // a feature without a key never joins, not even with an empty row key
        let Some(key) = feature_key(feature, join_field) else {
            report.unmatched.push(format!("#{n}"));
            continue;
        };
        let Some(&i) = index.get(&key) else {
            report.unmatched.push(key);
            continue;
        };
        report.matched += 1;
        for field in fields.iter().copied().filter(|f| *f != join_field) {
            let Some(cell) = rows[i].get(field) else {
                continue;
            };
            let value = aggregate(cell);
            if value.is_null() {
                report.undefined.push(key.clone());
            }
            feature.set_property(field, value);
        }
    }
    report
}

/// Sorts features by `field`, highest first; features without a value last.
pub fn rank(features: &mut [Feature], field: &str) {
    features.sort_by(|a, b| {
        match (numeric_value(a, field), numeric_value(b, field)) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// Joins one indicator column of `rows` onto `features` and ranks the result.
pub fn merge(mut features: Vec<Feature>, rows: &[Row], join_field: &str, value_field: &str) -> Merged {
    let report = write_fields(&mut features, rows, join_field, &[value_field]);
    log_report(value_field, &report);
    rank(&mut features, value_field);
    Merged { features, report }
}

/// Ranks a source-owned indicator, averaging array cells in place.
pub fn resolve_native(mut features: Vec<Feature>, field: &str) -> Vec<Feature> {
    for feature in &mut features {
        if let Some(cell @ Value::Array(_)) = property(feature, field) {
            let value = aggregate(cell);
            feature.set_property(field, value);
        }
    }
    rank(&mut features, field);
    features
}

/// One layer table and the indicator columns to take from it.
#[derive(Clone, Debug)]
pub struct JoinStep<'a> {
    pub rows: &'a [Row],
    pub fields: Vec<&'a str>,
}

/// Applies several joins in order, each on the output of the previous one.
pub fn enrich(
    mut features: Vec<Feature>,
    join_field: &str,
    steps: &[JoinStep<'_>],
) -> (Vec<Feature>, Vec<JoinReport>) {
    let mut reports = Vec::with_capacity(steps.len());
    for step in steps {
        let report = write_fields(&mut features, step.rows, join_field, &step.fields);
        log_report(&step.fields.join(","), &report);
        reports.push(report);
    }
    (features, reports)
}

/// `(join key, value)` pairs in feature order, for chart widgets.
pub fn ranked_pairs(features: &[Feature], join_field: &str, value_field: &str) -> Vec<(String, Option<f64>)> {
    features
        .iter()
        .map(|f| {
            (
                feature_key(f, join_field).unwrap_or_default(),
                numeric_value(f, value_field),
            )
        })
        .collect()
}

fn log_report(field: &str, report: &JoinReport) {
    if report.count_mismatch() {
        warn!(
            "joining {field}: {} rows for {} features",
            report.rows, report.features
        );
    }
    if !report.unmatched.is_empty() {
        warn!("joining {field}: no row for {:?}", report.unmatched);
    }
    if !report.duplicate_keys.is_empty() {
        warn!("joining {field}: duplicate keys {:?}", report.duplicate_keys);
    }
    debug!("joining {field}: {} of {} matched", report.matched, report.features);
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    pub(crate) fn feature(props: Value) -> Feature {
        Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: props.as_object().cloned(),
            foreign_members: None,
        }
    }

    pub(crate) fn rows(v: Value) -> Vec<Row> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn keys(features: &[Feature], field: &str) -> Vec<String> {
        features.iter().map(|f| feature_key(f, field).unwrap()).collect()
    }

    pub(crate) fn milano_features() -> Vec<Feature> {
        vec![
            feature(json!({"NIL": "A", "name": "Brera"})),
            feature(json!({"NIL": "B", "name": "Isola"})),
            feature(json!({"NIL": "C", "name": "Navigli"})),
        ]
    }

    pub(crate) fn milano_rows() -> Vec<Row> {
        rows(json!([
            {"NIL": "A", "densitaOccupati": 10},
            {"NIL": "B", "densitaOccupati": [5, "NaN", 15]},
            {"NIL": "C", "densitaOccupati": 30}
        ]))
    }

    #[test]
    fn merges_and_ranks_descending() {
        let merged = merge(milano_features(), &milano_rows(), "NIL", "densitaOccupati");
        assert_eq!(keys(&merged.features, "NIL"), ["C", "A", "B"]);
        let values: Vec<Option<f64>> = merged
            .features
            .iter()
            .map(|f| numeric_value(f, "densitaOccupati"))
            .collect();
        assert_eq!(values, [Some(30.0), Some(10.0), Some(10.0)]);
        assert_eq!(property(&merged.features[0], "name"), Some(&json!("Navigli")));
        assert_eq!(merged.report.matched, 3);
        assert!(!merged.report.count_mismatch());
    }

    #[rstest]
    #[case(json!([4, "NaN", 6]), json!(5.0))]
    #[case(json!(["NaN", "NaN"]), Value::Null)]
    #[case(json!([]), Value::Null)]
    #[case(json!([1, 2, "x"]), json!(1.5))]
    #[case(json!(7), json!(7))]
    #[case(json!("NaN"), json!("NaN"))]
    fn aggregates_cells(#[case] cell: Value, #[case] expected: Value) {
        assert_eq!(aggregate(&cell), expected);
    }

    #[test]
    fn all_sentinel_cells_are_no_data_not_zero() {
        let rows = rows(json!([
            {"NIL": "A", "v": ["NaN", "NaN"]},
            {"NIL": "B", "v": 0}
        ]));
        let merged = merge(
            vec![feature(json!({"NIL": "A"})), feature(json!({"NIL": "B"}))],
            &rows,
            "NIL",
            "v",
        );
        assert_eq!(keys(&merged.features, "NIL"), ["B", "A"]);
        assert_eq!(property(&merged.features[1], "v"), Some(&Value::Null));
        assert_eq!(numeric_value(&merged.features[1], "v"), None);
        assert_eq!(numeric_value(&merged.features[0], "v"), Some(0.0));
        assert_eq!(merged.report.undefined, ["A"]);
    }

    #[test]
    fn tolerates_gaps_duplicates_and_count_mismatch() {
        let rows = rows(json!([
            {"NIL": 1, "v": 3},
            {"NIL": 1, "v": 99},
            {"NIL": 2, "v": 8},
            {"v": 1}
        ]));
        let features = vec![
            feature(json!({"NIL": "1"})),
            feature(json!({"NIL": 3})),
            feature(json!({"NIL": 2.0})),
        ];
        let merged = merge(features, &rows, "NIL", "v");

        assert_eq!(keys(&merged.features, "NIL"), ["2", "1", "3"]);
        assert_eq!(numeric_value(&merged.features[1], "v"), Some(3.0));
        assert_eq!(property(&merged.features[2], "v"), None);
        assert_eq!(merged.report.unmatched, ["3"]);
        assert_eq!(merged.report.duplicate_keys, ["1"]);
        assert!(merged.report.count_mismatch());
    }

    #[test]
    fn sort_puts_every_undefined_value_last() {
        let mut features = vec![
            feature(json!({"k": "a"})),
            feature(json!({"k": "b", "v": 2})),
            feature(json!({"k": "c", "v": null})),
            feature(json!({"k": "d", "v": 9})),
            feature(json!({"k": "e", "v": "n/a"})),
            feature(json!({"k": "f", "v": 2})),
        ];
        rank(&mut features, "v");
        assert_eq!(keys(&features, "k"), ["d", "b", "f", "a", "c", "e"]);
        for pair in features.windows(2) {
            match (numeric_value(&pair[0], "v"), numeric_value(&pair[1], "v")) {
                (Some(a), Some(b)) => assert!(a >= b),
                (None, Some(_)) => panic!("undefined before defined"),
                _ => {}
            }
        }
    }

    #[test]
    fn enrich_threads_features_through_steps() {
        let first = rows(json!([
            {"NIL": "A", "x": 1, "y": 2},
            {"NIL": "B", "x": 3, "y": 4}
        ]));
        let second = rows(json!([
            {"NIL": "A", "z": [2, 4], "x": 100, "NIL2": 0},
            {"NIL": "B", "z": 6}
        ]));
        let steps = [
            JoinStep { rows: &first, fields: vec!["x", "y"] },
            JoinStep { rows: &second, fields: vec!["z", "NIL"] },
        ];
        let (features, reports) = enrich(milano_features(), "NIL", &steps);

        assert_eq!(reports.len(), 2);
        let a = &features[0];
        assert_eq!(numeric_value(a, "x"), Some(1.0));
        assert_eq!(numeric_value(a, "y"), Some(2.0));
        assert_eq!(numeric_value(a, "z"), Some(3.0));
        assert_eq!(property(a, "NIL"), Some(&json!("A")));
        assert_eq!(property(&features[2], "z"), None);
    }

    #[test]
    fn native_columns_are_averaged_and_ranked() {
        let features = vec![
            feature(json!({"K": "a", "area": [1, 3]})),
            feature(json!({"K": "b", "area": 5})),
        ];
        let features = resolve_native(features, "area");
        assert_eq!(keys(&features, "K"), ["b", "a"]);
        assert_eq!(numeric_value(&features[1], "area"), Some(2.0));
    }

    #[test]
    fn features_without_key_never_match() {
        let features = vec![
            feature(json!({"name": "no key"})),
            feature(json!({"NIL": "A"})),
        ];
        let rows = rows(json!([{"NIL": "", "v": 42}, {"NIL": "A", "v": 1}]));
        let merged = merge(features, &rows, "NIL", "v");

        let unkeyed = merged
            .features
            .iter()
            .find(|f| property(f, "name").is_some())
            .unwrap();
        assert_eq!(property(unkeyed, "v"), None);
        assert_eq!(merged.report.matched, 1);
        assert_eq!(merged.report.unmatched, ["#0"]);
    }

    #[test]
    fn pairs_follow_feature_order() {
        let merged = merge(milano_features(), &milano_rows(), "NIL", "densitaOccupati");
        assert_eq!(
            ranked_pairs(&merged.features, "NIL", "densitaOccupati"),
            [
                ("C".to_string(), Some(30.0)),
                ("A".to_string(), Some(10.0)),
                ("B".to_string(), Some(10.0)),
            ]
        );
    }
}
