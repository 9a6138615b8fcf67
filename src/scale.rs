//! Value to color mapping for one indicator column.

use serde::Serialize;

use crate::config::DEFAULT_HIGHLIGHT;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stop {
    pub value: f64,
    pub color: String,
}

/// Fill paint for the map widget: `{property, stops: [[value, color], ...]}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PaintSpec {
    pub property: String,
    pub stops: Vec<(f64, String)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColorScale {
    stops: Vec<Stop>,
    highlight: String,
}

impl ColorScale {
    /// Samples `palette.len()` evenly spaced points starting at the minimum
    /// of `values`, with step `(max - min) / palette.len()`.
    ///
    /// Non-finite values are ignored. With no values, or all of them equal,
    /// every stop sits at the minimum and the scale is constant.
    pub fn build(values: &[f64], palette: &[String]) -> Self {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0.0, 0.0));

        let n = palette.len();
        let step = if n == 0 || max == min {
            0.0
        } else {
            (max - min) / n as f64
        };
        let stops = palette
            .iter()
            .enumerate()
            .map(|(i, color)| Stop {
                value: min + i as f64 * step,
                color: color.clone(),
            })
            .collect();

        Self {
            stops,
            highlight: DEFAULT_HIGHLIGHT.to_string(),
        }
    }

    #[must_use]
    pub fn with_highlight(mut self, highlight: Option<&str>) -> Self {
        if let Some(h) = highlight {
            self.highlight = h.to_string();
        }
        self
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn highlight(&self) -> &str {
        &self.highlight
    }

    fn is_constant(&self) -> bool {
        match (self.stops.first(), self.stops.last()) {
            (Some(a), Some(b)) => a.value == b.value,
            _ => true,
        }
    }

    /// Color for `value`, interpolated between neighbouring stops and clamped
    /// at both ends. Colors that are not `#rrggbb` switch at the lower stop.
    pub fn color_for(&self, value: f64) -> String {
        let Some(first) = self.stops.first() else {
            return self.highlight.clone();
        };
        if self.is_constant() || value.is_nan() || value <= first.value {
            return first.color.clone();
        }
        for pair in self.stops.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if value > hi.value {
                continue;
            }
            let t = (value - lo.value) / (hi.value - lo.value);
            return match (Rgb::parse(&lo.color), Rgb::parse(&hi.color)) {
                (Some(a), Some(b)) => a.lerp(b, t).to_hex(),
                _ if t >= 1.0 => hi.color.clone(),
                _ => lo.color.clone(),
            };
        }
        self.stops[self.stops.len() - 1].color.clone()
    }

    pub fn paint(&self, property: &str) -> PaintSpec {
        PaintSpec {
            property: property.to_string(),
            stops: self
                .stops
                .iter()
                .map(|s| (s.value, s.color.clone()))
                .collect(),
        }
    }
}

/// Contract-level entry point, see [`ColorScale::build`].
pub fn build_scale(values: &[f64], palette: &[String]) -> ColorScale {
    ColorScale::build(values, palette)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn parse(hex: &str) -> Option<Self> {
        let h = hex.strip_prefix('#')?;
        if h.len() != 6 || !h.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&h[i..i + 2], 16).ok();
        Some(Self(channel(0)?, channel(2)?, channel(4)?))
    }

    fn lerp(self, other: Self, t: f64) -> Self {
        let mix = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
        Self(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::config::default_palette;

    fn palette(colors: &[&str]) -> Vec<String> {
        colors.iter().map(|c| c.to_string()).collect()
    }

    #[rstest]
    #[case(vec![1.0], 1)]
    #[case(vec![3.0, 1.0, 2.0], 3)]
    #[case(vec![0.5, 100.0], 9)]
    #[case(vec![], 4)]
    fn one_stop_per_color(#[case] values: Vec<f64>, #[case] n: usize) {
        let colors: Vec<String> = (0..n).map(|i| format!("#0000{i:02x}")).collect();
        assert_eq!(build_scale(&values, &colors).stops().len(), n);
    }

    #[test]
    fn samples_domain_linearly() {
        let scale = build_scale(&[10.0, 30.0, 10.0], &default_palette());
        let values: Vec<f64> = scale.stops().iter().map(|s| s.value).collect();
        assert_eq!(values[0], 10.0);
        for (i, v) in values.iter().enumerate() {
            assert!((v - (10.0 + i as f64 * 20.0 / 9.0)).abs() < 1e-9);
        }
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(scale.stops()[0].color, "#FFFFDD");
    }

    #[test]
    fn constant_scale_when_all_values_equal() {
        let scale = build_scale(&[5.0, 5.0, 5.0], &palette(&["a", "b", "c"]));
        assert_eq!(scale.color_for(5.0), "a");
        assert_eq!(scale.color_for(-1.0), "a");
        assert_eq!(scale.color_for(1e9), "a");
        assert!(scale.stops().iter().all(|s| s.value == 5.0));

        let empty = build_scale(&[], &palette(&["a", "b"]));
        assert_eq!(empty.color_for(3.0), "a");
    }

    #[test]
    fn interpolates_and_clamps() {
        let scale = build_scale(&[0.0, 4.0], &palette(&["#000000", "#ffffff"]));
        // stops at 0 and 2
        assert_eq!(scale.color_for(-5.0), "#000000");
        assert_eq!(scale.color_for(1.0), "#808080");
        assert_eq!(scale.color_for(2.0), "#ffffff");
        assert_eq!(scale.color_for(4.0), "#ffffff");
    }

    #[test]
    fn named_colors_step_at_lower_stop() {
        let scale = build_scale(&[0.0, 3.0], &palette(&["a", "b", "c"]));
        assert_eq!(scale.color_for(0.5), "a");
        assert_eq!(scale.color_for(1.0), "b");
        assert_eq!(scale.color_for(2.5), "c");
    }

    #[test]
    fn highlight_defaults_and_overrides() {
        let scale = build_scale(&[1.0, 2.0], &default_palette());
        assert_eq!(scale.highlight(), "black");
        assert_eq!(scale.clone().with_highlight(None).highlight(), "black");
        assert_eq!(scale.with_highlight(Some("#ff0000")).highlight(), "#ff0000");
    }

    #[test]
    fn paint_spec_serializes_as_pairs() {
        let scale = build_scale(&[0.0, 2.0], &palette(&["#000000", "#ffffff"]));
        let json = serde_json::to_value(scale.paint("v")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"property": "v", "stops": [[0.0, "#000000"], [1.0, "#ffffff"]]})
        );
    }
}
