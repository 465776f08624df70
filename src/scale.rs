use serde::{Serialize, Serializer};
use std::fmt;

/// Opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Parse `#rrggbb` (leading `#` optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self { r, g, b })
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Quantile color scale over the non-zero values of one attribute.
///
/// Thresholds sit at the `k/n` quantiles of the sorted domain, so each of the
/// `n` palette colors covers roughly the same number of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileScale {
    domain: Vec<f64>,
    thresholds: Vec<f64>,
    palette: Vec<Color>,
    no_data: Color,
}

impl QuantileScale {
    pub fn new(values: impl IntoIterator<Item = f64>, palette: Vec<Color>, no_data: Color) -> Self {
        let mut domain: Vec<f64> = values
            .into_iter()
            .filter(|v| v.is_finite() && *v != 0.0)
            .collect();
        domain.sort_by(|a, b| a.total_cmp(b));

        let n = palette.len();
        let thresholds = if domain.is_empty() {
            Vec::new()
        } else {
            (1..n).map(|k| quantile(&domain, k as f64 / n as f64)).collect()
        };

        Self {
            domain,
            thresholds,
            palette,
            no_data,
        }
    }

    /// Sorted values the scale was fit on.
    pub fn domain(&self) -> &[f64] {
        &self.domain
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn no_data(&self) -> Color {
        self.no_data
    }

    /// Palette bucket for a value, `None` when the value carries no data.
    pub fn bucket(&self, value: Option<f64>) -> Option<usize> {
        let v = value.filter(|v| v.is_finite() && *v != 0.0)?;
        if self.domain.is_empty() || self.palette.is_empty() {
            return None;
        }
        Some(self.thresholds.partition_point(|t| *t <= v))
    }

    pub fn color_for(&self, value: Option<f64>) -> Color {
        self.bucket(value)
            .map(|i| self.palette[i])
            .unwrap_or(self.no_data)
    }
}

/// Linear interpolation between closest ranks of a sorted slice.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let frac = h - lo as f64;
    if frac == 0.0 || lo + 1 >= sorted.len() {
        sorted[lo]
    } else {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    }
}

/// Maps a numeric domain onto a pixel range, clamped to the range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    pub domain: [f64; 2],
    pub range: [f64; 2],
}

impl LinearScale {
    pub fn new(domain: [f64; 2], range: [f64; 2]) -> Self {
        Self { domain, range }
    }

    pub fn apply(&self, value: f64) -> f64 {
        let [d0, d1] = self.domain;
        let [r0, r1] = self.range;
        if d1 == d0 {
            return r0;
        }
        let t = ((value - d0) / (d1 - d0)).clamp(0.0, 1.0);
        r0 + t * (r1 - r0)
    }
}

/// Round tick values covering `[lo, hi]`, roughly `count` of them.
pub fn nice_ticks(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    if !(hi > lo) || count == 0 {
        return vec![lo];
    }
    let span = hi - lo;
    let mut step = 10f64.powf((span / count as f64).log10().floor());
    let err = count as f64 / span * step;
    if err <= 0.15 {
        step *= 10.0;
    } else if err <= 0.35 {
        step *= 5.0;
    } else if err <= 0.75 {
        step *= 2.0;
    }

    let start = (lo / step).ceil() as i64;
    let stop = (hi / step).floor() as i64;
    (start..=stop).map(|i| i as f64 * step).collect()
}
