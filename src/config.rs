use crate::scale::Color;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    pub attributes: Vec<AttributeSpec>,
    #[serde(default)]
    pub palette: PaletteConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub hover: HoverConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_csv: PathBuf,
    #[serde(default = "default_geoid")]
    pub join_column_csv: String,
    #[serde(default = "default_name")]
    pub name_column_csv: String,
    pub regions: GeometrySource,
    pub background: GeometrySource,
}

/// A boundary file. `object` names the TopoJSON object to decode and is
/// ignored for GeoJSON and shapefiles.
#[derive(Debug, Deserialize, Clone)]
pub struct GeometrySource {
    pub path: PathBuf,
    pub object: Option<String>,
    #[serde(default = "default_geoid")]
    pub join_property: String,
    #[serde(default = "default_name")]
    pub name_property: String,
}

/// One row of the attribute table driving the dropdown, map and chart.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AttributeSpec {
    pub key: String,
    pub label: String,
    pub title: Option<String>,
    /// Bar chart value domain; derived from the data when omitted.
    pub axis_domain: Option<[f64; 2]>,
}

impl AttributeSpec {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.label)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaletteConfig {
    pub colors: Vec<String>,
    pub no_data: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            colors: ["#fef0d9", "#fdd49e", "#fdbb84", "#fc8d59", "#e34a33", "#b30000"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            no_data: "#cccccc".to_string(),
        }
    }
}

/// Albers conic equal-area parameters plus graticule layout, in degrees.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub width: f64,
    pub height: f64,
    pub center: [f64; 2],
    pub rotate: [f64; 3],
    pub parallels: [f64; 2],
    pub scale: f64,
    pub graticule_step: [f64; 2],
    /// `[[west, south], [east, north]]`
    pub graticule_extent: [[f64; 2]; 2],
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 700.0,
            center: [0.0, 31.0],
            rotate: [91.8, 0.0, 0.0],
            parallels: [28.0, 34.0],
            scale: 8600.0,
            graticule_step: [0.5, 0.5],
            graticule_extent: [[-96.0, 27.0], [-87.0, 35.0]],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChartConfig {
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub bar_gap: f64,
    pub tick_count: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 560.0,
            height: 700.0,
            margin_top: 50.0,
            margin_right: 20.0,
            margin_bottom: 30.0,
            margin_left: 130.0,
            bar_gap: 1.0,
            tick_count: 6,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HoverConfig {
    pub label_width: f64,
    pub label_height: f64,
    pub highlight_color: String,
    pub highlight_width: f64,
    pub stroke_color: String,
    pub stroke_width: f64,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            label_width: 200.0,
            label_height: 50.0,
            highlight_color: "#1f78b4".to_string(),
            highlight_width: 2.0,
            stroke_color: "#ffffff".to_string(),
            stroke_width: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoadConfig {
    pub timeout_secs: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

fn default_geoid() -> String {
    "GEOID".to_string()
}

fn default_name() -> String {
    "NAME".to_string()
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.attributes.is_empty() {
            bail!("At least one [[attributes]] entry is required");
        }

        let mut seen = HashSet::new();
        for attr in &self.attributes {
            if !seen.insert(attr.key.as_str()) {
                bail!("Duplicate attribute key '{}'", attr.key);
            }
            if let Some([lo, hi]) = attr.axis_domain {
                if !(lo < hi) {
                    bail!("Attribute '{}' axis_domain must satisfy min < max", attr.key);
                }
            }
        }

        let n = self.palette.colors.len();
        if !(3..=9).contains(&n) {
            bail!("Palette must have between 3 and 9 colors, found {}", n);
        }
        for hex in self.palette.colors.iter().chain([
            &self.palette.no_data,
            &self.hover.highlight_color,
            &self.hover.stroke_color,
        ]) {
            Color::from_hex(hex).ok_or_else(|| anyhow!("Invalid hex color '{}'", hex))?;
        }

        let sizes = [
            ("map.width", self.map.width),
            ("map.height", self.map.height),
            ("map.scale", self.map.scale),
            ("chart.width", self.chart.width),
            ("chart.height", self.chart.height),
        ];
        for (name, value) in sizes {
            if !(value > 0.0) {
                bail!("{} must be positive", name);
            }
        }
        if self.chart.margin_left + self.chart.margin_right >= self.chart.width
            || self.chart.margin_top + self.chart.margin_bottom >= self.chart.height
        {
            bail!("Chart margins leave no room for bars");
        }

        let [sx, sy] = self.map.graticule_step;
        if !(sx > 0.0 && sy > 0.0) {
            bail!("map.graticule_step must be positive");
        }
        Ok(())
    }

    pub fn palette_colors(&self) -> Result<(Vec<Color>, Color)> {
        let colors = self
            .palette
            .colors
            .iter()
            .map(|hex| Color::from_hex(hex).ok_or_else(|| anyhow!("Invalid hex color '{}'", hex)))
            .collect::<Result<Vec<_>>>()?;
        let no_data = Color::from_hex(&self.palette.no_data)
            .ok_or_else(|| anyhow!("Invalid hex color '{}'", self.palette.no_data))?;
        Ok((colors, no_data))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r##"
[input]
data_csv = "data/attributes.csv"

[input.regions]
path = "data/louisiana_parishes.topojson"
object = "cb_2014_us_county_500k"

[input.background]
path = "data/surrounding_states.topojson"
object = "surrounding_states"

[[attributes]]
key = "percentAfAm2010"
label = "Percent African American (2010)"
axis_domain = [0.0, 80.0]

[[attributes]]
key = "medianIncome2011"
label = "Median Income (2011)"
title = "Median Household Income, 2011"
"##;

    #[test]
    fn sample_parses_with_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.input.join_column_csv, "GEOID");
        assert_eq!(config.input.regions.join_property, "GEOID");
        assert_eq!(config.attributes.len(), 2);
        assert_eq!(config.attributes[0].title(), "Percent African American (2010)");
        assert_eq!(config.attributes[1].title(), "Median Household Income, 2011");
        assert_eq!(config.palette.colors.len(), 6);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.map.rotate, [91.8, 0.0, 0.0]);
    }

    #[test]
    fn rejects_duplicate_keys_and_bad_palette() {
        let dup = format!(
            "{SAMPLE}\n[[attributes]]\nkey = \"percentAfAm2010\"\nlabel = \"again\"\n"
        );
        assert!(AppConfig::from_toml(&dup).is_err());

        let short = format!("{SAMPLE}\n[palette]\ncolors = [\"#000000\", \"#ffffff\"]\n");
        assert!(AppConfig::from_toml(&short).is_err());

        let bad_hex = format!(
            "{SAMPLE}\n[palette]\ncolors = [\"#000000\", \"#ffffff\", \"oops\"]\n"
        );
        assert!(AppConfig::from_toml(&bad_hex).is_err());
    }

    #[test]
    fn rejects_inverted_axis_domain() {
        let inverted = SAMPLE.replace("[0.0, 80.0]", "[80.0, 0.0]");
        assert!(AppConfig::from_toml(&inverted).is_err());
    }
}
