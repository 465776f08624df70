//! Selection state shared by the map and the bar chart.
//!
//! The coordinator owns the one piece of mutable state, the selected
//! attribute, together with the [`ViewState`] derived from it. A selection
//! change builds a complete new view and swaps it in with a single
//! assignment, so readers never observe a half-updated map or chart.

use crate::config::{AppConfig, AttributeSpec, ChartConfig};
use crate::error::{ChoroplethError, Result};
use crate::scale::{nice_ticks, Color, LinearScale, QuantileScale};
use crate::types::{Parish, RecordSet};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Ordered attribute table; the first entry is the initial selection.
#[derive(Debug, Clone)]
pub struct AttributeTable {
    specs: Vec<AttributeSpec>,
}

impl AttributeTable {
    pub fn new(specs: Vec<AttributeSpec>) -> Option<Self> {
        (!specs.is_empty()).then_some(Self { specs })
    }

    pub fn get(&self, key: &str) -> Option<&AttributeSpec> {
        self.specs.iter().find(|s| s.key == key)
    }

    pub fn first(&self) -> &AttributeSpec {
        &self.specs[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.specs.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionFill {
    pub geoid: String,
    pub fill: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub geoid: String,
    pub name: String,
    pub value: Option<f64>,
    pub rank: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub fill: Color,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisTick {
    pub value: f64,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub domain: [f64; 2],
    pub ticks: Vec<AxisTick>,
}

/// Everything the map and chart render for one selected attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub attribute: String,
    pub label: String,
    pub title: String,
    #[serde(skip)]
    pub scale: QuantileScale,
    pub thresholds: Vec<f64>,
    pub regions: Vec<RegionFill>,
    /// Sorted descending by value, no-data last.
    pub bars: Vec<Bar>,
    pub axis: Axis,
}

impl ViewState {
    pub fn region(&self, geoid: &str) -> Option<&RegionFill> {
        self.regions.iter().find(|r| r.geoid == geoid)
    }

    pub fn bar(&self, geoid: &str) -> Option<&Bar> {
        self.bars.iter().find(|b| b.geoid == geoid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Changed { from: String, to: String },
}

pub struct Coordinator {
    table: AttributeTable,
    parishes: Vec<Parish>,
    records: RecordSet,
    palette: Vec<Color>,
    no_data: Color,
    chart: ChartConfig,
    view: ViewState,
}

impl Coordinator {
    pub fn new(
        table: AttributeTable,
        parishes: Vec<Parish>,
        records: RecordSet,
        palette: Vec<Color>,
        no_data: Color,
        chart: ChartConfig,
    ) -> Self {
        let initial = table.first().clone();
        let view = build_view(&initial, &parishes, &records, &palette, no_data, &chart);
        info!(attribute = %initial.key, "Initial attribute selected");
        Self {
            table,
            parishes,
            records,
            palette,
            no_data,
            chart,
            view,
        }
    }

    pub fn from_config(config: &AppConfig, parishes: Vec<Parish>, records: RecordSet) -> anyhow::Result<Self> {
        let table = AttributeTable::new(config.attributes.clone())
            .ok_or_else(|| anyhow::anyhow!("No attributes configured"))?;
        let (palette, no_data) = config.palette_colors()?;
        Ok(Self::new(table, parishes, records, palette, no_data, config.chart.clone()))
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn selected(&self) -> &str {
        &self.view.attribute
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.table
    }

    pub fn parishes(&self) -> &[Parish] {
        &self.parishes
    }

    /// Switch every view to `key`. Re-selecting the current attribute is a
    /// no-op; an unknown key leaves the state untouched.
    pub fn select(&mut self, key: &str) -> Result<Transition> {
        let spec = self
            .table
            .get(key)
            .ok_or_else(|| ChoroplethError::UnknownAttribute(key.to_string()))?;

        if spec.key == self.view.attribute {
            debug!(attribute = key, "Attribute already selected");
            return Ok(Transition::Unchanged);
        }

        let next = build_view(
            spec,
            &self.parishes,
            &self.records,
            &self.palette,
            self.no_data,
            &self.chart,
        );
        let from = std::mem::replace(&mut self.view, next).attribute;
        info!(from = %from, to = key, "Attribute selection changed");

        Ok(Transition::Changed {
            from,
            to: key.to_string(),
        })
    }
}

fn build_view(
    spec: &AttributeSpec,
    parishes: &[Parish],
    records: &RecordSet,
    palette: &[Color],
    no_data: Color,
    chart: &ChartConfig,
) -> ViewState {
    let key = spec.key.as_str();
    let scale = QuantileScale::new(
        records.iter().filter_map(|r| r.value(key)),
        palette.to_vec(),
        no_data,
    );

    let regions = parishes
        .iter()
        .map(|p| RegionFill {
            geoid: p.geoid.clone(),
            fill: scale.color_for(p.value(key)),
        })
        .collect();

    let mut order: Vec<&Parish> = parishes.iter().collect();
    order.sort_by(|a, b| by_value_desc(a.value(key), b.value(key)).then_with(|| a.geoid.cmp(&b.geoid)));

    let domain = spec.axis_domain.unwrap_or_else(|| {
        let max = parishes
            .iter()
            .filter_map(|p| p.value(key))
            .fold(0.0_f64, f64::max);
        [0.0, if max > 0.0 { max } else { 1.0 }]
    });

    let inner_width = chart.width - chart.margin_left - chart.margin_right;
    let inner_height = chart.height - chart.margin_top - chart.margin_bottom;
    let x = LinearScale::new(domain, [0.0, inner_width]);
    let row = inner_height / order.len().max(1) as f64;

    let bars = order
        .into_iter()
        .enumerate()
        .map(|(rank, p)| {
            let value = p.value(key);
            Bar {
                geoid: p.geoid.clone(),
                name: p.name.clone(),
                value,
                rank,
                x: chart.margin_left,
                y: chart.margin_top + rank as f64 * row,
                width: value.map(|v| x.apply(v)).unwrap_or(0.0),
                height: (row - chart.bar_gap).max(0.0),
                fill: scale.color_for(value),
                visible: value.is_some(),
            }
        })
        .collect();

    let ticks = nice_ticks(domain[0], domain[1], chart.tick_count)
        .into_iter()
        .map(|value| AxisTick {
            value,
            x: chart.margin_left + x.apply(value),
        })
        .collect();

    ViewState {
        attribute: spec.key.clone(),
        label: spec.label.clone(),
        title: spec.title().to_string(),
        thresholds: scale.thresholds().to_vec(),
        scale,
        regions,
        bars,
        axis: Axis { domain, ticks },
    }
}

/// Descending by value; no-data sorts after every real value.
fn by_value_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
