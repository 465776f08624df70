use crate::config::{AppConfig, ChartConfig, MapConfig};
use crate::coordinator::{AttributeTable, Coordinator, ViewState};
use crate::hover::HoverController;
use crate::join::QualityReport;
use crate::projection::{Albers, Graticule};
use anyhow::{Context, Result};
use geo::MultiPolygon;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use tracing::info;

/// Projected SVG path data. Geometry never changes, so this is computed
/// once and reused for every attribute.
pub struct MapLayers {
    pub outline: String,
    pub graticule: Vec<String>,
    pub background: Vec<String>,
    /// `(geoid, name, d)` per parish, in input order
    pub parishes: Vec<(String, String, String)>,
}

impl MapLayers {
    pub fn build(map: &MapConfig, coordinator: &Coordinator, background: &[MultiPolygon<f64>]) -> Self {
        let projection = Albers::from_config(map);
        let graticule = Graticule::new(map.graticule_step, map.graticule_extent);

        let parishes = coordinator
            .parishes()
            .par_iter()
            .map(|p| (p.geoid.clone(), p.name.clone(), projection.path(&p.geometry)))
            .collect();
        let background = background.par_iter().map(|g| projection.path(g)).collect();

        Self {
            outline: projection.line(&graticule.outline) + "Z",
            graticule: graticule.lines.iter().map(|l| projection.line(l)).collect(),
            background,
            parishes,
        }
    }
}

/// Map SVG for the current view: graticule, context states, then one path
/// per parish addressable by `g{GEOID}` class and `data-geoid`.
pub fn render_map(layers: &MapLayers, view: &ViewState, map: &MapConfig, hover: &HoverController) -> String {
    let mut svg = String::with_capacity(64 * 1024);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" class="map" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = map.width,
        h = map.height
    );
    let _ = write!(svg, r##"<path class="gratBackground" fill="#d6eaf5" d="{}"/>"##, layers.outline);
    for d in &layers.graticule {
        let _ = write!(svg, r##"<path class="gratLines" fill="none" stroke="#ffffff" stroke-width="0.5" d="{}"/>"##, d);
    }
    for d in &layers.background {
        let _ = write!(svg, r##"<path class="states" fill="#f2efe9" stroke="#999999" stroke-width="0.75" d="{}"/>"##, d);
    }

    for (geoid, name, d) in &layers.parishes {
        let fill = view
            .region(geoid)
            .map(|r| r.fill.to_string())
            .unwrap_or_else(|| view.scale.no_data().to_string());
        let (stroke, width) = hover
            .style(geoid)
            .map(|s| (s.region.color.as_str(), s.region.width))
            .unwrap_or(("#ffffff", 0.5));
        let _ = write!(
            svg,
            r#"<path class="parish g{geoid}" data-geoid="{geoid}" fill="{fill}" stroke="{stroke}" stroke-width="{width}" d="{d}"><title>{name}</title></path>"#,
            geoid = escape(geoid),
            name = escape(name),
        );
    }

    if let Some(label) = hover.label() {
        let (lw, lh) = hover.label_size();
        let _ = write!(
            svg,
            r##"<g class="infolabel" transform="translate({x:.1},{y:.1})"><rect width="{lw}" height="{lh}" fill="#ffffff" stroke="#333333"/><text x="8" y="{ty:.1}" font-size="14" font-weight="bold">{text}</text><text x="8" y="{ny:.1}" font-size="12">{name}</text></g>"##,
            x = label.x,
            y = label.y,
            ty = lh * 0.4,
            ny = lh * 0.76,
            text = escape(&label.text),
            name = escape(&label.name),
        );
    }

    svg.push_str("</svg>");
    svg
}

/// Horizontal bar chart, one bar per parish in view order.
pub fn render_chart(view: &ViewState, chart: &ChartConfig, hover: &HoverController) -> String {
    let mut svg = String::with_capacity(32 * 1024);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" class="chart" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = chart.width,
        h = chart.height
    );
    let _ = write!(
        svg,
        r#"<text class="chartTitle" x="{x}" y="22" font-size="16" font-weight="bold">{title}</text>"#,
        x = chart.margin_left,
        title = escape(&view.title)
    );

    let axis_y = chart.margin_top - 6.0;
    let bottom = chart.height - chart.margin_bottom;
    for tick in &view.axis.ticks {
        let _ = write!(
            svg,
            r##"<line class="tick" x1="{x:.1}" x2="{x:.1}" y1="{axis_y}" y2="{bottom}" stroke="#dddddd"/><text x="{x:.1}" y="{ty}" font-size="10" text-anchor="middle">{v}</text>"##,
            x = tick.x,
            ty = axis_y - 4.0,
            v = tick_label(tick.value),
        );
    }

    let font = (view.bars.first().map(|b| b.height).unwrap_or(10.0) * 0.9).clamp(6.0, 12.0);
    for bar in &view.bars {
        let (stroke, width) = hover
            .style(&bar.geoid)
            .map(|s| (s.bar.color.as_str(), s.bar.width))
            .unwrap_or(("#ffffff", 0.5));
        let visibility = if bar.visible { "visible" } else { "hidden" };
        let _ = write!(
            svg,
            r#"<rect class="bar g{geoid}" data-geoid="{geoid}" x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{fill}" stroke="{stroke}" stroke-width="{width}" visibility="{visibility}"/>"#,
            geoid = escape(&bar.geoid),
            x = bar.x,
            y = bar.y,
            w = bar.width,
            h = bar.height,
            fill = bar.fill,
        );
        let _ = write!(
            svg,
            r#"<text class="barName" x="{x:.1}" y="{y:.1}" font-size="{font:.1}" text-anchor="end">{name}</text>"#,
            x = bar.x - 4.0,
            y = bar.y + bar.height * 0.8,
            name = escape(&bar.name),
        );
    }

    svg.push_str("</svg>");
    svg
}

/// Rendered `(map, chart)` SVGs per attribute key.
pub type RenderedViews = BTreeMap<String, (String, String)>;

/// Whether the page talks to the live API or carries its views inline.
#[derive(Debug, Clone, Copy)]
pub enum PageMode<'a> {
    /// Every attribute's SVGs are embedded in `<template>` elements, so the
    /// page works from `file://` with no server behind it.
    Static(&'a RenderedViews),
    Live,
}

/// HTML page with the attribute dropdown and containers for both views.
pub fn render_page(table: &AttributeTable, selected: &str, mode: PageMode<'_>) -> String {
    let mut options = String::new();
    for spec in table.iter() {
        let _ = write!(
            options,
            r#"<option value="{key}"{sel}>{label}</option>"#,
            key = escape(&spec.key),
            sel = if spec.key == selected { " selected" } else { "" },
            label = escape(&spec.label),
        );
    }

    let mut templates = String::new();
    if let PageMode::Static(views) = mode {
        for (key, (map, chart)) in views {
            for (part, svg) in [("map", map), ("chart", chart)] {
                let _ = writeln!(
                    templates,
                    r#"<template data-key="{key}" data-part="{part}">{svg}</template>"#,
                    key = escape(key),
                );
            }
        }
    }

    let live = matches!(mode, PageMode::Live);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Louisiana Parishes</title>
<style>
body {{ font-family: sans-serif; margin: 0; }}
.views {{ display: flex; }}
.dropdown {{ position: absolute; top: 10px; left: 10px; z-index: 2; }}
#label {{ position: fixed; display: none; background: #fff; border: 1px solid #333; padding: 4px 8px; pointer-events: none; }}
</style>
</head>
<body>
<select class="dropdown">{options}</select>
<div class="views"><div id="map"></div><div id="chart"></div></div>
<div id="label"></div>
{templates}<script>
const LIVE = {live};
const post = (url, body) => fetch(url, {{ method: 'POST', headers: {{ 'Content-Type': 'application/json' }}, body: JSON.stringify(body) }}).then(r => r.json());
async function show(key) {{
  if (LIVE) await post('/api/select', {{ attribute: key }});
  for (const part of ['map', 'chart']) {{
    const target = document.getElementById(part);
    if (LIVE) {{
      target.innerHTML = await (await fetch('/' + part + '.svg?t=' + Date.now())).text();
    }} else {{
      const tpl = [...document.querySelectorAll('template')].find(t => t.dataset.key === key && t.dataset.part === part);
      target.innerHTML = tpl ? tpl.innerHTML : '';
    }}
  }}
  if (LIVE) wire();
}}
function restyle(styles) {{
  for (const [geoid, s] of styles) {{
    for (const [sel, st] of [['.parish', s.region], ['.bar', s.bar]]) {{
      document.querySelectorAll(sel + '.g' + geoid).forEach(el => {{
        el.setAttribute('stroke', st.color);
        el.setAttribute('stroke-width', st.width);
      }});
    }}
  }}
}}
async function pointer(ev) {{
  const res = await post('/api/pointer', ev);
  restyle(res.styles);
  const box = document.getElementById('label');
  if (res.label) {{
    box.style.display = 'block';
    box.style.left = res.label.x + 'px';
    box.style.top = res.label.y + 'px';
    const h = document.createElement('h1');
    h.textContent = res.label.text;
    const b = document.createElement('b');
    b.textContent = res.label.name;
    box.replaceChildren(h, b);
  }} else {{
    box.style.display = 'none';
  }}
}}
function wire() {{
  document.querySelectorAll('[data-geoid]').forEach(el => {{
    const geoid = el.dataset.geoid;
    el.addEventListener('mouseenter', () => pointer({{ event: 'enter', geoid }}));
    el.addEventListener('mousemove', e => pointer({{ event: 'move', x: e.clientX, y: e.clientY }}));
    el.addEventListener('mouseleave', () => pointer({{ event: 'leave', geoid }}));
  }});
}}
const select = document.querySelector('.dropdown');
select.addEventListener('change', () => show(select.value));
show(select.value);
</script>
</body>
</html>
"#
    )
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    quality: &'a QualityReport,
    attributes: Vec<&'a str>,
}

/// Write map and chart SVGs for every attribute, a static index page and a
/// data-quality report under `output.dir`.
pub fn generate_views(
    config: &AppConfig,
    coordinator: &mut Coordinator,
    layers: &MapLayers,
    quality: &QualityReport,
) -> Result<()> {
    let out = &config.output.dir;
    fs::create_dir_all(out).with_context(|| format!("Failed to create output directory {:?}", out))?;

    let hover = HoverController::new(
        &config.hover,
        coordinator.parishes(),
        (config.map.width + config.chart.width, config.map.height),
    );
    let keys: Vec<String> = coordinator.attributes().iter().map(|a| a.key.clone()).collect();
    let mut rendered = RenderedViews::new();

    for key in &keys {
        coordinator.select(key)?;
        let view = coordinator.view();
        info!(attribute = %key, "Rendering attribute");

        let map = render_map(layers, view, &config.map, &hover);
        let chart = render_chart(view, &config.chart, &hover);

        let dir = out.join(key);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        fs::write(dir.join("map.svg"), &map).with_context(|| format!("Failed to write map for {}", key))?;
        fs::write(dir.join("chart.svg"), &chart).with_context(|| format!("Failed to write chart for {}", key))?;
        rendered.insert(key.clone(), (map, chart));
    }

    let first = coordinator.attributes().first().key.clone();
    coordinator.select(&first)?;
    fs::write(
        out.join("index.html"),
        render_page(coordinator.attributes(), &first, PageMode::Static(&rendered)),
    )
    .context("Failed to write index.html")?;

    let report = Report {
        quality,
        attributes: keys.iter().map(String::as_str).collect(),
    };
    fs::write(out.join("report.json"), serde_json::to_string_pretty(&report)?)
        .context("Failed to write report.json")?;

    Ok(())
}

fn tick_label(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        let s = format!("{:.3}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HoverConfig;
    use crate::coordinator::tests::coordinator;

    fn setup() -> (Coordinator, MapLayers, HoverController) {
        let c = coordinator();
        let layers = MapLayers::build(&MapConfig::default(), &c, &[]);
        let hover = HoverController::new(&HoverConfig::default(), c.parishes(), (1360.0, 700.0));
        (c, layers, hover)
    }

    #[test]
    fn map_has_one_addressable_path_per_parish() {
        let (c, layers, hover) = setup();
        let svg = render_map(&layers, c.view(), &MapConfig::default(), &hover);

        assert_eq!(svg.matches(r#"class="parish "#).count(), 3);
        assert!(svg.contains(r##"data-geoid="22005" fill="#cccccc""##));
        assert!(svg.contains("gratLines"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn chart_follows_view_order_and_hides_no_data() {
        let (c, _, hover) = setup();
        let svg = render_chart(c.view(), &ChartConfig::default(), &hover);

        let first = svg.find(r#"data-geoid="22003""#).unwrap();
        let second = svg.find(r#"data-geoid="22001""#).unwrap();
        let third = svg.find(r#"data-geoid="22005""#).unwrap();
        assert!(first < second && second < third);
        assert!(svg.contains(r#"visibility="hidden""#));
        assert!(svg.contains("v label"));
    }

    #[test]
    fn active_label_is_drawn_on_map() {
        let (c, layers, mut hover) = setup();
        hover.enter("22001", c.view());
        hover.move_to(50.0, 200.0);

        let svg = render_map(&layers, c.view(), &MapConfig::default(), &hover);
        assert!(svg.contains(r#"transform="translate(60.0,125.0)""#));
        assert!(svg.contains(r##"data-geoid="22001" fill="##));
        assert!(svg.contains(r##"stroke="#1f78b4""##));
    }

    #[test]
    fn label_box_uses_configured_size() {
        let (c, layers, _) = setup();
        let config = HoverConfig {
            label_width: 320.0,
            label_height: 90.0,
            ..HoverConfig::default()
        };
        let mut hover = HoverController::new(&config, c.parishes(), (1360.0, 700.0));
        hover.enter("22001", c.view());
        // 1200 > 1360 - 320 - 20, so the label flips left by its own width
        hover.move_to(1200.0, 300.0);

        let svg = render_map(&layers, c.view(), &MapConfig::default(), &hover);
        assert!(svg.contains(r#"transform="translate(870.0,225.0)"><rect width="320" height="90""#));
    }

    #[test]
    fn page_lists_every_attribute() {
        let (c, _, _) = setup();
        let html = render_page(c.attributes(), "w", PageMode::Live);
        assert!(html.contains(r#"<option value="v">v label</option>"#));
        assert!(html.contains(r#"<option value="w" selected>w label</option>"#));
        assert!(html.contains("const LIVE = true;"));
        assert!(!html.contains("<template"));
    }

    #[test]
    fn page_label_is_filled_as_text() {
        let (c, _, _) = setup();
        let html = render_page(c.attributes(), "v", PageMode::Live);
        assert!(html.contains("h.textContent = res.label.text;"));
        assert!(html.contains("b.textContent = res.label.name;"));
        assert!(!html.contains("innerHTML = '<h1>'"));
    }

    #[test]
    fn generate_writes_every_attribute() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::from_toml(crate::config::tests::SAMPLE).unwrap();
        config.output.dir = dir.path().to_path_buf();

        let (mut c, layers, _) = setup();
        generate_views(&config, &mut c, &layers, &QualityReport::default()).unwrap();

        for key in ["v", "w"] {
            assert!(dir.path().join(key).join("map.svg").exists());
            assert!(dir.path().join(key).join("chart.svg").exists());
        }
        assert!(dir.path().join("index.html").exists());
        let report = fs::read_to_string(dir.path().join("report.json")).unwrap();
        assert!(report.contains("\"matched\": 0"));
        assert!(report.contains("\"attributes\": ["));
        assert_eq!(c.selected(), "v");
    }

    #[test]
    fn static_page_embeds_every_view() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::from_toml(crate::config::tests::SAMPLE).unwrap();
        config.output.dir = dir.path().to_path_buf();

        let (mut c, layers, _) = setup();
        generate_views(&config, &mut c, &layers, &QualityReport::default()).unwrap();

        let html = fs::read_to_string(dir.path().join("index.html")).unwrap();
        assert!(html.contains("const LIVE = false;"));
        for key in ["v", "w"] {
            let map = fs::read_to_string(dir.path().join(key).join("map.svg")).unwrap();
            let chart = fs::read_to_string(dir.path().join(key).join("chart.svg")).unwrap();
            assert!(html.contains(&format!(r#"<template data-key="{key}" data-part="map">{map}</template>"#)));
            assert!(html.contains(&format!(r#"<template data-key="{key}" data-part="chart">{chart}</template>"#)));
        }
        // Nothing is fetched relative to the page
        assert!(!html.contains("key + '/'"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"St. <John> & "Co""#), "St. &lt;John&gt; &amp; &quot;Co&quot;");
        assert_eq!(tick_label(20.0), "20");
        assert_eq!(tick_label(0.25), "0.25");
    }
}
