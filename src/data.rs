use crate::config::{AppConfig, GeometrySource, InputConfig};
use crate::error::{ChoroplethError, Result};
use crate::types::{Record, RecordSet, RegionFeature};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::{FeatureCollection, GeoJson};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::future::Future;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tokio::task::{spawn_blocking, JoinHandle};
use topojson::TopoJson;
use tracing::{debug, info, warn};

/// Everything the views need, loaded once at startup.
#[derive(Debug)]
pub struct Inputs {
    pub records: RecordSet,
    pub quality: DataQuality,
    pub regions: Vec<RegionFeature>,
    pub background: Vec<MultiPolygon<f64>>,
}

/// Per-attribute counts of cells that carried no usable number.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataQuality {
    pub rows: usize,
    pub skipped_rows: usize,
    pub missing: BTreeMap<String, usize>,
    pub non_numeric: BTreeMap<String, usize>,
}

/// Load the attribute table and both boundary files in parallel.
///
/// The first failure aborts the whole load, as does exceeding
/// `load.timeout_secs`; nothing partial is ever returned.
pub async fn load_inputs(config: &AppConfig) -> Result<Inputs> {
    info!("Loading inputs...");
    let secs = config.load.timeout_secs;

    let input = config.input.clone();
    let keys: Vec<String> = config.attributes.iter().map(|a| a.key.clone()).collect();
    let csv_task = spawn_blocking(move || load_records(&input, &keys));

    let regions_src = config.input.regions.clone();
    let regions_task = spawn_blocking(move || load_regions(&regions_src));

    let background_src = config.input.background.clone();
    let background_task = spawn_blocking(move || load_background(&background_src));

    let all = async {
        tokio::try_join!(
            finish(csv_task, "attributes"),
            finish(regions_task, "regions"),
            finish(background_task, "background"),
        )
    };

    let ((records, quality), regions, background) = within(secs, all).await?;

    info!(
        records = records.len(),
        regions = regions.len(),
        background = background.len(),
        "Inputs loaded"
    );

    Ok(Inputs {
        records,
        quality,
        regions,
        background,
    })
}

/// Run `fut` with a deadline of `secs` seconds.
async fn within<T, F>(secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| ChoroplethError::LoadTimeout { secs })?
}

async fn finish<T>(handle: JoinHandle<Result<T>>, input: &'static str) -> Result<T> {
    handle.await.map_err(|e| ChoroplethError::LoadTask {
        input,
        reason: e.to_string(),
    })?
}

/// Read the attribute CSV, keeping only the configured attribute columns.
pub fn load_records(input: &InputConfig, attributes: &[String]) -> Result<(RecordSet, DataQuality)> {
    let path = &input.data_csv;
    let csv_err = |source| ChoroplethError::Csv {
        path: path.clone(),
        source,
    };

    let file = File::open(path).map_err(|source| ChoroplethError::Io {
        path: path.clone(),
        source,
    })?;
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let headers = rdr.headers().map_err(csv_err)?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ChoroplethError::MissingColumn {
                column: name.to_string(),
                path: path.clone(),
            })
    };

    let join_idx = column(input.join_column_csv.as_str())?;
    let name_idx = headers.iter().position(|h| h == input.name_column_csv);
    if name_idx.is_none() {
        warn!(column = %input.name_column_csv, "Name column not found in CSV; names fall back to geometry");
    }
    let attr_idx = attributes
        .iter()
        .map(|key| column(key.as_str()).map(|i| (key.as_str(), i)))
        .collect::<Result<Vec<_>>>()?;

    let mut quality = DataQuality::default();
    let mut records = Vec::new();

    for result in rdr.records() {
        let row = result.map_err(csv_err)?;
        quality.rows += 1;

        let geoid = row.get(join_idx).unwrap_or("");
        if geoid.is_empty() {
            quality.skipped_rows += 1;
            continue;
        }

        let mut values = BTreeMap::new();
        for &(key, idx) in &attr_idx {
            let cell = row.get(idx).unwrap_or("");
            if cell.is_empty() {
                *quality.missing.entry(key.to_string()).or_default() += 1;
                continue;
            }
            match cell.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    values.insert(key.to_string(), v);
                }
                _ => {
                    debug!(geoid, attribute = key, cell, "Non-numeric attribute value");
                    *quality.non_numeric.entry(key.to_string()).or_default() += 1;
                }
            }
        }

        records.push(Record {
            geoid: geoid.to_string(),
            name: name_idx
                .and_then(|i| row.get(i))
                .unwrap_or("")
                .to_string(),
            values,
        });
    }

    for (key, count) in &quality.non_numeric {
        warn!(attribute = %key, count, "Non-numeric cells treated as no data");
    }
    if quality.skipped_rows > 0 {
        warn!(rows = quality.skipped_rows, "CSV rows without a GEOID skipped");
    }

    let set = RecordSet::from_records(records)?;
    info!(records = set.len(), "Loaded CSV attribute data");
    Ok((set, quality))
}

/// Polygon features read from any supported boundary format.
struct RawFeature {
    id: Option<String>,
    name: Option<String>,
    geometry: MultiPolygon<f64>,
}

/// Region boundaries keyed by their join property.
pub fn load_regions(source: &GeometrySource) -> Result<Vec<RegionFeature>> {
    let raw = read_features(source)?;
    let total = raw.len();

    let regions: Vec<RegionFeature> = raw
        .into_iter()
        .filter_map(|f| {
            f.id.map(|geoid| RegionFeature {
                geoid,
                name: f.name,
                geometry: f.geometry,
            })
        })
        .collect();

    if regions.len() < total {
        warn!(
            skipped = total - regions.len(),
            property = %source.join_property,
            "Region features without a join id skipped"
        );
    }
    info!(regions = regions.len(), path = ?source.path, "Loaded region geometry");
    Ok(regions)
}

/// Context geometry drawn beneath the regions; ids are irrelevant.
pub fn load_background(source: &GeometrySource) -> Result<Vec<MultiPolygon<f64>>> {
    let shapes: Vec<_> = read_features(source)?
        .into_iter()
        .map(|f| f.geometry)
        .collect();
    info!(shapes = shapes.len(), path = ?source.path, "Loaded background geometry");
    Ok(shapes)
}

fn read_features(source: &GeometrySource) -> Result<Vec<RawFeature>> {
    let extension = source
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| ChoroplethError::UnsupportedFormat(format!("{:?} has no extension", source.path)))?;

    match extension.as_str() {
        "topojson" => read_topojson(source),
        "json" | "geojson" => {
            let file = File::open(&source.path).map_err(|e| io_err(&source.path, e))?;
            let geojson = GeoJson::from_reader(BufReader::new(file))
                .map_err(|e| geometry_err(&source.path, e))?;
            match geojson {
                GeoJson::FeatureCollection(fc) => collection_features(source, fc),
                _ => Err(geometry_err(&source.path, "GeoJSON must be a FeatureCollection")),
            }
        }
        "shp" => read_shapefile(source),
        other => Err(ChoroplethError::UnsupportedFormat(other.to_string())),
    }
}

fn read_topojson(source: &GeometrySource) -> Result<Vec<RawFeature>> {
    let path = &source.path;
    let object = source
        .object
        .as_deref()
        .ok_or_else(|| geometry_err(path, "TopoJSON input needs an `object` name"))?;

    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;

    let raw: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| geometry_err(path, e))?;
    if raw.get("objects").and_then(|o| o.get(object)).is_none() {
        return Err(ChoroplethError::MissingObject {
            object: object.to_string(),
            path: path.clone(),
        });
    }

    let topology = match content.parse::<TopoJson>() {
        Ok(TopoJson::Topology(t)) => t,
        Ok(_) => return Err(geometry_err(path, "expected a Topology")),
        Err(e) => return Err(geometry_err(path, e)),
    };

    let fc = topojson::to_geojson(&topology, &object.to_string()).map_err(|e| geometry_err(path, e))?;
    collection_features(source, fc)
}

fn collection_features(source: &GeometrySource, fc: FeatureCollection) -> Result<Vec<RawFeature>> {
    let mut features = Vec::with_capacity(fc.features.len());

    for feature in fc.features {
        let props = feature.properties.as_ref();
        let id = props
            .and_then(|p| p.get(&source.join_property))
            .and_then(property_string);
        let name = props
            .and_then(|p| p.get(&source.name_property))
            .and_then(property_string);

        let Some(geom) = feature.geometry else {
            continue;
        };
        let geometry: geo::Geometry<f64> = geom
            .value
            .try_into()
            .map_err(|e| geometry_err(&source.path, format!("{:?}", e)))?;

        let geometry = match geometry {
            geo::Geometry::MultiPolygon(mp) => mp,
            geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            _ => continue, // Skip points/lines
        };

        features.push(RawFeature { id, name, geometry });
    }

    Ok(features)
}

fn property_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_shapefile(source: &GeometrySource) -> Result<Vec<RawFeature>> {
    use shapefile::dbase::FieldValue;
    use shapefile::{Reader, Shape};

    let path = &source.path;
    let mut reader = Reader::from_path(path).map_err(|e| geometry_err(path, e))?;
    let mut features = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| geometry_err(path, e))?;

        let field = |name: &str| match record.get(name) {
            Some(FieldValue::Character(Some(s))) => Some(s.trim().to_string()),
            Some(FieldValue::Numeric(Some(n))) => Some(n.to_string()),
            _ => None,
        };

        let geometry: MultiPolygon<f64> = match shape {
            Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| geometry_err(path, format!("{:?}", e)))?,
            Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| geometry_err(path, format!("{:?}", e)))?,
            Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| geometry_err(path, format!("{:?}", e)))?,
            _ => continue, // Skip non-polygon shapes
        };

        features.push(RawFeature {
            id: field(&source.join_property),
            name: field(&source.name_property),
            geometry,
        });
    }

    Ok(features)
}

fn io_err(path: &Path, source: std::io::Error) -> ChoroplethError {
    ChoroplethError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn geometry_err(path: &Path, reason: impl ToString) -> ChoroplethError {
    ChoroplethError::Geometry {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
