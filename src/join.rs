use crate::data::DataQuality;
use crate::types::{Parish, RecordSet, RegionFeature};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Outcome of attaching records to region geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinReport {
    pub matched: usize,
    /// Regions with no CSV row; they render as "no data".
    pub unmatched_geometries: Vec<String>,
    /// CSV rows with no region; they do not appear on the map.
    pub unmatched_records: Vec<String>,
    /// GEOIDs split across several region features, merged into one parish.
    pub merged_geometries: Vec<String>,
}

/// Everything `generate` writes to `report.json` and `serve` exposes at
/// `/api/report`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub join: JoinReport,
    pub quality: DataQuality,
}

/// Fold features sharing a GEOID into the first one seen, keeping the
/// original order.
fn merge_duplicates(features: Vec<RegionFeature>, merged: &mut Vec<String>) -> Vec<RegionFeature> {
    let mut out: Vec<RegionFeature> = Vec::with_capacity(features.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for feature in features {
        match index.get(&feature.geoid) {
            Some(&i) => {
                let first = &mut out[i];
                if !merged.contains(&first.geoid) {
                    merged.push(first.geoid.clone());
                }
                if first.name.is_none() {
                    first.name = feature.name;
                }
                first.geometry.0.extend(feature.geometry.0);
            }
            None => {
                index.insert(feature.geoid.clone(), out.len());
                out.push(feature);
            }
        }
    }
    out
}

/// Hash join of region features against records on GEOID.
///
/// Every region survives; matched ones carry all of the record's values.
/// Features repeating a GEOID become extra polygons of one parish.
pub fn join(features: Vec<RegionFeature>, records: &RecordSet) -> (Vec<Parish>, JoinReport) {
    let mut report = JoinReport::default();
    let mut used = HashSet::new();
    let features = merge_duplicates(features, &mut report.merged_geometries);

    let parishes: Vec<Parish> = features
        .into_iter()
        .map(|feature| {
            let record = records.get(&feature.geoid);
            match record {
                Some(r) => {
                    report.matched += 1;
                    used.insert(r.geoid.as_str());
                }
                None => report.unmatched_geometries.push(feature.geoid.clone()),
            }

            let name = record
                .map(|r| r.name.clone())
                .filter(|n| !n.is_empty())
                .or(feature.name)
                .unwrap_or_else(|| feature.geoid.clone());

            Parish {
                name,
                values: record.map(|r| r.values.clone()).unwrap_or_default(),
                matched: record.is_some(),
                geoid: feature.geoid,
                geometry: feature.geometry,
            }
        })
        .collect();

    report.unmatched_records = records
        .iter()
        .filter(|r| !used.contains(r.geoid.as_str()))
        .map(|r| r.geoid.clone())
        .collect();

    if !report.merged_geometries.is_empty() {
        warn!(
            count = report.merged_geometries.len(),
            geoids = ?report.merged_geometries,
            "Region features sharing a GEOID merged"
        );
    }
    if !report.unmatched_geometries.is_empty() {
        warn!(
            count = report.unmatched_geometries.len(),
            geoids = ?report.unmatched_geometries,
            "Regions without attribute data"
        );
    }
    if !report.unmatched_records.is_empty() {
        warn!(
            count = report.unmatched_records.len(),
            geoids = ?report.unmatched_records,
            "Attribute rows without a region"
        );
    }
    info!(matched = report.matched, "Joined attributes to regions");

    (parishes, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;
    use geo::{polygon, MultiPolygon};
    use std::collections::BTreeMap;

    fn feature(geoid: &str) -> RegionFeature {
        RegionFeature {
            geoid: geoid.to_string(),
            name: Some(format!("shape {geoid}")),
            geometry: MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
            ]]),
        }
    }

    fn record(geoid: &str, name: &str, values: &[(&str, f64)]) -> Record {
        Record {
            geoid: geoid.to_string(),
            name: name.to_string(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn matched_regions_carry_every_attribute_unchanged() {
        let records = RecordSet::from_records(vec![
            record("22001", "Acadia", &[("a", 1.5), ("b", 0.0), ("c", -3.0)]),
            record("22003", "Allen", &[("a", 2.0)]),
        ])
        .unwrap();

        let (parishes, report) = join(vec![feature("22001"), feature("22003")], &records);

        assert_eq!(report.matched, 2);
        assert!(report.unmatched_geometries.is_empty());
        assert!(report.unmatched_records.is_empty());
        assert_eq!(parishes[0].values, records.get("22001").unwrap().values);
        assert_eq!(parishes[0].name, "Acadia");
        assert_eq!(parishes[1].values, records.get("22003").unwrap().values);
    }

    #[test]
    fn misses_are_reported_not_dropped() {
        let records = RecordSet::from_records(vec![
            record("22001", "", &[("a", 1.0)]),
            record("22777", "Nowhere", &[("a", 9.0)]),
        ])
        .unwrap();

        let (parishes, report) = join(vec![feature("22001"), feature("22099")], &records);

        assert_eq!(parishes.len(), 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched_geometries, vec!["22099"]);
        assert_eq!(report.unmatched_records, vec!["22777"]);

        let orphan = &parishes[1];
        assert!(!orphan.matched);
        assert_eq!(orphan.values, BTreeMap::new());
        assert_eq!(orphan.name, "shape 22099");
        // Empty CSV name falls back to the geometry's name
        assert_eq!(parishes[0].name, "shape 22001");
    }

    #[test]
    fn repeated_geometry_ids_merge_into_one_parish() {
        let records = RecordSet::from_records(vec![record("22001", "Acadia", &[("a", 1.0)])]).unwrap();
        let mut island = feature("22001");
        island.name = None;

        let (parishes, report) = join(vec![feature("22001"), feature("22003"), island], &records);

        let ids: Vec<&str> = parishes.iter().map(|p| p.geoid.as_str()).collect();
        assert_eq!(ids, ["22001", "22003"]);
        assert_eq!(parishes[0].geometry.0.len(), 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.merged_geometries, vec!["22001"]);
        assert_eq!(report.unmatched_geometries, vec!["22003"]);
    }
}
