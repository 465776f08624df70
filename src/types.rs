use crate::error::{ChoroplethError, Result};
use geo::MultiPolygon;
use std::collections::{BTreeMap, HashMap};

/// One CSV row: a parish and its numeric attribute values.
/// Cells that were empty or non-numeric are simply absent from `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub geoid: String,
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

impl Record {
    /// Attribute value, treating absent and zero alike as "no data".
    pub fn value(&self, attribute: &str) -> Option<f64> {
        present(self.values.get(attribute).copied())
    }
}

/// Records indexed by GEOID. Construction rejects duplicate keys.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    index: HashMap<String, usize>,
}

impl RecordSet {
    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        let mut index = HashMap::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            if let Some(first) = index.insert(record.geoid.clone(), row) {
                return Err(ChoroplethError::DuplicateGeoid {
                    geoid: record.geoid.clone(),
                    first_row: first + 1,
                    second_row: row + 1,
                });
            }
        }
        Ok(Self { records, index })
    }

    pub fn get(&self, geoid: &str) -> Option<&Record> {
        self.index.get(geoid).map(|&i| &self.records[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Boundary of one region as read from the geometry file.
#[derive(Debug, Clone)]
pub struct RegionFeature {
    pub geoid: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

/// A region after the join: geometry plus whatever attributes matched.
#[derive(Debug, Clone)]
pub struct Parish {
    pub geoid: String,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    // Empty when no record matched
    pub values: BTreeMap<String, f64>,
    pub matched: bool,
}

impl Parish {
    pub fn value(&self, attribute: &str) -> Option<f64> {
        present(self.values.get(attribute).copied())
    }
}

/// Zero and non-finite values carry no data.
pub fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}
