// src/model.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar carried by a data value. DHIS2 hands values back as strings, but
/// numbers are accepted too.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Number(n) => write!(f, "{}", n),
            DataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::Text(s.to_string())
    }
}

impl From<i64> for DataValue {
    fn from(n: i64) -> Self {
        DataValue::Number(n.into())
    }
}

/// One aggregate measurement. Any other field the source sends is dropped on
/// the way in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub data_element: String,
    pub period: String,
    pub org_unit: String,
    pub category_option_combo: String,
    pub value: DataValue,
}

/// Wire envelope for `/api/dataValueSets`, both directions.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct DataValueSet<T = DataPoint> {
    #[serde(default)]
    pub data_values: Vec<T>,
}

/// Borrowing variant used when posting, so a batch is serialized straight
/// out of the table.
pub type DataValueSetRef<'a> = DataValueSet<&'a DataPoint>;

/// Append-only collection of everything fetched in one run.
#[derive(Debug, Default)]
pub struct DataPointTable {
    rows: Vec<DataPoint>,
}

impl DataPointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = DataPoint>) {
        self.rows.extend(points);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DataPoint> {
        self.rows.iter()
    }

    /// Consecutive batches of at most `size` rows. Panics if `size` is zero.
    pub fn chunks(&self, size: usize) -> std::slice::Chunks<'_, DataPoint> {
        self.rows.chunks(size)
    }

    pub fn as_slice(&self) -> &[DataPoint] {
        &self.rows
    }
}

impl<'a> IntoIterator for &'a DataPointTable {
    type Item = &'a DataPoint;
    type IntoIter = std::slice::Iter<'a, DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Counts reported by the target after an import.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ImportCount {
    #[serde(default)]
    pub imported: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub ignored: u64,
    #[serde(default)]
    pub deleted: u64,
}

/// Subset of the DHIS2 import summary we care about. Newer servers nest it
/// under `response`, older ones return it at the top level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub import_count: Option<ImportCount>,
}

#[derive(Deserialize)]
struct ImportEnvelope {
    #[serde(default)]
    response: Option<ImportSummary>,
    #[serde(flatten)]
    top: ImportSummary,
}

impl ImportSummary {
    /// Best-effort parse of a write response body. `None` if it is not JSON
    /// or carries no summary fields.
    pub fn parse(body: &str) -> Option<Self> {
        let env: ImportEnvelope = serde_json::from_str(body).ok()?;
        let summary = match env.response {
            Some(inner) if inner.import_count.is_some() || inner.status.is_some() => inner,
            _ => env.top,
        };
        if summary.import_count.is_none() && summary.status.is_none() {
            return None;
        }
        Some(summary)
    }

    /// False when the target accepted the request but reported a failed
    /// import: a status other than `SUCCESS`/`OK`, or every value ignored.
    pub fn is_clean(&self) -> bool {
        let status_ok = self
            .status
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("SUCCESS") || s.eq_ignore_ascii_case("OK"));
        let all_ignored = self
            .import_count
            .as_ref()
            .is_some_and(|c| c.ignored > 0 && c.imported + c.updated + c.deleted == 0);
        status_ok && !all_ignored
    }
}
