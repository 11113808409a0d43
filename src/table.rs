// src/table.rs

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io::Read;

use crate::error::{DashError, DashResult};
use crate::fetch::Axis;

/// Name of the key column in every results response.
pub const COUNTY_COLUMN: &str = "county_name";

/// A JSON table as the provider returned it, normalised to headers + rows.
///
/// The provider serialises pandas frames, so three layouts show up on the wire:
/// - `records`: `[{"county_name": "Appling", "A": 100}, ...]`
/// - `columns`: `{"county_name": {"0": "Appling"}, "A": {"0": 100}}`
/// - `split`:   `{"columns": [...], "data": [[...], ...]}`
///
/// Column order is whatever order the body declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Turnout has no fixed shape on our side; it is passed through as-is.
pub type TurnoutTable = RawTable;

impl RawTable {
    pub fn from_json(what: &str, body: &str) -> DashResult<Self> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| DashError::malformed(what, e))?;
        match value {
            Value::Array(records) => Self::from_records(what, records),
            Value::Object(obj) if is_split(&obj) => Self::from_split(what, obj),
            Value::Object(columns) => Self::from_columns(what, columns),
            other => Err(DashError::malformed(
                what,
                format!("expected a JSON table, got {}", json_kind(&other)),
            )),
        }
    }

    fn from_records(what: &str, records: Vec<Value>) -> DashResult<Self> {
        let mut headers: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut objects = Vec::with_capacity(records.len());

        for (i, record) in records.into_iter().enumerate() {
            let Value::Object(obj) = record else {
                return Err(DashError::malformed(
                    what,
                    format!("row {} is not an object", i),
                ));
            };
            for key in obj.keys() {
                if seen.insert(key.clone()) {
                    headers.push(key.clone());
                }
            }
            objects.push(obj);
        }

        let rows = objects
            .iter()
            .map(|obj| {
                headers
                    .iter()
                    .map(|h| obj.get(h).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { headers, rows })
    }

    fn from_columns(what: &str, columns: Map<String, Value>) -> DashResult<Self> {
        let mut headers = Vec::with_capacity(columns.len());
        let mut cells: Vec<Map<String, Value>> = Vec::with_capacity(columns.len());
        let mut index: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for (name, column) in columns {
            let Value::Object(column) = column else {
                return Err(DashError::malformed(
                    what,
                    format!("column {:?} is not an index -> value object", name),
                ));
            };
            for key in column.keys() {
                if seen.insert(key.clone()) {
                    index.push(key.clone());
                }
            }
            headers.push(name);
            cells.push(column);
        }

        let rows = index
            .iter()
            .map(|idx| {
                cells
                    .iter()
                    .map(|col| col.get(idx).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { headers, rows })
    }

    fn from_split(what: &str, mut obj: Map<String, Value>) -> DashResult<Self> {
        let Some(Value::Array(columns)) = obj.remove("columns") else {
            return Err(DashError::malformed(what, "split table without columns"));
        };
        let Some(Value::Array(data)) = obj.remove("data") else {
            return Err(DashError::malformed(what, "split table without data"));
        };

        let headers = columns
            .into_iter()
            .map(|c| match c {
                Value::String(s) => Ok(s),
                other => Err(DashError::malformed(
                    what,
                    format!("column name {} is not a string", other),
                )),
            })
            .collect::<DashResult<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(data.len());
        for (i, row) in data.into_iter().enumerate() {
            match row {
                Value::Array(cells) if cells.len() == headers.len() => rows.push(cells),
                Value::Array(cells) => {
                    return Err(DashError::malformed(
                        what,
                        format!(
                            "row {} has {} cells, expected {}",
                            i,
                            cells.len(),
                            headers.len()
                        ),
                    ))
                }
                _ => {
                    return Err(DashError::malformed(
                        what,
                        format!("row {} is not an array", i),
                    ))
                }
            }
        }

        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require_column(&self, what: &str, name: &str) -> DashResult<usize> {
        self.column_index(name).ok_or_else(|| {
            DashError::malformed(
                what,
                format!("missing column {:?} (have {:?})", name, self.headers),
            )
        })
    }
}

fn is_split(obj: &Map<String, Value>) -> bool {
    matches!(obj.get("columns"), Some(Value::Array(_)))
        && matches!(obj.get("data"), Some(Value::Array(_)))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Non-negative integral JSON number, accepting `12.0` as pandas likes to emit.
fn vote_count(v: &Value) -> Option<u64> {
    let Value::Number(n) = v else {
        return None;
    };
    n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    })
}

/// One county's vote counts, aligned with [`ResultsTable::candidates`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountyRow {
    pub county: String,
    pub votes: Vec<u64>,
}

impl CountyRow {
    pub fn total(&self) -> u64 {
        self.votes.iter().sum()
    }
}

/// County-level results: one row per county, one vote column per candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultsTable {
    candidates: Vec<String>,
    rows: Vec<CountyRow>,
}

impl ResultsTable {
    pub fn new(candidates: Vec<String>, rows: Vec<CountyRow>) -> DashResult<Self> {
        const WHAT: &str = "results table";
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if row.votes.len() != candidates.len() {
                return Err(DashError::malformed(
                    WHAT,
                    format!(
                        "{} has {} vote columns, expected {}",
                        row.county,
                        row.votes.len(),
                        candidates.len()
                    ),
                ));
            }
            if !seen.insert(row.county.as_str()) {
                return Err(DashError::malformed(
                    WHAT,
                    format!("duplicate county {:?}", row.county),
                ));
            }
        }
        Ok(Self { candidates, rows })
    }

    pub fn from_raw(raw: RawTable) -> DashResult<Self> {
        const WHAT: &str = "results table";
        if raw.rows.is_empty() {
            let candidates = raw
                .headers
                .into_iter()
                .filter(|h| h != COUNTY_COLUMN)
                .collect();
            return Self::new(candidates, Vec::new());
        }

        let county_idx = raw.require_column(WHAT, COUNTY_COLUMN)?;
        let candidates: Vec<String> = raw
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != county_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let mut rows = Vec::with_capacity(raw.rows.len());
        for row in raw.rows {
            let county = match row.get(county_idx) {
                Some(Value::String(s)) => s.clone(),
                other => {
                    return Err(DashError::malformed(
                        WHAT,
                        format!("county name {:?} is not a string", other),
                    ))
                }
            };
            let votes = row
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != county_idx)
                .map(|(i, v)| {
                    vote_count(v).ok_or_else(|| {
                        DashError::malformed(
                            WHAT,
                            format!(
                                "{}/{}: {} is not a non-negative integer",
                                county, raw.headers[i], v
                            ),
                        )
                    })
                })
                .collect::<DashResult<Vec<u64>>>()?;
            rows.push(CountyRow { county, votes });
        }

        Self::new(candidates, rows)
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn rows(&self) -> &[CountyRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// County names in response order; the first one seeds the selection.
    pub fn counties(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.county.as_str())
    }

    pub fn row(&self, county: &str) -> Option<&CountyRow> {
        self.rows.iter().find(|r| r.county == county)
    }

    pub fn contains(&self, county: &str) -> bool {
        self.row(county).is_some()
    }

    pub fn column_index(&self, candidate: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c == candidate)
    }
}

fn header_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader)
}

/// Zero-padded five digit FIPS code. Accepts `"13001"`, `"13001.0"` and `1001`.
pub fn normalise_fips(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let code = raw.parse::<u32>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u32)
    })?;
    (code <= 99_999).then(|| format!("{:05}", code))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FipsRow {
    pub county: String,
    pub fips: String,
}

/// County name -> FIPS reference table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FipsTable {
    rows: Vec<FipsRow>,
}

impl FipsTable {
    pub fn new(rows: Vec<FipsRow>) -> DashResult<Self> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !seen.insert(row.county.as_str()) {
                return Err(DashError::malformed(
                    "FIPS table",
                    format!("duplicate county {:?}", row.county),
                ));
            }
        }
        Ok(Self { rows })
    }

    pub fn from_csv<R: Read>(reader: R, county_column: &str) -> DashResult<Self> {
        const WHAT: &str = "FIPS table";
        let mut rdr = csv_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| DashError::malformed(WHAT, e))?
            .clone();
        let fips_idx = header_index(&headers, "FIPS")
            .ok_or_else(|| DashError::malformed(WHAT, "missing FIPS column"))?;
        let county_idx = header_index(&headers, county_column).ok_or_else(|| {
            DashError::malformed(WHAT, format!("missing {:?} column", county_column))
        })?;

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| DashError::malformed(WHAT, e))?;
            let county = record.get(county_idx).unwrap_or_default().to_string();
            let fips = record
                .get(fips_idx)
                .and_then(normalise_fips)
                .ok_or_else(|| {
                    DashError::malformed(
                        WHAT,
                        format!("line {}: bad FIPS code for {:?}", i + 2, county),
                    )
                })?;
            rows.push(FipsRow { county, fips });
        }
        Self::new(rows)
    }

    pub fn rows(&self) -> &[FipsRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, county: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.county == county)
            .map(|r| r.fips.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulationRow {
    pub fips: String,
    pub population: u64,
}

/// Total population per county for one state, keyed by FIPS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulationTable {
    pub state: String,
    pub rows: Vec<PopulationRow>,
}

impl PopulationTable {
    /// Reads a `STNAME,FIPS,TOT_POP,...` census extract, keeping rows for `state`.
    pub fn from_csv<R: Read>(reader: R, state: &str) -> DashResult<Self> {
        const WHAT: &str = "population table";
        let mut rdr = csv_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| DashError::malformed(WHAT, e))?
            .clone();
        let column = |name: &str| {
            header_index(&headers, name)
                .ok_or_else(|| DashError::malformed(WHAT, format!("missing {} column", name)))
        };
        let state_idx = column("STNAME")?;
        let fips_idx = column("FIPS")?;
        let pop_idx = column("TOT_POP")?;

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| DashError::malformed(WHAT, e))?;
            if record.get(state_idx) != Some(state) {
                continue;
            }
            let bad = |field: &str| {
                DashError::malformed(WHAT, format!("line {}: bad {}", i + 2, field))
            };
            let fips = record
                .get(fips_idx)
                .and_then(normalise_fips)
                .ok_or_else(|| bad("FIPS"))?;
            let population = record
                .get(pop_idx)
                .and_then(|p| {
                    p.parse::<u64>().ok().or_else(|| {
                        p.parse::<f64>()
                            .ok()
                            .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                            .map(|f| f as u64)
                    })
                })
                .ok_or_else(|| bad("TOT_POP"))?;
            rows.push(PopulationRow { fips, population });
        }

        Ok(Self {
            state: state.to_string(),
            rows,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionRow {
    pub category: String,
    pub value: f64,
}

/// One metric bucketed along one demographic axis for one county.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionTable {
    pub axis: Axis,
    pub metric: String,
    pub rows: Vec<DistributionRow>,
}

impl DistributionTable {
    pub fn empty(axis: Axis, metric: &str) -> Self {
        Self {
            axis,
            metric: metric.to_string(),
            rows: Vec::new(),
        }
    }

    /// A body with no rows is a county with no respondents, not an error.
    /// Missing metric cells count as zero.
    pub fn from_raw(raw: RawTable, axis: Axis, metric: &str) -> DashResult<Self> {
        let what = format!("{} distribution", axis);
        if raw.is_empty() {
            return Ok(Self::empty(axis, metric));
        }
        let axis_idx = raw.require_column(&what, axis.as_str())?;
        let metric_idx = raw.require_column(&what, metric)?;

        let mut rows = Vec::with_capacity(raw.rows.len());
        for row in &raw.rows {
            let category = match row.get(axis_idx) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => "Unknown".to_string(),
            };
            let value = match row.get(metric_idx) {
                Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
                Some(Value::Null) | None => 0.0,
                Some(other) => {
                    return Err(DashError::malformed(
                        &what,
                        format!("{}: {} is not a number", category, other),
                    ))
                }
            };
            rows.push(DistributionRow { category, value });
        }

        Ok(Self {
            axis,
            metric: metric.to_string(),
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.value).sum()
    }
}
