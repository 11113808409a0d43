// In-memory provider used by the dashboard and binder tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Axis, DataSource, DistributionQuery, ResultsQuery, TurnoutQuery};
use crate::error::{DashError, DashResult};
use crate::table::{
    CountyRow, DistributionRow, DistributionTable, RawTable, ResultsTable, TurnoutTable,
};

pub(crate) fn appling_fulton() -> ResultsTable {
    ResultsTable::new(
        vec!["A".into(), "B".into()],
        vec![
            CountyRow {
                county: "Appling".into(),
                votes: vec![100, 50],
            },
            CountyRow {
                county: "Fulton".into(),
                votes: vec![9000, 9500],
            },
        ],
    )
    .unwrap()
}

pub(crate) struct MemorySource {
    results: ResultsTable,
    delays: HashMap<String, Duration>,
    failing: HashSet<(String, Axis)>,
    empty: HashSet<String>,
    pub results_calls: AtomicUsize,
    pub distribution_calls: Mutex<Vec<DistributionQuery>>,
}

impl MemorySource {
    pub fn new(results: ResultsTable) -> Self {
        Self {
            results,
            delays: HashMap::new(),
            failing: HashSet::new(),
            empty: HashSet::new(),
            results_calls: AtomicUsize::new(0),
            distribution_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, county: &str, delay: Duration) -> Self {
        self.delays.insert(county.to_string(), delay);
        self
    }

    pub fn failing(mut self, county: &str, axis: Axis) -> Self {
        self.failing.insert((county.to_string(), axis));
        self
    }

    pub fn empty_for(mut self, county: &str) -> Self {
        self.empty.insert(county.to_string());
        self
    }

    pub fn calls_for(&self, county: &str) -> usize {
        self.distribution_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.county == county)
            .count()
    }
}

fn categories(axis: Axis) -> [&'static str; 2] {
    match axis {
        Axis::AgeGroup => ["18-24", "25-44"],
        Axis::Gender => ["F", "M"],
        Axis::Race => ["BH", "WH"],
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn fetch_results(&self, _query: &ResultsQuery) -> DashResult<ResultsTable> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.clone())
    }

    async fn fetch_turnout(&self, query: &TurnoutQuery) -> DashResult<TurnoutTable> {
        Ok(RawTable {
            headers: vec!["county_name".into(), "voted".into()],
            rows: vec![vec![json!("Appling"), json!(query.year)]],
        })
    }

    async fn fetch_distribution(&self, query: &DistributionQuery) -> DashResult<DistributionTable> {
        self.distribution_calls.lock().unwrap().push(query.clone());
        if let Some(delay) = self.delays.get(&query.county) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&(query.county.clone(), query.axis)) {
            return Err(DashError::network(
                format!("memory://{}/{}", query.county, query.axis),
                "HTTP 502 Bad Gateway",
            ));
        }
        if self.empty.contains(&query.county) {
            return Ok(DistributionTable::empty(query.axis, &query.metric));
        }
        let value = query.county.len() as f64;
        Ok(DistributionTable {
            axis: query.axis,
            metric: query.metric.clone(),
            rows: categories(query.axis)
                .iter()
                .map(|c| DistributionRow {
                    category: c.to_string(),
                    value,
                })
                .collect(),
        })
    }
}
