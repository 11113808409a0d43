// src/fetch/mod.rs

use async_trait::async_trait;

use crate::error::DashResult;
use crate::table::{DistributionTable, ResultsTable, TurnoutTable};

pub mod client;
pub mod query;
pub mod reference;

#[cfg(test)]
pub(crate) mod memory;

pub use client::{ApiClient, RetryPolicy};
pub use query::{Axis, DistributionQuery, ResultColumn, ResultsQuery, TurnoutQuery, DEFAULT_METRIC};
pub use reference::{fetch_fips_table, fetch_population_table};

/// The three provider queries the dashboard is built from.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_results(&self, query: &ResultsQuery) -> DashResult<ResultsTable>;

    async fn fetch_turnout(&self, query: &TurnoutQuery) -> DashResult<TurnoutTable>;

    async fn fetch_distribution(&self, query: &DistributionQuery) -> DashResult<DistributionTable>;
}
