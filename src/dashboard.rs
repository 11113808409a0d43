// src/dashboard.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, instrument};

use crate::aggregate::{
    compute_statewide, join_fips, population_choropleth, winner_choropleth, ChoroplethTable,
    JoinedResults, StatewideAggregate,
};
use crate::binder::{BinderSettings, ViewBinder};
use crate::config::{Config, MapConfig};
use crate::error::{DashError, DashResult};
use crate::fetch::{
    fetch_fips_table, fetch_population_table, ApiClient, DataSource, ResultsQuery, TurnoutQuery,
};
use crate::table::{FipsTable, PopulationTable, TurnoutTable};

/// What colours the county map.
#[derive(Debug, Clone)]
pub enum MapKind {
    /// Winner over `candidates` in tie-break order; `None` uses every column.
    Winner { candidates: Option<Vec<String>> },
    Population(PopulationTable),
}

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub map: MapKind,
    /// Fetch turnout alongside results; year and month follow the results query.
    pub turnout: Option<TurnoutQuery>,
    pub binder: BinderSettings,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            map: MapKind::Winner { candidates: None },
            turnout: None,
            binder: BinderSettings::default(),
        }
    }
}

/// Everything derived from one results fetch. Never mutated after build.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub query: ResultsQuery,
    pub counties: Vec<String>,
    pub statewide: StatewideAggregate,
    pub choropleth: ChoroplethTable,
    pub turnout: Option<TurnoutTable>,
    pub loaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub joined: Arc<JoinedResults>,
}

#[instrument(level = "info", skip(source, fips, options), fields(contest = query.contest, year = query.year))]
async fn build_snapshot(
    source: &dyn DataSource,
    fips: &FipsTable,
    options: &DashboardOptions,
    query: ResultsQuery,
) -> DashResult<Snapshot> {
    let turnout_query = options.turnout.clone().map(|t| TurnoutQuery {
        year: query.year,
        month: query.month,
        ..t
    });
    let (results, turnout) = tokio::try_join!(source.fetch_results(&query), async {
        match &turnout_query {
            Some(q) => source.fetch_turnout(q).await.map(Some),
            None => Ok(None),
        }
    })?;

    if results.is_empty() {
        return Err(DashError::malformed("results table", "no counties returned"));
    }

    let statewide = compute_statewide(&results)?;
    let joined = join_fips(results, fips)?;
    let choropleth = match &options.map {
        MapKind::Winner { candidates } => {
            let columns = candidates
                .as_deref()
                .unwrap_or_else(|| joined.results().candidates());
            winner_choropleth(&joined, columns)?
        }
        MapKind::Population(population) => population_choropleth(population),
    };
    let counties = joined
        .results()
        .counties()
        .map(str::to_string)
        .collect::<Vec<_>>();

    info!(
        counties = counties.len(),
        candidates = statewide.totals.len(),
        "snapshot built"
    );

    Ok(Snapshot {
        query,
        counties,
        statewide,
        choropleth,
        turnout,
        loaded_at: Utc::now(),
        joined: Arc::new(joined),
    })
}

/// Owns the current results snapshot and hands out binders over it.
pub struct Dashboard {
    source: Arc<dyn DataSource>,
    fips: FipsTable,
    options: DashboardOptions,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Dashboard {
    pub async fn load(
        source: Arc<dyn DataSource>,
        fips: FipsTable,
        options: DashboardOptions,
        query: ResultsQuery,
    ) -> DashResult<Self> {
        let snapshot = build_snapshot(source.as_ref(), &fips, &options, query).await?;
        Ok(Self {
            source,
            fips,
            options,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Refetches results for `query` and swaps the snapshot in one step.
    /// On error the previous snapshot stays current.
    pub async fn reload(&self, query: ResultsQuery) -> DashResult<Arc<Snapshot>> {
        let fresh = Arc::new(
            build_snapshot(self.source.as_ref(), &self.fips, &self.options, query).await?,
        );
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&fresh);
        Ok(fresh)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// A binder over the current snapshot. Binders made before a reload keep
    /// the snapshot they were made from. County winners follow the winner
    /// map's candidate list.
    pub fn binder(&self) -> DashResult<ViewBinder> {
        let snapshot = self.snapshot();
        let mut settings = self.options.binder.clone();
        if let MapKind::Winner { candidates } = &self.options.map {
            settings.candidates = candidates.clone();
        }
        ViewBinder::new(
            Arc::clone(&self.source),
            Arc::clone(&snapshot.joined),
            &snapshot.query,
            settings,
        )
    }
}

/// Builds the HTTP client, loads the reference tables and the first snapshot.
pub async fn load_from_config(config: &Config) -> DashResult<Dashboard> {
    let client = ApiClient::from_config(config)?;
    let fips = fetch_fips_table(&client, &config.fips_source, &config.fips_county_column).await?;
    let map = match &config.map {
        MapConfig::Winner { candidates } => MapKind::Winner {
            candidates: candidates.clone(),
        },
        MapConfig::Population { source, state } => {
            MapKind::Population(fetch_population_table(&client, source, state).await?)
        }
    };
    let options = DashboardOptions {
        map,
        turnout: config.turnout.clone(),
        binder: BinderSettings {
            metric: config.metric.clone(),
            timeout: config.request_timeout(),
            ..BinderSettings::default()
        },
    };
    Dashboard::load(Arc::new(client), fips, options, config.results.clone()).await
}
