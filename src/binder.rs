// src/binder.rs
//
// Selection-driven refresh of the four county views.
//
// Every refresh cycle gets a token from a monotonically increasing counter.
// Only the cycle holding the latest token may publish; older cycles are
// cancelled as soon as a newer token is issued and, if they still finish,
// their results are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{CountyResult, JoinedResults};
use crate::error::{DashError, DashResult};
use crate::fetch::{Axis, DataSource, DistributionQuery, ResultsQuery, DEFAULT_METRIC};
use crate::table::DistributionTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderSettings {
    /// Metric aggregated by every distribution query.
    pub metric: String,
    /// Upper bound on each distribution fetch.
    pub timeout: Duration,
    /// Columns the county winner is picked over, in tie-break order.
    /// `None` means every candidate column.
    pub candidates: Option<Vec<String>>,
}

impl Default for BinderSettings {
    fn default() -> Self {
        Self {
            metric: DEFAULT_METRIC.to_string(),
            timeout: Duration::from_secs(10),
            candidates: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderState {
    /// Showing (or about to show) the view for `county`.
    Idle { county: String },
    /// Cycle `token` is fetching the views for `county`. `previous` is the
    /// selection restored if the cycle fails before anything is shown.
    Refreshing {
        county: String,
        token: u64,
        previous: String,
    },
}

impl BinderState {
    /// The current selection.
    pub fn county(&self) -> &str {
        match self {
            BinderState::Idle { county } | BinderState::Refreshing { county, .. } => county,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self, BinderState::Refreshing { .. })
    }
}

/// The four county-scoped views, published together or not at all.
#[derive(Debug, Clone, Serialize)]
pub struct ViewBundle {
    pub token: u64,
    pub county: String,
    pub county_results: CountyResult,
    pub age: DistributionTable,
    pub gender: DistributionTable,
    pub race: DistributionTable,
    pub refreshed_at: DateTime<Utc>,
}

/// Why the cycle `token` for `county` published nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshFailure {
    pub county: String,
    pub token: u64,
    pub error: DashError,
}

struct Inner {
    source: Arc<dyn DataSource>,
    joined: Arc<JoinedResults>,
    year: u16,
    month: u8,
    settings: BinderSettings,
    state: Mutex<BinderState>,
    tokens: watch::Sender<u64>,
    bundles: watch::Sender<Option<Arc<ViewBundle>>>,
    failures: watch::Sender<Option<RefreshFailure>>,
}

/// Recomputes the county views whenever the selected county changes.
///
/// Cheap to clone; clones share state. `select` and `refresh` spawn onto the
/// current Tokio runtime.
#[derive(Clone)]
pub struct ViewBinder {
    inner: Arc<Inner>,
}

impl ViewBinder {
    /// Starts Idle on the first county of `joined`. Nothing is fetched until
    /// [`refresh`](Self::refresh) or [`select`](Self::select) is called.
    pub fn new(
        source: Arc<dyn DataSource>,
        joined: Arc<JoinedResults>,
        query: &ResultsQuery,
        settings: BinderSettings,
    ) -> DashResult<Self> {
        let first = joined
            .results()
            .counties()
            .next()
            .ok_or_else(|| DashError::malformed("results table", "no counties to select"))?
            .to_string();

        let (tokens, _) = watch::channel(0);
        let (bundles, _) = watch::channel(None);
        let (failures, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(Inner {
                source,
                joined,
                year: query.year,
                month: query.month,
                settings,
                state: Mutex::new(BinderState::Idle { county: first }),
                tokens,
                bundles,
                failures,
            }),
        })
    }

    pub fn state(&self) -> BinderState {
        self.inner.lock_state().clone()
    }

    pub fn selection(&self) -> String {
        self.inner.lock_state().county().to_string()
    }

    pub fn latest_token(&self) -> u64 {
        *self.inner.tokens.borrow()
    }

    /// Last published bundle.
    pub fn current(&self) -> Option<Arc<ViewBundle>> {
        self.inner.bundles.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ViewBundle>>> {
        self.inner.bundles.subscribe()
    }

    pub fn failures(&self) -> watch::Receiver<Option<RefreshFailure>> {
        self.inner.failures.subscribe()
    }

    /// Switches the selection to `county` and starts a refresh cycle.
    ///
    /// Returns the new cycle's token, or `None` when `county` is already
    /// selected and settled. Reselecting a county whose cycle is still in
    /// flight restarts it. An unknown county leaves state and view untouched.
    #[instrument(level = "info", skip(self))]
    pub fn select(&self, county: &str) -> DashResult<Option<u64>> {
        if !self.inner.joined.results().contains(county) {
            warn!(county, "selection not in results; keeping current view");
            return Err(DashError::SelectionNotFound {
                county: county.to_string(),
            });
        }

        let mut state = self.inner.lock_state();
        if !state.is_refreshing() && state.county() == county {
            debug!(county, "selection unchanged");
            return Ok(None);
        }
        Ok(Some(self.inner.start_cycle(&mut state, county)))
    }

    /// Refetches the views for the current selection (initial load, retry).
    pub fn refresh(&self) -> u64 {
        let mut state = self.inner.lock_state();
        let county = state.county().to_string();
        self.inner.start_cycle(&mut state, &county)
    }

    /// Resolves once cycle `token`, or a later one, has published or failed.
    pub async fn wait_for(&self, token: u64) -> DashResult<Arc<ViewBundle>> {
        let mut bundles = self.inner.bundles.subscribe();
        let mut failures = self.inner.failures.subscribe();
        loop {
            let ready = bundles
                .borrow_and_update()
                .as_ref()
                .filter(|b| b.token >= token)
                .cloned();
            if let Some(bundle) = ready {
                return Ok(bundle);
            }
            let failed = failures
                .borrow_and_update()
                .as_ref()
                .filter(|f| f.token >= token)
                .map(|f| f.error.clone());
            if let Some(error) = failed {
                return Err(error);
            }

            let changed = tokio::select! {
                r = bundles.changed() => r,
                r = failures.changed() => r,
            };
            changed.map_err(|_| DashError::BinderClosed)?;
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, BinderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_cycle(self: &Arc<Self>, state: &mut BinderState, county: &str) -> u64 {
        self.tokens.send_modify(|t| *t += 1);
        let token = *self.tokens.borrow();
        let previous = match &*state {
            BinderState::Idle { county } => county.clone(),
            BinderState::Refreshing { previous, .. } => previous.clone(),
        };
        *state = BinderState::Refreshing {
            county: county.to_string(),
            token,
            previous,
        };
        info!(county, token, "refresh started");
        tokio::spawn(Arc::clone(self).run_cycle(county.to_string(), token));
        token
    }

    async fn run_cycle(self: Arc<Self>, county: String, token: u64) {
        let latest = self.tokens.subscribe();
        let outcome = tokio::select! {
            biased;
            _ = superseded(latest, token) => None,
            res = self.build_bundle(&county, token) => Some(res),
        };
        match outcome {
            None => debug!(county = %county, token, "superseded; refresh cancelled"),
            Some(Ok(bundle)) => self.publish(bundle),
            Some(Err(error)) => self.fail(county, token, error),
        }
    }

    async fn build_bundle(&self, county: &str, token: u64) -> DashResult<ViewBundle> {
        let county_results = self
            .joined
            .pivot_county(county, self.settings.candidates.as_deref())?;
        let (age, gender, race) = tokio::try_join!(
            self.distribution(county, Axis::AgeGroup),
            self.distribution(county, Axis::Gender),
            self.distribution(county, Axis::Race),
        )?;
        Ok(ViewBundle {
            token,
            county: county.to_string(),
            county_results,
            age,
            gender,
            race,
            refreshed_at: Utc::now(),
        })
    }

    async fn distribution(&self, county: &str, axis: Axis) -> DashResult<DistributionTable> {
        let query = DistributionQuery {
            county: county.to_string(),
            year: self.year,
            month: self.month,
            axis,
            metric: self.settings.metric.clone(),
        };
        let limit = self.settings.timeout;
        match tokio::time::timeout(limit, self.source.fetch_distribution(&query)).await {
            Ok(res) => res,
            Err(_) => Err(DashError::network(
                format!("{} distribution for {}", axis, county),
                format!("timed out after {:?}", limit),
            )),
        }
    }

    fn publish(&self, bundle: ViewBundle) {
        let mut state = self.lock_state();
        if *self.tokens.borrow() != bundle.token {
            debug!(county = %bundle.county, token = bundle.token, "stale refresh discarded");
            return;
        }
        *state = BinderState::Idle {
            county: bundle.county.clone(),
        };
        info!(county = %bundle.county, token = bundle.token, "view updated");
        self.bundles.send_replace(Some(Arc::new(bundle)));
    }

    fn fail(&self, county: String, token: u64, error: DashError) {
        let mut state = self.lock_state();
        if *self.tokens.borrow() != token {
            debug!(county = %county, token, "stale failure discarded");
            return;
        }
        // Selection falls back to whatever is still on screen, or to the
        // selection before this cycle when nothing has been shown yet.
        let shown = match (self.bundles.borrow().as_ref(), &*state) {
            (Some(bundle), _) => bundle.county.clone(),
            (None, BinderState::Refreshing { previous, .. }) => previous.clone(),
            (None, BinderState::Idle { county }) => county.clone(),
        };
        warn!(county = %county, token, error = %error, retryable = error.is_retryable(), "refresh failed; keeping last view");
        *state = BinderState::Idle { county: shown };
        self.failures.send_replace(Some(RefreshFailure {
            county,
            token,
            error,
        }));
    }
}

async fn superseded(mut latest: watch::Receiver<u64>, token: u64) {
    // An error means the binder is gone, which ends the cycle just the same.
    let _ = latest.wait_for(|t| *t != token).await;
}
