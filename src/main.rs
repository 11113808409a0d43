use anyhow::{Context, Result};
use electiondash::{
    binder::ViewBinder,
    config::Config,
    dashboard::{self, Dashboard},
};
use serde::Serialize;
use std::{env, path::PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn print_json<T: Serialize>(label: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).with_context(|| format!("encoding {}", label))?;
    println!("{}", json);
    Ok(())
}

/// Waits for cycle `token` and prints its bundle. Failures are reported, not fatal.
async fn report(binder: &ViewBinder, token: u64) -> Result<()> {
    match binder.wait_for(token).await {
        Ok(bundle) => print_json("view bundle", bundle.as_ref()),
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "refresh failed; retry with the same county");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "refresh failed");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,electiondash=info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    info!("startup");

    // ─── 2) args: [config.yaml] [county ...] ─────────────────────────
    let mut args = env::args().skip(1).peekable();
    let config_path = args
        .next_if(|a| a.ends_with(".yaml") || a.ends_with(".yml"))
        .map(PathBuf::from);
    let counties: Vec<String> = args.collect();

    let config = Config::load(config_path.as_deref()).context("loading config")?;

    // ─── 3) results, reference tables, statewide view ────────────────
    let dash: Dashboard = dashboard::load_from_config(&config)
        .await
        .context("loading dashboard")?;
    let snapshot = dash.snapshot();
    info!(
        counties = snapshot.counties.len(),
        contest = snapshot.query.contest,
        "dashboard ready"
    );
    print_json("snapshot", snapshot.as_ref())?;

    // ─── 4) initial county view, then each requested selection ───────
    let binder = dash.binder().context("creating view binder")?;
    let token = binder.refresh();
    report(&binder, token).await?;

    for county in counties {
        match binder.select(&county) {
            Ok(Some(token)) => report(&binder, token).await?,
            Ok(None) => info!(county = %county, "already selected"),
            Err(e) => error!(county = %county, error = %e, "cannot select county"),
        }
    }

    info!("all done");
    Ok(())
}
