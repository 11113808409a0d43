// Hits each provider endpoint once and prints the shape of what comes back.
//
//   cargo run --bin probe_api -- [COUNTY]

use anyhow::{Context, Result};
use electiondash::{
    config::Config,
    fetch::{ApiClient, Axis, DataSource, DistributionQuery},
};
use futures::future::try_join_all;
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let county = env::args().nth(1).unwrap_or_else(|| "Fulton".to_string());
    let config = Config::load(None).context("loading config")?;
    let client = ApiClient::from_config(&config)?;
    info!(base = %client.base(), "probing");

    let results = client
        .fetch_results(&config.results)
        .await
        .context("get_results")?;
    println!(
        "get_results: {} counties, candidates {:?}",
        results.len(),
        results.candidates()
    );

    let turnout = client
        .fetch_turnout(&config.turnout.clone().unwrap_or_default())
        .await
        .context("get_turnout")?;
    println!(
        "get_turnout: {} rows, columns {:?}",
        turnout.len(),
        turnout.headers
    );

    let queries: Vec<DistributionQuery> = Axis::ALL
        .iter()
        .map(|&axis| DistributionQuery {
            year: config.results.year,
            month: config.results.month,
            metric: config.metric.clone(),
            ..DistributionQuery::new(county.clone(), axis)
        })
        .collect();
    let tables = try_join_all(queries.iter().map(|q| client.fetch_distribution(q)))
        .await
        .context("get_distribution")?;
    for table in tables {
        println!(
            "get_distribution[{}] for {}: {} categories, {} {} in total",
            table.axis,
            county,
            table.rows.len(),
            table.total(),
            table.metric
        );
    }

    Ok(())
}
