// src/fetch/reference.rs

use tracing::{info, instrument};
use url::Url;

use super::ApiClient;
use crate::error::{DashError, DashResult};
use crate::table::{FipsTable, PopulationTable};

/// Reads a reference CSV from an `http(s)://` URL or a local path.
async fn read_source(client: &ApiClient, source: &str) -> DashResult<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let url = Url::parse(source).map_err(|e| DashError::config(format!("{}: {}", source, e)))?;
        client.get_text(&url).await
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| DashError::network(source, e))
    }
}

#[instrument(level = "info", skip(client))]
pub async fn fetch_fips_table(
    client: &ApiClient,
    source: &str,
    county_column: &str,
) -> DashResult<FipsTable> {
    let text = read_source(client, source).await?;
    let table = FipsTable::from_csv(text.as_bytes(), county_column)?;
    info!(counties = table.len(), "loaded FIPS table");
    Ok(table)
}

#[instrument(level = "info", skip(client))]
pub async fn fetch_population_table(
    client: &ApiClient,
    source: &str,
    state: &str,
) -> DashResult<PopulationTable> {
    let text = read_source(client, source).await?;
    let table = PopulationTable::from_csv(text.as_bytes(), state)?;
    info!(counties = table.rows.len(), "loaded population table");
    Ok(table)
}
