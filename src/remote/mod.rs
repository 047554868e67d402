//! HTTP collaborators for a library server
//!
//! Reference implementations of [`CatalogSource`](crate::sources::CatalogSource),
//! [`SaveInventory`](crate::sources::SaveInventory) and
//! [`Transfer`](crate::sources::Transfer) against a REST library server.
//! Authentication is left to a proxy or the server configuration.

mod catalog;
mod saves;
mod transfer;

pub use catalog::HttpCatalog;
pub use saves::HttpSaves;
pub use transfer::{extract_zip, HttpTransfer};

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared client builder so every collaborator identifies itself the same way
pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("retrocache/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Join path segments onto the server base URL, percent-encoding each one
pub(crate) fn endpoint(base_url: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base_url).with_context(|| format!("Invalid server URL: {}", base_url))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Server URL cannot have a path: {}", base_url))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// GET a JSON document, failing on any non-success status
pub(crate) async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: Url) -> Result<T> {
    debug!("GET {}", url);
    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("HTTP {} - {}", status.as_u16(), truncate_error(&body));
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

/// Truncate long response bodies for error messages
pub(crate) fn truncate_error(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > 120 {
        format!("{}...", body.chars().take(117).collect::<String>())
    } else {
        body.to_string()
    }
}
