//! Vault REST Client
//!
//! Native REST client for the vault item API.
//! Uses reqwest with rustls and a static bearer token.
//!
//! Only the single read the synchronizer needs is implemented:
//! `GET /v1/vaults/{vaultId}/items/{itemId}`.
//!
//! Status mapping:
//! - `404` -> [`FetchError::NotFound`]
//! - `401` / `403` -> [`FetchError::Unauthorized`]
//! - anything else, transport errors, timeouts and undecodable bodies ->
//!   [`FetchError::Unavailable`]
//!
//! Every request is bounded by the configured timeout so an unresponsive vault
//! cannot hold a cycle.

use super::{FetchError, Item, ItemFetcher, ItemPath};
use crate::observability::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, Instrument};
use zeroize::Zeroizing;

/// Error body returned by the vault API
#[derive(Debug, Deserialize)]
struct VaultErrorResponse {
    /// Human-readable error message
    message: String,
}

/// Vault REST client
pub struct ConnectClient {
    http_client: Client,
    base_url: String,
    token: Zeroizing<String>,
}

impl std::fmt::Debug for ConnectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ConnectClient {
    /// Create a new client for the vault API at `base_url`
    ///
    /// `timeout` bounds each request from connect to the end of the body.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(base_url: &str, token: Zeroizing<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("vault-sync-controller/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!(
            "Initializing vault REST client for {} (timeout {:?})",
            base_url, timeout
        );

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }

    fn item_url(&self, path: &ItemPath) -> String {
        format!(
            "{}/v1/vaults/{}/items/{}",
            self.base_url, path.vault_id, path.item_id
        )
    }

    async fn get_item(&self, path: &ItemPath) -> Result<Item, FetchError> {
        let url = self.item_url(path);
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(self.token.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Unavailable {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Item>()
                .await
                .map_err(|e| FetchError::Unavailable {
                    path: path.to_string(),
                    message: format!("failed to decode item: {e}"),
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error_response(path, status, &body))
    }
}

/// Map a non-success vault response to a [`FetchError`]
fn classify_error_response(path: &ItemPath, status: StatusCode, body: &str) -> FetchError {
    let message = serde_json::from_str::<VaultErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| format!("HTTP {status}"));

    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound {
            path: path.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Unauthorized {
            path: path.to_string(),
            message,
        },
        _ => FetchError::Unavailable {
            path: path.to_string(),
            message,
        },
    }
}

#[async_trait]
impl ItemFetcher for ConnectClient {
    async fn fetch(&self, path: &ItemPath) -> Result<Item, FetchError> {
        let span = tracing::debug_span!("vaultsync.vault.fetch", item.path = %path);
        let start = Instant::now();
        let result = self.get_item(path).instrument(span).await;
        metrics::observe_vault_fetch_duration(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::increment_vault_fetch_errors(e.reason());
        }
        result
    }
}
