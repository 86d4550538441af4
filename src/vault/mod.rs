//! # Vault
//!
//! Vault item model and the fetcher seam used by the synchronizer.
//!
//! - [`Item`] / [`ItemField`]: the item shape returned by the vault API
//! - [`ItemPath`]: the `vaults/<vaultId>/items/<itemId>` locator stored on secrets
//! - [`ItemFetcher`]: request/response trait implemented by [`connect::ConnectClient`]

pub mod connect;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

pub use connect::ConnectClient;

// Identifiers go into the request path unencoded, so only URL-safe characters
static ITEM_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^vaults/([A-Za-z0-9_-]+)/items/([A-Za-z0-9_-]+)$")
        .expect("Failed to compile item path regex - this should never happen")
});

/// Reference to the vault that owns an item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRef {
    pub id: String,
}

/// One labelled value of a vault item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemField {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
}

impl ItemField {
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// A vault item as returned by the vault API
///
/// Fields keep the order the vault returned them in; flattening them into a
/// secret is done by [`crate::controller::builder`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub vault: VaultRef,
    pub version: u64,
    #[serde(default)]
    pub fields: Vec<ItemField>,
}

/// Locator of a vault item, as stored in the item-path annotation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPath {
    pub vault_id: String,
    pub item_id: String,
}

/// The item-path annotation is not of the form `vaults/<vaultId>/items/<itemId>`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed item path '{path}': expected vaults/<vaultId>/items/<itemId>")]
pub struct ItemPathError {
    pub path: String,
}

impl ItemPath {
    #[must_use]
    pub fn new(vault_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            vault_id: vault_id.into(),
            item_id: item_id.into(),
        }
    }

    /// Parse an item-path annotation value
    ///
    /// # Errors
    /// Returns [`ItemPathError`] when either identifier is missing or holds
    /// characters outside `[A-Za-z0-9_-]`, or the path has extra segments.
    pub fn parse(path: &str) -> Result<Self, ItemPathError> {
        let captures = ITEM_PATH_RE
            .captures(path.trim())
            .ok_or_else(|| ItemPathError {
                path: path.to_string(),
            })?;
        Ok(Self::new(&captures[1], &captures[2]))
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vaults/{}/items/{}", self.vault_id, self.item_id)
    }
}

/// Errors returned by an [`ItemFetcher`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The item or its vault no longer exists
    #[error("vault item {path} not found")]
    NotFound { path: String },
    /// The vault rejected the credentials
    #[error("not authorized to read vault item {path}: {message}")]
    Unauthorized { path: String, message: String },
    /// Transport failure, server error or undecodable response
    #[error("vault unavailable while reading {path}: {message}")]
    Unavailable { path: String, message: String },
}

impl FetchError {
    /// Short reason label used for metrics and logs
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::NotFound { .. } => "not_found",
            FetchError::Unauthorized { .. } => "unauthorized",
            FetchError::Unavailable { .. } => "unavailable",
        }
    }
}

/// Retrieves the current state of one vault item
///
/// Implementations hold no per-item state and perform no retries; the poll
/// schedule is the retry mechanism.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// Fetch the item at `path`
    async fn fetch(&self, path: &ItemPath) -> Result<Item, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_path() {
        let path = ItemPath::parse("vaults/hfnjvi6aymbsnfc2xeeoheizda/items/nwrhuano7bcwddcviubpp4mhfq")
            .unwrap();
        assert_eq!(path.vault_id, "hfnjvi6aymbsnfc2xeeoheizda");
        assert_eq!(path.item_id, "nwrhuano7bcwddcviubpp4mhfq");
        assert_eq!(
            path.to_string(),
            "vaults/hfnjvi6aymbsnfc2xeeoheizda/items/nwrhuano7bcwddcviubpp4mhfq"
        );
    }

    #[test]
    fn test_parse_item_path_accepts_dashes_and_underscores() {
        let path = ItemPath::parse("vaults/prod_vault-1/items/DB-creds_2").unwrap();
        assert_eq!(path, ItemPath::new("prod_vault-1", "DB-creds_2"));
    }

    #[test]
    fn test_parse_item_path_trims_whitespace() {
        let path = ItemPath::parse("  vaults/v1/items/i1\n").unwrap();
        assert_eq!(path, ItemPath::new("v1", "i1"));
    }

    #[test]
    fn test_parse_item_path_rejects_malformed() {
        for bad in [
            "",
            "vaults//items/i1",
            "vaults/v1/items/",
            "vaults/v1/item/i1",
            "vaults/v1/items/i1/extra",
            "items/i1",
            "vaults/v 1/items/i1",
        ] {
            let err = ItemPath::parse(bad).unwrap_err();
            assert_eq!(err.path, bad, "path {bad:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_item_path_rejects_url_significant_characters() {
        for bad in [
            "vaults/../items/x",
            "vaults/v1/items/..",
            "vaults/v1/items/a?b",
            "vaults/v1/items/a#b",
            "vaults/v1%2F..%2F/items/i1",
            "vaults/v.1/items/i1",
        ] {
            let err = ItemPath::parse(bad).unwrap_err();
            assert_eq!(err.path, bad, "path {bad:?} should be rejected");
        }
    }

    #[test]
    fn test_item_deserializes_with_missing_optional_fields() {
        let item: Item = serde_json::from_value(serde_json::json!({
            "id": "i1",
            "version": 7
        }))
        .unwrap();
        assert_eq!(item.version, 7);
        assert!(item.fields.is_empty());
        assert_eq!(item.vault.id, "");
    }

    #[test]
    fn test_fetch_error_reason() {
        let err = FetchError::NotFound {
            path: "vaults/v/items/i".to_string(),
        };
        assert_eq!(err.reason(), "not_found");
        assert!(err.to_string().contains("vaults/v/items/i"));
    }
}
