//! # Secret Builder
//!
//! Turns a vault item into the payload of a managed secret.
//!
//! Fields are flattened in order into a label -> bytes map. Later fields win
//! over earlier ones with the same key, and fields whose label is empty (or
//! sanitizes to nothing) are skipped. The annotations tag the secret with its
//! item path and the item version as a decimal string.

use crate::constants::{ITEM_PATH_ANNOTATION, VERSION_ANNOTATION};
use crate::vault::{Item, ItemField, ItemPath};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

/// Data and control annotations computed for one vault item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPayload {
    pub data: BTreeMap<String, ByteString>,
    pub annotations: BTreeMap<String, String>,
}

/// Build the secret payload for `item`, fetched from `path`
#[must_use]
pub fn build(item: &Item, path: &ItemPath) -> SecretPayload {
    let mut annotations = BTreeMap::new();
    annotations.insert(ITEM_PATH_ANNOTATION.to_string(), path.to_string());
    annotations.insert(VERSION_ANNOTATION.to_string(), item.version.to_string());

    SecretPayload {
        data: flatten_fields(&item.fields),
        annotations,
    }
}

/// Flatten an ordered field list into secret data, last write wins
#[must_use]
pub fn flatten_fields(fields: &[ItemField]) -> BTreeMap<String, ByteString> {
    fields
        .iter()
        .filter_map(|field| {
            secret_key_for_label(&field.label)
                .map(|key| (key, ByteString(field.value.clone().into_bytes())))
        })
        .collect()
}

/// Convert a field label into a valid secret data key
///
/// Keys may only contain `[-._a-zA-Z0-9]`; anything else becomes `-`.
/// Returns `None` for labels that are empty after trimming, and for `.` and
/// `..` which the API server rejects.
#[must_use]
pub fn secret_key_for_label(label: &str) -> Option<String> {
    let key: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    (!key.is_empty() && key != "." && key != "..").then_some(key)
}

/// Overwrite a secret's data and version annotation with `payload`
///
/// An existing item-path annotation is never rewritten. Everything else on the
/// secret (type, labels, owner references, unrelated annotations) is left as
/// it is.
pub fn apply_payload(secret: &mut Secret, payload: &SecretPayload) {
    secret.data = Some(payload.data.clone());
    secret.string_data = None;

    let annotations = secret.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for (key, value) in &payload.annotations {
        if key == ITEM_PATH_ANNOTATION {
            annotations
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        } else {
            annotations.insert(key.clone(), value.clone());
        }
    }
}
