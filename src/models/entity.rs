//! Listing output record.

use crate::{store::ObjectMetadata, timestamp::format_updated};
use serde::Serialize;

/// One element of the `/datasets/{bucket}/entities` array.
///
/// Serialized field order is part of the wire format:
/// `_id`, `file_id`, `file_url` (omitted when unsigned), `updated`,
/// `_updated`, `generation`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Entity {
    #[serde(rename = "_id")]
    pub id: String,

    pub file_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,

    pub updated: String,

    /// Mirror of `updated`.
    #[serde(rename = "_updated")]
    pub shadow_updated: String,

    pub generation: i64,
}

impl Entity {
    pub fn from_metadata(meta: &ObjectMetadata, file_url: Option<String>) -> Self {
        let updated = format_updated(meta.updated_at);
        Self {
            id: meta.name.clone(),
            file_id: meta.name.clone(),
            file_url,
            shadow_updated: updated.clone(),
            updated,
            generation: meta.generation,
        }
    }
}
