use serde::{Deserialize, Serialize};

use crate::session::base64_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    Set,
    Remove,
}

/// One entry inside an `AppStatePatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateMutation {
    pub operation: MutationOperation,
    #[serde(with = "base64_bytes")]
    pub index_mac: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub value_mac: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub key_id: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub encrypted_action: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub action_index: Vec<u8>,
}

/// A batch of mutations plus the MACs that bind them to one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatePatch {
    pub collection_name: String,
    pub version: u64,
    pub mutations: Vec<AppStateMutation>,
    #[serde(with = "base64_bytes")]
    pub patch_mac: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub snapshot_mac: Vec<u8>,
    /// Set when the server has compacted history into a snapshot instead of
    /// shipping every intervening patch; the caller fetches it out of band
    /// and applies it via `appstate::apply_snapshot` before replaying any
    /// patches newer than its version.
    #[serde(default)]
    pub external_blob_reference: Option<String>,
}

/// A full-state checkpoint fetched out of band (external blob store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateSnapshot {
    pub collection_name: String,
    pub version: u64,
    pub records: Vec<AppStateMutation>,
    #[serde(with = "base64_bytes")]
    pub snapshot_mac: Vec<u8>,
}
