use serde::{Deserialize, Serialize};

/// Tunables recognized by the session layer. Loaded once at startup by the
/// caller (this crate never reads a config file itself); everything else
/// reaches these through a value, not a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub id: u32,
    pub pre_key_batch: u32,
    pub max_skipped_per_chain: u32,
    pub max_skipped_total: u32,
    pub max_receive_chains: usize,
    pub ratchet_header_version: u8,
    pub max_sender_key_states: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            id: 1,
            pre_key_batch: 30,
            max_skipped_per_chain: 2000,
            max_skipped_total: 2000,
            max_receive_chains: 5,
            ratchet_header_version: 0x33,
            max_sender_key_states: 5,
        }
    }
}
