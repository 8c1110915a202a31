//! The single-writer key material store (§4.2 / C2).
//!
//! Every other component reaches the key material it needs through a
//! `&mut KeysState` borrow and a `SessionAddress`/`SenderKeyName` lookup —
//! nothing holds a pointer into this struct across an await point.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wwc_proto::{SenderKeyName, SessionAddress};

use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::group::SenderKeyRecord;
use crate::identity::{IdentityKeyPair, PreKey, SignedKeyPair};
use crate::primitives::KeyPair;
use crate::ratchet::PairwiseSession;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateSyncKey {
    #[serde(with = "crate::store::key32_b64")]
    pub key_data: [u8; 32],
    pub key_id: Vec<u8>,
    pub fingerprint: Vec<u8>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LTHashState {
    pub version: u64,
    #[serde(with = "crate::appstate::lthash_b64")]
    pub hash: [u8; 128],
    pub index_value_map: HashMap<String, Vec<u8>>,
    /// Per-mutation MAC history, keyed the same way as `index_value_map`.
    /// Kept so a later patch can be diffed against exactly the value MACs
    /// that produced the current hash, without re-deriving them.
    pub mutation_macs: HashMap<String, Vec<u8>>,
}

impl Default for LTHashState {
    fn default() -> Self {
        Self { version: 0, hash: [0u8; 128], index_value_map: HashMap::new(), mutation_macs: HashMap::new() }
    }
}

#[derive(Serialize, Deserialize)]
pub struct KeysState {
    pub id: u32,
    #[serde(with = "crate::store::key32_b64")]
    pub companion_key_pair: [u8; 32],
    #[serde(with = "crate::store::key32_b64")]
    pub ephemeral_key_pair: [u8; 32],
    #[serde(with = "crate::store::key32_b64")]
    pub companion_adv_key: [u8; 32],
    pub identity_key_pair: IdentityKeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub pre_keys: Vec<PreKey>,
    #[serde(with = "crate::store::map_as_pairs")]
    pub sender_keys: HashMap<SenderKeyName, SenderKeyRecord>,
    #[serde(with = "crate::store::map_as_pairs")]
    pub sessions: HashMap<SessionAddress, PairwiseSession>,
    #[serde(with = "crate::store::map_as_pairs")]
    pub trusted_identities: HashMap<SessionAddress, [u8; 32]>,
    pub hash_states: HashMap<String, LTHashState>,
    pub app_state_keys: Vec<AppStateSyncKey>,
    pub write_counter: u64,
    pub read_counter: u64,
    #[serde(skip)]
    pub config: CryptoConfig,
}

impl KeysState {
    pub fn new_random(config: &CryptoConfig) -> Self {
        let identity_key_pair = IdentityKeyPair::generate();
        let signed_pre_key = SignedKeyPair::generate(1, &identity_key_pair);
        let pre_keys = (1..=config.pre_key_batch).map(PreKey::generate).collect();
        let companion_adv_key = *KeyPair::generate().public.as_bytes();
        let companion_key_pair = KeyPair::generate().private.to_bytes();
        let ephemeral_key_pair = KeyPair::generate().private.to_bytes();
        Self {
            id: config.id,
            companion_key_pair,
            ephemeral_key_pair,
            companion_adv_key,
            identity_key_pair,
            signed_pre_key,
            pre_keys,
            sender_keys: HashMap::new(),
            sessions: HashMap::new(),
            trusted_identities: HashMap::new(),
            hash_states: HashMap::new(),
            app_state_keys: Vec::new(),
            write_counter: 0,
            read_counter: 0,
            config: config.clone(),
        }
    }

    pub fn generate_pre_keys(&mut self, count: u32) {
        let next_id = self.pre_keys.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        for offset in 0..count {
            self.pre_keys.push(PreKey::generate(next_id + offset));
        }
    }

    pub fn find_session(&self, address: &SessionAddress) -> Option<&PairwiseSession> {
        self.sessions.get(address)
    }

    pub fn find_session_mut(&mut self, address: &SessionAddress) -> Option<&mut PairwiseSession> {
        self.sessions.get_mut(address)
    }

    pub fn find_sender_key(&self, name: &SenderKeyName) -> Option<&SenderKeyRecord> {
        self.sender_keys.get(name)
    }

    pub fn find_sender_key_mut(&mut self, name: &SenderKeyName) -> Option<&mut SenderKeyRecord> {
        self.sender_keys.get_mut(name)
    }

    pub fn find_pre_key(&self, id: u32) -> Option<&PreKey> {
        self.pre_keys.iter().find(|p| p.id == id)
    }

    pub fn signed_pre_key_by_id(&self, id: u32) -> Result<&SignedKeyPair, CryptoError> {
        if self.signed_pre_key.id == id {
            Ok(&self.signed_pre_key)
        } else {
            Err(CryptoError::IdMismatch { expected: self.signed_pre_key.id, got: id })
        }
    }

    pub fn find_app_state_key(&self, key_id: &[u8]) -> Option<&AppStateSyncKey> {
        self.app_state_keys.iter().find(|k| k.key_id == key_id)
    }

    pub fn find_hash_state(&self, collection: &str) -> Option<&LTHashState> {
        self.hash_states.get(collection)
    }

    /// Removes and returns a one-time prekey. A second call with the same
    /// id fails — prekeys are consumed at most once.
    pub fn consume_pre_key(&mut self, id: u32) -> Result<PreKey, CryptoError> {
        let position = self.pre_keys.iter().position(|p| p.id == id).ok_or(CryptoError::PreKeyNotFound(id))?;
        Ok(self.pre_keys.remove(position))
    }

    pub fn bump_write_counter(&mut self) -> Result<u64, CryptoError> {
        let current = self.write_counter;
        self.write_counter = self.write_counter.checked_add(1).ok_or(CryptoError::CounterOverflow)?;
        Ok(current)
    }

    pub fn bump_read_counter(&mut self) -> Result<u64, CryptoError> {
        let current = self.read_counter;
        self.read_counter = self.read_counter.checked_add(1).ok_or(CryptoError::CounterOverflow)?;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_key_batch_matches_config() {
        let config = CryptoConfig::default();
        let state = KeysState::new_random(&config);
        assert_eq!(state.pre_keys.len(), config.pre_key_batch as usize);
    }

    #[test]
    fn consuming_a_prekey_twice_fails() {
        let mut state = KeysState::new_random(&CryptoConfig::default());
        let id = state.pre_keys[0].id;
        state.consume_pre_key(id).unwrap();
        assert!(matches!(state.consume_pre_key(id), Err(CryptoError::PreKeyNotFound(_))));
    }

    #[test]
    fn write_counter_is_monotonic() {
        let mut state = KeysState::new_random(&CryptoConfig::default());
        assert_eq!(state.bump_write_counter().unwrap(), 0);
        assert_eq!(state.bump_write_counter().unwrap(), 1);
    }

    #[test]
    fn counter_overflow_is_reported_not_wrapped() {
        let mut state = KeysState::new_random(&CryptoConfig::default());
        state.write_counter = u64::MAX;
        assert!(matches!(state.bump_write_counter(), Err(CryptoError::CounterOverflow)));
    }
}
