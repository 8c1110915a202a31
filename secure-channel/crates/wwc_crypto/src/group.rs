//! Sender-Key group ratchet (§4.4, C4).
//!
//! No DH step: every member of a group ratchets their own symmetric chain
//! forward and signs each frame, so recipients can verify authorship
//! without a pairwise session per sender per message.

use std::collections::{HashMap, VecDeque};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::primitives;
use crate::ratchet::kdf_ck;
use crate::store::key32_b64;

/// Broadcast once (over pairwise sessions, by the caller) when a sender
/// creates or rotates its chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderKeyDistributionMessage {
    pub key_id: u32,
    pub iteration: u32,
    #[serde(with = "key32_b64")]
    pub chain_key: [u8; 32],
    #[serde(with = "key32_b64")]
    pub signing_public: [u8; 32],
}

#[derive(Serialize, Deserialize)]
pub struct SenderSigningKey {
    #[serde(with = "key32_b64")]
    public: [u8; 32],
    #[serde(with = "opt_key32_b64", default)]
    private: Option<[u8; 32]>,
}

mod opt_key32_b64 {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<[u8; 32]>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&URL_SAFE_NO_PAD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 32]>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            Some(s) => {
                let bytes = URL_SAFE_NO_PAD.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }
}

impl SenderSigningKey {
    fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { public: signing_key.verifying_key().to_bytes(), private: Some(signing_key.to_bytes()) }
    }

    fn remote(public: [u8; 32]) -> Self {
        Self { public, private: None }
    }

    fn sign(&self, msg: &[u8]) -> Result<[u8; 64], CryptoError> {
        let private = self.private.ok_or_else(|| CryptoError::InvalidKey("no signing key for remote sender".into()))?;
        let signing_key = SigningKey::from_bytes(&private);
        Ok(primitives::ed25519_sign(&signing_key, msg))
    }

    fn verify(&self, msg: &[u8], sig: &[u8; 64]) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.public).map_err(|_| CryptoError::InvalidKey("bad sender public key".into()))?;
        primitives::ed25519_verify(&verifying_key, msg, sig)
    }
}

#[derive(Serialize, Deserialize)]
pub struct SenderKeyState {
    pub key_id: u32,
    chain_key: [u8; 32],
    pub counter: u32,
    signing_key: SenderSigningKey,
    message_keys: HashMap<u32, [u8; 32]>,
    max_skipped: u32,
}

impl SenderKeyState {
    pub fn new_local(key_id: u32, max_skipped: u32) -> Self {
        Self {
            key_id,
            chain_key: {
                let mut k = [0u8; 32];
                k.copy_from_slice(&primitives::rand_bytes(32));
                k
            },
            counter: 0,
            signing_key: SenderSigningKey::generate(),
            message_keys: HashMap::new(),
            max_skipped,
        }
    }

    pub fn from_distribution(msg: &SenderKeyDistributionMessage, max_skipped: u32) -> Self {
        Self {
            key_id: msg.key_id,
            chain_key: msg.chain_key,
            counter: msg.iteration,
            signing_key: SenderSigningKey::remote(msg.signing_public),
            message_keys: HashMap::new(),
            max_skipped,
        }
    }

    pub fn distribution(&self) -> SenderKeyDistributionMessage {
        SenderKeyDistributionMessage {
            key_id: self.key_id,
            iteration: self.counter,
            chain_key: self.chain_key,
            signing_public: self.signing_key.public,
        }
    }

    /// Advances the chain and returns `(iteration, message_key)`. The
    /// caller encrypts with `message_key` and then calls `sign` over the
    /// resulting ciphertext, since the signature covers the final frame.
    pub fn advance(&mut self) -> (u32, [u8; 32]) {
        let iteration = self.counter;
        let (next_ck, mk) = kdf_ck(&self.chain_key);
        self.chain_key = next_ck;
        self.counter += 1;
        (iteration, mk)
    }

    pub fn sign(&self, frame: &[u8]) -> Result<[u8; 64], CryptoError> {
        self.signing_key.sign(frame)
    }

    pub fn decrypt_step(&mut self, iteration: u32, frame: &[u8], signature: &[u8; 64]) -> Result<[u8; 32], CryptoError> {
        self.signing_key.verify(frame, signature)?;

        if let Some(mk) = self.message_keys.remove(&iteration) {
            return Ok(mk);
        }
        if iteration < self.counter {
            return Err(CryptoError::DuplicateMessage);
        }
        let skip_count = iteration - self.counter;
        if skip_count > self.max_skipped {
            return Err(CryptoError::TooManySkipped);
        }
        while self.counter < iteration {
            let (next_ck, mk) = kdf_ck(&self.chain_key);
            self.message_keys.insert(self.counter, mk);
            self.chain_key = next_ck;
            self.counter += 1;
        }
        let (next_ck, mk) = kdf_ck(&self.chain_key);
        self.chain_key = next_ck;
        self.counter += 1;
        Ok(mk)
    }
}

/// Up to `max_sender_key_states` retained states for one `SenderKeyName`,
/// most recently created first — generalised from a single-state record so
/// a rotated key doesn't strand in-flight messages encrypted under the
/// prior one.
#[derive(Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
    max_states: usize,
}

impl SenderKeyRecord {
    pub fn new(config: &CryptoConfig) -> Self {
        Self { states: VecDeque::new(), max_states: config.max_sender_key_states }
    }

    pub fn create_local(&mut self, config: &CryptoConfig) -> SenderKeyDistributionMessage {
        let key_id: u32 = {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&primitives::rand_bytes(4));
            u32::from_le_bytes(bytes)
        };
        let state = SenderKeyState::new_local(key_id, config.max_skipped_per_chain);
        let distribution = state.distribution();
        self.push(state);
        distribution
    }

    pub fn receive_distribution(&mut self, msg: &SenderKeyDistributionMessage, config: &CryptoConfig) {
        let state = SenderKeyState::from_distribution(msg, config.max_skipped_per_chain);
        self.push(state);
    }

    fn push(&mut self, state: SenderKeyState) {
        self.states.push_front(state);
        while self.states.len() > self.max_states {
            self.states.pop_back();
        }
    }

    pub fn by_key_id_mut(&mut self, key_id: u32) -> Option<&mut SenderKeyState> {
        self.states.iter_mut().find(|s| s.key_id == key_id)
    }

    pub fn current_mut(&mut self) -> Option<&mut SenderKeyState> {
        self.states.front_mut()
    }
}
