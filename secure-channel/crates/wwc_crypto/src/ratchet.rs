//! Double Ratchet chain stepping (§4.3, C3).
//!
//! This module owns only the KDF chain — root key, sending chain, and the
//! bounded set of retained receiving chains. Wire framing and the AEAD over
//! plaintext live in `engine`, the way the teacher keeps `dl_crypto::ratchet`
//! free of `dl_proto`'s envelope concerns.

use std::collections::{HashMap, VecDeque};

use hmac::Mac;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::primitives::{self, HmacSha256, KeyPair};
use crate::store::key32_b64;

/// Pending X3DH metadata carried until our first successful receive, so a
/// retransmitted `pkmsg` can be recognised instead of starting a second
/// parallel session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    #[serde(with = "key32_b64")]
    pub base_key: [u8; 32],
}

#[derive(Serialize, Deserialize)]
pub struct SendingChain {
    pub chain_key: Option<[u8; 32]>,
    pub counter: u32,
    #[serde(with = "key32_b64")]
    own_ratchet_priv: [u8; 32],
    #[serde(with = "key32_b64")]
    pub own_ratchet_pub: [u8; 32],
    #[serde(with = "key32_b64")]
    pub their_ratchet_pub: [u8; 32],
    pub previous_counter: u32,
}

impl SendingChain {
    fn own_ratchet_secret(&self) -> StaticSecret {
        StaticSecret::from(self.own_ratchet_priv)
    }
}

#[derive(Serialize, Deserialize)]
pub struct ReceivingChain {
    #[serde(with = "key32_b64")]
    pub their_ratchet_pub: [u8; 32],
    pub chain_key: [u8; 32],
    pub counter: u32,
    pub skipped_keys: HashMap<u32, [u8; 32]>,
}

/// A header describing which ratchet step produced a ciphertext frame.
#[derive(Debug, Clone)]
pub struct RatchetHeader {
    pub ratchet_pub: [u8; 32],
    pub counter: u32,
    pub previous_counter: u32,
}

#[derive(Serialize, Deserialize)]
pub struct PairwiseSession {
    pub root_key: [u8; 32],
    pub sending_chain: Option<SendingChain>,
    pub receiving_chains: VecDeque<ReceivingChain>,
    pub pending_prekey: Option<PendingPreKey>,
    pub registration_id: u32,
    pub their_identity: [u8; 32],
    max_skipped_per_chain: u32,
    max_skipped_total: u32,
    max_receive_chains: usize,
}

impl Drop for PairwiseSession {
    fn drop(&mut self) {
        self.root_key.zeroize();
        if let Some(chain) = &mut self.sending_chain {
            chain.own_ratchet_priv.zeroize();
            if let Some(ck) = &mut chain.chain_key {
                ck.zeroize();
            }
        }
        for chain in &mut self.receiving_chains {
            chain.chain_key.zeroize();
            for key in chain.skipped_keys.values_mut() {
                key.zeroize();
            }
        }
    }
}

impl PairwiseSession {
    /// Alice's side. `ephemeral` is the X3DH ephemeral key pair (`EK_a`),
    /// reused here as the first sending ratchet key — X3DH's third DH
    /// (`EK_a × SPK_b`) already performed the work a fresh ratchet step
    /// would otherwise redo, so `chain_key` from X3DH is used directly.
    pub fn init_alice(
        config: &CryptoConfig,
        root_key: [u8; 32],
        chain_key: [u8; 32],
        ephemeral: &KeyPair,
        their_signed_prekey_pub: X25519Public,
        registration_id: u32,
        their_identity: [u8; 32],
        pending_prekey: Option<PendingPreKey>,
    ) -> Self {
        Self {
            root_key,
            sending_chain: Some(SendingChain {
                chain_key: Some(chain_key),
                counter: 0,
                own_ratchet_priv: ephemeral.private.to_bytes(),
                own_ratchet_pub: *ephemeral.public.as_bytes(),
                their_ratchet_pub: *their_signed_prekey_pub.as_bytes(),
                previous_counter: 0,
            }),
            receiving_chains: VecDeque::new(),
            pending_prekey,
            registration_id,
            their_identity,
            max_skipped_per_chain: config.max_skipped_per_chain,
            max_skipped_total: config.max_skipped_total,
            max_receive_chains: config.max_receive_chains,
        }
    }

    /// Bob's side. `their_ratchet_pub` is Alice's `EK_a`; the chain key
    /// arrives straight from X3DH and is immediately usable for receiving.
    pub fn init_bob(
        config: &CryptoConfig,
        root_key: [u8; 32],
        chain_key: [u8; 32],
        my_signed_prekey: &KeyPair,
        their_ratchet_pub: X25519Public,
        registration_id: u32,
        their_identity: [u8; 32],
    ) -> Self {
        let mut receiving_chains = VecDeque::new();
        receiving_chains.push_front(ReceivingChain {
            their_ratchet_pub: *their_ratchet_pub.as_bytes(),
            chain_key,
            counter: 0,
            skipped_keys: HashMap::new(),
        });
        Self {
            root_key,
            sending_chain: Some(SendingChain {
                chain_key: None,
                counter: 0,
                own_ratchet_priv: my_signed_prekey.private.to_bytes(),
                own_ratchet_pub: *my_signed_prekey.public.as_bytes(),
                their_ratchet_pub: *their_ratchet_pub.as_bytes(),
                previous_counter: 0,
            }),
            receiving_chains,
            pending_prekey: None,
            registration_id,
            their_identity,
            max_skipped_per_chain: config.max_skipped_per_chain,
            max_skipped_total: config.max_skipped_total,
            max_receive_chains: config.max_receive_chains,
        }
    }

    /// Derives the next message key on the sending chain, ratcheting the
    /// DH step first if no sending chain key has been established yet
    /// (Bob's state right after `init_bob`, before his first send).
    pub fn encrypt_step(&mut self) -> Result<(RatchetHeader, [u8; 32]), CryptoError> {
        if self.sending_chain.as_ref().and_then(|c| c.chain_key).is_none() {
            self.ratchet_sending_chain()?;
        }
        let chain = self.sending_chain.as_mut().expect("sending chain established above");
        let ck = chain.chain_key.expect("chain key established above");
        let (next_ck, mk) = kdf_ck(&ck);
        chain.chain_key = Some(next_ck);
        let header = RatchetHeader {
            ratchet_pub: chain.own_ratchet_pub,
            counter: chain.counter,
            previous_counter: chain.previous_counter,
        };
        chain.counter += 1;
        Ok((header, mk))
    }

    fn ratchet_sending_chain(&mut self) -> Result<(), CryptoError> {
        let chain = self.sending_chain.as_ref().ok_or(CryptoError::SessionNotInitialised)?;
        let their_pub = X25519Public::from(chain.their_ratchet_pub);
        let old_counter = chain.counter;
        let new_own = KeyPair::generate();
        let dh = primitives::x25519_agree(&new_own.private, &their_pub);
        let (new_root, new_ck) = kdf_rk(&self.root_key, &dh);
        self.root_key = new_root;
        self.sending_chain = Some(SendingChain {
            chain_key: Some(new_ck),
            counter: 0,
            own_ratchet_priv: new_own.private.to_bytes(),
            own_ratchet_pub: *new_own.public.as_bytes(),
            their_ratchet_pub: chain.their_ratchet_pub,
            previous_counter: old_counter,
        });
        Ok(())
    }

    /// Consumes an incoming header, performing a DH ratchet step and/or
    /// skipped-key archival as needed, and returns the message key.
    pub fn decrypt_step(&mut self, header: &RatchetHeader) -> Result<[u8; 32], CryptoError> {
        if let Some(index) = self.receiving_chains.iter().position(|c| c.their_ratchet_pub == header.ratchet_pub) {
            return self.advance_existing_chain(index, header.counter);
        }

        if let Some(front) = self.receiving_chains.front_mut() {
            skip_into_chain(front, header.previous_counter, self.max_skipped_per_chain)?;
        }

        let sending = self.sending_chain.as_ref().ok_or(CryptoError::SessionNotInitialised)?;
        let dh_priv = sending.own_ratchet_secret();
        let their_new_pub = X25519Public::from(header.ratchet_pub);
        let dh = primitives::x25519_agree(&dh_priv, &their_new_pub);
        let (root_after_recv, recv_ck) = kdf_rk(&self.root_key, &dh);
        self.root_key = root_after_recv;

        self.receiving_chains.push_front(ReceivingChain {
            their_ratchet_pub: header.ratchet_pub,
            chain_key: recv_ck,
            counter: 0,
            skipped_keys: HashMap::new(),
        });
        self.evict_receiving_chains_over_cap();

        let old_send_counter = sending.counter;
        let new_own = KeyPair::generate();
        let dh2 = primitives::x25519_agree(&new_own.private, &their_new_pub);
        let (root_after_send, send_ck) = kdf_rk(&self.root_key, &dh2);
        self.root_key = root_after_send;
        self.sending_chain = Some(SendingChain {
            chain_key: Some(send_ck),
            counter: 0,
            own_ratchet_priv: new_own.private.to_bytes(),
            own_ratchet_pub: *new_own.public.as_bytes(),
            their_ratchet_pub: header.ratchet_pub,
            previous_counter: old_send_counter,
        });

        self.advance_existing_chain(0, header.counter)
    }

    fn advance_existing_chain(&mut self, index: usize, counter: u32) -> Result<[u8; 32], CryptoError> {
        {
            let chain = &mut self.receiving_chains[index];
            if let Some(mk) = chain.skipped_keys.remove(&counter) {
                return Ok(mk);
            }
            if counter < chain.counter {
                return Err(CryptoError::DuplicateMessage);
            }
        }
        skip_into_chain(&mut self.receiving_chains[index], counter, self.max_skipped_per_chain)?;
        let chain = &mut self.receiving_chains[index];
        let (next_ck, mk) = kdf_ck(&chain.chain_key);
        chain.chain_key = next_ck;
        chain.counter += 1;
        self.enforce_total_skip_cap();
        Ok(mk)
    }

    fn evict_receiving_chains_over_cap(&mut self) {
        while self.receiving_chains.len() > self.max_receive_chains {
            self.receiving_chains.pop_back();
        }
    }

    fn enforce_total_skip_cap(&mut self) {
        loop {
            let total: usize = self.receiving_chains.iter().map(|c| c.skipped_keys.len()).sum();
            if total <= self.max_skipped_total as usize {
                break;
            }
            let Some(chain) = self.receiving_chains.back_mut() else { break };
            if let Some(&oldest) = chain.skipped_keys.keys().min() {
                chain.skipped_keys.remove(&oldest);
            } else if self.receiving_chains.len() > 1 {
                self.receiving_chains.pop_back();
            } else {
                break;
            }
        }
    }
}

fn skip_into_chain(chain: &mut ReceivingChain, until: u32, max_skipped_per_chain: u32) -> Result<(), CryptoError> {
    if until < chain.counter {
        return Ok(());
    }
    let skip_count = until - chain.counter;
    if skip_count > max_skipped_per_chain {
        return Err(CryptoError::TooManySkipped);
    }
    while chain.counter < until {
        let (next_ck, mk) = kdf_ck(&chain.chain_key);
        chain.skipped_keys.insert(chain.counter, mk);
        chain.chain_key = next_ck;
        chain.counter += 1;
    }
    Ok(())
}

/// KDF_RK: root-key ratchet step, HKDF-SHA256 keyed by the prior root key.
fn kdf_rk(root_key: &[u8; 32], dh_output: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let mut okm = [0u8; 64];
    primitives::hkdf(dh_output, Some(root_key), b"WhisperRatchet", &mut okm).expect("64-byte HKDF output is valid");
    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..]);
    (new_root, chain_key)
}

/// KDF_CK: symmetric chain step. `chain_key' = HMAC(chain_key, 0x02)`;
/// `message_key = HMAC(chain_key, 0x01)`.
pub(crate) fn kdf_ck(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let mut mac = HmacSha256::new_from_slice(chain_key).expect("HMAC accepts any key length");
    mac.update(&[0x02]);
    let next_ck: [u8; 32] = mac.finalize().into_bytes().into();

    let mut mac = HmacSha256::new_from_slice(chain_key).expect("HMAC accepts any key length");
    mac.update(&[0x01]);
    let mk: [u8; 32] = mac.finalize().into_bytes().into();

    (next_ck, mk)
}
