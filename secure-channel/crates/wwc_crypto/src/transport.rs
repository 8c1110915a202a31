//! Transport-level AEAD (§6): a counter-nonce AES-GCM wrapper used to
//! protect frames exchanged before any pairwise session exists yet (the
//! pairing handshake itself, and housekeeping traffic). Pairwise/group
//! message content goes through `engine` instead.

use crate::error::CryptoError;
use crate::keys_state::KeysState;
use crate::primitives;

fn transport_key(state: &KeysState) -> [u8; 32] {
    let mut key = [0u8; 32];
    primitives::hkdf(state.identity_key_pair.secret_bytes(), Some(&state.companion_adv_key), b"transport-v1", &mut key)
        .expect("32-byte HKDF output is valid");
    key
}

fn nonce_from_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

pub fn encrypt_transport(state: &mut KeysState, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = transport_key(state);
    let counter = state.bump_write_counter()?;
    primitives::aes_gcm_encrypt(&key, &nonce_from_counter(counter), plaintext, ad)
}

pub fn decrypt_transport(state: &mut KeysState, ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = transport_key(state);
    let counter = state.bump_read_counter()?;
    primitives::aes_gcm_decrypt(&key, &nonce_from_counter(counter), ciphertext, ad)
}
