//! App-state synchronization: LTHash integrity and patch/snapshot
//! verification (§4.5, C5).
//!
//! A patch is applied to a scratch copy of the collection's `LTHashState`
//! first; only if every mutation's MAC checks out *and* the patch/snapshot
//! MACs check out against the resulting hash is the scratch copy swapped
//! in. A single bad mutation anywhere in the patch leaves the prior state
//! byte-for-byte untouched.

use std::collections::{BTreeMap, VecDeque};

use wwc_proto::{AppStateMutation, AppStatePatch, AppStateSnapshot, MutationOperation};

use crate::error::CryptoError;
use crate::keys_state::{AppStateSyncKey, LTHashState};
use crate::primitives;

pub struct MutationKeys {
    pub index_key: [u8; 32],
    pub value_encryption_key: [u8; 32],
    pub value_mac_key: [u8; 32],
    pub snapshot_mac_key: [u8; 32],
    pub patch_mac_key: [u8; 32],
}

pub fn expand_mutation_keys(key: &AppStateSyncKey) -> Result<MutationKeys, CryptoError> {
    let mut okm = [0u8; 160];
    primitives::hkdf(&key.key_data, None, b"WhatsApp Mutation Keys", &mut okm)?;
    let mut take = |range: std::ops::Range<usize>| -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&okm[range]);
        out
    };
    Ok(MutationKeys {
        index_key: take(0..32),
        value_encryption_key: take(32..64),
        value_mac_key: take(64..96),
        snapshot_mac_key: take(96..128),
        patch_mac_key: take(128..160),
    })
}

/// Maps a 32-byte value MAC to a 128-byte LTHash "point" via HKDF
/// expansion. The hash group operation is componentwise addition modulo
/// 2^16 over the resulting sixty-four 16-bit limbs (see DESIGN.md for why
/// this tabulation was chosen over deriving it from the mutation bytes
/// directly: it is the only construction in this crate consistent with
/// both the commutative/associative group-hash requirement and the
/// "subset sum" terminology the spec uses without fixing a concrete
/// algorithm).
fn point_from_value_mac(value_mac: &[u8]) -> [u8; 128] {
    let mut point = [0u8; 128];
    primitives::hkdf(value_mac, None, b"LTHash Point v1", &mut point).expect("128-byte HKDF output is valid");
    point
}

fn add_assign(hash: &mut [u8; 128], point: &[u8; 128]) {
    for i in (0..128).step_by(2) {
        let h = u16::from_le_bytes([hash[i], hash[i + 1]]);
        let p = u16::from_le_bytes([point[i], point[i + 1]]);
        let sum = h.wrapping_add(p).to_le_bytes();
        hash[i] = sum[0];
        hash[i + 1] = sum[1];
    }
}

fn sub_assign(hash: &mut [u8; 128], point: &[u8; 128]) {
    for i in (0..128).step_by(2) {
        let h = u16::from_le_bytes([hash[i], hash[i + 1]]);
        let p = u16::from_le_bytes([point[i], point[i + 1]]);
        let diff = h.wrapping_sub(p).to_le_bytes();
        hash[i] = diff[0];
        hash[i + 1] = diff[1];
    }
}

fn decrypt_and_verify_value(
    keys: &MutationKeys,
    mutation: &AppStateMutation,
) -> Result<Vec<u8>, CryptoError> {
    let expected_index_mac = primitives::hmac_sha256(&keys.index_key, &mutation.action_index);
    if expected_index_mac != mutation.index_mac.as_slice() {
        return Err(CryptoError::MacMismatch);
    }

    let op_byte = match mutation.operation {
        MutationOperation::Set => 0x01u8,
        MutationOperation::Remove => 0x02u8,
    };
    let mut mac_input = vec![op_byte];
    mac_input.extend_from_slice(&mutation.index_mac);
    mac_input.extend_from_slice(&mutation.encrypted_action);
    let expected_value_mac = primitives::hmac_sha256(&keys.value_mac_key, &mac_input);
    if expected_value_mac != mutation.value_mac.as_slice() {
        return Err(CryptoError::MacMismatch);
    }

    primitives::aes_cbc_decrypt(&keys.value_encryption_key, &mutation.encrypted_action)
}

/// Applies every mutation in `patch` to a scratch copy of `state`, verifies
/// the resulting patch and snapshot MACs, and returns the new state only
/// on full success. `key` must be the `AppStateSyncKey` named by the
/// patch's mutations (this crate assumes one key per patch; see
/// DESIGN.md).
pub fn apply_patch(
    state: &LTHashState,
    patch: &AppStatePatch,
    key: &AppStateSyncKey,
) -> Result<LTHashState, CryptoError> {
    if patch.version != state.version + 1 {
        return Err(CryptoError::VersionGap { expected: state.version + 1, got: patch.version });
    }
    let span = tracing::debug_span!("appstate.apply_patch", collection = %patch.collection_name, version = patch.version);
    let _enter = span.enter();

    let keys = expand_mutation_keys(key)?;
    let mut scratch = state.clone();
    let mut value_macs_concat = Vec::new();

    for mutation in &patch.mutations {
        if let Err(err) = decrypt_and_verify_value(&keys, mutation) {
            tracing::warn!(collection = %patch.collection_name, version = patch.version, %err, "app-state mutation rejected");
            return Err(err);
        }

        let index_hex = hex::encode(&mutation.index_mac);
        if let Some(old_value_mac) = scratch.index_value_map.get(&index_hex) {
            sub_assign(&mut scratch.hash, &point_from_value_mac(old_value_mac));
        }
        match mutation.operation {
            MutationOperation::Set => {
                add_assign(&mut scratch.hash, &point_from_value_mac(&mutation.value_mac));
                scratch.index_value_map.insert(index_hex.clone(), mutation.value_mac.clone());
            }
            MutationOperation::Remove => {
                scratch.index_value_map.remove(&index_hex);
            }
        }
        scratch.mutation_macs.insert(index_hex, mutation.value_mac.clone());
        value_macs_concat.extend_from_slice(&mutation.value_mac);
    }

    let mut patch_mac_input = value_macs_concat;
    patch_mac_input.extend_from_slice(&patch.version.to_le_bytes());
    patch_mac_input.extend_from_slice(&key.key_id);
    let expected_patch_mac = primitives::hmac_sha256(&keys.patch_mac_key, &patch_mac_input);
    if expected_patch_mac != patch.patch_mac.as_slice() {
        tracing::warn!(collection = %patch.collection_name, version = patch.version, "patch MAC mismatch, discarding scratch state");
        return Err(CryptoError::InvalidPatchMac);
    }

    let mut snapshot_mac_input = scratch.hash.to_vec();
    snapshot_mac_input.extend_from_slice(&patch.version.to_le_bytes());
    snapshot_mac_input.extend_from_slice(patch.collection_name.as_bytes());
    let expected_snapshot_mac = primitives::hmac_sha256(&keys.snapshot_mac_key, &snapshot_mac_input);
    if expected_snapshot_mac != patch.snapshot_mac.as_slice() {
        tracing::warn!(collection = %patch.collection_name, version = patch.version, "snapshot MAC mismatch, discarding scratch state");
        return Err(CryptoError::InvalidSnapshotMac);
    }

    scratch.version = patch.version;
    Ok(scratch)
}

/// Decodes and verifies a compacted full-state snapshot, replacing
/// `LTHashState` wholesale rather than folding one mutation at a time. Used
/// when the caller followed `patch.external_blob_reference` instead of
/// replaying every intervening patch.
pub fn apply_snapshot(snapshot: &AppStateSnapshot, key: &AppStateSyncKey) -> Result<LTHashState, CryptoError> {
    let span = tracing::debug_span!("appstate.apply_snapshot", collection = %snapshot.collection_name, version = snapshot.version);
    let _enter = span.enter();

    let keys = expand_mutation_keys(key)?;
    let mut state = LTHashState::default();

    for record in &snapshot.records {
        decrypt_and_verify_value(&keys, record)?;
        let index_hex = hex::encode(&record.index_mac);
        match record.operation {
            MutationOperation::Set => {
                add_assign(&mut state.hash, &point_from_value_mac(&record.value_mac));
                state.index_value_map.insert(index_hex.clone(), record.value_mac.clone());
            }
            MutationOperation::Remove => {
                state.index_value_map.remove(&index_hex);
            }
        }
        state.mutation_macs.insert(index_hex, record.value_mac.clone());
    }

    let mut snapshot_mac_input = state.hash.to_vec();
    snapshot_mac_input.extend_from_slice(&snapshot.version.to_le_bytes());
    snapshot_mac_input.extend_from_slice(snapshot.collection_name.as_bytes());
    let expected_snapshot_mac = primitives::hmac_sha256(&keys.snapshot_mac_key, &snapshot_mac_input);
    if expected_snapshot_mac != snapshot.snapshot_mac.as_slice() {
        tracing::warn!(collection = %snapshot.collection_name, version = snapshot.version, "snapshot MAC mismatch, rejecting blob");
        return Err(CryptoError::InvalidSnapshotMac);
    }

    state.version = snapshot.version;
    Ok(state)
}

/// Buffers patches that arrived before the `AppStateSyncKey` they were
/// encrypted under, keyed by `key_id`, and drains them in version order once
/// the key is inserted into `KeysState::app_state_keys`. Mirrors the
/// dispatcher-owned retry the spec describes — this crate only provides the
/// bounded buffer, not the fetch/retry loop itself.
#[derive(Default)]
pub struct PendingPatchQueue {
    by_key_id: BTreeMap<Vec<u8>, VecDeque<AppStatePatch>>,
}

impl PendingPatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stashes a patch that failed with `MissingAppStateKey(key_id)`.
    pub fn buffer(&mut self, key_id: Vec<u8>, patch: AppStatePatch) {
        let queue = self.by_key_id.entry(key_id).or_default();
        let pos = queue.partition_point(|p| p.version <= patch.version);
        queue.insert(pos, patch);
    }

    /// Removes and returns every buffered patch for `key_id`, oldest version
    /// first, so the caller can replay them once the key has arrived.
    pub fn drain(&mut self, key_id: &[u8]) -> Vec<AppStatePatch> {
        self.by_key_id.remove(key_id).map(|q| q.into_iter().collect()).unwrap_or_default()
    }

    pub fn pending_key_ids(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.by_key_id.keys()
    }
}

pub(crate) mod lthash_b64 {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 128], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 128], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = URL_SAFE_NO_PAD.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 128 bytes"))
    }
}
