//! Cross-module integration tests: a full pairwise handshake and message
//! exchange, a group broadcast, and an app-state sync flow that hits the
//! dead-letter path. Each of these exercises several modules together in
//! a way no single file's `#[cfg(test)]` block can.

use wwc_crypto::appstate::{self, PendingPatchQueue};
use wwc_crypto::config::CryptoConfig;
use wwc_crypto::engine;
use wwc_crypto::group::SenderKeyRecord;
use wwc_crypto::keys_state::{AppStateSyncKey, KeysState, LTHashState};
use wwc_crypto::x3dh::PrekeyBundle;
use wwc_proto::{MessageKind, SessionAddress};

fn bundle_for(state: &KeysState, registration_id: u32) -> PrekeyBundle {
    let pre_key = state.pre_keys.first().expect("at least one prekey");
    PrekeyBundle {
        registration_id,
        identity_key: state.identity_key_pair.public_bytes(),
        signed_pre_key_id: state.signed_pre_key.id,
        signed_pre_key: state.signed_pre_key.public,
        signed_pre_key_signature: state.signed_pre_key.signature,
        one_time_pre_key_id: Some(pre_key.id),
        one_time_pre_key: Some(pre_key.public),
    }
}

#[test]
fn alice_and_bob_exchange_messages_across_a_prekey_bootstrap() {
    let config = CryptoConfig::default();
    let mut alice = KeysState::new_random(&config);
    let mut bob = KeysState::new_random(&config);

    let bob_address = SessionAddress::new("bob", 0);
    let alice_address = SessionAddress::new("alice", 0);

    let bundle = bundle_for(&bob, 7);
    engine::establish_outbound_session(&mut alice, &config, &bob_address, 1, &bundle).unwrap();

    let (kind, wire) = engine::process_outbound(&mut alice, &bob_address, b"hello bob").unwrap();
    assert_eq!(kind, MessageKind::PkMsg);

    let plaintext = engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).unwrap();
    assert_eq!(plaintext, b"hello bob");

    let (kind, wire) = engine::process_outbound(&mut bob, &alice_address, b"hi alice").unwrap();
    assert_eq!(kind, MessageKind::Msg);
    let plaintext = engine::process_inbound(&mut alice, &config, &bob_address, kind, &wire).unwrap();
    assert_eq!(plaintext, b"hi alice");
}

#[test]
fn replaying_a_message_the_receiver_already_consumed_fails() {
    let config = CryptoConfig::default();
    let mut alice = KeysState::new_random(&config);
    let mut bob = KeysState::new_random(&config);
    let bob_address = SessionAddress::new("bob", 0);
    let alice_address = SessionAddress::new("alice", 0);

    let bundle = bundle_for(&bob, 7);
    engine::establish_outbound_session(&mut alice, &config, &bob_address, 1, &bundle).unwrap();

    let (kind, wire) = engine::process_outbound(&mut alice, &bob_address, b"once only").unwrap();
    engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).unwrap();

    assert!(engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).is_err());
}

#[test]
fn untrusted_identity_change_is_rejected() {
    let config = CryptoConfig::default();
    let mut alice = KeysState::new_random(&config);
    let mut impostor = KeysState::new_random(&config);
    let mut bob = KeysState::new_random(&config);
    let bob_address = SessionAddress::new("bob", 0);
    let alice_address = SessionAddress::new("alice", 0);

    let bundle = bundle_for(&bob, 7);
    engine::establish_outbound_session(&mut alice, &config, &bob_address, 1, &bundle).unwrap();
    let (kind, wire) = engine::process_outbound(&mut alice, &bob_address, b"first contact").unwrap();
    engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).unwrap();

    engine::establish_outbound_session(&mut impostor, &config, &bob_address, 1, &bundle).unwrap();
    let (kind, wire) = engine::process_outbound(&mut impostor, &bob_address, b"forged").unwrap();
    assert!(engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).is_err());
}

#[test]
fn group_broadcast_reaches_every_member_including_out_of_order() {
    let config = CryptoConfig::default();
    let mut sender = SenderKeyRecord::new(&config);

    let frame_one = engine::group_encrypt(&mut sender, &config, b"announcement one").unwrap();
    let distribution = sender.current_mut().unwrap().distribution();
    let frame_two = engine::group_encrypt(&mut sender, &config, b"announcement two").unwrap();

    let mut member_a = SenderKeyRecord::new(&config);
    member_a.receive_distribution(&distribution, &config);
    let mut member_b = SenderKeyRecord::new(&config);
    member_b.receive_distribution(&distribution, &config);

    assert_eq!(engine::group_decrypt(&mut member_a, &frame_two).unwrap(), b"announcement two");
    assert_eq!(engine::group_decrypt(&mut member_a, &frame_one).unwrap(), b"announcement one");
    assert_eq!(engine::group_decrypt(&mut member_b, &frame_one).unwrap(), b"announcement one");
}

fn sync_key() -> AppStateSyncKey {
    AppStateSyncKey { key_data: [5u8; 32], key_id: vec![9, 9], fingerprint: vec![], timestamp: chrono::Utc::now() }
}

#[test]
fn app_state_patch_arriving_before_its_key_is_buffered_then_replayed() {
    // Build a valid patch against key `k`, but simulate the caller not
    // having `k` locally yet by routing it through the dead-letter queue
    // before retrying once the key "arrives".
    let key = sync_key();
    let mutation_keys = appstate::expand_mutation_keys(&key).unwrap();

    let action_index = b"contact/42";
    let index_mac = hmac_index(&mutation_keys, action_index);
    let encrypted_action = aes_encrypt(&mutation_keys, b"display name");
    let value_mac = hmac_value(&mutation_keys, &index_mac, &encrypted_action);

    let mutation = wwc_proto::AppStateMutation {
        operation: wwc_proto::MutationOperation::Set,
        index_mac: index_mac.clone(),
        value_mac: value_mac.clone(),
        key_id: key.key_id.clone(),
        encrypted_action,
        action_index: action_index.to_vec(),
    };

    let version = 1u64;
    let mut patch_mac_input = value_mac.clone();
    patch_mac_input.extend_from_slice(&version.to_le_bytes());
    patch_mac_input.extend_from_slice(&key.key_id);
    let patch_mac = hmac(&mutation_keys.patch_mac_key, &patch_mac_input);

    let mut hash = [0u8; 128];
    add_point(&mut hash, &value_mac);
    let mut snapshot_mac_input = hash.to_vec();
    snapshot_mac_input.extend_from_slice(&version.to_le_bytes());
    snapshot_mac_input.extend_from_slice(b"contacts");
    let snapshot_mac = hmac(&mutation_keys.snapshot_mac_key, &snapshot_mac_input);

    let patch = wwc_proto::AppStatePatch {
        collection_name: "contacts".into(),
        version,
        mutations: vec![mutation],
        patch_mac,
        snapshot_mac,
        external_blob_reference: None,
    };

    let mut queue = PendingPatchQueue::new();
    queue.buffer(key.key_id.clone(), patch.clone());
    assert_eq!(queue.pending_key_ids().count(), 1);

    let drained = queue.drain(&key.key_id);
    assert_eq!(drained.len(), 1);

    let state = LTHashState::default();
    let applied = appstate::apply_patch(&state, &drained[0], &key).unwrap();
    assert_eq!(applied.version, 1);
    assert_eq!(applied.index_value_map.len(), 1);
}

// --- local helpers building one valid patch's MACs from the crate's own
// public key-expansion and primitives, so this test isn't coupled to
// appstate's private field layout.

fn hmac_index(keys: &appstate::MutationKeys, action_index: &[u8]) -> Vec<u8> {
    wwc_crypto::primitives::hmac_sha256(&keys.index_key, action_index).to_vec()
}

fn aes_encrypt(keys: &appstate::MutationKeys, plaintext: &[u8]) -> Vec<u8> {
    wwc_crypto::primitives::aes_cbc_encrypt(&keys.value_encryption_key, &[3u8; 16], plaintext)
}

fn hmac_value(keys: &appstate::MutationKeys, index_mac: &[u8], encrypted_action: &[u8]) -> Vec<u8> {
    let mut input = vec![0x01u8];
    input.extend_from_slice(index_mac);
    input.extend_from_slice(encrypted_action);
    wwc_crypto::primitives::hmac_sha256(&keys.value_mac_key, &input).to_vec()
}

fn hmac(key: &[u8; 32], input: &[u8]) -> Vec<u8> {
    wwc_crypto::primitives::hmac_sha256(key, input).to_vec()
}

fn add_point(hash: &mut [u8; 128], value_mac: &[u8]) {
    let mut point = [0u8; 128];
    wwc_crypto::primitives::hkdf(value_mac, None, b"LTHash Point v1", &mut point).unwrap();
    for i in (0..128).step_by(2) {
        let h = u16::from_le_bytes([hash[i], hash[i + 1]]);
        let p = u16::from_le_bytes([point[i], point[i + 1]]);
        let sum = h.wrapping_add(p).to_le_bytes();
        hash[i] = sum[0];
        hash[i + 1] = sum[1];
    }
}

#[test]
fn pre_key_batch_is_consumed_one_per_bootstrap() {
    let config = CryptoConfig::default();
    let state = KeysState::new_random(&config);
    let before = state.pre_keys.len();
    assert_eq!(before, config.pre_key_batch as usize);

    let mut bob = KeysState::new_random(&config);
    let mut alice = KeysState::new_random(&config);
    let bundle = bundle_for(&bob, 3);
    let alice_address = SessionAddress::new("alice", 0);
    engine::establish_outbound_session(&mut alice, &config, &SessionAddress::new("bob", 0), 1, &bundle).unwrap();
    let (kind, wire) = engine::process_outbound(&mut alice, &SessionAddress::new("bob", 0), b"hi").unwrap();
    engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).unwrap();

    assert_eq!(bob.pre_keys.len(), before - 1);
}
