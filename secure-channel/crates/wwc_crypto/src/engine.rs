//! Dispatcher-facing entry points tying X3DH, the Double Ratchet, and the
//! Sender-Key ratchet to the wire types in `wwc_proto` (§6).

use wwc_proto::{
    session::RATCHET_HEADER_VERSION, MessageKind, PreKeyWhisperMessage, SenderKeyMessage, SessionAddress, WhisperMessage,
};

use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::group::SenderKeyRecord;
use crate::keys_state::KeysState;
use crate::primitives::{self, KeyPair};
use crate::ratchet::{PairwiseSession, PendingPreKey, RatchetHeader};
use crate::x3dh::{self, PrekeyBundle, X3dhHeader};

const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";
const GROUP_KEYS_INFO: &[u8] = b"WhisperGroup";

struct DerivedKeys {
    aes_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
}

fn derive_message_keys(message_key: &[u8; 32]) -> Result<DerivedKeys, CryptoError> {
    let mut okm = [0u8; 80];
    primitives::hkdf(message_key, Some(&[0u8; 32]), MESSAGE_KEYS_INFO, &mut okm)?;
    let mut aes_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    let mut iv = [0u8; 16];
    aes_key.copy_from_slice(&okm[..32]);
    mac_key.copy_from_slice(&okm[32..64]);
    iv.copy_from_slice(&okm[64..]);
    Ok(DerivedKeys { aes_key, mac_key, iv })
}

fn frame_bytes(ratchet_key: &[u8; 32], counter: u32, previous_counter: u32, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 4 + 4 + ciphertext.len());
    out.extend_from_slice(ratchet_key);
    out.extend_from_slice(&counter.to_le_bytes());
    out.extend_from_slice(&previous_counter.to_le_bytes());
    out.extend_from_slice(ciphertext);
    out
}

fn frame_mac(mac_key: &[u8; 32], sender_identity: &[u8; 32], receiver_identity: &[u8; 32], frame: &[u8]) -> [u8; 8] {
    let mut input = sender_identity.to_vec();
    input.extend_from_slice(receiver_identity);
    input.extend_from_slice(frame);
    let full = primitives::hmac_sha256(mac_key, &input);
    let mut truncated = [0u8; 8];
    truncated.copy_from_slice(&full[..8]);
    truncated
}

/// Starts a session as the initiator from an already-fetched prekey
/// bundle. Overwrites any prior session for `to`.
pub fn establish_outbound_session(
    state: &mut KeysState,
    config: &CryptoConfig,
    to: &SessionAddress,
    my_registration_id: u32,
    bundle: &PrekeyBundle,
) -> Result<(), CryptoError> {
    let result = x3dh::initiate(my_registration_id, &state.identity_key_pair, bundle)?;
    let ephemeral = KeyPair::from_private(result.ephemeral_private.clone());
    let session = PairwiseSession::init_alice(
        config,
        result.root_key,
        result.chain_key,
        &ephemeral,
        bundle.signed_pre_key.into(),
        my_registration_id,
        bundle.identity_key,
        Some(PendingPreKey {
            pre_key_id: bundle.one_time_pre_key_id,
            signed_pre_key_id: bundle.signed_pre_key_id,
            base_key: *ephemeral.public.as_bytes(),
        }),
    );
    state.sessions.insert(to.clone(), session);
    Ok(())
}

fn establish_inbound_session(
    state: &mut KeysState,
    config: &CryptoConfig,
    from: &SessionAddress,
    header: &X3dhHeader,
) -> Result<(), CryptoError> {
    if let Some(existing) = state.trusted_identities.get(from) {
        if *existing != header.identity_key {
            return Err(CryptoError::UntrustedIdentity);
        }
    } else {
        state.trusted_identities.insert(from.clone(), header.identity_key);
    }

    let signed_pre_key = state.signed_pre_key_by_id(header.signed_pre_key_id)?.clone();
    let one_time_pre_key = match header.one_time_pre_key_id {
        Some(id) => Some(state.consume_pre_key(id)?),
        None => None,
    };

    let (root_key, chain_key) = x3dh::respond(
        &state.identity_key_pair,
        &signed_pre_key.private_secret(),
        one_time_pre_key.as_ref().map(|p| p.private_secret()).as_ref(),
        header,
    )?;

    let session = PairwiseSession::init_bob(
        config,
        root_key,
        chain_key,
        &KeyPair::from_private(signed_pre_key.private_secret()),
        header.base_key.into(),
        header.registration_id,
        header.identity_key,
    );
    state.sessions.insert(from.clone(), session);
    Ok(())
}

/// Encrypts `plaintext` for `to`, returning the frame kind the dispatcher
/// should tag it with on the wire.
pub fn process_outbound(
    state: &mut KeysState,
    to: &SessionAddress,
    plaintext: &[u8],
) -> Result<(MessageKind, Vec<u8>), CryptoError> {
    let my_identity = state.identity_key_pair.public_bytes();
    let session = state.find_session_mut(to).ok_or(CryptoError::NoValidSessions)?;
    let their_identity = session.their_identity;
    let pending = session.pending_prekey.clone();
    let registration_id = session.registration_id;

    let (header, message_key) = session.encrypt_step()?;
    let keys = derive_message_keys(&message_key)?;
    let ciphertext = primitives::aes_cbc_encrypt(&keys.aes_key, &keys.iv, plaintext);
    let frame = frame_bytes(&header.ratchet_pub, header.counter, header.previous_counter, &ciphertext);
    let mac = frame_mac(&keys.mac_key, &my_identity, &their_identity, &frame);

    let whisper_message = WhisperMessage {
        version: RATCHET_HEADER_VERSION,
        ratchet_key: header.ratchet_pub.to_vec(),
        counter: header.counter,
        previous_counter: header.previous_counter,
        ciphertext,
        mac: mac.to_vec(),
    };

    match pending {
        Some(pending_prekey) => {
            let frame = PreKeyWhisperMessage {
                version: RATCHET_HEADER_VERSION,
                registration_id,
                pre_key_id: pending_prekey.pre_key_id,
                signed_pre_key_id: pending_prekey.signed_pre_key_id,
                base_key: pending_prekey.base_key.to_vec(),
                identity_key: my_identity.to_vec(),
                message: whisper_message,
            };
            Ok((MessageKind::PkMsg, serde_json::to_vec(&frame)?))
        }
        None => Ok((MessageKind::Msg, serde_json::to_vec(&whisper_message)?)),
    }
}

fn decrypt_whisper(
    session: &mut PairwiseSession,
    my_identity: &[u8; 32],
    message: &WhisperMessage,
) -> Result<Vec<u8>, CryptoError> {
    if message.version != RATCHET_HEADER_VERSION {
        return Err(CryptoError::InvalidVersion);
    }
    let ratchet_key: [u8; 32] =
        message.ratchet_key.clone().try_into().map_err(|_| CryptoError::InvalidKey("bad ratchet key length".into()))?;
    let header = RatchetHeader { ratchet_pub: ratchet_key, counter: message.counter, previous_counter: message.previous_counter };

    let their_identity = session.their_identity;
    let message_key = session.decrypt_step(&header)?;
    let keys = derive_message_keys(&message_key)?;

    let frame = frame_bytes(&ratchet_key, message.counter, message.previous_counter, &message.ciphertext);
    let expected_mac = frame_mac(&keys.mac_key, &their_identity, my_identity, &frame);
    if expected_mac.as_slice() != message.mac.as_slice() {
        return Err(CryptoError::MacMismatch);
    }

    primitives::aes_cbc_decrypt(&keys.aes_key, &message.ciphertext)
}

/// Decrypts an inbound frame, establishing a new responder session first
/// if `kind` is `PkMsg` and none exists yet.
pub fn process_inbound(
    state: &mut KeysState,
    config: &CryptoConfig,
    from: &SessionAddress,
    kind: MessageKind,
    payload: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match kind {
        MessageKind::PkMsg => {
            let frame: PreKeyWhisperMessage = serde_json::from_slice(payload)?;
            if frame.version != RATCHET_HEADER_VERSION {
                return Err(CryptoError::InvalidVersion);
            }
            let identity_key: [u8; 32] =
                frame.identity_key.clone().try_into().map_err(|_| CryptoError::InvalidKey("bad identity length".into()))?;
            let base_key: [u8; 32] =
                frame.base_key.clone().try_into().map_err(|_| CryptoError::InvalidKey("bad base key length".into()))?;

            if state.find_session(from).is_none() {
                let header = X3dhHeader {
                    registration_id: frame.registration_id,
                    identity_key,
                    base_key,
                    signed_pre_key_id: frame.signed_pre_key_id,
                    one_time_pre_key_id: frame.pre_key_id,
                };
                establish_inbound_session(state, config, from, &header)?;
            }

            let my_identity = state.identity_key_pair.public_bytes();
            let session = state.find_session_mut(from).ok_or(CryptoError::NoValidSessions)?;
            let plaintext = decrypt_whisper(session, &my_identity, &frame.message)?;
            session.pending_prekey = None;
            Ok(plaintext)
        }
        MessageKind::Msg => {
            let message: WhisperMessage = serde_json::from_slice(payload)?;
            let my_identity = state.identity_key_pair.public_bytes();
            let session = state.find_session_mut(from).ok_or(CryptoError::NoValidSessions)?;
            let plaintext = decrypt_whisper(session, &my_identity, &message)?;
            session.pending_prekey = None;
            Ok(plaintext)
        }
        MessageKind::SkMsg => Err(CryptoError::NoValidSessions),
    }
}

/// Encrypts `plaintext` under the local sender-key state for `group_id`,
/// creating one if none exists yet.
pub fn group_encrypt(
    record: &mut SenderKeyRecord,
    config: &CryptoConfig,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if record.current_mut().is_none() {
        record.create_local(config);
    }
    let state = record.current_mut().expect("created above");
    let key_id = state.key_id;

    let (iteration, message_key) = state.advance();
    let keys = derive_group_keys(&message_key)?;
    let ciphertext = primitives::aes_cbc_encrypt(&keys.aes_key, &keys.iv, plaintext);
    let signature = state.sign(&ciphertext)?;

    let frame = SenderKeyMessage { version: RATCHET_HEADER_VERSION, key_id, iteration, ciphertext, signature: signature.to_vec() };
    serde_json::to_vec(&frame).map_err(CryptoError::from)
}

/// `(iv || cipher_key) = HKDF(message_key, zeros, "WhisperGroup", 48)` —
/// iv first (16B), then the cipher key (32B), per §4.4.
fn derive_group_keys(message_key: &[u8; 32]) -> Result<DerivedKeys, CryptoError> {
    let mut okm = [0u8; 48];
    primitives::hkdf(message_key, Some(&[0u8; 32]), GROUP_KEYS_INFO, &mut okm)?;
    let mut iv = [0u8; 16];
    let mut aes_key = [0u8; 32];
    iv.copy_from_slice(&okm[..16]);
    aes_key.copy_from_slice(&okm[16..]);
    Ok(DerivedKeys { aes_key, mac_key: [0u8; 32], iv })
}

pub fn group_decrypt(record: &mut SenderKeyRecord, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let frame: SenderKeyMessage = serde_json::from_slice(payload)?;
    if frame.version != RATCHET_HEADER_VERSION {
        return Err(CryptoError::InvalidVersion);
    }
    let signature: [u8; 64] = frame.signature.clone().try_into().map_err(|_| CryptoError::InvalidKey("bad signature length".into()))?;
    let state = record.by_key_id_mut(frame.key_id).ok_or(CryptoError::InvalidKeyId)?;
    let message_key = state.decrypt_step(frame.iteration, &frame.ciphertext, &signature)?;
    let keys = derive_group_keys(&message_key)?;
    primitives::aes_cbc_decrypt(&keys.aes_key, &frame.ciphertext)
}
