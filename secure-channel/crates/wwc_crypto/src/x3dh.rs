//! X3DH handshake (§4.3, initiator and responder halves).

use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::CryptoError;
use crate::identity::IdentityKeyPair;
use crate::primitives::{self, KeyPair};

/// Everything a would-be sender needs to start a session: the device's
/// identity, signed prekey, and (if available) one of its one-time
/// prekeys. Fetched out of band by the caller — this crate only consumes
/// it.
#[derive(Debug, Clone)]
pub struct PrekeyBundle {
    pub registration_id: u32,
    pub identity_key: [u8; 32],
    pub signed_pre_key_id: u32,
    pub signed_pre_key: [u8; 32],
    pub signed_pre_key_signature: [u8; 64],
    pub one_time_pre_key_id: Option<u32>,
    pub one_time_pre_key: Option<[u8; 32]>,
}

/// The fields a responder needs, carried in the `pkmsg` header.
#[derive(Debug, Clone)]
pub struct X3dhHeader {
    pub registration_id: u32,
    pub identity_key: [u8; 32],
    pub base_key: [u8; 32],
    pub signed_pre_key_id: u32,
    pub one_time_pre_key_id: Option<u32>,
}

pub struct X3dhResult {
    pub root_key: [u8; 32],
    pub chain_key: [u8; 32],
    pub header: X3dhHeader,
    pub ephemeral_private: StaticSecret,
}

fn derive_root_and_chain(ikm: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut okm = [0u8; 64];
    primitives::hkdf(ikm, Some(&[0u8; 32]), b"WhisperText", &mut okm)?;
    let mut root_key = [0u8; 32];
    let mut chain_key = [0u8; 32];
    root_key.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..]);
    Ok((root_key, chain_key))
}

/// Alice's half: verify Bob's signed prekey, run the three-or-four-way DH,
/// and derive the initial root/chain key pair.
pub fn initiate(
    my_registration_id: u32,
    my_identity: &IdentityKeyPair,
    bundle: &PrekeyBundle,
) -> Result<X3dhResult, CryptoError> {
    IdentityKeyPair::verify(&bundle.identity_key, &bundle.signed_pre_key, &bundle.signed_pre_key_signature)?;

    let ik_a = my_identity.to_x25519_private();
    let ik_b_pub = IdentityKeyPair::to_x25519_public(&bundle.identity_key)?;
    let spk_b_pub = X25519Public::from(bundle.signed_pre_key);

    let ek_a = KeyPair::generate();

    let dh1 = primitives::x25519_agree(&ik_a, &spk_b_pub);
    let dh2 = primitives::x25519_agree(&ek_a.private, &ik_b_pub);
    let dh3 = primitives::x25519_agree(&ek_a.private, &spk_b_pub);

    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);

    if let Some(opk_b) = bundle.one_time_pre_key {
        let opk_b_pub = X25519Public::from(opk_b);
        let dh4 = primitives::x25519_agree(&ek_a.private, &opk_b_pub);
        ikm.extend_from_slice(&dh4);
    }

    let (root_key, chain_key) = derive_root_and_chain(&ikm)?;

    Ok(X3dhResult {
        root_key,
        chain_key,
        header: X3dhHeader {
            registration_id: my_registration_id,
            identity_key: my_identity.public_bytes(),
            base_key: *ek_a.public.as_bytes(),
            signed_pre_key_id: bundle.signed_pre_key_id,
            one_time_pre_key_id: bundle.one_time_pre_key_id,
        },
        ephemeral_private: ek_a.private,
    })
}

/// Bob's half: mirror Alice's DH computation order using commutativity of
/// Diffie-Hellman, deriving the identical root/chain key pair.
pub fn respond(
    my_identity: &IdentityKeyPair,
    my_signed_pre_key_secret: &StaticSecret,
    my_one_time_pre_key_secret: Option<&StaticSecret>,
    header: &X3dhHeader,
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let ik_b = my_identity.to_x25519_private();
    let ik_a_pub = IdentityKeyPair::to_x25519_public(&header.identity_key)?;
    let ek_a_pub = X25519Public::from(header.base_key);

    let dh1 = primitives::x25519_agree(my_signed_pre_key_secret, &ik_a_pub);
    let dh2 = primitives::x25519_agree(&ik_b, &ek_a_pub);
    let dh3 = primitives::x25519_agree(my_signed_pre_key_secret, &ek_a_pub);

    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);

    if let Some(opk_b_secret) = my_one_time_pre_key_secret {
        let dh4 = primitives::x25519_agree(opk_b_secret, &ek_a_pub);
        ikm.extend_from_slice(&dh4);
    }

    derive_root_and_chain(&ikm)
}

pub fn random_ephemeral() -> StaticSecret {
    StaticSecret::random_from_rng(OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SignedKeyPair;

    fn make_bundle(identity: &IdentityKeyPair, spk: &SignedKeyPair, opk: Option<&crate::identity::PreKey>) -> PrekeyBundle {
        PrekeyBundle {
            registration_id: 42,
            identity_key: identity.public_bytes(),
            signed_pre_key_id: spk.id,
            signed_pre_key: spk.public,
            signed_pre_key_signature: spk.signature,
            one_time_pre_key_id: opk.map(|p| p.id),
            one_time_pre_key: opk.map(|p| p.public),
        }
    }

    #[test]
    fn x3dh_roundtrip_with_opk() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let bob_spk = SignedKeyPair::generate(1, &bob_identity);
        let bob_opk = crate::identity::PreKey::generate(7);

        let bundle = make_bundle(&bob_identity, &bob_spk, Some(&bob_opk));
        let alice_result = initiate(1, &alice_identity, &bundle).unwrap();

        let (bob_root, bob_chain) =
            respond(&bob_identity, &bob_spk.private_secret(), Some(&bob_opk.private_secret()), &alice_result.header).unwrap();

        assert_eq!(alice_result.root_key, bob_root);
        assert_eq!(alice_result.chain_key, bob_chain);
    }

    #[test]
    fn x3dh_roundtrip_without_opk() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let bob_spk = SignedKeyPair::generate(1, &bob_identity);

        let bundle = make_bundle(&bob_identity, &bob_spk, None);
        let alice_result = initiate(1, &alice_identity, &bundle).unwrap();

        let (bob_root, bob_chain) = respond(&bob_identity, &bob_spk.private_secret(), None, &alice_result.header).unwrap();

        assert_eq!(alice_result.root_key, bob_root);
        assert_eq!(alice_result.chain_key, bob_chain);
    }

    #[test]
    fn rejects_invalid_signed_prekey_signature() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let mut bob_spk = SignedKeyPair::generate(1, &bob_identity);
        bob_spk.signature[0] ^= 0xFF;

        let bundle = make_bundle(&bob_identity, &bob_spk, None);
        assert!(initiate(1, &alice_identity, &bundle).is_err());
    }
}
