//! Long-lived identity key pair and human-verifiable fingerprints.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::primitives;

/// One device's long-lived identity key, held both as the Ed25519 signing
/// view (for XEdDSA-style signatures over prekeys) and, derivable on
/// demand, the X25519 view used in X3DH's DH1/DH2.
#[derive(ZeroizeOnDrop, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    #[serde(with = "crate::store::key32_b64")]
    secret_bytes: [u8; 32],
    #[zeroize(skip)]
    #[serde(with = "crate::store::key32_b64")]
    public: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            secret_bytes: signing_key.to_bytes(),
            public: signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn from_bytes(secret_bytes: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        Self { secret_bytes, public: signing_key.verifying_key().to_bytes() }
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public
    }

    pub fn public_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public)
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key().verifying_key()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        primitives::ed25519_sign(&self.signing_key(), msg)
    }

    pub fn verify(public: &[u8; 32], msg: &[u8], sig: &[u8; 64]) -> Result<(), CryptoError> {
        let verifying_key =
            VerifyingKey::from_bytes(public).map_err(|_| CryptoError::InvalidKey("bad ed25519 public key".into()))?;
        primitives::ed25519_verify(&verifying_key, msg, sig)
    }

    pub fn to_x25519_private(&self) -> StaticSecret {
        primitives::ed25519_secret_to_x25519(&self.secret_bytes)
    }

    pub fn to_x25519_public(public: &[u8; 32]) -> Result<X25519Public, CryptoError> {
        primitives::ed25519_pub_to_x25519(public)
    }

    /// BLAKE3-truncated fingerprint, hex-grouped by 4 for display, matching
    /// the verification-code style used elsewhere in the ecosystem.
    pub fn fingerprint(public: &[u8; 32]) -> String {
        let digest = blake3::hash(public);
        let hex = hex::encode(&digest.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedKeyPair {
    pub id: u32,
    #[serde(with = "crate::store::key32_b64")]
    pub private: [u8; 32],
    #[serde(with = "crate::store::key32_b64")]
    pub public: [u8; 32],
    #[serde(with = "crate::store::sig64_b64")]
    pub signature: [u8; 64],
}

impl SignedKeyPair {
    pub fn generate(id: u32, identity: &IdentityKeyPair) -> Self {
        let key_pair = primitives::KeyPair::generate();
        let signature = identity.sign(key_pair.public.as_bytes());
        Self {
            id,
            private: key_pair.private.to_bytes(),
            public: *key_pair.public.as_bytes(),
            signature,
        }
    }

    pub fn private_secret(&self) -> StaticSecret {
        StaticSecret::from(self.private)
    }

    pub fn public_key(&self) -> X25519Public {
        X25519Public::from(self.public)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKey {
    pub id: u32,
    #[serde(with = "crate::store::key32_b64")]
    pub private: [u8; 32],
    #[serde(with = "crate::store::key32_b64")]
    pub public: [u8; 32],
}

impl PreKey {
    pub fn generate(id: u32) -> Self {
        let key_pair = primitives::KeyPair::generate();
        Self { id, private: key_pair.private.to_bytes(), public: *key_pair.public.as_bytes() }
    }

    pub fn private_secret(&self) -> StaticSecret {
        StaticSecret::from(self.private)
    }

    pub fn public_key(&self) -> X25519Public {
        X25519Public::from(self.public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let identity = IdentityKeyPair::generate();
        let sig = identity.sign(b"prekey bytes");
        IdentityKeyPair::verify(&identity.public_bytes(), b"prekey bytes", &sig).unwrap();
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let identity = IdentityKeyPair::generate();
        let mut sig = identity.sign(b"prekey bytes");
        sig[0] ^= 0xFF;
        assert!(IdentityKeyPair::verify(&identity.public_bytes(), b"prekey bytes", &sig).is_err());
    }

    #[test]
    fn signed_prekey_carries_a_valid_signature() {
        let identity = IdentityKeyPair::generate();
        let spk = SignedKeyPair::generate(1, &identity);
        IdentityKeyPair::verify(&identity.public_bytes(), &spk.public, &spk.signature).unwrap();
    }
}
