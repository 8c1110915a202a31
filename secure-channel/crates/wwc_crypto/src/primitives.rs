//! Curve25519 key agreement, HKDF/HMAC, AEAD, and XEdDSA signing.
//!
//! Every session-layer component derives its key material through this
//! module rather than reaching for `hkdf`/`hmac`/`aes-gcm` directly, so the
//! domain-separation labels stay in one place.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::OsRng;
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

pub type HmacSha256 = Hmac<Sha256>;

/// A Curve25519 key pair. The private half is never `Clone`/`Debug`.
#[derive(Clone)]
pub struct KeyPair {
    pub private: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let private = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&private);
        Self { private, public }
    }

    pub fn from_private(private: StaticSecret) -> Self {
        let public = PublicKey::from(&private);
        Self { private, public }
    }
}

pub fn x25519_agree(private: &StaticSecret, public: &PublicKey) -> [u8; 32] {
    private.diffie_hellman(public).to_bytes()
}

/// HKDF-SHA256 expand (and optional extract when `salt` is `Some`) into
/// `out`, matching the teacher's `kdf::hkdf_expand` call shape.
pub fn hkdf(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, out)
        .map_err(|_| CryptoError::KeyDerivation("hkdf output too long".into()))
}

pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// AES-256-GCM with an explicit nonce (used for transport, where the nonce
/// is the monotonic read/write counter carried alongside the frame, per
/// §6's `encrypt_transport`/`decrypt_transport` contract).
pub fn aes_gcm_encrypt(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    cipher
        .encrypt(GcmNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)
}

pub fn aes_gcm_decrypt(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    cipher
        .decrypt(GcmNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecrypt)
}

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256-CBC/PKCS7, used by app-state value encryption (§4.5). The IV is
/// prepended to the returned ciphertext.
pub fn aes_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let enc = Aes256CbcEnc::new(key.into(), iv.into());
    let mut out = iv.to_vec();
    out.extend(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext));
    out
}

pub fn aes_cbc_decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < 16 {
        return Err(CryptoError::BadPadding);
    }
    let (iv, ct) = data.split_at(16);
    let dec = Aes256CbcDec::new(key.into(), iv.into());
    dec.decrypt_padded_vec_mut::<Pkcs7>(ct).map_err(|_| CryptoError::BadPadding)
}

/// Converts an Ed25519 secret scalar to the X25519 (Montgomery) scalar that
/// shares the same public point, via RFC 7748 clamped SHA-512 expansion.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    let mut hasher = Sha512::new();
    hasher.update(ed_secret);
    let mut h = hasher.finalize();
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&h[..32]);
    h.zeroize();
    StaticSecret::from(scalar)
}

pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<PublicKey, CryptoError> {
    let compressed = CompressedEdwardsY(*ed_pub);
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("not a valid Edwards point".into()))?;
    Ok(PublicKey::from(point.to_montgomery().to_bytes()))
}

pub fn ed25519_sign(signing_key: &SigningKey, msg: &[u8]) -> [u8; 64] {
    signing_key.sign(msg).to_bytes()
}

pub fn ed25519_verify(public: &VerifyingKey, msg: &[u8], sig: &[u8; 64]) -> Result<(), CryptoError> {
    let sig = Signature::from_bytes(sig);
    public.verify(msg, &sig).map_err(|_| CryptoError::InvalidSignature)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn rand_bytes(n: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}
