use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("MAC did not match")]
    MacMismatch,

    #[error("ciphertext padding was malformed")]
    BadPadding,

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed")]
    AeadDecrypt,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("session not initialised for this address")]
    SessionNotInitialised,

    #[error("no valid session for this address")]
    NoValidSessions,

    #[error("ratchet step failed: {0}")]
    RatchetStep(String),

    #[error("message already seen for this counter")]
    DuplicateMessage,

    #[error("unsupported frame version")]
    InvalidVersion,

    #[error("unknown pre-key or sender-key id")]
    InvalidKeyId,

    #[error("identity for this address changed without re-pairing")]
    UntrustedIdentity,

    #[error("counter space exhausted")]
    CounterOverflow,

    #[error("too many skipped message keys")]
    TooManySkipped,

    #[error("missing app-state key {}", hex::encode(.0))]
    MissingAppStateKey(Vec<u8>),

    #[error("app-state version gap: expected {expected}, got {got}")]
    VersionGap { expected: u64, got: u64 },

    #[error("patch MAC did not match")]
    InvalidPatchMac,

    #[error("snapshot MAC did not match")]
    InvalidSnapshotMac,

    #[error("pre-key {0} not found or already consumed")]
    PreKeyNotFound(u32),

    #[error("id mismatch: expected {expected}, got {got}")]
    IdMismatch { expected: u32, got: u32 },

    #[error("pairing rejected: {0}")]
    PairingRejected(String),

    #[error("certificate validation failed: {0}")]
    CertificateValidation(String),

    #[error("persistence error: {0}")]
    PersistenceError(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
