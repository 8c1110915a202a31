use serde::{Deserialize, Serialize};

/// Tag carried alongside ciphertext so the dispatcher knows which engine to
/// hand it to. Does not appear inside the ratchet's own framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    PkMsg,
    Msg,
    SkMsg,
}

/// Frame version carried by every ratchet ciphertext. A mismatch is a
/// `CryptoError::InvalidVersion`, not a silent best-effort decode.
pub const RATCHET_HEADER_VERSION: u8 = 0x33;

/// X3DH handshake frame: everything the responder needs to derive the
/// initial root key, followed by the first encrypted `WhisperMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyWhisperMessage {
    pub version: u8,
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    #[serde(with = "base64_bytes")]
    pub base_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub identity_key: Vec<u8>,
    pub message: WhisperMessage,
}

/// One Double Ratchet ciphertext frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperMessage {
    pub version: u8,
    #[serde(with = "base64_bytes")]
    pub ratchet_key: Vec<u8>,
    pub counter: u32,
    pub previous_counter: u32,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub mac: Vec<u8>,
}

/// One Sender-Key ciphertext frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderKeyMessage {
    pub version: u8,
    pub key_id: u32,
    pub iteration: u32,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        URL_SAFE_NO_PAD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
