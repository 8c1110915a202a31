//! wwc_crypto — end-to-end session cryptography for the multi-device
//! messenger protocol.
//!
//! Owns the long-lived key material (`keys_state`), the pairwise X3DH +
//! Double Ratchet session (`x3dh`, `ratchet`), the group Sender-Key ratchet
//! (`group`), app-state synchronization (`appstate`), companion-device
//! pairing (`pairing`), and the transport AEAD (`transport`). `engine` ties
//! these to the wire types in `wwc_proto` for the dispatcher-facing
//! `process_inbound`/`process_outbound` entry points.

pub mod appstate;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod identity;
pub mod keys_state;
pub mod pairing;
pub mod primitives;
pub mod ratchet;
pub mod shared;
pub mod store;
pub mod transport;
pub mod x3dh;

pub use config::CryptoConfig;
pub use error::CryptoError;
pub use keys_state::KeysState;
pub use shared::SharedKeysState;
pub use store::PreferencesHandle;
