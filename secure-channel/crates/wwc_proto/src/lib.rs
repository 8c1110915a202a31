//! wwc_proto — wire types for the session-layer protocol
//!
//! These are the shapes `wwc_crypto` consumes and produces; nothing here
//! understands plaintext content. A message is an opaque byte blob once it
//! has left the ratchet.
//!
//! # Modules
//! - `address`  — session and sender-key addressing
//! - `session`  — pkmsg/msg/skmsg wire frames
//! - `appstate` — mutation/patch/snapshot records for state sync

pub mod address;
pub mod appstate;
pub mod session;

pub use address::{SenderKeyName, SessionAddress};
pub use appstate::{AppStateMutation, AppStatePatch, AppStateSnapshot, MutationOperation};
pub use session::{MessageKind, PreKeyWhisperMessage, SenderKeyMessage, WhisperMessage};
