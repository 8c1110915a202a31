//! On-disk persistence for `KeysState`.
//!
//! Grounded in the same atomic-write discipline the rest of the product
//! line uses for durable state: write to a staging file in the same
//! directory, fsync it, fsync the directory, then rename into place. A
//! crash can never leave `keys/{id}.json` partially written.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use uuid::Uuid;

use crate::error::CryptoError;
use crate::keys_state::KeysState;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "wwc";
const APPLICATION: &str = "messenger";

/// Resolved preferences root plus the staging directory atomic writes use.
#[derive(Debug, Clone)]
pub struct PreferencesHandle {
    root: PathBuf,
}

impl PreferencesHandle {
    pub fn resolve() -> Result<Self, CryptoError> {
        let dirs = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
            .ok_or_else(|| CryptoError::PersistenceError(io::Error::new(io::ErrorKind::NotFound, "no home directory")))?;
        Ok(Self { root: dirs.data_dir().join("keys") })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, id: u32) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(".staging")
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> Result<(), CryptoError> {
        fs::create_dir_all(&self.root)?;
        let staging_root = self.staging_dir();
        fs::create_dir_all(&staging_root)?;
        let staging_path = staging_root.join(format!("{}.staging", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&staging_path)?;
            use std::io::Write;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fsync_dir(&staging_root)?;
        fs::rename(&staging_path, dest)?;
        fsync_dir(&self.root)?;
        Ok(())
    }

    pub fn load(&self, id: u32) -> Result<Option<KeysState>, CryptoError> {
        let path = self.key_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, state: &KeysState) -> Result<(), CryptoError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_atomic(&self.key_path(state.id), &bytes)?;
        self.update_index(state.id)
    }

    fn update_index(&self, id: u32) -> Result<(), CryptoError> {
        let path = self.index_path();
        let mut ids: Vec<u32> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !ids.contains(&id) {
            ids.push(id);
            ids.sort_unstable();
            let bytes = serde_json::to_vec_pretty(&ids)?;
            self.write_atomic(&path, &bytes)?;
        }
        Ok(())
    }

    pub fn delete_all(&self) -> Result<(), CryptoError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

pub(crate) mod key32_b64 {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = URL_SAFE_NO_PAD.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

pub(crate) mod sig64_b64 {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = URL_SAFE_NO_PAD.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

/// Serializes a `HashMap<K, V>` as a JSON array of `[key, value]` pairs
/// instead of a JSON object, so struct keys (`SessionAddress`,
/// `SenderKeyName`) round-trip through `serde_json` — which only accepts
/// string keys for its native object representation.
pub(crate) mod map_as_pairs {
    use std::collections::HashMap;
    use std::hash::Hash;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        let entries: Vec<(&K, &V)> = map.iter().collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Eq + Hash,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PreferencesHandle::at(dir.path());
        let state = KeysState::new_random(&CryptoConfig::default());
        handle.save(&state).unwrap();
        let loaded = handle.load(state.id).unwrap().expect("state should be present");
        assert_eq!(loaded.id, state.id);
        assert_eq!(loaded.identity_key_pair.public_bytes(), state.identity_key_pair.public_bytes());
    }

    #[test]
    fn missing_id_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PreferencesHandle::at(dir.path());
        assert!(handle.load(999).unwrap().is_none());
    }

    /// Regression test for struct-keyed maps (`sessions`, `sender_keys`,
    /// `trusted_identities`) breaking `serde_json`'s "key must be a
    /// string" map encoding. A state with no established session never
    /// exercised that path.
    #[test]
    fn save_then_load_roundtrips_an_established_session() {
        use crate::engine;
        use crate::group::SenderKeyRecord;
        use crate::x3dh::PrekeyBundle;
        use wwc_proto::SessionAddress;

        let config = CryptoConfig::default();
        let mut alice = KeysState::new_random(&config);
        let mut bob = KeysState::new_random(&config);
        let bob_address = SessionAddress::new("bob", 0);
        let alice_address = SessionAddress::new("alice", 0);

        let pre_key = bob.pre_keys.first().expect("at least one prekey");
        let bundle = PrekeyBundle {
            registration_id: 7,
            identity_key: bob.identity_key_pair.public_bytes(),
            signed_pre_key_id: bob.signed_pre_key.id,
            signed_pre_key: bob.signed_pre_key.public,
            signed_pre_key_signature: bob.signed_pre_key.signature,
            one_time_pre_key_id: Some(pre_key.id),
            one_time_pre_key: Some(pre_key.public),
        };
        engine::establish_outbound_session(&mut alice, &config, &bob_address, 1, &bundle).unwrap();
        let (kind, wire) = engine::process_outbound(&mut alice, &bob_address, b"hello bob").unwrap();
        engine::process_inbound(&mut bob, &config, &alice_address, kind, &wire).unwrap();

        let mut sender_keys = SenderKeyRecord::new(&config);
        sender_keys.create_local(&config);
        bob.sender_keys.insert(wwc_proto::SenderKeyName::new("group-1", alice_address.clone()), sender_keys);

        let dir = tempfile::tempdir().unwrap();
        let handle = PreferencesHandle::at(dir.path());
        handle.save(&bob).unwrap();
        let loaded = handle.load(bob.id).unwrap().expect("state should be present");

        assert!(loaded.find_session(&alice_address).is_some());
        assert_eq!(loaded.trusted_identities.get(&alice_address), bob.trusted_identities.get(&alice_address));
        assert!(loaded.find_sender_key(&wwc_proto::SenderKeyName::new("group-1", alice_address.clone())).is_some());
    }
}
