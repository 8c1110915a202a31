//! Single-writer, multiple-reader handle over `KeysState` (§5).
//!
//! Mirrors the shape of the teacher's `Vault` — a cloneable handle around
//! `Arc<RwLock<_>>` with a closure-scoped accessor — generalized from "one
//! secret key" to "the whole keys state". Callers never hold a guard across
//! an `.await`; `with_state` takes the write lock only for the span of one
//! synchronous crypto operation (one `engine::process_inbound` call, one
//! patch verification, one counter bump), exactly the scope `Vault::with_key`
//! gives its callback.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::CryptoError;
use crate::keys_state::KeysState;

#[derive(Clone)]
pub struct SharedKeysState {
    inner: Arc<RwLock<KeysState>>,
}

impl SharedKeysState {
    pub fn new(state: KeysState) -> Self {
        Self { inner: Arc::new(RwLock::new(state)) }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, KeysState> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, KeysState> {
        self.inner.write().await
    }

    /// Runs one synchronous crypto operation against the locked state.
    /// `f` must not suspend — hold the guard only across CPU-bound work,
    /// never across a bundle/blob fetch (those happen before this call, in
    /// the caller).
    pub async fn with_state<T>(&self, f: impl FnOnce(&mut KeysState) -> Result<T, CryptoError>) -> Result<T, CryptoError> {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;
    use wwc_proto::SessionAddress;

    #[tokio::test]
    async fn with_state_sees_no_session_before_establishment() {
        let shared = SharedKeysState::new(KeysState::new_random(&CryptoConfig::default()));
        let address = SessionAddress::new("alice", 0);
        let saw_none = shared.with_state(|state| Ok(state.find_session(&address).is_none())).await.unwrap();
        assert!(saw_none);
    }

    #[tokio::test]
    async fn concurrent_handles_share_one_counter_space() {
        let shared = SharedKeysState::new(KeysState::new_random(&CryptoConfig::default()));
        let a = shared.clone();
        let b = shared.clone();
        let (r1, r2) = tokio::join!(
            a.with_state(|state| state.bump_write_counter()),
            b.with_state(|state| state.bump_write_counter()),
        );
        let mut seen = [r1.unwrap(), r2.unwrap()];
        seen.sort_unstable();
        assert_eq!(seen, [0, 1]);
    }
}
