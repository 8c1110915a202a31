//! Companion-device pairing handshake (§4.6, C6).
//!
//! Bootstraps a fresh `KeysState` the way a QR-code linking flow does: the
//! companion advertises an ephemeral key, the primary device signs over it
//! to vouch for the companion, and the companion countersigns to complete
//! the pair. Modelled on the same canonical-payload-then-sign discipline
//! used elsewhere in this crate for prekey signatures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::identity::IdentityKeyPair;
use crate::keys_state::KeysState;
use crate::primitives::KeyPair;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    AdvertisementSent,
    IdentityProvided,
    Paired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementFrame {
    pub companion_ephemeral_pub: [u8; 32],
    pub companion_adv_key: [u8; 32],
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityFrame {
    pub primary_identity_pub: [u8; 32],
    /// Signature over `companion_ephemeral_pub || companion_adv_key`.
    pub primary_signature: [u8; 64],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairFrame {
    pub companion_identity_pub: [u8; 32],
    /// Signature over `primary_identity_pub` by the companion's identity
    /// key, completing the mutual vouch.
    pub companion_signature: [u8; 64],
}

pub struct PairingFsm {
    state: PairingState,
    ephemeral: Option<KeyPair>,
    companion_adv_key: Option<[u8; 32]>,
    primary_identity: Option<[u8; 32]>,
}

impl PairingFsm {
    pub fn new() -> Self {
        Self { state: PairingState::Unpaired, ephemeral: None, companion_adv_key: None, primary_identity: None }
    }

    pub fn state(&self) -> &PairingState {
        &self.state
    }

    pub fn advertise(&mut self) -> Result<AdvertisementFrame, CryptoError> {
        if self.state != PairingState::Unpaired {
            return Err(CryptoError::PairingRejected("advertise called out of order".into()));
        }
        let ephemeral = KeyPair::generate();
        let companion_adv_key = *KeyPair::generate().public.as_bytes();
        let frame = AdvertisementFrame {
            companion_ephemeral_pub: *ephemeral.public.as_bytes(),
            companion_adv_key,
            issued_at: Utc::now(),
        };
        self.ephemeral = Some(ephemeral);
        self.companion_adv_key = Some(companion_adv_key);
        self.state = PairingState::AdvertisementSent;
        Ok(frame)
    }

    pub fn receive_identity(&mut self, frame: &IdentityFrame) -> Result<(), CryptoError> {
        if self.state != PairingState::AdvertisementSent {
            return Err(CryptoError::PairingRejected("identity frame received out of order".into()));
        }
        let ephemeral = self.ephemeral.as_ref().expect("set in advertise");
        let companion_adv_key = self.companion_adv_key.expect("set in advertise");
        let mut signed = ephemeral.public.as_bytes().to_vec();
        signed.extend_from_slice(&companion_adv_key);
        IdentityKeyPair::verify(&frame.primary_identity_pub, &signed, &frame.primary_signature)?;
        self.primary_identity = Some(frame.primary_identity_pub);
        self.state = PairingState::IdentityProvided;
        Ok(())
    }

    /// Completes pairing, producing the frame to send back to the primary
    /// and a freshly populated `KeysState` for the new companion device.
    pub fn complete_pairing(
        &mut self,
        config: &CryptoConfig,
        companion_identity: &IdentityKeyPair,
    ) -> Result<(PairFrame, KeysState), CryptoError> {
        if self.state != PairingState::IdentityProvided {
            return Err(CryptoError::PairingRejected("pair completed out of order".into()));
        }
        let primary_identity = self.primary_identity.expect("set in receive_identity");
        let signature = companion_identity.sign(&primary_identity);

        let mut state = KeysState::new_random(config);
        state.companion_adv_key = self.companion_adv_key.expect("set in advertise");
        state.trusted_identities.insert(
            wwc_proto::SessionAddress::new("primary", 0),
            primary_identity,
        );
        self.state = PairingState::Paired;

        Ok((PairFrame { companion_identity_pub: companion_identity.public_bytes(), companion_signature: signature }, state))
    }
}

impl Default for PairingFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pairing_handshake() {
        let mut fsm = PairingFsm::new();
        let advertisement = fsm.advertise().unwrap();
        assert_eq!(*fsm.state(), PairingState::AdvertisementSent);

        let primary_identity = IdentityKeyPair::generate();
        let mut signed = advertisement.companion_ephemeral_pub.to_vec();
        signed.extend_from_slice(&advertisement.companion_adv_key);
        let primary_signature = primary_identity.sign(&signed);

        fsm.receive_identity(&IdentityFrame {
            primary_identity_pub: primary_identity.public_bytes(),
            primary_signature,
        })
        .unwrap();
        assert_eq!(*fsm.state(), PairingState::IdentityProvided);

        let companion_identity = IdentityKeyPair::generate();
        let (pair_frame, state) = fsm.complete_pairing(&CryptoConfig::default(), &companion_identity).unwrap();
        assert_eq!(*fsm.state(), PairingState::Paired);
        assert_eq!(pair_frame.companion_identity_pub, companion_identity.public_bytes());
        assert_eq!(state.companion_adv_key, advertisement.companion_adv_key);
    }

    #[test]
    fn forged_primary_signature_is_rejected() {
        let mut fsm = PairingFsm::new();
        let advertisement = fsm.advertise().unwrap();
        let primary_identity = IdentityKeyPair::generate();
        let wrong_signed = b"not the right payload".to_vec();
        let bad_signature = primary_identity.sign(&wrong_signed);
        let _ = advertisement;

        let result = fsm.receive_identity(&IdentityFrame {
            primary_identity_pub: primary_identity.public_bytes(),
            primary_signature: bad_signature,
        });
        assert!(result.is_err());
    }
}
