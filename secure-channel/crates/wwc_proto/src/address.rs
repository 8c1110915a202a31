use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses one device of one user: the unit the pairwise ratchet keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionAddress {
    pub user_id: String,
    pub device_id: u8,
}

impl SessionAddress {
    pub fn new(user_id: impl Into<String>, device_id: u8) -> Self {
        Self { user_id: user_id.into(), device_id }
    }
}

impl fmt::Display for SessionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.device_id)
    }
}

/// Addresses one sender's group ratchet within one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderKeyName {
    pub group_id: String,
    pub sender: SessionAddress,
}

impl SenderKeyName {
    pub fn new(group_id: impl Into<String>, sender: SessionAddress) -> Self {
        Self { group_id: group_id.into(), sender }
    }
}
