//! Participant descriptors and the dense registry enumerating them.

use serde::{Deserialize, Serialize};

use crate::HandelError;

/// Public descriptor of a protocol participant. IDs are dense in `[0, n)`
/// and assigned by the registry; public keys live with the signature scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    id: u32,
    address: String,
}

impl Identity {
    pub fn new(id: u32, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Dense store of all participant identities, ordered by ID.
#[derive(Debug, Clone)]
pub struct Registry {
    identities: Vec<Identity>,
}

impl Registry {
    /// Build a registry. IDs must form exactly `0..n` (any order accepted).
    pub fn new(mut identities: Vec<Identity>) -> Result<Self, HandelError> {
        identities.sort_by_key(|i| i.id);
        for (pos, identity) in identities.iter().enumerate() {
            if identity.id as usize != pos {
                return Err(HandelError::InvalidRegistry(format!(
                    "expected id {} at position {}, found {}",
                    pos, pos, identity.id
                )));
            }
        }
        Ok(Self { identities })
    }

    pub fn size(&self) -> usize {
        self.identities.len()
    }

    pub fn identity(&self, id: u32) -> Option<&Identity> {
        self.identities.get(id as usize)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }
}
