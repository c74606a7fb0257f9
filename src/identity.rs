//! Opaque node identities and the total order the tie-break depends on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a node on the network. Assigned once at node start and never
/// changes afterwards.
///
/// Ordering is byte-lexicographic so that both ends of a link compare the
/// same two identities the same way — the simultaneous-connect tie-break in
/// [`crate::manager`] depends on this being derived from the bytes alone,
/// never from anything locally-visible like insertion order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(Vec<u8>);

impl NodeIdentity {
    /// Builds an identity from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for NodeIdentity {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for NodeIdentity {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for NodeIdentity {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({})", self)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
