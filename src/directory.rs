//! The directory/storage contract this layer resolves peer identifiers against.
//!
//! The directory service itself lives outside this crate; only the contract
//! `request_link` needs is named here, as an async trait method.

use async_trait::async_trait;

use crate::identity::NodeIdentity;
use crate::uri::Uri;

/// What the directory knows about a peer.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub uri: Uri,
}

/// Resolves a [`NodeIdentity`] to the information needed to join it.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Returns `None` if `peer_id` is not currently known to the directory.
    async fn get_node(&self, peer_id: &NodeIdentity) -> Option<NodeRecord>;
}
