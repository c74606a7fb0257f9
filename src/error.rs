//! Error kinds surfaced by the link manager.
//!
//! Rule of thumb followed throughout this crate: failures that belong to a
//! known waiter are surfaced to that waiter; failures with no waiter
//! (peer-initiated joins, late replies) are swallowed — logged, never
//! propagated.

use crate::identity::NodeIdentity;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The directory client could not resolve a peer to a URI.
    #[error("peer {0} could not be resolved in storage")]
    PeerNotFound(NodeIdentity),

    /// `link_check` (or an operation that implies one) found no link for the peer.
    #[error("no link established to peer {0}")]
    LinkNotEstablished(NodeIdentity),

    /// One plugin failed to register; its scheme(s) are simply unavailable.
    #[error("plugin '{plugin}' failed to register: {reason}")]
    PluginRegisterError { plugin: String, reason: String },

    /// A URI did not parse as `scheme:address`.
    #[error("malformed uri '{0}', expected 'scheme:address'")]
    InvalidUri(String),

    /// The config surface failed to load or parse.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The link manager's background task is no longer running.
    #[error("link manager task is gone")]
    ManagerGone,
}
