//! Runtime-to-runtime (RT↔RT) link manager: transport plugin discovery,
//! peer link establishment, simultaneous-connect tie-breaking, and
//! request/reply correlation over persistent, bidirectional links.
//!
//! This crate owns exactly the slice of a distributed actor platform's
//! networking layer between "I have a peer identifier" and "I have a live,
//! multiplexed channel to that peer." Routing across multiple hops,
//! transport-level encryption, and aggregating several links to the same
//! peer are all out of scope — every link is point-to-point, and at most one
//! is active per peer at a time.
//!
//! The entry point is [`manager::LinkManager::spawn`], which returns a
//! [`manager::ManagerHandle`] — a cheap, cloneable handle into the single
//! background task that owns all mutable state. Transport plugins are
//! discovered via [`registry::PluginRegistry`] and wired to that task
//! through [`manager::PluginCallbacks`]; [`listener::ListenerSet`] starts
//! inbound listeners for whatever schemes the registry turned up.

pub mod config;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod link;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod transport;
pub mod uri;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use envelope::Envelope;
pub use error::Error;
pub use identity::NodeIdentity;
pub use manager::{LinkCallback, LinkEvent, LinkInfo, LinkManager, ManagerHandle, PluginCallbacks, RecvHandler};
pub use uri::Uri;
