//! The plugin-facing capability traits: [`TransportFactory`], [`TransportChannel`], [`Tunnel`].
//!
//! These name the external contract a transport plugin fulfils. Wire
//! encoding and line framing below this boundary are out of scope for this
//! crate — a plugin owns everything from here down to the socket.

use std::fmt;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::uri::Uri;

/// Opens and accepts byte-oriented channels for one URI scheme.
///
/// `listen`/`join` only report whether the *attempt* could be started;
/// completion (success or failure) always arrives later through
/// [`crate::manager::ManagerHandle::join_finished`] or
/// [`crate::manager::ManagerHandle::join_failed`] for joins, or via a
/// listener-side accept for inbound connections.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Starts listening on `uri` (or accepting, for `scheme:default`).
    async fn listen(&self, uri: &Uri) -> Result<(), Error>;

    /// Starts an outbound join to `uri`.
    async fn join(&self, uri: &Uri) -> Result<(), Error>;
}

/// One live peer connection's send/disconnect capability.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), Error>;

    /// Tears the channel down. Idempotent: disconnecting twice is not an error.
    async fn disconnect(&self);
}

/// A higher-layer virtual channel multiplexed over a [`crate::link::Link`].
///
/// Tunnels are created and owned by higher layers; this crate only indexes
/// them for lookup by [`crate::link::Link::get_tunnel`], so the trait
/// exposes nothing beyond the one attribute that lookup keys on.
pub trait Tunnel: Send + Sync {
    fn tunnel_type(&self) -> &str;
}

impl fmt::Debug for dyn TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportChannel(..)")
    }
}

impl fmt::Debug for dyn TransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportFactory(..)")
    }
}
