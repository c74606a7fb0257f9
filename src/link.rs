//! One active peer connection: framing, send, close, and reply correlation.
//!
//! A `Link` wraps a single transport channel, a `pending_replies` map keyed
//! by message id, and a `tunnels` map indexed by higher layers. Only the
//! [`crate::manager`] task ever touches a `Link` directly, which is what lets
//! `send`/`reply_handler` mutate `pending_replies` without any locking of
//! their own.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::Error;
use crate::identity::NodeIdentity;
use crate::transport::{Tunnel, TransportChannel};

/// Fires at most once, with the `payload` of the reply that answered it.
pub type ReplyCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// A single peer connection, owning exactly one [`TransportChannel`].
pub struct Link {
    local_id: NodeIdentity,
    peer_id: NodeIdentity,
    channel: Arc<dyn TransportChannel>,
    pending_replies: HashMap<String, ReplyCallback>,
    tunnels: HashMap<String, Arc<dyn Tunnel>>,
}

impl Link {
    /// Wraps a freshly established channel in a new Link with empty reply/tunnel tables.
    pub fn new(local_id: NodeIdentity, peer_id: NodeIdentity, channel: Arc<dyn TransportChannel>) -> Self {
        Self {
            local_id,
            peer_id,
            channel,
            pending_replies: HashMap::new(),
            tunnels: HashMap::new(),
        }
    }

    /// Replaces `old`'s channel with `channel`, migrating `pending_replies`
    /// and `tunnels` across. Returns the replaced Link plus `old`'s channel,
    /// which the caller must disconnect. Used to resolve a
    /// simultaneous-connect race in favor of the winning side.
    pub fn replace(channel: Arc<dyn TransportChannel>, old: Link) -> (Self, Arc<dyn TransportChannel>) {
        let replaced = Self {
            local_id: old.local_id,
            peer_id: old.peer_id,
            channel,
            pending_replies: old.pending_replies,
            tunnels: old.tunnels,
        };
        (replaced, old.channel)
    }

    pub fn peer_id(&self) -> &NodeIdentity {
        &self.peer_id
    }

    /// Stamps `from_rt_uuid`/`to_rt_uuid` and hands the envelope to the channel.
    pub async fn send(&self, mut envelope: Envelope) -> Result<(), Error> {
        envelope.from_rt_uuid = self.local_id.clone();
        envelope.to_rt_uuid = self.peer_id.clone();
        self.channel.send(envelope).await
    }

    /// Allocates a fresh message id, records `callback` against it, stamps
    /// the id onto the envelope, then sends. No reply timeout is imposed —
    /// retry is the caller's responsibility.
    pub async fn send_with_reply(&mut self, payload: Vec<u8>, callback: ReplyCallback) -> Result<(), Error> {
        let msg_uuid = Uuid::new_v4().to_string();
        self.pending_replies.insert(msg_uuid.clone(), callback);
        let envelope = Envelope {
            from_rt_uuid: self.local_id.clone(),
            to_rt_uuid: self.peer_id.clone(),
            msg_uuid: Some(msg_uuid),
            payload,
        };
        self.channel.send(envelope).await
    }

    /// Looks up `envelope.msg_uuid` and, if found, removes and fires the
    /// continuation with `envelope.payload` as the reply value. An unknown
    /// or already-fired id is silently discarded — a late reply for a
    /// closed link must not fault.
    pub fn reply_handler(&mut self, envelope: Envelope) {
        let Some(msg_uuid) = envelope.msg_uuid else {
            return;
        };
        match self.pending_replies.remove(&msg_uuid) {
            Some(callback) => callback(envelope.payload),
            None => tracing::trace!(msg_uuid, "discarding reply with no matching waiter"),
        }
    }

    /// True if `msg_uuid` is still awaiting a reply on this link.
    pub fn has_pending_reply(&self, msg_uuid: &str) -> bool {
        self.pending_replies.contains_key(msg_uuid)
    }

    pub fn register_tunnel(&mut self, tunnel_id: String, tunnel: Arc<dyn Tunnel>) {
        self.tunnels.insert(tunnel_id, tunnel);
    }

    /// Returns the first tunnel whose type matches `tunnel_type`. With no
    /// filter given, always returns `None` — there is no default tunnel.
    pub fn get_tunnel(&self, tunnel_type: Option<&str>) -> Option<Arc<dyn Tunnel>> {
        let tunnel_type = tunnel_type?;
        self.tunnels
            .values()
            .find(|tunnel| tunnel.tunnel_type() == tunnel_type)
            .cloned()
    }

    /// Disconnects the channel. The Link is considered discarded afterwards.
    pub async fn close(&self) {
        self.channel.disconnect().await;
    }
}
