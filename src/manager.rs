//! Indexes active links, orchestrates joins, resolves simultaneous-connect
//! races, and fans results out to waiters.
//!
//! One task owns all mutable state; every public operation is a message
//! into that task, and state transitions happen in one place so they never
//! race with each other. A single `tokio` task plus `mpsc`/`oneshot`
//! channels is enough here, since every operation either completes
//! synchronously against the task's own state or returns immediately and
//! lets a later message (`join_finished`/`join_failed`/`data_received`)
//! carry the eventual result to registered waiters.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::directory::DirectoryClient;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::identity::NodeIdentity;
use crate::link::{Link, ReplyCallback};
use crate::transport::{Tunnel, TransportChannel, TransportFactory};
use crate::uri::Uri;

/// Outcome of a join attempt, as delivered to a waiter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Ack(Uri),
    Nack(Uri),
}

/// Fires whenever a join this waiter is interested in resolves. Stored as an
/// `Arc<dyn Fn>` rather than a one-shot `FnOnce` because the source system
/// lets one callback be registered against several URIs at once (`join`
/// fans the same callback out per URI); each registration still fires at
/// most once.
pub type LinkCallback = Arc<dyn Fn(Result<LinkEvent, Error>) + Send + Sync>;

/// The process-wide sink for every inbound message across every link.
pub type RecvHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Read-only facts about an established link, safe to hand out of the
/// manager task without breaking the single-owner invariant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub local_id: NodeIdentity,
    pub peer_id: NodeIdentity,
}

enum Command {
    RequestLink {
        peer_id: NodeIdentity,
        callback: Option<LinkCallback>,
        respond_to: oneshot::Sender<bool>,
    },
    Join {
        uris: Vec<Uri>,
        peer_ids: Vec<Option<NodeIdentity>>,
        callback: Option<LinkCallback>,
    },
    JoinSucceeded {
        channel: Arc<dyn TransportChannel>,
        peer_id: NodeIdentity,
        uri: Uri,
        is_originator: bool,
    },
    JoinFailed {
        uri: Uri,
    },
    DataReceived(Envelope),
    PeerDisconnected {
        peer_id: NodeIdentity,
        reason: String,
    },
    Send {
        peer_id: NodeIdentity,
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<(), Error>>,
    },
    SendWithReply {
        peer_id: NodeIdentity,
        payload: Vec<u8>,
        callback: ReplyCallback,
        respond_to: oneshot::Sender<Result<(), Error>>,
    },
    LinkGet {
        peer_id: NodeIdentity,
        respond_to: oneshot::Sender<Option<LinkInfo>>,
    },
    ListLinks {
        respond_to: oneshot::Sender<Vec<NodeIdentity>>,
    },
    LinkCheck {
        peer_id: NodeIdentity,
        respond_to: oneshot::Sender<Result<(), Error>>,
    },
    GetTunnel {
        peer_id: NodeIdentity,
        tunnel_type: Option<String>,
        respond_to: oneshot::Sender<Option<Arc<dyn Tunnel>>>,
    },
    RegisterTunnel {
        peer_id: NodeIdentity,
        tunnel_id: String,
        tunnel: Arc<dyn Tunnel>,
    },
    RegisterRecv(RecvHandler),
    RegisterTransports(HashMap<String, Arc<dyn TransportFactory>>),
    Shutdown,
}

/// A cheap, `Clone + Send + Sync` handle into the running link manager task.
/// This is the only way plugins, the directory client, and higher layers
/// touch manager state — it exists so every mutation is funneled back
/// through the one task that owns `links`/`pending_by_uri`/`pending_by_peer`.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// The realized plugin lifecycle callbacks (`join_finished`, `data_received`,
/// `peer_disconnected`), wired to the manager's command channel at
/// registration time. Every transport plugin gets the same instance.
#[derive(Clone)]
pub struct PluginCallbacks {
    tx: mpsc::UnboundedSender<Command>,
}

impl PluginCallbacks {
    /// Called by a transport plugin when an outbound or inbound join
    /// attempt succeeds, producing a live channel.
    pub fn join_finished(&self, channel: Arc<dyn TransportChannel>, peer_id: NodeIdentity, uri: Uri, is_originator: bool) {
        let _ = self.tx.send(Command::JoinSucceeded { channel, peer_id, uri, is_originator });
    }

    /// Called by a transport plugin when an outbound join attempt failed.
    pub fn join_failed(&self, uri: Uri) {
        let _ = self.tx.send(Command::JoinFailed { uri });
    }

    /// Called by a transport plugin for every inbound message on any link.
    pub fn data_received(&self, envelope: Envelope) {
        let _ = self.tx.send(Command::DataReceived(envelope));
    }

    /// Called by a transport plugin when a peer's channel drops.
    pub fn peer_disconnected(&self, peer_id: NodeIdentity, reason: impl Into<String>) {
        let _ = self.tx.send(Command::PeerDisconnected { peer_id, reason: reason.into() });
    }
}

impl ManagerHandle {
    pub fn callbacks(&self) -> PluginCallbacks {
        PluginCallbacks { tx: self.tx.clone() }
    }

    /// Returns `true` if a link to `peer_id` already exists (`callback` is
    /// never invoked in that case). Otherwise returns `false` and resolves
    /// `peer_id` via the directory client before joining; `callback` fires
    /// exactly once, either with the join's outcome or a resolution error.
    pub async fn request_link(&self, peer_id: NodeIdentity, callback: Option<LinkCallback>) -> bool {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send(Command::RequestLink { peer_id, callback, respond_to }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Joins each `(uri, peer_id)` pair, deduplicating against in-flight
    /// attempts. `callback`, if given, is shared across every pair and may
    /// therefore fire more than once — once per URI it ends up registered
    /// against.
    pub async fn join(&self, uris: Vec<Uri>, peer_ids: Vec<Option<NodeIdentity>>, callback: Option<LinkCallback>) {
        let _ = self.tx.send(Command::Join { uris, peer_ids, callback });
    }

    /// Invoked by a plugin (directly, or via [`PluginCallbacks`]) when a join succeeds.
    pub fn join_finished(&self, channel: Arc<dyn TransportChannel>, peer_id: NodeIdentity, uri: Uri, is_originator: bool) {
        self.callbacks().join_finished(channel, peer_id, uri, is_originator);
    }

    /// Invoked by a plugin when a join fails.
    pub fn join_failed(&self, uri: Uri) {
        self.callbacks().join_failed(uri);
    }

    pub fn peer_disconnected(&self, peer_id: NodeIdentity, reason: impl Into<String>) {
        self.callbacks().peer_disconnected(peer_id, reason);
    }

    pub async fn send(&self, peer_id: NodeIdentity, envelope: Envelope) -> Result<(), Error> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(Command::Send { peer_id, envelope, respond_to }).map_err(|_| Error::ManagerGone)?;
        rx.await.map_err(|_| Error::ManagerGone)?
    }

    pub async fn send_with_reply(&self, peer_id: NodeIdentity, payload: Vec<u8>, callback: ReplyCallback) -> Result<(), Error> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::SendWithReply { peer_id, payload, callback, respond_to })
            .map_err(|_| Error::ManagerGone)?;
        rx.await.map_err(|_| Error::ManagerGone)?
    }

    pub async fn link_get(&self, peer_id: NodeIdentity) -> Option<LinkInfo> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(Command::LinkGet { peer_id, respond_to }).ok()?;
        rx.await.ok().flatten()
    }

    pub async fn list_links(&self) -> Vec<NodeIdentity> {
        let (respond_to, rx) = oneshot::channel();
        if self.tx.send(Command::ListLinks { respond_to }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn link_check(&self, peer_id: NodeIdentity) -> Result<(), Error> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(Command::LinkCheck { peer_id, respond_to }).map_err(|_| Error::ManagerGone)?;
        rx.await.map_err(|_| Error::ManagerGone)?
    }

    pub async fn get_tunnel(&self, peer_id: NodeIdentity, tunnel_type: Option<String>) -> Option<Arc<dyn Tunnel>> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(Command::GetTunnel { peer_id, tunnel_type, respond_to }).ok()?;
        rx.await.ok().flatten()
    }

    pub fn register_tunnel(&self, peer_id: NodeIdentity, tunnel_id: String, tunnel: Arc<dyn Tunnel>) {
        let _ = self.tx.send(Command::RegisterTunnel { peer_id, tunnel_id, tunnel });
    }

    /// Registers the single process-wide continuation that receives every
    /// inbound message that isn't recognized as a pending reply.
    pub fn register_recv(&self, handler: RecvHandler) {
        let _ = self.tx.send(Command::RegisterRecv(handler));
    }

    /// Installs the `scheme -> factory` map produced by [`crate::registry::PluginRegistry`].
    pub fn register_transports(&self, transports: HashMap<String, Arc<dyn TransportFactory>>) {
        let _ = self.tx.send(Command::RegisterTransports(transports));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Entry point: spawns the background task that owns all link manager state
/// for the lifetime of the node.
pub struct LinkManager;

impl LinkManager {
    pub fn spawn(local_id: NodeIdentity, directory: Option<Arc<dyn DirectoryClient>>) -> ManagerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ManagerHandle { tx };

        let state = State {
            local_id,
            links: HashMap::new(),
            pending_by_uri: HashMap::new(),
            pending_by_peer: HashMap::new(),
            transports: HashMap::new(),
            recv_handler: None,
            self_handle: handle.clone(),
            directory,
        };

        tokio::spawn(state.run(rx));
        handle
    }
}

struct State {
    local_id: NodeIdentity,
    links: HashMap<NodeIdentity, Link>,
    pending_by_uri: HashMap<Uri, Vec<LinkCallback>>,
    pending_by_peer: HashMap<NodeIdentity, Uri>,
    transports: HashMap<String, Arc<dyn TransportFactory>>,
    recv_handler: Option<RecvHandler>,
    self_handle: ManagerHandle,
    directory: Option<Arc<dyn DirectoryClient>>,
}

impl State {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command).await;
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::RequestLink { peer_id, callback, respond_to } => {
                self.handle_request_link(peer_id, callback, respond_to);
            }
            Command::Join { uris, peer_ids, callback } => {
                self.handle_join(uris, peer_ids, callback);
            }
            Command::JoinSucceeded { channel, peer_id, uri, is_originator } => {
                self.handle_join_succeeded(channel, peer_id, uri, is_originator);
            }
            Command::JoinFailed { uri } => {
                self.fail_pending_uri(&uri);
            }
            Command::DataReceived(envelope) => {
                self.handle_data_received(envelope);
            }
            Command::PeerDisconnected { peer_id, reason } => {
                tracing::info!(peer_id = %peer_id, reason, "peer disconnected");
                self.links.remove(&peer_id);
            }
            Command::Send { peer_id, envelope, respond_to } => {
                let result = match self.links.get(&peer_id) {
                    Some(link) => link.send(envelope).await,
                    None => Err(Error::LinkNotEstablished(peer_id)),
                };
                let _ = respond_to.send(result);
            }
            Command::SendWithReply { peer_id, payload, callback, respond_to } => {
                let result = match self.links.get_mut(&peer_id) {
                    Some(link) => link.send_with_reply(payload, callback).await,
                    None => Err(Error::LinkNotEstablished(peer_id)),
                };
                let _ = respond_to.send(result);
            }
            Command::LinkGet { peer_id, respond_to } => {
                let info = self.links.get(&peer_id).map(|link| LinkInfo {
                    local_id: self.local_id.clone(),
                    peer_id: link.peer_id().clone(),
                });
                let _ = respond_to.send(info);
            }
            Command::ListLinks { respond_to } => {
                let _ = respond_to.send(self.links.keys().cloned().collect());
            }
            Command::LinkCheck { peer_id, respond_to } => {
                let result = if self.links.contains_key(&peer_id) {
                    Ok(())
                } else {
                    Err(Error::LinkNotEstablished(peer_id))
                };
                let _ = respond_to.send(result);
            }
            Command::GetTunnel { peer_id, tunnel_type, respond_to } => {
                let tunnel = self.links.get(&peer_id).and_then(|link| link.get_tunnel(tunnel_type.as_deref()));
                let _ = respond_to.send(tunnel);
            }
            Command::RegisterTunnel { peer_id, tunnel_id, tunnel } => {
                if let Some(link) = self.links.get_mut(&peer_id) {
                    link.register_tunnel(tunnel_id, tunnel);
                }
            }
            Command::RegisterRecv(handler) => {
                self.recv_handler = Some(handler);
            }
            Command::RegisterTransports(transports) => {
                self.transports = transports;
            }
            Command::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn handle_request_link(&mut self, peer_id: NodeIdentity, callback: Option<LinkCallback>, respond_to: oneshot::Sender<bool>) {
        if self.links.contains_key(&peer_id) {
            let _ = respond_to.send(true);
            return;
        }
        let _ = respond_to.send(false);

        let directory = self.directory.clone();
        let handle = self.self_handle.clone();
        tokio::spawn(async move {
            let Some(directory) = directory else {
                if let Some(cb) = callback {
                    cb(Err(Error::PeerNotFound(peer_id)));
                }
                return;
            };
            match directory.get_node(&peer_id).await {
                Some(record) => {
                    handle.join(vec![record.uri], vec![Some(peer_id)], callback).await;
                }
                None => {
                    if let Some(cb) = callback {
                        cb(Err(Error::PeerNotFound(peer_id)));
                    }
                }
            }
        });
    }

    fn handle_join(&mut self, uris: Vec<Uri>, mut peer_ids: Vec<Option<NodeIdentity>>, callback: Option<LinkCallback>) {
        if peer_ids.len() != uris.len() {
            peer_ids = vec![None; uris.len()];
        }
        for (uri, peer_id) in uris.into_iter().zip(peer_ids) {
            self.join_one(uri, peer_id, callback.clone());
        }
    }

    fn join_one(&mut self, uri: Uri, peer_id: Option<NodeIdentity>, callback: Option<LinkCallback>) {
        let duplicate = self.pending_by_uri.contains_key(&uri)
            || peer_id.as_ref().is_some_and(|p| self.pending_by_peer.contains_key(p))
            || peer_id.as_ref().is_some_and(|p| self.links.contains_key(p));

        if duplicate {
            if let Some(p) = &peer_id {
                if self.links.contains_key(p) {
                    if let Some(cb) = &callback {
                        cb(Ok(LinkEvent::Ack(uri)));
                    }
                    return;
                }
            }
            // A simultaneous join is already in flight for this URI or peer;
            // queue behind it instead of kicking off another transport-level join.
            if let Some(cb) = callback {
                self.pending_by_uri.entry(uri).or_default().push(cb);
            }
            return;
        }

        let scheme = uri.scheme().to_string();
        let Some(factory) = self.transports.get(&scheme).cloned() else {
            tracing::warn!(scheme, %uri, "join requested for unknown transport scheme");
            if let Some(cb) = &callback {
                cb(Ok(LinkEvent::Nack(uri)));
            }
            return;
        };

        if let Some(p) = peer_id {
            self.pending_by_peer.insert(p, uri.clone());
        }
        if let Some(cb) = callback {
            self.pending_by_uri.insert(uri.clone(), vec![cb]);
        }

        let handle = self.self_handle.clone();
        let join_uri = uri.clone();
        tokio::spawn(async move {
            if let Err(err) = factory.join(&join_uri).await {
                tracing::warn!(uri = %join_uri, error = %err, "transport join initiation failed");
                handle.join_failed(join_uri);
            }
        });
    }

    fn handle_join_succeeded(&mut self, channel: Arc<dyn TransportChannel>, peer_id: NodeIdentity, uri: Uri, is_originator: bool) {
        if let Some(existing) = self.links.remove(&peer_id) {
            // Simultaneous-connect race: both endpoints compare the same two
            // identities the same way, so both converge on the same winner —
            // the channel whose originator has the larger NodeIdentity.
            let replace = is_originator == (self.local_id > peer_id);
            if replace {
                let (replaced, old_channel) = Link::replace(channel, existing);
                self.links.insert(peer_id.clone(), replaced);
                tokio::spawn(async move { old_channel.disconnect().await });
            } else {
                self.links.insert(peer_id.clone(), existing);
                tokio::spawn(async move { channel.disconnect().await });
            }
        } else {
            self.links.insert(peer_id.clone(), Link::new(self.local_id.clone(), peer_id.clone(), channel));
        }

        // Waiter fan-out: a waiter appears in exactly one queue, so it is
        // fired at most once across the two lookups below.
        if let Some(key_uri) = self.pending_by_peer.remove(&peer_id) {
            if let Some(waiters) = self.pending_by_uri.remove(&key_uri) {
                for waiter in waiters {
                    waiter(Ok(LinkEvent::Ack(key_uri.clone())));
                }
            }
        }
        if let Some(waiters) = self.pending_by_uri.remove(&uri) {
            for waiter in waiters {
                waiter(Ok(LinkEvent::Ack(uri.clone())));
            }
        }
    }

    fn fail_pending_uri(&mut self, uri: &Uri) {
        if let Some(waiters) = self.pending_by_uri.remove(uri) {
            for waiter in waiters {
                waiter(Ok(LinkEvent::Nack(uri.clone())));
            }
        }
    }

    fn handle_data_received(&mut self, envelope: Envelope) {
        let is_pending_reply = envelope
            .msg_uuid
            .as_deref()
            .and_then(|id| self.links.get(&envelope.from_rt_uuid).map(|link| link.has_pending_reply(id)))
            .unwrap_or(false);

        if is_pending_reply {
            if let Some(link) = self.links.get_mut(&envelope.from_rt_uuid) {
                link.reply_handler(envelope);
                return;
            }
        }

        match &self.recv_handler {
            Some(handler) => handler(envelope),
            None => tracing::warn!("no receive handler registered, dropping inbound message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDirectoryClient, MockTransportChannel, MockTransportFactory};
    use std::sync::Mutex;

    fn id(s: &str) -> NodeIdentity {
        NodeIdentity::from(s)
    }

    fn recorder() -> (LinkCallback, Arc<Mutex<Vec<Result<LinkEvent, Error>>>>) {
        let events: Arc<Mutex<Vec<Result<LinkEvent, Error>>>> = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let cb: LinkCallback = Arc::new(move |event| events_clone.lock().unwrap().push(event));
        (cb, events)
    }

    fn register_scheme_t(manager: &ManagerHandle) {
        let mut transports: HashMap<String, Arc<dyn TransportFactory>> = HashMap::new();
        transports.insert("t".into(), MockTransportFactory::new());
        manager.register_transports(transports);
    }

    #[tokio::test]
    async fn plain_join_originator_side() {
        let manager = LinkManager::spawn(id("local"), None);
        register_scheme_t(&manager);
        tokio::task::yield_now().await;
        let (cb, events) = recorder();

        manager.join(vec![Uri::parse("t:A").unwrap()], vec![None], Some(cb)).await;
        tokio::task::yield_now().await;

        let channel = MockTransportChannel::new();
        manager.join_finished(channel.clone(), id("peerB"), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;

        assert_eq!(events.lock().unwrap().as_slice(), &[Ok(LinkEvent::Ack(Uri::parse("t:A").unwrap()))]);
        assert_eq!(manager.list_links().await, vec![id("peerB")]);
    }

    #[tokio::test]
    async fn join_failure_fires_nack_and_leaves_links_untouched() {
        let manager = LinkManager::spawn(id("local"), None);
        register_scheme_t(&manager);
        tokio::task::yield_now().await;
        let (cb, events) = recorder();

        manager.join(vec![Uri::parse("t:A").unwrap()], vec![None], Some(cb)).await;
        tokio::task::yield_now().await;

        manager.join_failed(Uri::parse("t:A").unwrap());
        tokio::task::yield_now().await;

        assert_eq!(events.lock().unwrap().as_slice(), &[Ok(LinkEvent::Nack(Uri::parse("t:A").unwrap()))]);
        assert!(manager.list_links().await.is_empty());
    }

    #[tokio::test]
    async fn simultaneous_connect_local_id_wins() {
        // Local id 0xFF beats peer id 0x01.
        let manager = LinkManager::spawn(NodeIdentity::new(vec![0xFF]), None);
        let peer = NodeIdentity::new(vec![0x01]);

        let ch1 = MockTransportChannel::new();
        manager.join_finished(ch1.clone(), peer.clone(), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;

        let ch2 = MockTransportChannel::new();
        manager.join_finished(ch2.clone(), peer.clone(), Uri::parse("t:B").unwrap(), false);
        tokio::task::yield_now().await;

        assert!(ch2.is_disconnected());
        assert!(!ch1.is_disconnected());
        assert_eq!(manager.list_links().await, vec![peer]);
    }

    #[tokio::test]
    async fn simultaneous_connect_peer_id_wins_keeps_first_link() {
        // Local id 0x01 loses to peer id 0xFF: the surviving channel must be
        // the one the *peer* originated (ch1, is_originator=false). We
        // originated the second, losing attempt (ch2, is_originator=true),
        // so this is the Drop branch, not Replace — ch1 is kept as-is and
        // ch2 is the one torn down.
        let manager = LinkManager::spawn(NodeIdentity::new(vec![0x01]), None);
        let peer = NodeIdentity::new(vec![0xFF]);

        let ch1 = MockTransportChannel::new();
        manager.join_finished(ch1.clone(), peer.clone(), Uri::parse("t:A").unwrap(), false);
        tokio::task::yield_now().await;

        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        manager
            .send_with_reply(peer.clone(), vec![1], Box::new(move |value| fired_clone.lock().unwrap().push(value)))
            .await
            .unwrap();
        let pending_msg_uuid = ch1.sent()[0].msg_uuid.clone().unwrap();

        let ch2 = MockTransportChannel::new();
        manager.join_finished(ch2.clone(), peer.clone(), Uri::parse("t:B").unwrap(), true);
        tokio::task::yield_now().await;

        assert!(!ch1.is_disconnected());
        assert!(ch2.is_disconnected());
        assert_eq!(manager.list_links().await, vec![peer.clone()]);

        // No replace occurred, so the pending reply was never migrated — it
        // was simply never disturbed, since ch1's Link was kept untouched.
        manager.callbacks().data_received(Envelope {
            from_rt_uuid: peer,
            to_rt_uuid: NodeIdentity::new(vec![0x01]),
            msg_uuid: Some(pending_msg_uuid),
            payload: vec![99],
        });
        tokio::task::yield_now().await;
        assert_eq!(*fired.lock().unwrap(), vec![vec![99]]);
    }

    #[tokio::test]
    async fn reply_correlation_fires_once() {
        let manager = LinkManager::spawn(id("local"), None);
        let channel = MockTransportChannel::new();
        manager.join_finished(channel.clone(), id("peer"), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;

        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        manager
            .send_with_reply(id("peer"), vec![1], Box::new(move |value| fired_clone.lock().unwrap().push(value)))
            .await
            .unwrap();

        let sent = channel.sent();
        let msg_uuid = sent[0].msg_uuid.clone().unwrap();

        let recv = manager.callbacks();
        recv.data_received(Envelope {
            from_rt_uuid: id("peer"),
            to_rt_uuid: id("local"),
            msg_uuid: Some(msg_uuid.clone()),
            payload: vec![42],
        });
        tokio::task::yield_now().await;

        assert_eq!(*fired.lock().unwrap(), vec![vec![42]]);

        // A duplicate delivery for the same id is a no-op.
        recv.data_received(Envelope {
            from_rt_uuid: id("peer"),
            to_rt_uuid: id("local"),
            msg_uuid: Some(msg_uuid),
            payload: vec![7],
        });
        tokio::task::yield_now().await;
        assert_eq!(*fired.lock().unwrap(), vec![vec![42]]);
    }

    #[tokio::test]
    async fn request_link_via_directory() {
        let directory = Arc::new(MockDirectoryClient::new());
        directory.insert(id("peerB"), Uri::parse("t:A").unwrap());
        let manager = LinkManager::spawn(id("local"), Some(directory));
        register_scheme_t(&manager);
        tokio::task::yield_now().await;

        let (cb, events) = recorder();
        let already_linked = manager.request_link(id("peerB"), Some(cb)).await;
        assert!(!already_linked);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let channel = MockTransportChannel::new();
        manager.join_finished(channel, id("peerB"), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;

        assert_eq!(events.lock().unwrap().as_slice(), &[Ok(LinkEvent::Ack(Uri::parse("t:A").unwrap()))]);
        assert_eq!(manager.list_links().await, vec![id("peerB")]);

        // Second request_link for an already-linked peer returns true, no callback fired.
        let events_len_before = events.lock().unwrap().len();
        let already_linked = manager.request_link(id("peerB"), None).await;
        assert!(already_linked);
        assert_eq!(events.lock().unwrap().len(), events_len_before);
    }

    #[tokio::test]
    async fn link_check_reports_not_established() {
        let manager = LinkManager::spawn(id("local"), None);
        assert!(matches!(manager.link_check(id("peer")).await, Err(Error::LinkNotEstablished(_))));

        let channel = MockTransportChannel::new();
        manager.join_finished(channel, id("peer"), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;

        assert!(manager.link_check(id("peer")).await.is_ok());
    }

    #[tokio::test]
    async fn waiters_on_same_uri_fire_in_registration_order() {
        let manager = LinkManager::spawn(id("local"), None);
        register_scheme_t(&manager);
        tokio::task::yield_now().await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let make_cb = |tag: &'static str, order: Arc<Mutex<Vec<&'static str>>>| -> LinkCallback {
            Arc::new(move |_event| order.lock().unwrap().push(tag))
        };

        manager.join(vec![Uri::parse("t:A").unwrap()], vec![None], Some(make_cb("first", order.clone()))).await;
        tokio::task::yield_now().await;
        manager.join(vec![Uri::parse("t:A").unwrap()], vec![None], Some(make_cb("second", order.clone()))).await;
        tokio::task::yield_now().await;
        manager.join(vec![Uri::parse("t:A").unwrap()], vec![None], Some(make_cb("third", order.clone()))).await;
        tokio::task::yield_now().await;

        let channel = MockTransportChannel::new();
        manager.join_finished(channel, id("peer"), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn unknown_scheme_join_resolves_immediate_nack() {
        let manager = LinkManager::spawn(id("local"), None);
        let (cb, events) = recorder();

        manager.join(vec![Uri::parse("ghost:A").unwrap()], vec![None], Some(cb)).await;
        tokio::task::yield_now().await;

        assert_eq!(events.lock().unwrap().as_slice(), &[Ok(LinkEvent::Nack(Uri::parse("ghost:A").unwrap()))]);
    }

    #[tokio::test]
    async fn peer_disconnected_removes_link() {
        let manager = LinkManager::spawn(id("local"), None);
        let channel = MockTransportChannel::new();
        manager.join_finished(channel, id("peer"), Uri::parse("t:A").unwrap(), true);
        tokio::task::yield_now().await;
        assert!(!manager.list_links().await.is_empty());

        manager.peer_disconnected(id("peer"), "reset");
        tokio::task::yield_now().await;
        assert!(manager.list_links().await.is_empty());
    }
}
