//! In-memory transport and directory doubles used by this crate's own tests
//! and exported for downstream integration tests (behind the `testing`
//! feature) to drive join, tie-break, and reply-correlation scenarios
//! without a real transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::directory::{DirectoryClient, NodeRecord};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::identity::NodeIdentity;
use crate::transport::{TransportChannel, TransportFactory};
use crate::uri::Uri;

#[derive(Default)]
struct ChannelState {
    sent: Vec<Envelope>,
    disconnected: bool,
}

/// A channel that records every envelope sent through it instead of putting
/// bytes on a wire.
pub struct MockTransportChannel {
    state: Mutex<ChannelState>,
}

impl MockTransportChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(ChannelState::default()) })
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().unwrap().disconnected
    }
}

#[async_trait]
impl TransportChannel for MockTransportChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.state.lock().unwrap().sent.push(envelope);
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.lock().unwrap().disconnected = true;
    }
}

/// A factory that records `listen`/`join` calls but never produces a
/// channel on its own — tests drive completion explicitly by calling
/// `ManagerHandle::join_finished`/`join_failed`, the way a real plugin would.
#[derive(Default)]
pub struct MockTransportFactory {
    listens: Mutex<Vec<Uri>>,
    joins: Mutex<Vec<Uri>>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn listens(&self) -> Vec<Uri> {
        self.listens.lock().unwrap().clone()
    }

    pub fn joins(&self) -> Vec<Uri> {
        self.joins.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn listen(&self, uri: &Uri) -> Result<(), Error> {
        self.listens.lock().unwrap().push(uri.clone());
        Ok(())
    }

    async fn join(&self, uri: &Uri) -> Result<(), Error> {
        self.joins.lock().unwrap().push(uri.clone());
        Ok(())
    }
}

/// An in-memory directory: a fixed `peer_id -> uri` table, populated by tests.
#[derive(Default)]
pub struct MockDirectoryClient {
    records: Mutex<HashMap<NodeIdentity, NodeRecord>>,
}

impl MockDirectoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer_id: NodeIdentity, uri: Uri) {
        self.records.lock().unwrap().insert(peer_id, NodeRecord { uri });
    }
}

#[async_trait]
impl DirectoryClient for MockDirectoryClient {
    async fn get_node(&self, peer_id: &NodeIdentity) -> Option<NodeRecord> {
        self.records.lock().unwrap().get(peer_id).cloned()
    }
}
