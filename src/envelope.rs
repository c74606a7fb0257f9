//! The wire envelope every message is stamped with before it leaves a [`crate::link::Link`].

use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;

/// Every outbound message is annotated with `from_rt_uuid`/`to_rt_uuid` and,
/// for requests awaiting a reply, a `msg_uuid`. A reply echoes the same
/// `msg_uuid` back and carries its result in `payload`.
///
/// `payload` is opaque to this layer — transport plugins move bytes, framing
/// and serialization format are their concern, not the link manager's.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub from_rt_uuid: NodeIdentity,
    pub to_rt_uuid: NodeIdentity,
    pub msg_uuid: Option<String>,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Builds a fresh, unaddressed envelope carrying `payload`. `from_rt_uuid`
    /// and `to_rt_uuid` get stamped by [`crate::link::Link::send`].
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            from_rt_uuid: NodeIdentity::new(Vec::new()),
            to_rt_uuid: NodeIdentity::new(Vec::new()),
            msg_uuid: None,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_has_no_reply_id() {
        let envelope = Envelope::new(vec![1, 2, 3]);
        assert!(envelope.msg_uuid.is_none());
        assert_eq!(envelope.payload, vec![1, 2, 3]);
    }
}
