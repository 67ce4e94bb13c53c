//! Wire messages for the overlay
//!
//! Every RPC shares one envelope: the sender's node identifier, the
//! sender's published endpoint, and a conversation identifier. Requests
//! carry a freshly generated conversation id; responses echo the id of the
//! request they answer, and are matched to waiting callers by that id
//! alone. The wire form is the bincode encoding of [`Message`], with the
//! enum discriminant naming the message kind.

use super::{Contact, NodeId};
use crate::error::Result;
use crate::store::{ResourceRecord, TrackTag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Request and response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageKind {
    Ping,
    Pong,
    FindNode {
        target: NodeId,
    },
    FindNodeResponse {
        contacts: Vec<Contact>,
    },
    /// Keyword lookup; answered with either of the two responses below
    FindValue {
        query: String,
    },
    FindValueContacts {
        contacts: Vec<Contact>,
    },
    FindValueData {
        resources: Vec<ResourceRecord>,
    },
    /// First phase of a store: offer a resource by content hash
    StoreQuery {
        resource: NodeId,
        published: DateTime<Utc>,
        origin: Url,
    },
    /// Recipient's verdict on the offer
    StoreResponse {
        send_data: bool,
    },
    /// Second phase: the full record for an accepted offer
    StoreData {
        tag: TrackTag,
        published: DateTime<Utc>,
    },
}

/// A single overlay message: envelope plus payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender: NodeId,
    pub sender_endpoint: Url,
    pub conversation: NodeId,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(sender: &Contact, conversation: NodeId, kind: MessageKind) -> Self {
        Message {
            sender: sender.id,
            sender_endpoint: sender.endpoint.clone(),
            conversation,
            kind,
        }
    }

    /// Build a request with a fresh conversation id
    pub fn request(sender: &Contact, kind: MessageKind) -> Self {
        Message::new(sender, NodeId::random(), kind)
    }

    /// Build a response echoing this message's conversation id
    pub fn reply(&self, sender: &Contact, kind: MessageKind) -> Self {
        Message::new(sender, self.conversation, kind)
    }

    /// The sender as a routing-table contact
    pub fn contact(&self) -> Contact {
        Contact::new(self.sender, self.sender_endpoint.clone())
    }

    pub fn is_response(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::Pong
                | MessageKind::FindNodeResponse { .. }
                | MessageKind::FindValueContacts { .. }
                | MessageKind::FindValueData { .. }
                | MessageKind::StoreResponse { .. }
        )
    }

    /// Stable name of the message kind, for logging
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            MessageKind::Ping => "PING",
            MessageKind::Pong => "PONG",
            MessageKind::FindNode { .. } => "FIND_NODE",
            MessageKind::FindNodeResponse { .. } => "FIND_NODE_RESPONSE",
            MessageKind::FindValue { .. } => "FIND_VALUE",
            MessageKind::FindValueContacts { .. } => "FIND_VALUE_CONTACTS",
            MessageKind::FindValueData { .. } => "FIND_VALUE_DATA",
            MessageKind::StoreQuery { .. } => "STORE_QUERY",
            MessageKind::StoreResponse { .. } => "STORE_RESPONSE",
            MessageKind::StoreData { .. } => "STORE_DATA",
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Message> {
        Ok(bincode::deserialize(bytes)?)
    }
}
