//! The gossip header carried as payload 0 of every message.

use crate::topics::Topic;
use concord_types::{NodeAddress, Signature, VirtualChainId};
use sbor::prelude::BasicSbor;

/// How a message selects its recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum RecipientMode {
    /// Every peer.
    Broadcast,
    /// Exactly the peers in the recipient list.
    List,
    /// Every peer except those in the recipient list.
    AllButList,
}

/// First payload of every gossip message.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct GossipHeader {
    pub topic: Topic,
    pub recipient_mode: RecipientMode,
    pub recipient_list: Vec<NodeAddress>,
    pub subtype: u16,
    pub virtual_chain_id: VirtualChainId,
}

impl GossipHeader {
    pub fn broadcast(topic: Topic, subtype: u16, virtual_chain_id: VirtualChainId) -> Self {
        Self {
            topic,
            recipient_mode: RecipientMode::Broadcast,
            recipient_list: Vec::new(),
            subtype,
            virtual_chain_id,
        }
    }

    pub fn to_list(
        topic: Topic,
        subtype: u16,
        virtual_chain_id: VirtualChainId,
        recipients: Vec<NodeAddress>,
    ) -> Self {
        Self {
            topic,
            recipient_mode: RecipientMode::List,
            recipient_list: recipients,
            subtype,
            virtual_chain_id,
        }
    }
}

/// Sender identity plus signature over the message's envelope digest.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct SenderSignature {
    pub sender_node_address: NodeAddress,
    pub signature: Signature,
}
