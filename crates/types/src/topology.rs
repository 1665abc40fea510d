//! The federation: the fixed set of validator nodes and the constant leader.

use crate::crypto::PublicKey;
use crate::identifiers::NodeAddress;
use thiserror::Error;

/// One federation member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationMember {
    pub address: NodeAddress,
    pub public_key: PublicKey,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("federation must have at least one member")]
    Empty,
    #[error("duplicate federation member {0}")]
    DuplicateMember(NodeAddress),
    #[error("leader {0} is not a federation member")]
    LeaderNotMember(NodeAddress),
    #[error("member address {0} does not match its public key")]
    AddressKeyMismatch(NodeAddress),
}

/// The fixed validator set, known at construction and never reconfigured.
#[derive(Debug, Clone)]
pub struct FederationTopology {
    members: Vec<FederationMember>,
    leader: NodeAddress,
}

impl FederationTopology {
    pub fn new(
        members: Vec<FederationMember>,
        leader: NodeAddress,
    ) -> Result<Self, TopologyError> {
        if members.is_empty() {
            return Err(TopologyError::Empty);
        }
        for (i, member) in members.iter().enumerate() {
            if member.public_key.address() != member.address {
                return Err(TopologyError::AddressKeyMismatch(member.address));
            }
            if members[..i].iter().any(|m| m.address == member.address) {
                return Err(TopologyError::DuplicateMember(member.address));
            }
        }
        if !members.iter().any(|m| m.address == leader) {
            return Err(TopologyError::LeaderNotMember(leader));
        }
        Ok(Self { members, leader })
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Confirmations required to close a block: `floor(2N/3) + 1`.
    pub fn quorum(&self) -> usize {
        self.members.len() * 2 / 3 + 1
    }

    pub fn leader(&self) -> NodeAddress {
        self.leader
    }

    pub fn is_leader(&self, address: NodeAddress) -> bool {
        self.leader == address
    }

    pub fn is_member(&self, address: NodeAddress) -> bool {
        self.members.iter().any(|m| m.address == address)
    }

    pub fn public_key_of(&self, address: NodeAddress) -> Option<&PublicKey> {
        self.members
            .iter()
            .find(|m| m.address == address)
            .map(|m| &m.public_key)
    }

    pub fn members(&self) -> &[FederationMember] {
        &self.members
    }

    /// Every member address except `address`.
    pub fn peers_of(&self, address: NodeAddress) -> Vec<NodeAddress> {
        self.members
            .iter()
            .map(|m| m.address)
            .filter(|a| *a != address)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn member(seed: u8) -> (FederationMember, KeyPair) {
        let kp = KeyPair::from_seed([seed; 32]);
        (
            FederationMember {
                address: kp.address(),
                public_key: kp.public_key(),
            },
            kp,
        )
    }

    #[test]
    fn quorum_is_two_thirds_plus_one() {
        let members: Vec<_> = (1..=4).map(|s| member(s).0).collect();
        let leader = members[0].address;
        let topo = FederationTopology::new(members, leader).unwrap();
        assert_eq!(topo.size(), 4);
        assert_eq!(topo.quorum(), 3);

        let members7: Vec<_> = (1..=7).map(|s| member(s).0).collect();
        let leader7 = members7[0].address;
        let topo7 = FederationTopology::new(members7, leader7).unwrap();
        assert_eq!(topo7.quorum(), 5);
    }

    #[test]
    fn rejects_duplicate_members_and_foreign_leader() {
        let (m, _) = member(1);
        let err = FederationTopology::new(vec![m.clone(), m.clone()], m.address);
        assert_eq!(err.unwrap_err(), TopologyError::DuplicateMember(m.address));

        let (other, _) = member(2);
        let err = FederationTopology::new(vec![m.clone()], other.address);
        assert_eq!(
            err.unwrap_err(),
            TopologyError::LeaderNotMember(other.address)
        );
    }

    #[test]
    fn rejects_mismatched_address() {
        let (mut m, _) = member(1);
        let (other, _) = member(2);
        m.address = other.address;
        let err = FederationTopology::new(vec![m.clone()], m.address);
        assert_eq!(
            err.unwrap_err(),
            TopologyError::AddressKeyMismatch(m.address)
        );
    }

    #[test]
    fn peers_excludes_self() {
        let members: Vec<_> = (1..=4).map(|s| member(s).0).collect();
        let leader = members[0].address;
        let me = members[2].address;
        let topo = FederationTopology::new(members, leader).unwrap();
        let peers = topo.peers_of(me);
        assert_eq!(peers.len(), 3);
        assert!(!peers.contains(&me));
    }
}
