//! Candidate peer address types.

use crate::*;
use std::net::SocketAddr;

/// Metadata describing a remote peer sufficient to open a connection.
///
/// Candidate addresses arrive from the routing layer pre-sorted by
/// estimated proximity to a target key. This core consumes them in the
/// given order and never re-sorts them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAddress {
    /// The peer identity.
    pub peer_id: PeerId,
    /// Connection-oriented transport address.
    pub addr: SocketAddr,
    /// Datagram transport address, if the peer accepts udp.
    pub udp_addr: Option<SocketAddr>,
    /// The peer is only reachable through a relay.
    pub relayed: bool,
    /// The peer answers asynchronously and late. Responses from it
    /// arrive through the pending-response path of the dispatcher.
    pub slow: bool,
}

impl PeerAddress {
    /// Construct a directly reachable (non-relayed, non-slow) address.
    pub fn direct(peer_id: PeerId, addr: SocketAddr) -> Self {
        Self {
            peer_id,
            addr,
            udp_addr: None,
            relayed: false,
            slow: false,
        }
    }
}
