//! Peer-to-peer transport: framing, duplex connections, and the
//! connector that dials and accepts them.

pub mod connection;
pub mod connector;
pub mod frame;

use std::fmt;

/// Uniquely identifies a node in the cluster. Mirrors the teacher's
/// `NodeId` newtype.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct PeerId(u32);

impl From<u32> for PeerId {
    #[inline]
    fn from(id: u32) -> PeerId {
        PeerId(id)
    }
}

impl From<PeerId> for u32 {
    #[inline]
    fn from(id: PeerId) -> u32 {
        id.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
