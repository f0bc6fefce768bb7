//! Core identifiers and the symbolic value domain.
//!
//! Everything the protocol moves around is built from these four types. They
//! are deliberately tiny and `Copy`: the model checker clones whole machine
//! states millions of times, so identifiers must be cheap.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Identifier of one socket in the machine.
///
/// Sockets are interchangeable; the checker exploits this for symmetry
/// reduction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SocketId(pub u8);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Which controller inside a socket a message is addressed to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Level {
    /// The processor-facing last-level cache.
    Llc,
    /// The DRAM cache sitting between the LLC and the directory.
    Dc,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Llc => write!(f, "LLC"),
            Level::Dc => write!(f, "DC"),
        }
    }
}

/// A coherence participant: the home directory or one socket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum NodeId {
    /// The home directory, colocated with memory.
    Directory,
    /// One socket, holding an LLC and a DRAM cache.
    Socket(SocketId),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Directory => write!(f, "dir"),
            NodeId::Socket(s) => write!(f, "{s}"),
        }
    }
}

/// An opaque symbolic value; equality is the only operation the protocol
/// performs on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Value(pub u8);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
