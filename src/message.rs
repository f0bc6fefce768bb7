//! Message envelope and the virtual-channel discipline.
//!
//! Every inter-controller interaction is a [`Message`] dropped into the
//! destination node's mailbox. Messages carry the virtual channel they travel
//! on; the channel ordering is the deadlock-avoidance contract: a controller
//! never originates traffic on a channel lower than or equal to one it is
//! blocked on, so unblocking traffic is never queued behind traffic that
//! itself requires unblocking.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::types::Level;
use crate::types::NodeId;
use crate::types::Value;

/// A logical message class with a delivery priority.
///
/// The derived ordering is the priority ordering: `Request` is the lowest,
/// `Unblock` the highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VirtualChannel {
    /// Misses, invalidations, downgrades.
    Request,
    /// Data and acknowledgments that unblock a requester.
    Response,
    /// Terminal acknowledgments.
    Unblock,
}

impl fmt::Display for VirtualChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualChannel::Request => write!(f, "REQ"),
            VirtualChannel::Response => write!(f, "RES"),
            VirtualChannel::Unblock => write!(f, "UNB"),
        }
    }
}

/// The coherence message vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MessageType {
    /// A copy of the line, authoritative for the receiver.
    Data,
    /// Terminal acknowledgment of an ownership grant.
    DataAck,
    /// Directive demoting an owner from `M` to `S`.
    Downgrade,
    /// Acknowledgment of a [`MessageType::Downgrade`].
    DowngradeAck,
    /// Read miss.
    GetS,
    /// Write miss.
    GetX,
    /// Data-less promotion request from `S` to `M`.
    Upgrade,
    /// Acknowledgment granting an [`MessageType::Upgrade`].
    UpgradeAck,
    /// Invalidation directive.
    Inv,
    /// Terminal acknowledgment of an [`MessageType::Inv`].
    InvAck,
    /// Writeback of a modified line; the data it carries is authoritative.
    PutX,
    /// Terminal acknowledgment of a [`MessageType::PutX`].
    PutAck,
    /// Reserved: replacements enter the model as rules, not wire messages.
    Replacement,
    /// Reserved: processor loads enter the model as rules.
    Load,
    /// Reserved: processor stores enter the model as rules.
    Store,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Data => "DATA",
            MessageType::DataAck => "DATA-ACK",
            MessageType::Downgrade => "DOWNGRADE",
            MessageType::DowngradeAck => "DOWNGRADE-ACK",
            MessageType::GetS => "GETS",
            MessageType::GetX => "GETX",
            MessageType::Upgrade => "UPGRADE",
            MessageType::UpgradeAck => "UPGRADE-ACK",
            MessageType::Inv => "INV",
            MessageType::InvAck => "INV-ACK",
            MessageType::PutX => "PUTX",
            MessageType::PutAck => "PUT-ACK",
            MessageType::Replacement => "REPLACEMENT",
            MessageType::Load => "LOAD",
            MessageType::Store => "STORE",
        };
        f.write_str(name)
    }
}

/// One in-flight message.
///
/// Messages addressed to the directory carry no destination level; messages
/// addressed to a socket name the controller within it. The source level is
/// preserved when a DC forwards traffic, so terminal acknowledgments route
/// past the DC to the controller that is actually waiting.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Message {
    /// What kind of message this is.
    pub mtype: MessageType,
    /// Destination node.
    pub dst: NodeId,
    /// Destination controller; `None` when addressed to the directory.
    pub dst_level: Option<Level>,
    /// Originating node.
    pub src: NodeId,
    /// Originating controller; `None` when the directory sent it.
    pub src_level: Option<Level>,
    /// Virtual channel the message travels on.
    pub vc: VirtualChannel,
    /// Line data, for message types that carry it.
    pub data: Option<Value>,
}

impl Message {
    /// The same message with socket identifiers renamed through `f`. Used by
    /// symmetry reduction.
    pub fn remap_sockets(&self, f: impl Fn(crate::types::SocketId) -> crate::types::SocketId) -> Message {
        let remap_node = |node: NodeId| match node {
            NodeId::Directory => NodeId::Directory,
            NodeId::Socket(s) => NodeId::Socket(f(s)),
        };
        Message {
            dst: remap_node(self.dst),
            src: remap_node(self.src),
            ..self.clone()
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mtype, self.src)?;
        if let Some(level) = self.src_level {
            write!(f, "/{level}")?;
        }
        write!(f, " -> {}", self.dst)?;
        if let Some(level) = self.dst_level {
            write!(f, "/{level}")?;
        }
        write!(f, " [{}]", self.vc)?;
        if let Some(value) = self.data {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}
