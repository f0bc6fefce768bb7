//! Fatal failure taxonomy.
//!
//! The model distinguishes two kinds of failure. Expected stalls are not
//! errors: a controller that cannot legally absorb a message leaves it in the
//! mailbox and the step simply does not happen. Everything in this module is
//! the other kind: a protocol violation that must halt the harness with a
//! diagnostic naming the state, the event, and the offending node. There is
//! no retry and no soft-fail path: any of these means the protocol (or the
//! model of it) is wrong.

use thiserror::Error;

use crate::invariants::InvariantViolation;
use crate::message::Message;
use crate::types::NodeId;
use crate::types::SocketId;
use crate::types::Value;

/// A fatal protocol violation.
#[derive(Debug, Error, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolError {
    /// A controller received a message its current state does not enumerate.
    #[error("unhandled message at {node}/{controller} in state {state}: {message}")]
    Unhandled {
        /// Node the message was delivered to.
        node: NodeId,
        /// Controller within the node ("directory", "DC", "LLC").
        controller: &'static str,
        /// State tag the controller was in.
        state: &'static str,
        /// The offending message.
        message: Message,
    },

    /// A send would overflow the destination mailbox. The capacity bound is
    /// an obligation on the protocol itself: a trace that reaches this is a
    /// design bug, not a transient condition.
    #[error("mailbox for {dst} is full (capacity {capacity})")]
    MailboxFull {
        /// Destination whose mailbox is full.
        dst: NodeId,
        /// The configured per-node capacity.
        capacity: usize,
    },

    /// A read completed with a value other than the most recent committed
    /// write.
    #[error("{socket} observed {observed} but the last committed write was {expected}")]
    ScViolation {
        /// Socket whose read completed.
        socket: SocketId,
        /// Value the read observed.
        observed: Value,
        /// The auxiliary last-written value.
        expected: Value,
    },

    /// A GETX arrived from the sole sharer of a shared line. A lone sharer
    /// issues UPGRADE, so well-formed traces never produce this.
    #[error("GETX from {requester} as the sole sharer; a lone sharer upgrades instead")]
    LoneSharerWrite {
        /// The socket that issued the GETX.
        requester: SocketId,
    },

    /// A message carried no data where the receiver requires it.
    #[error("{message} carries no data but the receiver requires it")]
    MissingData {
        /// The offending message.
        message: Message,
    },

    /// Bookkeeping reached a configuration the state machine cannot
    /// represent. Indicates a bug in the model itself.
    #[error("corrupt state at {node} in {state}: {detail}")]
    CorruptState {
        /// Node whose record is corrupt.
        node: NodeId,
        /// State tag at the time of detection.
        state: &'static str,
        /// What was wrong.
        detail: &'static str,
    },

    /// Every candidate rule stalled while messages remain in flight. The
    /// protocol is supposed to make this impossible under any scheduler.
    #[error("no rule can make progress with {pending} messages in flight")]
    Stuck {
        /// Number of undelivered messages.
        pending: usize,
    },
}

/// Any fatal outcome of a step: a protocol violation or a broken invariant.
#[derive(Debug, Error, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fault {
    /// The step itself was illegal.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The step completed but left the machine in a state that breaks a
    /// quiescent invariant.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}
