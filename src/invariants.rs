//! Universally quantified safety checks.
//!
//! Every check here must hold at quiescence between steps; the harness runs
//! them after every applied rule. The SC-per-location property is not in this
//! module: it is enforced at the observation points inside the LLC handlers
//! and surfaces as [`crate::error::ProtocolError::ScViolation`].

use thiserror::Error;

use crate::directory::DirState;
use crate::dram_cache::DcState;
use crate::llc::LlcState;
use crate::message::Message;
use crate::system::System;
use crate::types::SocketId;

/// A broken structural invariant. Always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvariantViolation {
    /// Two sockets hold conflicting permissions on the line.
    #[error("{writer} holds M while {other} holds {other_state}")]
    Swmr {
        /// The socket in `M`.
        writer: SocketId,
        /// The conflicting socket.
        other: SocketId,
        /// The conflicting socket's LLC state.
        other_state: &'static str,
    },

    /// The directory tracks sharers in a state that must have none.
    #[error("directory is {state} but the sharer set is not empty")]
    SharersNotEmpty {
        /// The offending directory state.
        state: &'static str,
    },

    /// The directory records an owner in a state that must have none.
    #[error("directory is {state} but an owner is recorded")]
    OwnerDefined {
        /// The offending directory state.
        state: &'static str,
    },

    /// An invalid LLC still holds data.
    #[error("{socket} LLC is I but holds data")]
    LlcDataInI {
        /// The offending socket.
        socket: SocketId,
    },

    /// An invalid DC still holds data.
    #[error("{socket} DC is I but holds data")]
    DcDataInI {
        /// The offending socket.
        socket: SocketId,
    },

    /// A directory-bound message names a destination controller.
    #[error("directory-bound message carries a destination level: {message}")]
    DirectoryAddressing {
        /// The offending message.
        message: Message,
    },

    /// The outstanding-ack counter left its `0..=2N` range.
    #[error("directory ack counter {value} exceeds {max}")]
    AckCounterRange {
        /// The observed counter value.
        value: u8,
        /// The permitted maximum (twice the socket count).
        max: u8,
    },
}

/// Run every invariant.
pub fn check(system: &System) -> Result<(), InvariantViolation> {
    swmr(system)?;
    sharer_cleanliness(system)?;
    owner_cleanliness(system)?;
    llc_data_clean(system)?;
    dc_data_clean(system)?;
    directory_addressing(system)?;
    ack_counter_range(system)?;
    Ok(())
}

/// Single writer, multiple readers: an LLC in `M` excludes every other LLC
/// from both `M` and `S`.
pub fn swmr(system: &System) -> Result<(), InvariantViolation> {
    for writer in &system.sockets {
        if writer.llc.state != LlcState::M {
            continue;
        }
        for other in &system.sockets {
            if other.llc.socket == writer.llc.socket {
                continue;
            }
            if matches!(other.llc.state, LlcState::M | LlcState::S) {
                return Err(InvariantViolation::Swmr {
                    writer: writer.llc.socket,
                    other: other.llc.socket,
                    other_state: other.llc.state.name(),
                });
            }
        }
    }
    Ok(())
}

/// The sharer set is empty whenever the directory is in `M` or `I`.
pub fn sharer_cleanliness(system: &System) -> Result<(), InvariantViolation> {
    let dir = &system.directory;
    if matches!(dir.state, DirState::M | DirState::I) && !dir.sharers.is_empty() {
        return Err(InvariantViolation::SharersNotEmpty {
            state: dir.state.name(),
        });
    }
    Ok(())
}

/// The owner is undefined whenever the directory is in `S` or `I`.
pub fn owner_cleanliness(system: &System) -> Result<(), InvariantViolation> {
    let dir = &system.directory;
    if matches!(dir.state, DirState::S | DirState::I) && dir.owner.is_some() {
        return Err(InvariantViolation::OwnerDefined {
            state: dir.state.name(),
        });
    }
    Ok(())
}

/// An LLC in `I` holds no data.
pub fn llc_data_clean(system: &System) -> Result<(), InvariantViolation> {
    for socket in &system.sockets {
        if socket.llc.state == LlcState::I && socket.llc.data.is_some() {
            return Err(InvariantViolation::LlcDataInI {
                socket: socket.llc.socket,
            });
        }
    }
    Ok(())
}

/// A DC in `I` holds no data.
pub fn dc_data_clean(system: &System) -> Result<(), InvariantViolation> {
    for socket in &system.sockets {
        if socket.dc.state == DcState::I && socket.dc.data.is_some() {
            return Err(InvariantViolation::DcDataInI {
                socket: socket.dc.socket,
            });
        }
    }
    Ok(())
}

/// Every in-flight message bound for the directory has no destination level.
pub fn directory_addressing(system: &System) -> Result<(), InvariantViolation> {
    for (_, message) in system.network.deliverable() {
        if message.dst == crate::types::NodeId::Directory && message.dst_level.is_some() {
            return Err(InvariantViolation::DirectoryAddressing {
                message: message.clone(),
            });
        }
    }
    Ok(())
}

/// The directory's outstanding-ack counter stays within `0..=2N`.
pub fn ack_counter_range(system: &System) -> Result<(), InvariantViolation> {
    let max = 2 * system.config.sockets;
    if system.directory.need_acks > max {
        return Err(InvariantViolation::AckCounterRange {
            value: system.directory.need_acks,
            max,
        });
    }
    Ok(())
}
