//! Last-level cache controller.
//!
//! The LLC is the endpoint the processor sees. Processor loads and stores
//! enter here as environment rules; the LLC translates misses into requests
//! to its local DC, consumes the responses, and carries the pending-write
//! register that holds a store's value for the duration of a write miss or
//! upgrade.
//!
//! Every read completion is an SC-per-location observation point: the value
//! the processor sees must equal the auxiliary last-written value, and every
//! committed store advances it. A mismatch is fatal.
//!
//! The LLC never stalls. Each handler either consumes the message or reports
//! a protocol violation.

use crate::error::ProtocolError;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::VirtualChannel;
use crate::types::Level;
use crate::types::NodeId;
use crate::types::SocketId;
use crate::types::Value;

/// LLC state tags. `I`, `S`, and `M` are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LlcState {
    /// Nothing cached.
    I,
    /// Read miss outstanding.
    Is,
    /// Read miss outstanding but the fill is already dead: it will be
    /// discarded on arrival.
    IsI,
    /// Write miss outstanding; the pending-write register is live.
    Im,
    /// Write miss outstanding, but a downgrade already claimed the line: the
    /// fill will be committed and immediately written back.
    ImS,
    /// Clean read-only copy.
    S,
    /// Upgrade outstanding; the pending-write register is live.
    Sm,
    /// Exclusive dirty copy. This LLC is authoritative.
    M,
    /// Writeback outstanding, waiting for its PUT-ACK.
    Mi,
    /// Demotion writeback outstanding, waiting for its PUT-ACK.
    Ms,
}

impl LlcState {
    /// Wire-table name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            LlcState::I => "I",
            LlcState::Is => "IS",
            LlcState::IsI => "IS_I",
            LlcState::Im => "IM",
            LlcState::ImS => "IM_S",
            LlcState::S => "S",
            LlcState::Sm => "SM",
            LlcState::M => "M",
            LlcState::Mi => "MI",
            LlcState::Ms => "MS",
        }
    }

    /// True for `I`, `S`, and `M`, the states where processor events are
    /// accepted.
    pub fn is_stable(&self) -> bool {
        matches!(self, LlcState::I | LlcState::S | LlcState::M)
    }
}

/// The per-socket LLC record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Llc {
    /// Socket this LLC belongs to.
    pub socket: SocketId,
    /// Current state tag.
    pub state: LlcState,
    /// Cached value; live outside `I`-lineage states.
    pub data: Option<Value>,
    /// The value the processor intends to store, held across a write miss or
    /// upgrade and consumed on DATA or UPGRADE-ACK.
    pub pending_write: Option<Value>,
}

/// Outcome of one LLC step: the successor record, outbound messages, and the
/// new last-written value when a store committed.
pub type LlcStep = (Llc, Vec<Message>, Option<Value>);

impl Llc {
    /// A fresh, empty LLC for `socket`.
    pub fn new(socket: SocketId) -> Self {
        Self {
            socket,
            state: LlcState::I,
            data: None,
            pending_write: None,
        }
    }

    /// Processor load. In `I` this opens a read miss; in `S` and `M` it
    /// completes immediately against the SC check.
    pub fn load(&self, last_written: Value) -> Result<(Llc, Vec<Message>), ProtocolError> {
        match self.state {
            LlcState::I => Ok((
                self.with_state(LlcState::Is),
                vec![self.to_local_dc(MessageType::GetS, VirtualChannel::Request, None)],
            )),
            LlcState::S | LlcState::M => {
                self.observe(last_written)?;
                Ok((self.clone(), Vec::new()))
            }
            _ => Err(self.corrupt("load outside a stable state")),
        }
    }

    /// Processor store of `value`. Stores observe nothing; the SC check
    /// happens when the miss or upgrade completes.
    pub fn store(&self, value: Value) -> Result<LlcStep, ProtocolError> {
        match self.state {
            LlcState::I => {
                let mut next = self.with_state(LlcState::Im);
                next.pending_write = Some(value);
                Ok((
                    next,
                    vec![self.to_local_dc(MessageType::GetX, VirtualChannel::Request, None)],
                    None,
                ))
            }
            LlcState::S => {
                let mut next = self.with_state(LlcState::Sm);
                next.pending_write = Some(value);
                Ok((
                    next,
                    vec![self.to_local_dc(MessageType::Upgrade, VirtualChannel::Request, None)],
                    None,
                ))
            }
            LlcState::M => {
                let mut next = self.clone();
                next.data = Some(value);
                Ok((next, Vec::new(), Some(value)))
            }
            _ => Err(self.corrupt("store outside a stable state")),
        }
    }

    /// Cache replacement. Silent in `S`; in `M` the dirty line is written
    /// back through the local DC.
    pub fn replace(&self) -> Result<(Llc, Vec<Message>), ProtocolError> {
        match self.state {
            LlcState::S => {
                let mut next = self.with_state(LlcState::I);
                next.data = None;
                Ok((next, Vec::new()))
            }
            LlcState::M => {
                let data = self.data.ok_or_else(|| self.corrupt("M without data"))?;
                let mut next = self.with_state(LlcState::Mi);
                next.data = None;
                Ok((
                    next,
                    vec![self.to_local_dc(
                        MessageType::PutX,
                        VirtualChannel::Request,
                        Some(data),
                    )],
                ))
            }
            _ => Err(self.corrupt("replacement outside S or M")),
        }
    }

    /// Handle one delivered message.
    pub fn handle(&self, msg: &Message, last_written: Value) -> Result<LlcStep, ProtocolError> {
        match self.state {
            LlcState::I => self.in_i(msg),
            LlcState::Is => self.in_is(msg, last_written),
            LlcState::IsI => self.in_is_i(msg),
            LlcState::Im => self.in_im(msg, last_written),
            LlcState::ImS => self.in_im_s(msg, last_written),
            LlcState::S => self.in_s(msg),
            LlcState::Sm => self.in_sm(msg, last_written),
            LlcState::M => self.in_m(msg),
            LlcState::Mi => self.in_mi(msg),
            LlcState::Ms => self.in_ms(msg),
        }
    }

    fn in_i(&self, msg: &Message) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            // An idle socket still participates in broadcasts.
            MessageType::Inv => Ok((self.clone(), vec![self.inv_ack(msg)], None)),
            // A PUT-ACK landing here means an invalidation was absorbed
            // silently in MI; the ack owed for it is settled now.
            MessageType::PutAck => Ok((self.clone(), vec![self.inv_ack(msg)], None)),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_is(&self, msg: &Message, last_written: Value) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            MessageType::Data => {
                let observed = self.fill_data(msg)?;
                if observed != last_written {
                    return Err(ProtocolError::ScViolation {
                        socket: self.socket,
                        observed,
                        expected: last_written,
                    });
                }
                let mut next = self.with_state(LlcState::S);
                next.data = Some(observed);
                Ok((next, Vec::new(), None))
            }
            MessageType::Inv | MessageType::PutAck => Ok((
                self.with_state(LlcState::IsI),
                vec![self.inv_ack(msg)],
                None,
            )),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_is_i(&self, msg: &Message) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            // The fill is dead; dropping it is SC-legal because the read
            // re-issues from I and observes the then-current value.
            MessageType::Data => Ok((self.with_state(LlcState::I), Vec::new(), None)),
            MessageType::Inv | MessageType::PutAck => {
                Ok((self.clone(), vec![self.inv_ack(msg)], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_im(&self, msg: &Message, last_written: Value) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            MessageType::Data => self.commit_store(msg, last_written, LlcState::M, true),
            MessageType::Downgrade => Ok((
                self.with_state(LlcState::ImS),
                vec![self.downgrade_ack(msg)],
                None,
            )),
            MessageType::Inv | MessageType::PutAck => {
                Ok((self.clone(), vec![self.inv_ack(msg)], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_im_s(&self, msg: &Message, last_written: Value) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            // Commit, then immediately write the line back: the downgrade
            // that claimed it is already acknowledged.
            MessageType::Data => {
                let (next, _, committed) =
                    self.commit_store(msg, last_written, LlcState::Ms, false)?;
                let data = next.data.ok_or_else(|| self.corrupt("commit left no data"))?;
                let putx =
                    self.to_local_dc(MessageType::PutX, VirtualChannel::Response, Some(data));
                Ok((next, vec![putx], committed))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_s(&self, msg: &Message) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            MessageType::Inv => {
                let mut next = self.with_state(LlcState::I);
                next.data = None;
                Ok((next, vec![self.inv_ack(msg)], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_sm(&self, msg: &Message, last_written: Value) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            MessageType::Data => self.commit_store(msg, last_written, LlcState::M, true),
            MessageType::UpgradeAck => {
                let observed = self.data.ok_or_else(|| self.corrupt("SM without data"))?;
                if observed != last_written {
                    return Err(ProtocolError::ScViolation {
                        socket: self.socket,
                        observed,
                        expected: last_written,
                    });
                }
                let value = self
                    .pending_write
                    .ok_or_else(|| self.corrupt("SM without a pending write"))?;
                let mut next = self.with_state(LlcState::M);
                next.data = Some(value);
                next.pending_write = None;
                Ok((next, vec![self.data_ack()], Some(value)))
            }
            // Upgrade lost the race; fall back to a full write miss. The
            // pending write stays armed.
            MessageType::Inv => {
                let mut next = self.with_state(LlcState::Im);
                next.data = None;
                Ok((next, vec![self.inv_ack(msg)], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_m(&self, msg: &Message) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            MessageType::Downgrade => {
                let data = self.data.ok_or_else(|| self.corrupt("M without data"))?;
                let putx =
                    self.to_local_dc(MessageType::PutX, VirtualChannel::Response, Some(data));
                Ok((
                    self.with_state(LlcState::Ms),
                    vec![putx, self.downgrade_ack(msg)],
                    None,
                ))
            }
            // Invalidation of an owner: the data travels straight back to the
            // directory, no terminal ack beyond the writeback itself.
            MessageType::Inv => {
                let data = self.data.ok_or_else(|| self.corrupt("M without data"))?;
                let putx = Message {
                    mtype: MessageType::PutX,
                    dst: NodeId::Directory,
                    dst_level: None,
                    src: NodeId::Socket(self.socket),
                    src_level: Some(Level::Llc),
                    vc: VirtualChannel::Response,
                    data: Some(data),
                };
                let mut next = self.with_state(LlcState::I);
                next.data = None;
                Ok((next, vec![putx], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_mi(&self, msg: &Message) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            // An invalidation is absorbed silently: the writeback already in
            // flight carries the data, and the ack owed here is settled when
            // the stale PUT-ACK eventually lands in I.
            MessageType::Inv | MessageType::PutAck => {
                Ok((self.with_state(LlcState::I), Vec::new(), None))
            }
            MessageType::Downgrade => {
                Ok((self.clone(), vec![self.downgrade_ack(msg)], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_ms(&self, msg: &Message) -> Result<LlcStep, ProtocolError> {
        match msg.mtype {
            MessageType::PutAck => Ok((self.with_state(LlcState::S), Vec::new(), None)),
            MessageType::Inv => {
                let mut next = self.with_state(LlcState::Mi);
                next.data = None;
                Ok((next, vec![self.inv_ack(msg)], None))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    /// Commit the pending write against an arriving fill: the fill must carry
    /// the last committed value, and the pending value becomes the new
    /// last-written.
    fn commit_store(
        &self,
        msg: &Message,
        last_written: Value,
        target: LlcState,
        ack: bool,
    ) -> Result<LlcStep, ProtocolError> {
        let observed = self.fill_data(msg)?;
        if observed != last_written {
            return Err(ProtocolError::ScViolation {
                socket: self.socket,
                observed,
                expected: last_written,
            });
        }
        let value = self
            .pending_write
            .ok_or_else(|| self.corrupt("write miss without a pending write"))?;
        let mut next = self.with_state(target);
        next.data = Some(value);
        next.pending_write = None;
        let out = if ack { vec![self.data_ack()] } else { Vec::new() };
        Ok((next, out, Some(value)))
    }

    /// SC check for an immediate read hit.
    fn observe(&self, last_written: Value) -> Result<Value, ProtocolError> {
        let observed = self
            .data
            .ok_or_else(|| self.corrupt("readable state without data"))?;
        if observed != last_written {
            return Err(ProtocolError::ScViolation {
                socket: self.socket,
                observed,
                expected: last_written,
            });
        }
        Ok(observed)
    }

    fn fill_data(&self, msg: &Message) -> Result<Value, ProtocolError> {
        msg.data.ok_or(ProtocolError::MissingData {
            message: msg.clone(),
        })
    }

    fn with_state(&self, state: LlcState) -> Llc {
        let mut next = self.clone();
        next.state = state;
        next
    }

    fn to_local_dc(
        &self,
        mtype: MessageType,
        vc: VirtualChannel,
        data: Option<Value>,
    ) -> Message {
        Message {
            mtype,
            dst: NodeId::Socket(self.socket),
            dst_level: Some(Level::Dc),
            src: NodeId::Socket(self.socket),
            src_level: Some(Level::Llc),
            vc,
            data,
        }
    }

    fn inv_ack(&self, msg: &Message) -> Message {
        Message {
            mtype: MessageType::InvAck,
            dst: msg.src,
            dst_level: None,
            src: NodeId::Socket(self.socket),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Unblock,
            data: None,
        }
    }

    fn downgrade_ack(&self, msg: &Message) -> Message {
        Message {
            mtype: MessageType::DowngradeAck,
            dst: msg.src,
            dst_level: None,
            src: NodeId::Socket(self.socket),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Unblock,
            data: None,
        }
    }

    fn data_ack(&self) -> Message {
        Message {
            mtype: MessageType::DataAck,
            dst: NodeId::Directory,
            dst_level: None,
            src: NodeId::Socket(self.socket),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Unblock,
            data: None,
        }
    }

    fn unhandled(&self, msg: &Message) -> ProtocolError {
        ProtocolError::Unhandled {
            node: NodeId::Socket(self.socket),
            controller: "LLC",
            state: self.state.name(),
            message: msg.clone(),
        }
    }

    fn corrupt(&self, detail: &'static str) -> ProtocolError {
        ProtocolError::CorruptState {
            node: NodeId::Socket(self.socket),
            state: self.state.name(),
            detail,
        }
    }
}
