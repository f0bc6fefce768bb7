//! DRAM-cache controller.
//!
//! One per socket. The DC caches the line for its socket and interposes
//! between the LLC and the directory: local requests it can serve are served
//! from its copy, everything else is filtered, forwarded, or aggregated.
//! Unlike the directory, the DC never stalls: every message that can reach
//! it in a given state is either enumerated or fatal.

use crate::error::ProtocolError;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::VirtualChannel;
use crate::types::Level;
use crate::types::NodeId;
use crate::types::SocketId;
use crate::types::Value;

/// DC state tags. `I`, `S`, and `M` are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DcState {
    /// Nothing cached.
    I,
    /// Read miss forwarded to the directory, fill pending.
    Is,
    /// Fill pending but already invalidated in flight.
    IsI,
    /// Write miss forwarded to the directory, fill pending.
    Im,
    /// Clean copy cached; local GETS can be served without the directory.
    S,
    /// The socket owns the line; the LLC above holds the newest data.
    M,
    /// GETX issued out of `S`, waiting for data.
    Sm,
    /// UPGRADE issued, waiting for data or the upgrade grant.
    SmU,
}

impl DcState {
    /// Wire-table name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            DcState::I => "I",
            DcState::Is => "IS",
            DcState::IsI => "IS_I",
            DcState::Im => "IM",
            DcState::S => "S",
            DcState::M => "M",
            DcState::Sm => "SM",
            DcState::SmU => "SM_U",
        }
    }
}

/// The per-socket DRAM-cache record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DramCache {
    /// Socket this DC belongs to.
    pub socket: SocketId,
    /// Current state tag.
    pub state: DcState,
    /// Cached value; live outside `I`-lineage states.
    pub data: Option<Value>,
}

impl DramCache {
    /// A fresh, empty DC for `socket`.
    pub fn new(socket: SocketId) -> Self {
        Self {
            socket,
            state: DcState::I,
            data: None,
        }
    }

    /// Silent eviction of a clean copy. Only legal in `S`.
    pub fn replace(&self) -> Result<DramCache, ProtocolError> {
        if self.state != DcState::S {
            return Err(self.corrupt("replacement outside S"));
        }
        let mut next = self.clone();
        next.state = DcState::I;
        next.data = None;
        Ok(next)
    }

    /// Handle one delivered message.
    pub fn handle(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match self.state {
            DcState::I => self.in_i(msg),
            DcState::Is => self.in_is(msg),
            DcState::IsI => self.in_is_i(msg),
            DcState::Im => self.in_im(msg),
            DcState::S => self.in_s(msg),
            DcState::M => self.in_m(msg),
            DcState::Sm => self.in_sm(msg),
            DcState::SmU => self.in_sm_u(msg),
        }
    }

    fn in_i(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            MessageType::GetS => Ok((
                self.with_state(DcState::Is),
                vec![self.miss(MessageType::GetS)],
            )),
            MessageType::GetX => Ok((
                self.with_state(DcState::Im),
                vec![self.miss(MessageType::GetX)],
            )),
            // Legal from `I`: the LLC can sit in S after this DC already
            // evicted its copy.
            MessageType::Upgrade => Ok((
                self.with_state(DcState::SmU),
                vec![self.miss(MessageType::Upgrade)],
            )),
            // Caching the writeback here would leave this socket holding
            // S-state data the directory does not track.
            MessageType::PutX => Ok((self.clone(), vec![self.forward_putx(msg)?])),
            MessageType::Inv => Ok((self.clone(), vec![self.forward_to_llc(msg)])),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_is(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            MessageType::Data => {
                let mut next = self.with_state(DcState::S);
                next.data = msg.data;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            MessageType::Inv => Ok((
                self.with_state(DcState::IsI),
                vec![self.forward_to_llc(msg)],
            )),
            // Race: the LLC's eviction arrived after this DC forwarded its
            // request.
            MessageType::PutX => Ok((self.clone(), vec![self.forward_putx(msg)?])),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_is_i(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            // The fill is dead on arrival: pass it up without caching.
            MessageType::Data => Ok((self.with_state(DcState::I), vec![self.forward_to_llc(msg)])),
            MessageType::Inv => Ok((self.clone(), vec![self.inv_ack(msg)])),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_im(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            MessageType::Data => {
                let mut next = self.with_state(DcState::M);
                next.data = msg.data;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            MessageType::PutX => Ok((self.clone(), vec![self.forward_putx(msg)?])),
            // The LLC is gaining exclusivity; nothing will be cached on this
            // path, so ack directly.
            MessageType::Inv => Ok((self.clone(), vec![self.inv_ack(msg)])),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_s(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            MessageType::GetS => {
                let data = self.data.ok_or_else(|| self.corrupt("S without data"))?;
                let fill = Message {
                    mtype: MessageType::Data,
                    dst: NodeId::Socket(self.socket),
                    dst_level: Some(Level::Llc),
                    src: NodeId::Socket(self.socket),
                    src_level: Some(Level::Dc),
                    vc: VirtualChannel::Response,
                    data: Some(data),
                };
                Ok((self.clone(), vec![fill]))
            }
            // GETX rather than UPGRADE: the local copy may be stale against a
            // racing writer, so data must travel.
            MessageType::GetX => Ok((
                self.with_state(DcState::Sm),
                vec![self.miss(MessageType::GetX)],
            )),
            MessageType::Upgrade => Ok((
                self.with_state(DcState::SmU),
                vec![self.miss(MessageType::Upgrade)],
            )),
            MessageType::Inv => {
                let mut next = self.with_state(DcState::I);
                next.data = None;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_m(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            // The LLC relinquishes: its data is the newest.
            MessageType::PutX => {
                let mut next = self.with_state(DcState::S);
                next.data = Some(msg.data.ok_or(ProtocolError::MissingData {
                    message: msg.clone(),
                })?);
                Ok((next, vec![self.forward_putx(msg)?]))
            }
            MessageType::Inv => {
                let mut next = self.with_state(DcState::I);
                next.data = None;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_sm(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            MessageType::Data => {
                let mut next = self.with_state(DcState::M);
                next.data = msg.data;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            MessageType::Inv => {
                let mut next = self.with_state(DcState::Im);
                next.data = None;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_sm_u(&self, msg: &Message) -> Result<(DramCache, Vec<Message>), ProtocolError> {
        match msg.mtype {
            MessageType::Data => {
                let mut next = self.with_state(DcState::M);
                next.data = msg.data;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            MessageType::UpgradeAck => {
                Ok((self.with_state(DcState::M), vec![self.forward_to_llc(msg)]))
            }
            MessageType::Inv => {
                let mut next = self.with_state(DcState::Im);
                next.data = None;
                Ok((next, vec![self.forward_to_llc(msg)]))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn with_state(&self, state: DcState) -> DramCache {
        let mut next = self.clone();
        next.state = state;
        next
    }

    /// A miss of the given flavour, originated by this DC.
    fn miss(&self, mtype: MessageType) -> Message {
        Message {
            mtype,
            dst: NodeId::Directory,
            dst_level: None,
            src: NodeId::Socket(self.socket),
            src_level: Some(Level::Dc),
            vc: VirtualChannel::Request,
            data: None,
        }
    }

    /// Forward the LLC's writeback to the directory on the response channel,
    /// preserving the original source so the PUT-ACK routes past this DC.
    fn forward_putx(&self, msg: &Message) -> Result<Message, ProtocolError> {
        let data = msg.data.ok_or(ProtocolError::MissingData {
            message: msg.clone(),
        })?;
        Ok(Message {
            mtype: MessageType::PutX,
            dst: NodeId::Directory,
            dst_level: None,
            src: msg.src,
            src_level: msg.src_level,
            vc: VirtualChannel::Response,
            data: Some(data),
        })
    }

    /// Pass a message up to the local LLC, preserving the original source so
    /// terminal acks go straight back to it.
    fn forward_to_llc(&self, msg: &Message) -> Message {
        Message {
            mtype: msg.mtype,
            dst: NodeId::Socket(self.socket),
            dst_level: Some(Level::Llc),
            src: msg.src,
            src_level: msg.src_level,
            vc: msg.vc,
            data: msg.data,
        }
    }

    /// Acknowledge an invalidation directly from this DC.
    fn inv_ack(&self, msg: &Message) -> Message {
        Message {
            mtype: MessageType::InvAck,
            dst: msg.src,
            dst_level: None,
            src: NodeId::Socket(self.socket),
            src_level: Some(Level::Dc),
            vc: VirtualChannel::Unblock,
            data: None,
        }
    }

    fn unhandled(&self, msg: &Message) -> ProtocolError {
        ProtocolError::Unhandled {
            node: NodeId::Socket(self.socket),
            controller: "DC",
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

#[cfg(test)]
mod tests {
    use super::*;

    fn from_llc(mtype: MessageType, data: Option<Value>) -> Message {
        Message {
            mtype,
            dst: NodeId::Socket(SocketId(0)),
            dst_level: Some(Level::Dc),
            src: NodeId::Socket(SocketId(0)),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Request,
            data,
        }
    }

    fn from_directory(mtype: MessageType, data: Option<Value>) -> Message {
        Message {
            mtype,
            dst: NodeId::Socket(SocketId(0)),
            dst_level: Some(Level::Dc),
            src: NodeId::Directory,
            src_level: None,
            vc: match mtype {
                MessageType::Inv => VirtualChannel::Request,
                _ => VirtualChannel::Response,
            },
            data,
        }
    }

    #[test]
    fn read_miss_forwards_to_directory() {
        let dc = DramCache::new(SocketId(0));
        let (dc, out) = dc.handle(&from_llc(MessageType::GetS, None)).unwrap();
        assert_eq!(dc.state, DcState::Is);
        assert_eq!(out[0].mtype, MessageType::GetS);
        assert_eq!(out[0].dst, NodeId::Directory);
        assert_eq!(out[0].src_level, Some(Level::Dc));
    }

    #[test]
    fn fill_caches_and_passes_up() {
        let dc = DramCache::new(SocketId(0));
        let (dc, _) = dc.handle(&from_llc(MessageType::GetS, None)).unwrap();
        let (dc, out) = dc
            .handle(&from_directory(MessageType::Data, Some(Value(1))))
            .unwrap();
        assert_eq!(dc.state, DcState::S);
        assert_eq!(dc.data, Some(Value(1)));
        assert_eq!(out[0].mtype, MessageType::Data);
        assert_eq!(out[0].dst_level, Some(Level::Llc));
    }

    #[test]
    fn invalidated_fill_passes_up_without_caching() {
        let dc = DramCache::new(SocketId(0));
        let (dc, _) = dc.handle(&from_llc(MessageType::GetS, None)).unwrap();
        let (dc, out) = dc.handle(&from_directory(MessageType::Inv, None)).unwrap();
        assert_eq!(dc.state, DcState::IsI);
        assert_eq!(out[0].mtype, MessageType::Inv);
        assert_eq!(out[0].src, NodeId::Directory);

        let (dc, out) = dc
            .handle(&from_directory(MessageType::Data, Some(Value(1))))
            .unwrap();
        assert_eq!(dc.state, DcState::I);
        assert_eq!(dc.data, None);
        assert_eq!(out[0].dst_level, Some(Level::Llc));
    }

    #[test]
    fn second_inv_during_dead_fill_is_acked_directly() {
        let mut dc = DramCache::new(SocketId(0));
        dc.state = DcState::IsI;
        let (dc, out) = dc.handle(&from_directory(MessageType::Inv, None)).unwrap();
        assert_eq!(dc.state, DcState::IsI);
        assert_eq!(out[0].mtype, MessageType::InvAck);
        assert_eq!(out[0].dst, NodeId::Directory);
    }

    #[test]
    fn local_hit_is_served_without_the_directory() {
        let mut dc = DramCache::new(SocketId(0));
        dc.state = DcState::S;
        dc.data = Some(Value(1));
        let (dc, out) = dc.handle(&from_llc(MessageType::GetS, None)).unwrap();
        assert_eq!(dc.state, DcState::S);
        assert_eq!(out[0].mtype, MessageType::Data);
        assert_eq!(out[0].data, Some(Value(1)));
        assert_eq!(out[0].src_level, Some(Level::Dc));
    }

    #[test]
    fn local_getx_goes_back_through_the_directory() {
        let mut dc = DramCache::new(SocketId(0));
        dc.state = DcState::S;
        dc.data = Some(Value(1));
        let (dc, out) = dc.handle(&from_llc(MessageType::GetX, None)).unwrap();
        assert_eq!(dc.state, DcState::Sm);
        assert_eq!(out[0].mtype, MessageType::GetX);
        assert_eq!(out[0].dst, NodeId::Directory);
    }

    #[test]
    fn writeback_in_i_is_forwarded_not_cached() {
        let dc = DramCache::new(SocketId(0));
        let (dc, out) = dc
            .handle(&from_llc(MessageType::PutX, Some(Value(1))))
            .unwrap();
        assert_eq!(dc.state, DcState::I);
        assert_eq!(dc.data, None);
        assert_eq!(out[0].dst, NodeId::Directory);
        assert_eq!(out[0].vc, VirtualChannel::Response);
        assert_eq!(out[0].src_level, Some(Level::Llc));
    }

    #[test]
    fn writeback_in_m_refreshes_the_copy_and_demotes() {
        let mut dc = DramCache::new(SocketId(0));
        dc.state = DcState::M;
        dc.data = Some(Value(0));
        let (dc, out) = dc
            .handle(&from_llc(MessageType::PutX, Some(Value(1))))
            .unwrap();
        assert_eq!(dc.state, DcState::S);
        assert_eq!(dc.data, Some(Value(1)));
        assert_eq!(out[0].dst, NodeId::Directory);
    }

    #[test]
    fn upgrade_grant_is_forwarded_up() {
        let mut dc = DramCache::new(SocketId(0));
        dc.state = DcState::S;
        dc.data = Some(Value(0));
        let (dc, _) = dc.handle(&from_llc(MessageType::Upgrade, None)).unwrap();
        assert_eq!(dc.state, DcState::SmU);
        let (dc, out) = dc
            .handle(&from_directory(MessageType::UpgradeAck, None))
            .unwrap();
        assert_eq!(dc.state, DcState::M);
        assert_eq!(out[0].mtype, MessageType::UpgradeAck);
        assert_eq!(out[0].dst_level, Some(Level::Llc));
    }

    #[test]
    fn lost_upgrade_falls_back_to_write_miss() {
        let mut dc = DramCache::new(SocketId(0));
        dc.state = DcState::SmU;
        dc.data = Some(Value(0));
        let (dc, out) = dc.handle(&from_directory(MessageType::Inv, None)).unwrap();
        assert_eq!(dc.state, DcState::Im);
        assert_eq!(dc.data, None);
        assert_eq!(out[0].mtype, MessageType::Inv);
        assert_eq!(out[0].dst_level, Some(Level::Llc));
    }

    #[test]
    fn stray_data_in_i_is_fatal() {
        let dc = DramCache::new(SocketId(0));
        let err = dc
            .handle(&from_directory(MessageType::Data, Some(Value(0))))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unhandled { .. }));
    }
}
