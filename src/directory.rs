//! Home directory controller.
//!
//! The directory resolves read and write misses, serialises ownership
//! transfer, and scopes invalidations with its sharer set. It holds the
//! authoritative copy of the line while no socket owns it; in `M` the owner's
//! LLC is authoritative and the directory's copy is stale until the next
//! writeback.
//!
//! Handlers are pure: they take the current record and a message and return
//! either the successor record plus outbound messages, a stall (the message
//! stays in the mailbox, nothing changed), or a fatal protocol violation.
//! Requests that arrive while the directory is in a transient state stall;
//! anything not enumerated for a state is fatal.

use std::collections::BTreeSet;

use crate::error::ProtocolError;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::VirtualChannel;
use crate::types::Level;
use crate::types::NodeId;
use crate::types::SocketId;
use crate::types::Value;

/// Directory state tags. `I`, `S`, and `M` are stable; everything else is a
/// transient entered on a request and left on its acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirState {
    /// No tracked copies. The directory's data is authoritative.
    I,
    /// Write miss from `I`: invalidations broadcast, collecting INV-ACKs.
    ImIa,
    /// Write miss from `I`: data shipped to the new owner, awaiting DATA-ACK.
    ImDa,
    /// Tracked read-only copies exist. The directory's data is authoritative.
    S,
    /// Write miss from `S`: selective invalidations sent, collecting INV-ACKs.
    SmIa,
    /// Write miss from `S`: data shipped to the new owner, awaiting DATA-ACK.
    SmDa,
    /// Upgrade from `S` by a current sharer: collecting INV-ACKs; no data
    /// needs to travel.
    SmUIa,
    /// One socket owns the line; its LLC holds the authoritative copy.
    M,
    /// Ownership handover: awaiting the displaced owner's PUTX before the new
    /// owner can be supplied.
    MmP,
    /// Ownership handover: data forwarded, awaiting the new owner's DATA-ACK.
    MmDa,
    /// Demotion to shared: awaiting both DOWNGRADE-ACK and PUTX.
    Ms2,
    /// Demotion to shared: one of the two arrivals still outstanding.
    Ms1,
    /// Draining stale acknowledgments back to `I`.
    Mi,
}

impl DirState {
    /// Wire-table name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            DirState::I => "I",
            DirState::ImIa => "IM_IA",
            DirState::ImDa => "IM_DA",
            DirState::S => "S",
            DirState::SmIa => "SM_IA",
            DirState::SmDa => "SM_DA",
            DirState::SmUIa => "SM_U_IA",
            DirState::M => "M",
            DirState::MmP => "MM_P",
            DirState::MmDa => "MM_DA",
            DirState::Ms2 => "MS2",
            DirState::Ms1 => "MS1",
            DirState::Mi => "MI",
        }
    }

    /// True for `I`, `S`, and `M`.
    pub fn is_stable(&self) -> bool {
        matches!(self, DirState::I | DirState::S | DirState::M)
    }
}

/// The directory record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Directory {
    /// Current state tag.
    pub state: DirState,
    /// Owner in the `M` lineage; the pending requester in `MS2`/`MS1`.
    pub owner: Option<SocketId>,
    /// Sockets holding tracked read-only copies. Membership-unique.
    pub sharers: BTreeSet<SocketId>,
    /// Acknowledgments still outstanding in `*_IA` and `MI`.
    pub need_acks: u8,
    /// The line value. Authoritative in `I` and `S`.
    pub data: Value,
}

/// Result of one directory handler invocation: the successor record and the
/// messages it sends, or `None` when the message must stall.
pub type DirStep = Option<(Directory, Vec<Message>)>;

impl Directory {
    /// A fresh directory holding `initial` as the line value.
    pub fn new(initial: Value) -> Self {
        Self {
            state: DirState::I,
            owner: None,
            sharers: BTreeSet::new(),
            need_acks: 0,
            data: initial,
        }
    }

    /// Handle one delivered message. `Ok(None)` is a stall: the message stays
    /// in the mailbox and no state was touched.
    pub fn handle(
        &self,
        msg: &Message,
        socket_count: u8,
    ) -> Result<DirStep, ProtocolError> {
        match self.state {
            DirState::I => self.in_i(msg, socket_count),
            DirState::S => self.in_s(msg),
            DirState::M => self.in_m(msg),
            DirState::ImIa | DirState::SmIa | DirState::SmUIa => self.in_inv_wait(msg),
            DirState::ImDa | DirState::SmDa => self.in_data_wait(msg),
            DirState::MmP => self.in_mm_p(msg),
            DirState::MmDa => self.in_mm_da(msg),
            DirState::Ms2 => self.in_ms2(msg),
            DirState::Ms1 => self.in_ms1(msg),
            DirState::Mi => self.in_mi(msg),
        }
    }

    /// Recall a shared line: invalidate every sharer and drain their acks.
    ///
    /// Only legal in `S`; models the home node evicting the directory entry.
    pub fn replace_shared(&self) -> Result<(Directory, Vec<Message>), ProtocolError> {
        if self.state != DirState::S {
            return Err(self.corrupt("shared recall outside S"));
        }
        let invs: Vec<Message> = self.sharers.iter().map(|s| self.inv_to(*s)).collect();
        let mut next = self.clone();
        next.need_acks = next.sharers.len() as u8;
        next.state = if next.need_acks == 0 {
            DirState::I
        } else {
            DirState::Mi
        };
        next.sharers.clear();
        Ok((next, invs))
    }

    /// Recall an owned line: invalidate the owner and wait for its PUTX.
    ///
    /// Only legal in `M`.
    pub fn replace_owned(&self) -> Result<(Directory, Vec<Message>), ProtocolError> {
        if self.state != DirState::M {
            return Err(self.corrupt("owned recall outside M"));
        }
        let owner = self.owner.ok_or_else(|| self.corrupt("M without an owner"))?;
        let mut next = self.clone();
        next.state = DirState::Mi;
        next.owner = None;
        next.need_acks = 1;
        Ok((next, vec![self.inv_to(owner)]))
    }

    fn in_i(&self, msg: &Message, socket_count: u8) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::GetS => {
                // The reader caches privately; no bookkeeping until an
                // upgrade routes back through here.
                let requester = self.requester(msg)?;
                Ok(Some((self.clone(), vec![self.data_to(requester)])))
            }
            MessageType::GetX | MessageType::Upgrade => {
                let requester = self.requester(msg)?;
                let invs: Vec<Message> = (0..socket_count)
                    .map(SocketId)
                    .filter(|s| *s != requester)
                    .map(|s| self.inv_to(s))
                    .collect();
                let mut next = self.clone();
                next.state = DirState::ImIa;
                next.owner = Some(requester);
                next.need_acks = socket_count - 1;
                Ok(Some((next, invs)))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_s(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::GetS => {
                let requester = self.requester(msg)?;
                let mut next = self.clone();
                next.sharers.insert(requester);
                Ok(Some((next, vec![self.data_to(requester)])))
            }
            MessageType::GetX => {
                let requester = self.requester(msg)?;
                let is_sharer = self.sharers.contains(&requester);
                if is_sharer && self.sharers.len() == 1 {
                    return Err(ProtocolError::LoneSharerWrite { requester });
                }
                let (next, invs) = self.invalidate_sharers(requester)?;
                // need_acks >= 1 here: a non-sharer requester implies at
                // least one sharer to invalidate, and a sharer requester
                // implies at least one other.
                Ok(Some((next, invs)))
            }
            MessageType::Upgrade => {
                let requester = self.requester(msg)?;
                let is_sharer = self.sharers.contains(&requester);
                let (mut next, invs) = self.invalidate_sharers(requester)?;
                if is_sharer {
                    if next.need_acks == 0 {
                        // Sole sharer upgrading: nothing to invalidate, grant
                        // at once.
                        next.state = DirState::SmDa;
                        return Ok(Some((next, vec![self.upgrade_ack_to(requester)])));
                    }
                    next.state = DirState::SmUIa;
                }
                Ok(Some((next, invs)))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    /// Selective invalidation out of `S`: INV every sharer except the
    /// requester, then wait in `SM_IA` (callers adjust for the upgrade path).
    fn invalidate_sharers(
        &self,
        requester: SocketId,
    ) -> Result<(Directory, Vec<Message>), ProtocolError> {
        let is_sharer = self.sharers.contains(&requester);
        let invs: Vec<Message> = self
            .sharers
            .iter()
            .filter(|s| **s != requester)
            .map(|s| self.inv_to(*s))
            .collect();
        let mut next = self.clone();
        next.state = DirState::SmIa;
        next.owner = Some(requester);
        next.need_acks = (self.sharers.len() - usize::from(is_sharer)) as u8;
        next.sharers.clear();
        Ok((next, invs))
    }

    fn in_m(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        let owner = self.owner.ok_or_else(|| self.corrupt("M without an owner"))?;
        match msg.mtype {
            MessageType::GetS => {
                // Demote the owner. The owner field is repurposed to hold the
                // socket the data must eventually be shipped to.
                let requester = self.requester(msg)?;
                let mut next = self.clone();
                next.state = DirState::Ms2;
                next.sharers.insert(owner);
                next.sharers.insert(requester);
                next.owner = Some(requester);
                Ok(Some((next, vec![self.downgrade_to(owner)])))
            }
            MessageType::GetX | MessageType::Upgrade => {
                let requester = self.requester(msg)?;
                let mut next = self.clone();
                next.state = DirState::MmP;
                next.sharers.clear();
                next.owner = Some(requester);
                Ok(Some((next, vec![self.inv_to(owner)])))
            }
            MessageType::PutX => {
                let data = self.putx_data(msg)?;
                let putxer = self.requester(msg)?;
                let mut next = self.clone();
                next.state = DirState::I;
                next.owner = None;
                next.data = data;
                Ok(Some((next, vec![self.put_ack_to(putxer)])))
            }
            _ => Err(self.unhandled(msg)),
        }
    }

    /// `IM_IA`, `SM_IA`, `SM_U_IA`: collect INV-ACKs; the last one releases
    /// the grant.
    fn in_inv_wait(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::InvAck => {
                let owner = self
                    .owner
                    .ok_or_else(|| self.corrupt("invalidation wait without a requester"))?;
                if self.need_acks == 0 {
                    return Err(self.corrupt("INV-ACK with no acks outstanding"));
                }
                let mut next = self.clone();
                next.need_acks -= 1;
                if next.need_acks > 0 {
                    return Ok(Some((next, Vec::new())));
                }
                let grant = if self.state == DirState::SmUIa {
                    next.state = DirState::SmDa;
                    self.upgrade_ack_to(owner)
                } else {
                    next.state = if self.state == DirState::ImIa {
                        DirState::ImDa
                    } else {
                        DirState::SmDa
                    };
                    self.data_to(owner)
                };
                Ok(Some((next, vec![grant])))
            }
            MessageType::GetS | MessageType::GetX | MessageType::Upgrade => Ok(None),
            _ => Err(self.unhandled(msg)),
        }
    }

    /// `IM_DA`, `SM_DA`: the grant is out, awaiting DATA-ACK. A PUTX racing
    /// ahead of the DATA-ACK means the new owner already gave the line up.
    fn in_data_wait(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::DataAck => {
                let mut next = self.clone();
                next.state = DirState::M;
                Ok(Some((next, Vec::new())))
            }
            MessageType::PutX => {
                let data = self.putx_data(msg)?;
                let putxer = self.requester(msg)?;
                let mut next = self.clone();
                next.state = DirState::Mi;
                next.owner = None;
                next.need_acks = 1;
                next.data = data;
                Ok(Some((next, vec![self.put_ack_to(putxer)])))
            }
            MessageType::GetS | MessageType::GetX | MessageType::Upgrade => Ok(None),
            _ => Err(self.unhandled(msg)),
        }
    }

    /// `MM_P`: ownership handover, waiting for the displaced owner's PUTX.
    fn in_mm_p(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::PutX => {
                let data = self.putx_data(msg)?;
                let owner = self
                    .owner
                    .ok_or_else(|| self.corrupt("handover without a new owner"))?;
                let mut next = self.clone();
                next.state = DirState::MmDa;
                next.data = data;
                Ok(Some((next, vec![next.data_to(owner)])))
            }
            MessageType::GetS | MessageType::GetX | MessageType::Upgrade => Ok(None),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn in_mm_da(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        // Same shape as the *_DA wait.
        self.in_data_wait(msg)
    }

    /// `MS2`: demotion in progress; DOWNGRADE-ACK and PUTX arrive in either
    /// order.
    fn in_ms2(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::DowngradeAck => {
                let mut next = self.clone();
                next.state = DirState::Ms1;
                Ok(Some((next, Vec::new())))
            }
            MessageType::PutX => {
                let data = self.putx_data(msg)?;
                let mut next = self.clone();
                next.state = DirState::Ms1;
                next.data = data;
                Ok(Some((next, Vec::new())))
            }
            MessageType::GetS | MessageType::GetX | MessageType::Upgrade => Ok(None),
            _ => Err(self.unhandled(msg)),
        }
    }

    /// `MS1`: the second of the demotion pair completes it: ship data to the
    /// pending requester, PUT-ACK the demoted owner, settle in `S`.
    fn in_ms1(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::DowngradeAck | MessageType::PutX => {
                let requester = self
                    .owner
                    .ok_or_else(|| self.corrupt("demotion without a pending requester"))?;
                let mut next = self.clone();
                if msg.mtype == MessageType::PutX {
                    next.data = self.putx_data(msg)?;
                }
                // The demoted owner is the sharer that differs from the
                // requester; a singleton means the requester demoted itself.
                let demoted = next
                    .sharers
                    .iter()
                    .find(|s| **s != requester)
                    .copied()
                    .unwrap_or(requester);
                next.state = DirState::S;
                next.owner = None;
                let out = vec![next.data_to(requester), next.put_ack_to(demoted)];
                Ok(Some((next, out)))
            }
            MessageType::GetS | MessageType::GetX | MessageType::Upgrade => Ok(None),
            _ => Err(self.unhandled(msg)),
        }
    }

    /// `MI`: drain stale acknowledgments until the counter empties, then the
    /// line is quiet in `I`. A PUTX drained here is never PUT-ACKed: its
    /// sender already left via an invalidation.
    fn in_mi(&self, msg: &Message) -> Result<DirStep, ProtocolError> {
        match msg.mtype {
            MessageType::PutX | MessageType::DataAck | MessageType::InvAck => {
                if self.need_acks == 0 {
                    return Err(self.corrupt("drain with no acks outstanding"));
                }
                let mut next = self.clone();
                if msg.mtype == MessageType::PutX {
                    next.data = self.putx_data(msg)?;
                }
                next.need_acks -= 1;
                if next.need_acks == 0 {
                    next.state = DirState::I;
                }
                Ok(Some((next, Vec::new())))
            }
            MessageType::GetS | MessageType::GetX | MessageType::Upgrade => Ok(None),
            _ => Err(self.unhandled(msg)),
        }
    }

    fn requester(&self, msg: &Message) -> Result<SocketId, ProtocolError> {
        match msg.src {
            NodeId::Socket(s) => Ok(s),
            NodeId::Directory => Err(self.unhandled(msg)),
        }
    }

    fn putx_data(&self, msg: &Message) -> Result<Value, ProtocolError> {
        msg.data.ok_or(ProtocolError::MissingData {
            message: msg.clone(),
        })
    }

    fn data_to(&self, socket: SocketId) -> Message {
        Message {
            mtype: MessageType::Data,
            dst: NodeId::Socket(socket),
            dst_level: Some(Level::Dc),
            src: NodeId::Directory,
            src_level: None,
            vc: VirtualChannel::Response,
            data: Some(self.data),
        }
    }

    fn upgrade_ack_to(&self, socket: SocketId) -> Message {
        Message {
            mtype: MessageType::UpgradeAck,
            dst: NodeId::Socket(socket),
            dst_level: Some(Level::Dc),
            src: NodeId::Directory,
            src_level: None,
            vc: VirtualChannel::Response,
            data: None,
        }
    }

    fn inv_to(&self, socket: SocketId) -> Message {
        Message {
            mtype: MessageType::Inv,
            dst: NodeId::Socket(socket),
            dst_level: Some(Level::Dc),
            src: NodeId::Directory,
            src_level: None,
            vc: VirtualChannel::Request,
            data: None,
        }
    }

    fn downgrade_to(&self, socket: SocketId) -> Message {
        Message {
            mtype: MessageType::Downgrade,
            dst: NodeId::Socket(socket),
            dst_level: Some(Level::Llc),
            src: NodeId::Directory,
            src_level: None,
            vc: VirtualChannel::Request,
            data: None,
        }
    }

    fn put_ack_to(&self, socket: SocketId) -> Message {
        Message {
            mtype: MessageType::PutAck,
            dst: NodeId::Socket(socket),
            dst_level: Some(Level::Llc),
            src: NodeId::Directory,
            src_level: None,
            vc: VirtualChannel::Unblock,
            data: None,
        }
    }

    fn unhandled(&self, msg: &Message) -> ProtocolError {
        ProtocolError::Unhandled {
            node: NodeId::Directory,
            controller: "directory",
            state: self.state.name(),
            message: msg.clone(),
        }
    }

    fn corrupt(&self, detail: &'static str) -> ProtocolError {
        ProtocolError::CorruptState {
            node: NodeId::Directory,
            state: self.state.name(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_socket(mtype: MessageType, socket: u8, data: Option<Value>) -> Message {
        Message {
            mtype,
            dst: NodeId::Directory,
            dst_level: None,
            src: NodeId::Socket(SocketId(socket)),
            src_level: Some(if mtype == MessageType::PutX {
                Level::Llc
            } else {
                Level::Dc
            }),
            vc: VirtualChannel::Request,
            data,
        }
    }

    fn inv_ack(socket: u8) -> Message {
        Message {
            mtype: MessageType::InvAck,
            dst: NodeId::Directory,
            dst_level: None,
            src: NodeId::Socket(SocketId(socket)),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Unblock,
            data: None,
        }
    }

    #[test]
    fn gets_in_i_replies_data_without_bookkeeping() {
        let dir = Directory::new(Value(0));
        let (next, out) = dir
            .handle(&from_socket(MessageType::GetS, 0, None), 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.state, DirState::I);
        assert!(next.sharers.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mtype, MessageType::Data);
        assert_eq!(out[0].data, Some(Value(0)));
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(0)));
    }

    #[test]
    fn getx_in_i_broadcasts_and_counts_acks() {
        let dir = Directory::new(Value(0));
        let (next, out) = dir
            .handle(&from_socket(MessageType::GetX, 1, None), 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.state, DirState::ImIa);
        assert_eq!(next.owner, Some(SocketId(1)));
        assert_eq!(next.need_acks, 2);
        let targets: Vec<NodeId> = out.iter().map(|m| m.dst).collect();
        assert_eq!(
            targets,
            vec![NodeId::Socket(SocketId(0)), NodeId::Socket(SocketId(2))]
        );
        assert!(out.iter().all(|m| m.mtype == MessageType::Inv));
    }

    #[test]
    fn last_inv_ack_releases_data_grant() {
        let dir = Directory::new(Value(0));
        let (dir, _) = dir
            .handle(&from_socket(MessageType::GetX, 1, None), 3)
            .unwrap()
            .unwrap();
        let (dir, out) = dir.handle(&inv_ack(0), 3).unwrap().unwrap();
        assert_eq!(dir.state, DirState::ImIa);
        assert!(out.is_empty());
        let (dir, out) = dir.handle(&inv_ack(2), 3).unwrap().unwrap();
        assert_eq!(dir.state, DirState::ImDa);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mtype, MessageType::Data);
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(1)));
    }

    #[test]
    fn requests_stall_in_transients() {
        let dir = Directory::new(Value(0));
        let (dir, _) = dir
            .handle(&from_socket(MessageType::GetX, 1, None), 3)
            .unwrap()
            .unwrap();
        let stalled = dir
            .handle(&from_socket(MessageType::GetS, 2, None), 3)
            .unwrap();
        assert!(stalled.is_none());
    }

    #[test]
    fn lone_sharer_getx_is_fatal() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::S;
        dir.sharers.insert(SocketId(0));
        let err = dir
            .handle(&from_socket(MessageType::GetX, 0, None), 3)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::LoneSharerWrite { .. }));
    }

    #[test]
    fn sole_sharer_upgrade_grants_immediately() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::S;
        dir.sharers.insert(SocketId(2));
        let (next, out) = dir
            .handle(&from_socket(MessageType::Upgrade, 2, None), 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.state, DirState::SmDa);
        assert_eq!(next.owner, Some(SocketId(2)));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mtype, MessageType::UpgradeAck);
    }

    #[test]
    fn sharer_upgrade_with_company_collects_acks_without_data() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::S;
        dir.sharers.insert(SocketId(0));
        dir.sharers.insert(SocketId(1));
        let (next, out) = dir
            .handle(&from_socket(MessageType::Upgrade, 0, None), 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.state, DirState::SmUIa);
        assert_eq!(next.need_acks, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(1)));

        let (next, out) = next.handle(&inv_ack(1), 3).unwrap().unwrap();
        assert_eq!(next.state, DirState::SmDa);
        assert_eq!(out[0].mtype, MessageType::UpgradeAck);
    }

    #[test]
    fn putx_in_m_settles_in_i_with_fresh_data() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::M;
        dir.owner = Some(SocketId(1));
        let (next, out) = dir
            .handle(&from_socket(MessageType::PutX, 1, Some(Value(1))), 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.state, DirState::I);
        assert_eq!(next.owner, None);
        assert_eq!(next.data, Value(1));
        assert_eq!(out[0].mtype, MessageType::PutAck);
        assert_eq!(out[0].dst_level, Some(Level::Llc));
    }

    #[test]
    fn gets_in_m_starts_demotion() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::M;
        dir.owner = Some(SocketId(0));
        let (next, out) = dir
            .handle(&from_socket(MessageType::GetS, 2, None), 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.state, DirState::Ms2);
        assert_eq!(next.owner, Some(SocketId(2)));
        assert!(next.sharers.contains(&SocketId(0)));
        assert!(next.sharers.contains(&SocketId(2)));
        assert_eq!(out[0].mtype, MessageType::Downgrade);
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(0)));
        assert_eq!(out[0].dst_level, Some(Level::Llc));
    }

    #[test]
    fn demotion_completes_in_either_order() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::M;
        dir.owner = Some(SocketId(0));
        let (dir, _) = dir
            .handle(&from_socket(MessageType::GetS, 2, None), 3)
            .unwrap()
            .unwrap();

        // PUTX first, DOWNGRADE-ACK second.
        let putx = from_socket(MessageType::PutX, 0, Some(Value(1)));
        let dack = Message {
            mtype: MessageType::DowngradeAck,
            dst: NodeId::Directory,
            dst_level: None,
            src: NodeId::Socket(SocketId(0)),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Unblock,
            data: None,
        };
        let (mid, _) = dir.handle(&putx, 3).unwrap().unwrap();
        assert_eq!(mid.state, DirState::Ms1);
        assert_eq!(mid.data, Value(1));
        let (done, out) = mid.handle(&dack, 3).unwrap().unwrap();
        assert_eq!(done.state, DirState::S);
        assert_eq!(done.owner, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].mtype, MessageType::Data);
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(2)));
        assert_eq!(out[0].data, Some(Value(1)));
        assert_eq!(out[1].mtype, MessageType::PutAck);
        assert_eq!(out[1].dst, NodeId::Socket(SocketId(0)));

        // DOWNGRADE-ACK first, PUTX second.
        let (mid, _) = dir.handle(&dack, 3).unwrap().unwrap();
        let (done, out) = mid.handle(&putx, 3).unwrap().unwrap();
        assert_eq!(done.state, DirState::S);
        assert_eq!(done.data, Value(1));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn putx_racing_the_data_ack_drains_through_mi() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::ImDa;
        dir.owner = Some(SocketId(1));
        let (dir, out) = dir
            .handle(&from_socket(MessageType::PutX, 1, Some(Value(1))), 3)
            .unwrap()
            .unwrap();
        assert_eq!(dir.state, DirState::Mi);
        assert_eq!(dir.need_acks, 1);
        assert_eq!(out[0].mtype, MessageType::PutAck);

        let stale_ack = Message {
            mtype: MessageType::DataAck,
            dst: NodeId::Directory,
            dst_level: None,
            src: NodeId::Socket(SocketId(1)),
            src_level: Some(Level::Llc),
            vc: VirtualChannel::Unblock,
            data: None,
        };
        let (dir, out) = dir.handle(&stale_ack, 3).unwrap().unwrap();
        assert_eq!(dir.state, DirState::I);
        assert!(out.is_empty());
    }

    #[test]
    fn handover_forwards_the_victims_data() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::M;
        dir.owner = Some(SocketId(0));
        let (dir, out) = dir
            .handle(&from_socket(MessageType::GetX, 1, None), 3)
            .unwrap()
            .unwrap();
        assert_eq!(dir.state, DirState::MmP);
        assert_eq!(out[0].mtype, MessageType::Inv);
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(0)));

        let (dir, out) = dir
            .handle(&from_socket(MessageType::PutX, 0, Some(Value(1))), 3)
            .unwrap()
            .unwrap();
        assert_eq!(dir.state, DirState::MmDa);
        assert_eq!(out[0].mtype, MessageType::Data);
        assert_eq!(out[0].dst, NodeId::Socket(SocketId(1)));
        assert_eq!(out[0].data, Some(Value(1)));
    }

    #[test]
    fn shared_recall_drains_every_sharer() {
        let mut dir = Directory::new(Value(0));
        dir.state = DirState::S;
        dir.sharers.insert(SocketId(0));
        dir.sharers.insert(SocketId(2));
        let (dir, out) = dir.replace_shared().unwrap();
        assert_eq!(dir.state, DirState::Mi);
        assert_eq!(dir.need_acks, 2);
        assert!(dir.sharers.is_empty());
        assert_eq!(out.len(), 2);

        let (dir, _) = dir.handle(&inv_ack(0), 3).unwrap().unwrap();
        assert_eq!(dir.state, DirState::Mi);
        let (dir, _) = dir.handle(&inv_ack(2), 3).unwrap().unwrap();
        assert_eq!(dir.state, DirState::I);
    }

    #[test]
    fn unexpected_message_is_fatal() {
        let dir = Directory::new(Value(0));
        let err = dir.handle(&inv_ack(0), 3).unwrap_err();
        assert!(matches!(err, ProtocolError::Unhandled { .. }));
    }
}
