//! Bounded, unordered per-node mailboxes.
//!
//! The interconnect is a multiset of in-flight messages per destination node.
//! Delivery order is arbitrary; the protocol never relies on FIFO between any
//! two endpoints. The only delivery property is no-loss within the capacity
//! bound, and the capacity precondition on [`Network::send`] is an obligation
//! on the protocol: if any trace can overflow a mailbox, that trace is a
//! design bug.

use std::collections::BTreeMap;

use crate::error::ProtocolError;
use crate::message::Message;
use crate::types::NodeId;

/// Multiset of undelivered messages for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mailbox {
    entries: BTreeMap<Message, u32>,
    len: usize,
}

impl Mailbox {
    /// Number of messages held, counting duplicates.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no message is waiting.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when at least one copy of `msg` is waiting.
    pub fn contains(&self, msg: &Message) -> bool {
        self.entries.contains_key(msg)
    }

    /// Distinct messages currently waiting. Duplicates appear once; delivery
    /// of a duplicated message is indistinguishable either way.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.keys()
    }

    fn insert(&mut self, msg: Message) {
        *self.entries.entry(msg).or_insert(0) += 1;
        self.len += 1;
    }

    fn remove(&mut self, msg: &Message) -> bool {
        match self.entries.get_mut(msg) {
            Some(count) if *count > 1 => {
                *count -= 1;
                self.len -= 1;
                true
            }
            Some(_) => {
                self.entries.remove(msg);
                self.len -= 1;
                true
            }
            None => false,
        }
    }
}

/// The interconnect: one bounded mailbox per node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Network {
    capacity: usize,
    mailboxes: BTreeMap<NodeId, Mailbox>,
}

impl Network {
    /// Build an empty network for `sockets` sockets plus the directory.
    ///
    /// Capacity per mailbox is 2·sockets + 1, enough for the worst legal
    /// burst (a full invalidation broadcast with every ack outstanding).
    pub fn new(sockets: u8) -> Self {
        let capacity = 2 * sockets as usize + 1;
        let mut mailboxes = BTreeMap::new();
        mailboxes.insert(NodeId::Directory, Mailbox::default());
        for s in 0..sockets {
            mailboxes.insert(
                NodeId::Socket(crate::types::SocketId(s)),
                Mailbox::default(),
            );
        }
        Self { capacity, mailboxes }
    }

    /// Per-node mailbox capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one message to its destination mailbox.
    pub fn send(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let capacity = self.capacity;
        let mailbox = self
            .mailboxes
            .get_mut(&msg.dst)
            .ok_or(ProtocolError::CorruptState {
                node: msg.dst,
                state: "-",
                detail: "message addressed to a node outside the machine",
            })?;
        if mailbox.len() >= capacity {
            return Err(ProtocolError::MailboxFull { dst: msg.dst, capacity });
        }
        mailbox.insert(msg);
        Ok(())
    }

    /// Send a batch atomically: either every message fits or nothing is
    /// enqueued and the step fails the capacity precondition.
    pub fn send_all(&mut self, msgs: Vec<Message>) -> Result<(), ProtocolError> {
        let mut headroom: BTreeMap<NodeId, usize> = BTreeMap::new();
        for msg in &msgs {
            let used = headroom.entry(msg.dst).or_insert(0);
            *used += 1;
            let waiting = self.mailboxes.get(&msg.dst).map_or(0, Mailbox::len);
            if waiting + *used > self.capacity {
                return Err(ProtocolError::MailboxFull {
                    dst: msg.dst,
                    capacity: self.capacity,
                });
            }
        }
        for msg in msgs {
            self.send(msg)?;
        }
        Ok(())
    }

    /// Remove one copy of `msg` from `node`'s mailbox. Returns false when the
    /// message was not there.
    pub fn take(&mut self, node: NodeId, msg: &Message) -> bool {
        self.mailboxes
            .get_mut(&node)
            .map(|mailbox| mailbox.remove(msg))
            .unwrap_or(false)
    }

    /// The mailbox of one node. Nodes outside the machine read as empty.
    pub fn mailbox(&self, node: NodeId) -> Option<&Mailbox> {
        self.mailboxes.get(&node)
    }

    /// True when no message is in flight anywhere.
    pub fn is_empty(&self) -> bool {
        self.mailboxes.values().all(Mailbox::is_empty)
    }

    /// Total number of in-flight messages.
    pub fn in_flight(&self) -> usize {
        self.mailboxes.values().map(Mailbox::len).sum()
    }

    /// Every (destination, distinct message) pair currently deliverable.
    pub fn deliverable(&self) -> impl Iterator<Item = (NodeId, &Message)> {
        self.mailboxes
            .iter()
            .flat_map(|(node, mailbox)| mailbox.iter().map(move |msg| (*node, msg)))
    }

    /// Rebuild the network with socket identifiers renamed through `f`. Used
    /// by symmetry reduction.
    pub fn remap_sockets(
        &self,
        f: impl Fn(crate::types::SocketId) -> crate::types::SocketId,
    ) -> Network {
        let mut mailboxes: BTreeMap<NodeId, Mailbox> = BTreeMap::new();
        for (node, mailbox) in &self.mailboxes {
            let renamed = match node {
                NodeId::Directory => NodeId::Directory,
                NodeId::Socket(s) => NodeId::Socket(f(*s)),
            };
            let target = mailboxes.entry(renamed).or_default();
            for (msg, count) in &mailbox.entries {
                let remapped = msg.remap_sockets(&f);
                for _ in 0..*count {
                    target.insert(remapped.clone());
                }
            }
        }
        Network {
            capacity: self.capacity,
            mailboxes,
        }
    }
}
