//! The whole-machine aggregate and its step relation.
//!
//! A [`System`] is one state of the model: the directory, every socket's LLC
//! and DC, the network, and the auxiliary last-written value used for the
//! sequential-consistency check. Steps are interleaved and atomic: a global
//! selector picks one enabled [`Rule`]: a processor event, a replacement, or
//! the delivery of one message. [`System::apply`] then produces the successor
//! state without observing partial effects of anything else.
//!
//! `apply` is pure. A stall (`Ok(None)`) leaves the message in the mailbox
//! and guarantees that nothing was mutated; a fatal error means the protocol
//! itself is broken.

use std::fmt;

use crate::config::ModelConfig;
use crate::directory::Directory;
use crate::dram_cache::DramCache;
use crate::error::ProtocolError;
use crate::llc::Llc;
use crate::llc::LlcState;
use crate::message::Message;
use crate::network::Network;
use crate::types::Level;
use crate::types::NodeId;
use crate::types::SocketId;
use crate::types::Value;

/// One socket: its LLC and its DRAM cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Socket {
    /// The processor-facing cache.
    pub llc: Llc,
    /// The DRAM cache behind it.
    pub dc: DramCache,
}

impl Socket {
    fn new(id: SocketId) -> Self {
        Self {
            llc: Llc::new(id),
            dc: DramCache::new(id),
        }
    }
}

/// One step of the model: the environment command surface plus network
/// delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Processor load at a socket.
    Load {
        /// Socket performing the load.
        socket: SocketId,
    },
    /// Processor store of `value` at a socket.
    Store {
        /// Socket performing the store.
        socket: SocketId,
        /// Value being stored.
        value: Value,
    },
    /// LLC replacement at a socket.
    LlcReplace {
        /// Socket replacing its LLC entry.
        socket: SocketId,
    },
    /// DC replacement at a socket.
    DcReplace {
        /// Socket replacing its DC entry.
        socket: SocketId,
    },
    /// The directory recalls a shared line.
    DirReplaceShared,
    /// The directory recalls an owned line.
    DirReplaceOwned,
    /// Deliver one message from a node's mailbox.
    Deliver {
        /// Node whose mailbox is drained.
        node: NodeId,
        /// The message picked out of the multiset.
        message: Message,
    },
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Load { socket } => write!(f, "load@{socket}"),
            Rule::Store { socket, value } => write!(f, "store({value})@{socket}"),
            Rule::LlcReplace { socket } => write!(f, "llc-replace@{socket}"),
            Rule::DcReplace { socket } => write!(f, "dc-replace@{socket}"),
            Rule::DirReplaceShared => write!(f, "dir-replace-shared"),
            Rule::DirReplaceOwned => write!(f, "dir-replace-owned"),
            Rule::Deliver { node, message } => write!(f, "deliver@{node}: {message}"),
        }
    }
}

/// One state of the whole machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct System {
    /// The sizing knobs this machine was built with.
    pub config: ModelConfig,
    /// The home directory.
    pub directory: Directory,
    /// Every socket, indexed by [`SocketId`].
    pub sockets: Vec<Socket>,
    /// The interconnect.
    pub network: Network,
    /// Auxiliary: the value of the most recent committed store.
    pub last_written: Value,
}

impl System {
    /// The initial state: everything invalid, the directory holding `v0`.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            directory: Directory::new(Value(0)),
            sockets: config.socket_ids().map(Socket::new).collect(),
            network: Network::new(config.sockets),
            last_written: Value(0),
        }
    }

    /// The socket record for `id`.
    pub fn socket(&self, id: SocketId) -> &Socket {
        &self.sockets[id.0 as usize]
    }

    /// Every rule that is a candidate in this state. Deliveries that would
    /// stall are included; [`System::apply`] reports them as no-ops.
    pub fn rules(&self) -> Vec<Rule> {
        let mut rules = Vec::new();
        for socket in self.config.socket_ids() {
            let llc = &self.socket(socket).llc;
            if llc.state.is_stable() {
                rules.push(Rule::Load { socket });
                for value in self.config.value_domain() {
                    rules.push(Rule::Store { socket, value });
                }
            }
            if matches!(llc.state, LlcState::S | LlcState::M) {
                rules.push(Rule::LlcReplace { socket });
            }
            if self.socket(socket).dc.state == crate::dram_cache::DcState::S {
                rules.push(Rule::DcReplace { socket });
            }
        }
        match self.directory.state {
            crate::directory::DirState::S => rules.push(Rule::DirReplaceShared),
            crate::directory::DirState::M => rules.push(Rule::DirReplaceOwned),
            _ => {}
        }
        for (node, message) in self.network.deliverable() {
            rules.push(Rule::Deliver {
                node,
                message: message.clone(),
            });
        }
        rules
    }

    /// Apply one rule. `Ok(None)` means the rule stalled (delivery refused by
    /// a transient state); the state is unchanged and the message is still in
    /// flight. `Err` is a protocol violation and fatal.
    pub fn apply(&self, rule: &Rule) -> Result<Option<System>, ProtocolError> {
        match rule {
            Rule::Load { socket } => {
                let (llc, out) = self.socket(*socket).llc.load(self.last_written)?;
                let mut next = self.clone();
                next.sockets[socket.0 as usize].llc = llc;
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            Rule::Store { socket, value } => {
                let (llc, out, committed) = self
                    .socket(*socket)
                    .llc
                    .store(*value)?;
                let mut next = self.clone();
                next.sockets[socket.0 as usize].llc = llc;
                if let Some(value) = committed {
                    next.last_written = value;
                }
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            Rule::LlcReplace { socket } => {
                let (llc, out) = self.socket(*socket).llc.replace()?;
                let mut next = self.clone();
                next.sockets[socket.0 as usize].llc = llc;
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            Rule::DcReplace { socket } => {
                let dc = self.socket(*socket).dc.replace()?;
                let mut next = self.clone();
                next.sockets[socket.0 as usize].dc = dc;
                Ok(Some(next))
            }
            Rule::DirReplaceShared => {
                let (directory, out) = self.directory.replace_shared()?;
                let mut next = self.clone();
                next.directory = directory;
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            Rule::DirReplaceOwned => {
                let (directory, out) = self.directory.replace_owned()?;
                let mut next = self.clone();
                next.directory = directory;
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            Rule::Deliver { node, message } => self.deliver(*node, message),
        }
    }

    /// Deliver one message: route it to the controller named by the
    /// destination level and consume it atomically, or stall.
    fn deliver(&self, node: NodeId, message: &Message) -> Result<Option<System>, ProtocolError> {
        if !self
            .network
            .mailbox(node)
            .is_some_and(|mailbox| mailbox.contains(message))
        {
            return Err(ProtocolError::CorruptState {
                node,
                state: "-",
                detail: "delivery of a message that is not in flight",
            });
        }
        match (node, message.dst_level) {
            (NodeId::Directory, None) => {
                match self.directory.handle(message, self.config.sockets)? {
                    None => Ok(None),
                    Some((directory, out)) => {
                        let mut next = self.clone();
                        next.network.take(node, message);
                        next.directory = directory;
                        next.network.send_all(out)?;
                        Ok(Some(next))
                    }
                }
            }
            (NodeId::Socket(socket), Some(Level::Dc)) => {
                let (dc, out) = self.socket(socket).dc.handle(message)?;
                let mut next = self.clone();
                next.network.take(node, message);
                next.sockets[socket.0 as usize].dc = dc;
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            (NodeId::Socket(socket), Some(Level::Llc)) => {
                let (llc, out, committed) = self
                    .socket(socket)
                    .llc
                    .handle(message, self.last_written)?;
                let mut next = self.clone();
                next.network.take(node, message);
                next.sockets[socket.0 as usize].llc = llc;
                if let Some(value) = committed {
                    next.last_written = value;
                }
                next.network.send_all(out)?;
                Ok(Some(next))
            }
            _ => Err(ProtocolError::CorruptState {
                node,
                state: "-",
                detail: "message destination level does not match its node",
            }),
        }
    }

    /// The same machine with socket identifiers permuted: `sockets[j]` of the
    /// result is `sockets[pi[j]]` of `self`, renamed accordingly. Sockets are
    /// interchangeable, so the permuted machine is behaviourally identical.
    pub fn permute(&self, pi: &[usize]) -> System {
        let mut remap = vec![0u8; self.sockets.len()];
        for (new_id, &old_id) in pi.iter().enumerate() {
            remap[old_id] = new_id as u8;
        }
        let rename = |s: SocketId| SocketId(remap[s.0 as usize]);

        let sockets = pi
            .iter()
            .enumerate()
            .map(|(new_id, &old_id)| {
                let mut socket = self.sockets[old_id].clone();
                socket.llc.socket = SocketId(new_id as u8);
                socket.dc.socket = SocketId(new_id as u8);
                socket
            })
            .collect();

        let mut directory = self.directory.clone();
        directory.owner = self.directory.owner.map(rename);
        directory.sharers = self.directory.sharers.iter().map(|s| rename(*s)).collect();

        System {
            config: self.config,
            directory,
            sockets,
            network: self.network.remap_sockets(rename),
            last_written: self.last_written,
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = &self.directory;
        write!(f, "directory: {} owner=", dir.state.name())?;
        match dir.owner {
            Some(owner) => write!(f, "{owner}")?,
            None => write!(f, "-")?,
        }
        write!(f, " sharers={{")?;
        for (i, sharer) in dir.sharers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{sharer}")?;
        }
        writeln!(f, "}} acks={} data={}", dir.need_acks, dir.data)?;

        for socket in &self.sockets {
            writeln!(
                f,
                "{}: llc={} data={} pending={} dc={} data={}",
                socket.llc.socket,
                socket.llc.state.name(),
                opt(socket.llc.data),
                opt(socket.llc.pending_write),
                socket.dc.state.name(),
                opt(socket.dc.data),
            )?;
        }

        let mut quiet = true;
        for (node, message) in self.network.deliverable() {
            writeln!(f, "net[{node}]: {message}")?;
            quiet = false;
        }
        if quiet {
            writeln!(f, "net: empty")?;
        }
        write!(f, "last-written: {}", self.last_written)
    }
}

fn opt(value: Option<Value>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
