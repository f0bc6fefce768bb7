//! End-to-end protocol scenarios.
//!
//! Each test drives a sequence of environment rules against a three-socket
//! machine, drains the network to quiescence, and asserts the final values of
//! the relevant state variables. Directed races are staged by delivering
//! specific messages before the drain.

use c3d::config::ModelConfig;
use c3d::directory::DirState;
use c3d::dram_cache::DcState;
use c3d::invariants;
use c3d::llc::LlcState;
use c3d::message::MessageType;
use c3d::sim::drain;
use c3d::system::Rule;
use c3d::system::System;
use c3d::types::Level;
use c3d::types::SocketId;
use c3d::types::Value;

const A: SocketId = SocketId(0);
const B: SocketId = SocketId(1);

fn machine() -> System {
    System::new(ModelConfig::default())
}

/// Apply an environment rule; environment rules never stall.
fn step(system: &System, rule: Rule) -> System {
    system
        .apply(&rule)
        .expect("rule must be legal")
        .expect("environment rules never stall")
}

/// Deliver the first in-flight message matching the predicate.
fn deliver(system: &System, pick: impl Fn(&c3d::message::Message) -> bool) -> System {
    let rule = system
        .rules()
        .into_iter()
        .find(|rule| match rule {
            Rule::Deliver { message, .. } => pick(message),
            _ => false,
        })
        .expect("expected a matching in-flight message");
    let next = system
        .apply(&rule)
        .expect("delivery must be legal")
        .expect("delivery must not stall");
    invariants::check(&next).expect("invariants must hold");
    next
}

/// Run to quiescence and re-check every invariant on the way.
fn settle(system: &System) -> System {
    let quiet = drain(system).expect("drain must reach quiescence");
    assert!(quiet.network.is_empty());
    quiet
}

#[test]
fn clean_read_fills_shared_from_the_directory() {
    let system = machine();
    let system = settle(&step(&system, Rule::Load { socket: A }));

    let llc = &system.socket(A).llc;
    assert_eq!(llc.state, LlcState::S);
    assert_eq!(llc.data, Some(system.directory.data));
    // A private fill out of I is not tracked; the sharer set stays clean.
    assert_eq!(system.directory.state, DirState::I);
    assert!(system.directory.sharers.is_empty());
    // The DC kept a copy for the socket.
    assert_eq!(system.socket(A).dc.state, DcState::S);
}

#[test]
fn write_after_clean_read_elsewhere_invalidates_the_reader() {
    let system = machine();
    let system = settle(&step(&system, Rule::Load { socket: A }));
    let system = settle(&step(
        &system,
        Rule::Store {
            socket: B,
            value: Value(1),
        },
    ));

    assert_eq!(system.socket(B).llc.state, LlcState::M);
    assert_eq!(system.socket(B).llc.data, Some(Value(1)));
    assert_eq!(system.socket(A).llc.state, LlcState::I);
    assert_eq!(system.socket(A).llc.data, None);
    assert_eq!(system.directory.state, DirState::M);
    assert_eq!(system.directory.owner, Some(B));
    assert!(system.directory.sharers.is_empty());
    assert_eq!(system.last_written, Value(1));
}

#[test]
fn upgrade_race_promotes_one_reader_and_kills_the_other() {
    let system = machine();
    let system = settle(&step(&system, Rule::Load { socket: A }));
    let system = settle(&step(&system, Rule::Load { socket: B }));
    assert_eq!(system.socket(A).llc.state, LlcState::S);
    assert_eq!(system.socket(B).llc.state, LlcState::S);

    let system = settle(&step(
        &system,
        Rule::Store {
            socket: B,
            value: Value(1),
        },
    ));

    assert_eq!(system.socket(B).llc.state, LlcState::M);
    assert_eq!(system.socket(B).llc.data, Some(Value(1)));
    assert_eq!(system.socket(A).llc.state, LlcState::I);
    assert_eq!(system.directory.state, DirState::M);
    assert_eq!(system.directory.owner, Some(B));
}

#[test]
fn read_of_an_owned_line_demotes_through_downgrade_and_putx() {
    let system = machine();
    let system = settle(&step(
        &system,
        Rule::Store {
            socket: A,
            value: Value(1),
        },
    ));
    assert_eq!(system.directory.state, DirState::M);
    assert_eq!(system.directory.owner, Some(A));

    let system = settle(&step(&system, Rule::Load { socket: B }));

    assert_eq!(system.directory.state, DirState::S);
    assert_eq!(
        system.directory.sharers.iter().copied().collect::<Vec<_>>(),
        vec![A, B]
    );
    assert_eq!(system.directory.owner, None);
    assert_eq!(system.directory.data, Value(1));
    assert_eq!(system.socket(A).llc.state, LlcState::S);
    assert_eq!(system.socket(A).llc.data, Some(Value(1)));
    assert_eq!(system.socket(B).llc.state, LlcState::S);
    assert_eq!(system.socket(B).llc.data, Some(Value(1)));
    assert_eq!(system.last_written, Value(1));
}

#[test]
fn directory_eviction_during_fill_kills_the_fill() {
    // Build a tracked shared line: A writes, B reads (directory ends S with
    // sharers {A, B}), then A drops both cache levels silently.
    let system = machine();
    let system = settle(&step(
        &system,
        Rule::Store {
            socket: A,
            value: Value(1),
        },
    ));
    let system = settle(&step(&system, Rule::Load { socket: B }));
    assert_eq!(system.directory.state, DirState::S);
    let system = step(&system, Rule::LlcReplace { socket: A });
    let system = step(&system, Rule::DcReplace { socket: A });

    // A re-reads; stop once the fill is in flight from the directory.
    let system = step(&system, Rule::Load { socket: A });
    let system = deliver(&system, |m| {
        m.mtype == MessageType::GetS && m.dst_level == Some(Level::Dc)
    });
    let system = deliver(&system, |m| m.mtype == MessageType::GetS && m.dst_level.is_none());
    assert_eq!(system.socket(A).llc.state, LlcState::Is);

    // The directory recalls the line while the fill is still travelling.
    let system = step(&system, Rule::DirReplaceShared);

    // A's invalidation overtakes the fill.
    let system = deliver(&system, |m| {
        m.mtype == MessageType::Inv && m.dst == c3d::types::NodeId::Socket(A)
    });
    let system = deliver(&system, |m| {
        m.mtype == MessageType::Inv && m.dst_level == Some(Level::Llc)
    });
    assert_eq!(system.socket(A).llc.state, LlcState::IsI);

    let system = settle(&system);
    assert_eq!(system.socket(A).llc.state, LlcState::I);
    assert_eq!(system.socket(A).llc.data, None);
    assert_eq!(system.directory.state, DirState::I);
}

#[test]
fn concurrent_writes_serialise_with_a_single_winner() {
    let system = machine();
    let system = step(
        &system,
        Rule::Store {
            socket: A,
            value: Value(0),
        },
    );
    let system = step(
        &system,
        Rule::Store {
            socket: B,
            value: Value(1),
        },
    );
    let system = settle(&system);

    let a = &system.socket(A).llc;
    let b = &system.socket(B).llc;
    let (winner, loser) = if a.state == LlcState::M { (a, b) } else { (b, a) };
    assert_eq!(winner.state, LlcState::M);
    assert_eq!(loser.state, LlcState::I);
    assert_eq!(winner.data, Some(system.last_written));
    assert_eq!(system.directory.state, DirState::M);
    assert_eq!(system.directory.owner, Some(winner.socket));
}

#[test]
fn writeback_after_a_write_leaves_the_directory_authoritative() {
    let system = machine();
    let system = settle(&step(
        &system,
        Rule::Store {
            socket: A,
            value: Value(1),
        },
    ));
    let system = settle(&step(&system, Rule::LlcReplace { socket: A }));

    assert_eq!(system.directory.state, DirState::I);
    assert_eq!(system.directory.data, Value(1));
    assert_eq!(system.socket(A).llc.state, LlcState::I);
    // The writeback refreshed the DC's copy on its way through.
    assert_eq!(system.socket(A).dc.state, DcState::S);
    assert_eq!(system.socket(A).dc.data, Some(Value(1)));
}

#[test]
fn silent_replacement_never_grows_the_sharer_set() {
    let system = machine();
    let system = settle(&step(
        &system,
        Rule::Store {
            socket: A,
            value: Value(1),
        },
    ));
    let system = settle(&step(&system, Rule::Load { socket: B }));
    let before = system.directory.sharers.len();

    let system = settle(&step(&system, Rule::LlcReplace { socket: A }));
    assert!(system.directory.sharers.len() <= before);

    // A re-reads: served by its DC without the directory learning anything.
    let system = settle(&step(&system, Rule::Load { socket: A }));
    assert!(system.directory.sharers.len() <= before);
    assert_eq!(system.socket(A).llc.state, LlcState::S);
    assert_eq!(system.socket(A).llc.data, Some(Value(1)));
}

#[test]
fn quiescence_implies_stable_controllers() {
    let system = machine();
    let system = settle(&step(&system, Rule::Load { socket: A }));
    let system = settle(&step(
        &system,
        Rule::Store {
            socket: B,
            value: Value(1),
        },
    ));
    let system = settle(&step(&system, Rule::Load { socket: A }));

    assert!(system.directory.state.is_stable());
    for socket in ModelConfig::default().socket_ids() {
        assert!(system.socket(socket).llc.state.is_stable());
    }
}
