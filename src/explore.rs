//! Exhaustive breadth-first verification.
//!
//! Enumerates every reachable machine state under every interleaving,
//! checking the structural invariants after each step. On a protocol
//! violation or a broken invariant the explorer reconstructs the full
//! counterexample: the sequence of rules fired and the value of every state
//! variable at every step, enough for a human to replay the race by hand.
//!
//! The state space is finite (bounded mailboxes, finite domains), so an
//! unbounded exploration terminates. Depth and state-count caps are offered
//! for quick, partial sweeps.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::config::ModelConfig;
use crate::error::Fault;
use crate::invariants;
use crate::system::Rule;
use crate::system::System;

/// Caps on an exploration. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExploreOptions {
    /// Stop expanding states deeper than this many steps from the start.
    pub max_depth: Option<usize>,
    /// Stop after this many distinct states.
    pub max_states: Option<usize>,
}

/// Summary of a completed exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExploreStats {
    /// Distinct states visited.
    pub states: usize,
    /// Transitions applied (stalls excluded).
    pub transitions: usize,
    /// Depth of the deepest state expanded.
    pub max_depth_reached: usize,
    /// False when a cap cut the exploration short.
    pub complete: bool,
}

impl fmt::Display for ExploreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} states, {} transitions, depth {}{}",
            self.states,
            self.transitions,
            self.max_depth_reached,
            if self.complete { "" } else { " (truncated)" },
        )
    }
}

/// One step of a counterexample: the rule fired and the state it produced.
#[derive(Debug, Clone)]
pub struct TraceStep {
    /// The rule that was applied.
    pub rule: Rule,
    /// The machine state after the rule.
    pub state: System,
}

/// A minimal-length failing trace.
#[derive(Debug, Clone)]
pub struct Counterexample {
    /// What went wrong at the end of the trace.
    pub fault: Fault,
    /// The initial state.
    pub initial: System,
    /// Every step from the initial state to the failure. For a protocol
    /// violation the last entry repeats the pre-failure state: the offending
    /// rule has no successor.
    pub steps: Vec<TraceStep>,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fault: {}", self.fault)?;
        writeln!(f, "--- initial ---")?;
        writeln!(f, "{}", self.initial)?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "--- step {}: {} ---", i + 1, step.rule)?;
            writeln!(f, "{}", step.state)?;
        }
        Ok(())
    }
}

/// Explore every interleaving from the initial state of `config`.
pub fn explore(
    config: ModelConfig,
    options: ExploreOptions,
) -> Result<ExploreStats, Box<Counterexample>> {
    let initial = System::new(config);
    if let Err(violation) = invariants::check(&initial) {
        return Err(Box::new(Counterexample {
            fault: violation.into(),
            initial,
            steps: Vec::new(),
        }));
    }

    let mut states: Vec<System> = vec![initial.clone()];
    let mut parents: Vec<Option<(usize, Rule)>> = vec![None];
    let mut depths: Vec<usize> = vec![0];
    let mut index_of: HashMap<System, usize> = HashMap::new();
    index_of.insert(initial.clone(), 0);

    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(0);

    let mut transitions = 0usize;
    let mut max_depth_reached = 0usize;
    let mut complete = true;

    while let Some(current) = queue.pop_front() {
        let depth = depths[current];
        if options.max_depth.is_some_and(|cap| depth >= cap) {
            complete = false;
            continue;
        }
        max_depth_reached = max_depth_reached.max(depth);

        for rule in states[current].rules() {
            let next = match states[current].apply(&rule) {
                Ok(Some(next)) => next,
                Ok(None) => continue, // stall: not an enabled transition
                Err(error) => {
                    return Err(Box::new(counterexample(
                        error.into(),
                        &states,
                        &parents,
                        current,
                        rule,
                        None,
                    )));
                }
            };
            transitions += 1;
            if let Err(violation) = invariants::check(&next) {
                return Err(Box::new(counterexample(
                    violation.into(),
                    &states,
                    &parents,
                    current,
                    rule,
                    Some(next),
                )));
            }
            if index_of.contains_key(&next) {
                continue;
            }
            let id = states.len();
            index_of.insert(next.clone(), id);
            states.push(next);
            parents.push(Some((current, rule)));
            depths.push(depth + 1);
            if options.max_states.is_some_and(|cap| states.len() >= cap) {
                debug!(states = states.len(), "state cap reached");
                return Ok(ExploreStats {
                    states: states.len(),
                    transitions,
                    max_depth_reached,
                    complete: false,
                });
            }
            queue.push_back(id);
        }
    }

    Ok(ExploreStats {
        states: states.len(),
        transitions,
        max_depth_reached,
        complete,
    })
}

/// Rebuild the rule path from the initial state to `current`, then append the
/// failing rule.
fn counterexample(
    fault: Fault,
    states: &[System],
    parents: &[Option<(usize, Rule)>],
    current: usize,
    failing_rule: Rule,
    failing_state: Option<System>,
) -> Counterexample {
    let mut path: Vec<TraceStep> = Vec::new();
    let mut cursor = current;
    while let Some((parent, rule)) = &parents[cursor] {
        path.push(TraceStep {
            rule: rule.clone(),
            state: states[cursor].clone(),
        });
        cursor = *parent;
    }
    path.reverse();
    let last = failing_state.unwrap_or_else(|| states[current].clone());
    path.push(TraceStep {
        rule: failing_rule,
        state: last,
    });
    Counterexample {
        fault,
        initial: states[0].clone(),
        steps: path,
    }
}
