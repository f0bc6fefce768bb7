//! stateright adapter.
//!
//! Wraps the machine in a [`stateright::Model`] so the full checker toolchain
//! applies: parallel DFS, symmetry-reduced search, and the interactive
//! state-space explorer. Stalled deliveries prune their action; a fatal
//! protocol violation becomes a terminal state whose fault field fails the
//! "no protocol fault" property, so the checker surfaces the offending trace.

use itertools::Itertools;
use stateright::Model;
use stateright::Property;
use stateright::Representative;

use crate::config::ModelConfig;
use crate::error::Fault;
use crate::invariants;
use crate::system::Rule;
use crate::system::System;

/// The coherence protocol as a checkable model.
#[derive(Debug, Clone)]
pub struct CoherenceModel {
    /// Machine sizing the model is checked at.
    pub config: ModelConfig,
}

/// Checker state: the machine plus a terminal fault marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckState {
    /// The machine.
    pub system: System,
    /// Set when a step out of `system` was fatal; terminal.
    pub fault: Option<Fault>,
}

impl Model for CoherenceModel {
    type State = CheckState;
    type Action = Rule;

    fn init_states(&self) -> Vec<Self::State> {
        vec![CheckState {
            system: System::new(self.config),
            fault: None,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        if state.fault.is_some() {
            return; // faulted states are terminal
        }
        actions.extend(state.system.rules());
    }

    fn next_state(&self, last_state: &Self::State, action: Self::Action) -> Option<Self::State> {
        match last_state.system.apply(&action) {
            // Stall: the action has no successor.
            Ok(None) => None,
            Ok(Some(system)) => {
                let fault = invariants::check(&system).err().map(Fault::from);
                Some(CheckState { system, fault })
            }
            Err(error) => Some(CheckState {
                system: last_state.system.clone(),
                fault: Some(error.into()),
            }),
        }
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::<Self>::always("single writer multiple readers", |_, state| {
                invariants::swmr(&state.system).is_ok()
            }),
            Property::<Self>::always("sharer set clean in M and I", |_, state| {
                invariants::sharer_cleanliness(&state.system).is_ok()
            }),
            Property::<Self>::always("owner clear in S and I", |_, state| {
                invariants::owner_cleanliness(&state.system).is_ok()
            }),
            Property::<Self>::always("no data in invalid LLC", |_, state| {
                invariants::llc_data_clean(&state.system).is_ok()
            }),
            Property::<Self>::always("no data in invalid DC", |_, state| {
                invariants::dc_data_clean(&state.system).is_ok()
            }),
            Property::<Self>::always("directory addressing", |_, state| {
                invariants::directory_addressing(&state.system).is_ok()
            }),
            Property::<Self>::always("ack counter bounded", |_, state| {
                invariants::ack_counter_range(&state.system).is_ok()
            }),
            Property::<Self>::always("no protocol fault", |_, state| state.fault.is_none()),
        ]
    }
}

type Permutation = Vec<usize>;

impl Symmetric for CheckState {
    type Permutation = Permutation;

    fn permute(&self, pi: &Permutation) -> Self {
        CheckState {
            system: self.system.permute(pi),
            fault: self.fault.clone(),
        }
    }

    fn get_permutations(&self) -> Vec<Permutation> {
        let n = self.system.sockets.len();
        (0..n).permutations(n).collect()
    }
}
