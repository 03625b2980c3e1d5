//! Call frames: transient records driving one action invocation
//!
//! A [`Frame`] is not a value and is never garbage-collected; it exists
//! only while an action executes, on the engine's frame stack. Its var-list
//! buffer *can* become a value — capturing it as a context manages it, and
//! the drop disposition accounts for that (see
//! [`crate::engine::Engine::drop_frame`]).

use smallvec::SmallVec;

use crate::action::Action;
use crate::memory::heap::BufferId;
use crate::value::cell::Cell;
use crate::value::symbol::Symbol;

/// Fulfillment state machine. Terminal on return or on a non-local throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Pushed; cursors at the first parameter
    InitialEntry,
    /// All arguments gathered; final constraint verification
    Typechecking,
    /// Handed to the phase's dispatcher
    Dispatching,
}

/// One action invocation in flight
#[derive(Debug)]
pub struct Frame {
    /// The action body currently executing. May differ from `original`
    /// under specialization or adaptation.
    pub(crate) phase: Action,
    /// The action as originally invoked
    pub(crate) original: Action,
    /// Frame-local storage: the var-list buffer (manual until captured)
    pub(crate) varlist: BufferId,
    /// Key cursor into the key list; the parameter cursor is the same
    /// position (frames pair with the parameter list directly)
    pub(crate) key_index: usize,
    /// Argument cursor: the var-list slot being fulfilled (key + 1)
    pub(crate) arg_index: usize,
    pub(crate) state: FrameState,
    /// Where the evaluated result lands
    pub(crate) out: Cell,
    /// Data-stack position at entry; restored on drop
    pub(crate) stack_base: usize,
    /// API-allocated handles created since entry, released on unwind
    pub(crate) handles: SmallVec<[BufferId; 4]>,
    /// Back-link to the calling frame
    pub(crate) prior: Option<usize>,
    /// Name the invocation was reached through, for errors
    pub(crate) label: Option<Symbol>,
}

impl Frame {
    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn phase(&self) -> Action {
        self.phase
    }

    pub fn original(&self) -> Action {
        self.original
    }

    pub fn varlist(&self) -> BufferId {
        self.varlist
    }

    pub fn out(&self) -> Cell {
        self.out
    }

    pub fn label(&self) -> Option<Symbol> {
        self.label
    }

    pub fn prior(&self) -> Option<usize> {
        self.prior
    }
}
