//! Memory substrate for the rebus core
//!
//! This module provides the allocation primitives everything composite is
//! built from:
//! - [`buffer`]: the generic growable/owned memory region
//! - [`heap`]: the arena of buffers, handle-addressed, with the guard stack
//!   and the mark/sweep collector
//!
//! # Lifecycle
//!
//! Every buffer starts *manual*: tracked in the heap's manual-allocation
//! list and freed explicitly (or on failure unwind). [`heap::Heap::manage`]
//! irreversibly hands a buffer to the collector, after which only a sweep
//! frees it. Handles to managed-but-unrooted buffers held across any
//! allocation boundary must be guarded ([`heap::Heap::guard`]) or a
//! collection at that boundary may reclaim them — this is the central
//! resource-safety discipline of the whole system.
//!
//! # Read-only states
//!
//! A buffer can refuse writes for four reasons, checked most specific
//! first: auto-locked (by the core itself), held (during an active
//! operation), frozen (forever), protected (by the user).

pub mod buffer;
pub mod heap;

use bitflags::bitflags;

use crate::value::kind::TypeSet;
use crate::value::symbol::Symbol;

/// Which specialization owns a buffer; tells the collector which link
/// slots to follow and what the content vector holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Plain array of cells
    Array,
    /// A context's variable list (slot 0 is the archetype; link is the
    /// key list)
    VarList,
    /// A context key list or action parameter list (link is the ancestor
    /// key list, self-pointing at the chain root)
    ParamList,
    /// An action's identity array (slot 0 is the archetype; link is the
    /// specialty: bare parameter list or exemplar var-list)
    Identity,
    /// UTF-8 string storage
    Text,
    /// Raw byte storage
    Binary,
    /// Two-cell pairing (deep-quote storage)
    Pairing,
    /// Map pair run (key/value cells interleaved)
    PairList,
    /// Cached index list for map lookup acceleration
    IndexList,
}

impl Flavor {
    /// Do buffers of this flavor store cells
    pub fn holds_cells(self) -> bool {
        matches!(
            self,
            Flavor::Array
                | Flavor::VarList
                | Flavor::Identity
                | Flavor::Pairing
                | Flavor::PairList
        )
    }
}

bitflags! {
    /// Per-buffer flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u16 {
        /// Owned by the collector; freed only by a sweep
        const MANAGED = 1 << 0;
        /// Heap-backed (as opposed to inline single-element storage)
        const DYNAMIC = 1 << 1;
        /// Immutable forever
        const FROZEN = 1 << 2;
        /// Temporarily immutable during an active operation
        const HELD = 1 << 3;
        /// User-requested immutability
        const PROTECTED = 1 << 4;
        /// Locked by the core for the duration of an evaluation
        const AUTO_LOCKED = 1 << 5;
        /// Transient color for visited-marking outside collector passes;
        /// must be white again by the time evaluation completes
        const BLACK = 1 << 6;
        /// Key list is linked by more than one var-list; extension must
        /// copy-on-write
        const SHARED = 1 << 7;
        /// Former var-list reduced to a single archetype stub after its
        /// storage was stolen; never used as a var-list again
        const STUB = 1 << 8;
        /// Collector mark bit (valid only during a collect)
        const MARKED = 1 << 9;
    }
}

/// A key-list entry: one symbol-tagged descriptor
///
/// The same shape serves context key lists (class [`ParamClass::Field`])
/// and action parameter lists, so a frame's var-list can pair with either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub symbol: Symbol,
    pub class: ParamClass,
    pub types: TypeSet,
}

impl Key {
    /// A plain context field
    pub fn field(symbol: Symbol) -> Key {
        Key {
            symbol,
            class: ParamClass::Field,
            types: TypeSet::ANY,
        }
    }

    /// An ordinary evaluated parameter
    pub fn param(symbol: Symbol, types: TypeSet) -> Key {
        Key {
            symbol,
            class: ParamClass::Normal,
            types,
        }
    }

    pub fn with_class(symbol: Symbol, class: ParamClass, types: TypeSet) -> Key {
        Key {
            symbol,
            class,
            types,
        }
    }

    /// Does fulfillment consume an input value for this key. Refinements
    /// are fulfilled from pending arguments, not from input.
    pub fn takes_input(&self) -> bool {
        matches!(self.class, ParamClass::Normal | ParamClass::Quoted)
    }
}

/// How a key's slot gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    /// Plain context field (not a parameter at all)
    Field,
    /// Evaluated argument
    Normal,
    /// Argument taken literally, unevaluated
    Quoted,
    /// Optional flag argument, fulfilled from pending refinements
    Refinement,
    /// Frame-local slot, never fulfilled from input
    Local,
    /// Definitional return slot, never fulfilled from input
    Return,
}
