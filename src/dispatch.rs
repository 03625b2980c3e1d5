//! Dispatcher indirection and dispatch outcomes
//!
//! An action's behavior is reached through one level of indirection: its
//! identity array stores a dispatcher *selector*, and natives resolve
//! through the [`DispatcherRegistry`] table at call time. Keeping the
//! function pointer out of the call site is what makes hijacking work —
//! swapping the registry entry (or the selector cell in a shared identity)
//! retargets every instance of the function at once.
//!
//! Dispatchers return a [`Bounce`]: the small set of sentinel outcomes the
//! evaluator owns interpreting. The core only produces and propagates them.

use rustc_hash::FxHashMap;

use crate::engine::Engine;
use crate::errors::RuntimeError;
use crate::memory::heap::BufferId;
use crate::value::cell::{Cell, Payload};
use crate::value::symbol::SymbolTable;

/// A non-local transfer: label names the catch target, payload is the
/// value in flight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throw {
    pub label: Cell,
    pub payload: Cell,
}

impl Throw {
    /// The error surfaced when this throw unwinds past every handler
    pub fn uncaught(&self, symbols: &SymbolTable) -> RuntimeError {
        let label = match self.label.as_word() {
            Some(sym) => symbols.name(sym).to_string(),
            None => "(unlabeled)".to_string(),
        };
        RuntimeError::UncaughtThrow { label }
    }
}

/// A location to read or write, for path-assignment dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub node: BufferId,
    pub index: u32,
}

/// Sentinel outcomes a dispatcher can produce
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounce {
    /// Ordinary value result
    Value(Cell),
    /// Non-local unwind began; propagate until caught
    Thrown(Throw),
    /// No value contributed to the output slot
    Invisible,
    /// Re-run the frame, possibly with a different phase
    Redo { checked: bool },
    /// A read/write location rather than a value
    Reference(Reference),
}

/// How an action's identity selects its behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatcher {
    /// Entry in the native table
    Native(u32),
    /// Interpreted body block stored in the identity
    Interpreted,
}

impl Dispatcher {
    /// Pack into the selector cell's payload
    pub(crate) fn encode(self) -> Payload {
        match self {
            Dispatcher::Native(id) => Payload::Pair(0, id),
            Dispatcher::Interpreted => Payload::Pair(1, 0),
        }
    }

    pub(crate) fn decode(payload: Payload) -> Dispatcher {
        match payload {
            Payload::Pair(0, id) => Dispatcher::Native(id),
            Payload::Pair(1, _) => Dispatcher::Interpreted,
            other => panic!("corrupt dispatcher selector: {:?}", other),
        }
    }
}

/// A native dispatcher entry point. Receives the engine and the index of
/// the frame being dispatched.
pub type NativeFn = fn(&mut Engine, usize) -> Bounce;

/// The native function table
#[derive(Default)]
pub struct DispatcherRegistry {
    table: FxHashMap<u32, NativeFn>,
    next: u32,
}

impl DispatcherRegistry {
    pub fn new() -> DispatcherRegistry {
        DispatcherRegistry::default()
    }

    /// Install an entry point, returning its id for use in identities
    pub fn register(&mut self, entry: NativeFn) -> u32 {
        let id = self.next;
        self.next += 1;
        self.table.insert(id, entry);
        id
    }

    pub fn get(&self, id: u32) -> Option<NativeFn> {
        self.table.get(&id).copied()
    }

    /// Swap the entry point behind `id`, retargeting every action whose
    /// identity names it. Returns the previous entry.
    pub fn hijack(&mut self, id: u32, entry: NativeFn) -> Option<NativeFn> {
        self.table.insert(id, entry)
    }
}

impl std::fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("entries", &self.table.len())
            .finish()
    }
}
