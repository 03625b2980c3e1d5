//! The cell: a fixed-size tagged value
//!
//! Every language value lives in a [`Cell`]: a kind byte (which folds in the
//! quote depth, see [`crate::value::kind`]), a set of [`CellFlags`], a
//! [`Binding`], and a [`Payload`] that is either inline data or up to two
//! references into the heap.
//!
//! # Formatting discipline
//!
//! A cell slot must be *formatted* (marked writable) before anything is
//! written into it, and reads also require a prior format. Violating either
//! is a programmer error, checked with `debug_assert!` rather than reported
//! as a recoverable condition.

use bitflags::bitflags;

use crate::memory::heap::{BufferId, Heap};
use crate::value::kind::{Kind, MAX_INLINE_QUOTE_DEPTH};
use crate::value::symbol::Symbol;

bitflags! {
    /// Per-cell flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u16 {
        /// Slot has been prepared for use as a cell
        const FORMATTED = 1 << 0;
        /// Writes are a programmer error
        const PROTECTED = 1 << 1;
        /// Value may not be reassigned through word access
        const CONST = 1 << 2;
        /// Produced by evaluation (as opposed to literal source)
        const EVALUATED = 1 << 3;
        /// Variable is hidden from enumeration in its context instance
        const HIDDEN = 1 << 4;
        /// Specialized slot whose argument is still pending at the callsite
        const PARTIAL = 1 << 5;
        /// Payload's first slot references a heap node
        const FIRST_IS_NODE = 1 << 6;
        /// Payload's second slot references a heap node
        const SECOND_IS_NODE = 1 << 7;
    }
}

/// What a word (or any bindable cell) resolves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    /// No context association
    #[default]
    Unbound,
    /// Relative to an action; only meaningful inside that action's body,
    /// and resolving it requires an enclosing frame's context
    Relative(BufferId),
    /// Bound to a specific context's variable list
    Specific(BufferId),
}

/// Cell payload: inline data or up to two heap references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    Logic(bool),
    Int(i64),
    Word(Symbol),
    /// Two packed 32-bit halves (small tuples, dispatcher selectors)
    Pair(u32, u32),
    /// A position inside a series buffer
    Series { node: BufferId, index: u32 },
    /// An object or frame, identified by its variable list
    Context { varlist: BufferId },
    /// A callable, identified by its identity array
    Action { identity: BufferId },
    /// Quote depth 4+: reference to the shared pairing holding the
    /// unquoted value, plus this instance's own depth
    Quoted { pairing: BufferId, depth: u32 },
    /// Opaque handle for API extensions; never deep-copied
    Handle(u64),
}

/// A fixed-size tagged value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    byte: u8,
    flags: CellFlags,
    binding: Binding,
    payload: Payload,
}

impl Default for Cell {
    fn default() -> Self {
        Cell::unformatted()
    }
}

impl Cell {
    /// An erased, unwritable slot. Must be formatted before use.
    pub const fn unformatted() -> Cell {
        Cell {
            byte: 0,
            flags: CellFlags::empty(),
            binding: Binding::Unbound,
            payload: Payload::None,
        }
    }

    /// Mark a slot writable
    pub fn format(&mut self) {
        self.byte = Kind::Blank as u8;
        self.flags = CellFlags::FORMATTED;
        self.binding = Binding::Unbound;
        self.payload = Payload::None;
    }

    /// Has this slot been formatted
    pub fn is_formatted(&self) -> bool {
        self.flags.contains(CellFlags::FORMATTED)
    }

    /// Overwrite kind and payload. Requires a prior [`Cell::format`] and a
    /// non-protected slot; resets the binding.
    pub fn write(&mut self, kind: Kind, payload: Payload) {
        debug_assert!(self.is_formatted(), "write to unformatted cell");
        debug_assert!(
            !self.flags.contains(CellFlags::PROTECTED),
            "write to protected cell"
        );
        self.byte = kind as u8;
        self.payload = payload;
        self.binding = Binding::Unbound;
        self.flags.remove(CellFlags::FIRST_IS_NODE | CellFlags::SECOND_IS_NODE);
        if payload_first_node(&payload).is_some() {
            self.flags.insert(CellFlags::FIRST_IS_NODE);
        }
    }

    // --- constructors (formatted cells) ---

    pub fn blank() -> Cell {
        let mut c = Cell::unformatted();
        c.format();
        c
    }

    pub fn logic(value: bool) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Logic, Payload::Logic(value));
        c
    }

    pub fn int(value: i64) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Integer, Payload::Int(value));
        c
    }

    pub fn word(symbol: Symbol) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Word, Payload::Word(symbol));
        c
    }

    pub fn set_word(symbol: Symbol) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::SetWord, Payload::Word(symbol));
        c
    }

    pub fn block(node: BufferId, index: u32) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Block, Payload::Series { node, index });
        c
    }

    pub fn group(node: BufferId, index: u32) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Group, Payload::Series { node, index });
        c
    }

    pub fn text(node: BufferId, index: u32) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Text, Payload::Series { node, index });
        c
    }

    pub fn object(varlist: BufferId) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Object, Payload::Context { varlist });
        c
    }

    pub fn frame(varlist: BufferId) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Frame, Payload::Context { varlist });
        c
    }

    pub fn action(identity: BufferId) -> Cell {
        let mut c = Cell::blank();
        c.write(Kind::Action, Payload::Action { identity });
        c
    }

    // --- kind and depth ---

    /// The raw kind byte (kind + 64 * inline depth)
    pub fn kind_byte(&self) -> u8 {
        self.byte
    }

    /// The stored kind with quoting stripped from the byte. For cells whose
    /// quoting overflowed into a pairing this is [`Kind::Quoted`]; use
    /// [`Cell::inner_kind`] to look through the pairing.
    pub fn heart(&self) -> Kind {
        debug_assert!(self.is_formatted(), "kind of unformatted cell");
        Kind::from_byte(self.byte).expect("corrupt kind byte")
    }

    /// The kind used for type dispatch: any quote depth >= 1 normalizes to
    /// [`Kind::Quoted`]
    pub fn kind_of(&self) -> Kind {
        if self.quote_depth() >= 1 {
            Kind::Quoted
        } else {
            self.heart()
        }
    }

    /// The kind with all quoting stripped, looking through a pairing if the
    /// depth overflowed the byte encoding
    pub fn inner_kind(&self, heap: &Heap) -> Kind {
        if let Payload::Quoted { pairing, .. } = self.payload {
            let buf = heap.get(pairing).expect("quote pairing reclaimed");
            buf.cells()[1].heart()
        } else {
            self.heart()
        }
    }

    /// Current quote depth (0 for unquoted)
    pub fn quote_depth(&self) -> u32 {
        if let Payload::Quoted { depth, .. } = self.payload {
            depth
        } else {
            u32::from(self.byte / 64)
        }
    }

    pub(crate) fn set_byte(&mut self, byte: u8) {
        debug_assert!(u32::from(byte / 64) <= u32::from(MAX_INLINE_QUOTE_DEPTH));
        self.byte = byte;
    }

    // --- flags ---

    pub fn flags(&self) -> CellFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: CellFlags) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: CellFlags) {
        self.flags.remove(flag);
    }

    pub fn is_protected(&self) -> bool {
        self.flags.contains(CellFlags::PROTECTED)
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(CellFlags::HIDDEN)
    }

    // --- binding ---

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn set_binding(&mut self, binding: Binding) {
        debug_assert!(self.is_formatted(), "bind of unformatted cell");
        self.binding = binding;
    }

    // --- payload access ---

    pub fn payload(&self) -> Payload {
        debug_assert!(self.is_formatted(), "read of unformatted cell");
        self.payload
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Payload {
        debug_assert!(self.is_formatted(), "read of unformatted cell");
        &mut self.payload
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.payload() {
            Payload::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.payload() {
            Payload::Logic(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_word(&self) -> Option<Symbol> {
        match self.payload() {
            Payload::Word(sym) => Some(sym),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<(BufferId, u32)> {
        match self.payload() {
            Payload::Series { node, index } => Some((node, index)),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<BufferId> {
        match self.payload() {
            Payload::Context { varlist } => Some(varlist),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<BufferId> {
        match self.payload() {
            Payload::Action { identity } => Some(identity),
            _ => None,
        }
    }

    /// Bit-for-bit equality: kind byte, flags, binding, and payload all
    /// identical. Stricter than value equality would be.
    pub fn bits_eq(&self, other: &Cell) -> bool {
        self.byte == other.byte
            && self.flags == other.flags
            && self.binding == other.binding
            && self.payload == other.payload
    }

    /// Heap nodes this cell keeps alive: payload reference(s) plus the
    /// binding target. The collector follows these during marking.
    pub fn node_refs(&self) -> (Option<BufferId>, Option<BufferId>) {
        if !self.is_formatted() {
            return (None, None);
        }
        let first = payload_first_node(&self.payload);
        let second = match self.binding {
            Binding::Unbound => None,
            Binding::Relative(id) | Binding::Specific(id) => Some(id),
        };
        (first, second)
    }
}

fn payload_first_node(payload: &Payload) -> Option<BufferId> {
    match payload {
        Payload::Series { node, .. } => Some(*node),
        Payload::Context { varlist } => Some(*varlist),
        Payload::Action { identity } => Some(*identity),
        Payload::Quoted { pairing, .. } => Some(*pairing),
        _ => None,
    }
}
