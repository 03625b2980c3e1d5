//! # Introduction
//!
//! rebus is the core object model and execution substrate for the Rebus
//! language: a dynamically typed, homoiconic interpreted language. This
//! crate is the layer underneath the scanner and the evaluator — the
//! universal tagged value, the garbage-collected buffer engine every
//! composite value is built on, and the callable/invocation protocol.
//!
//! ## Data flow
//!
//! ```text
//! Source → Scanner → Arrays of Cells → Evaluator → Frames → Actions
//!                           ↑__________________________________|
//! ```
//!
//! 1. [`value`] — the fixed-size tagged [`value::Cell`], including the
//!    quote-depth encoding and bindings.
//! 2. [`memory`] — the [`memory::buffer::Buffer`] growable-region
//!    primitive and the [`memory::heap::Heap`] arena with its mark/sweep
//!    collector, guard stack, and manual-allocation list.
//! 3. [`array`] — buffers of cells, the universal composite container.
//! 4. [`context`] / [`action`] — objects and callables: paired
//!    variable/key lists and parameter/identity lists.
//! 5. [`engine`] / [`frame`] — the single cooperative frame chain and the
//!    argument-fulfillment state machine.
//! 6. [`dispatch`] — the dispatcher indirection and the sentinel
//!    [`dispatch::Bounce`] outcomes the evaluator interprets.
//!
//! Contexts and actions are themselves cells that can be stored back into
//! arrays, closing the reflective loop.
//!
//! The scanner, the evaluator's dispatch loop, parsing dialects, ports/IO,
//! and the REPL are external collaborators, not part of this crate.

pub mod action;
pub mod array;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod memory;
pub mod value;

pub use action::{Action, ActionFlags};
pub use array::Array;
pub use context::Context;
pub use dispatch::{Bounce, Dispatcher, DispatcherRegistry, NativeFn, Reference, Throw};
pub use engine::Engine;
pub use errors::{ReadOnlyCause, RuntimeError};
pub use frame::{Frame, FrameState};
pub use memory::buffer::{Buffer, BufferContent};
pub use memory::heap::{BufferId, Heap, HeapStats};
pub use memory::{BufferFlags, Flavor, Key, ParamClass};
pub use value::{Binding, Cell, CellFlags, Kind, Payload, Symbol, SymbolTable, TypeSet};
