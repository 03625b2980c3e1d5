//! The universal tagged value representation
//!
//! - [`cell`]: the fixed-size [`cell::Cell`] every value lives in
//! - [`kind`]: fundamental [`kind::Kind`]s and the quote-depth byte encoding
//! - [`quote`]: quoting/unquoting, including the shared pairing for depth 4+
//! - [`symbol`]: the intern table behind words, keys, and labels

pub mod cell;
pub mod kind;
pub mod quote;
pub mod symbol;

pub use cell::{Binding, Cell, CellFlags, Payload};
pub use kind::{Kind, TypeSet, MAX_INLINE_QUOTE_DEPTH};
pub use quote::{quote, unquote};
pub use symbol::{Symbol, SymbolTable};
