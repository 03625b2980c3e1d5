//! Symbol interning
//!
//! Words, keys, and action labels all refer to interned symbols by id.
//! Interning makes key-list comparison an integer compare, which matters
//! because every context lookup walks a key list.

use rustc_hash::FxHashMap;

/// An interned symbol id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

/// The intern table mapping names to [`Symbol`] ids and back
#[derive(Debug, Default)]
pub struct SymbolTable {
    ids: FxHashMap<String, Symbol>,
    names: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern a name, returning its stable id
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.ids.get(name) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), sym);
        sym
    }

    /// Look up the name for an id
    pub fn name(&self, sym: Symbol) -> &str {
        &self.names[sym.0 as usize]
    }

    /// Look up an already-interned name without creating an id
    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
