//! Contexts: paired variable list and key list
//!
//! A [`Context`] implements objects, modules, errors, and instantiated call
//! frames. It is a var-list array (slot 0 is the archetype, variables are
//! 1-based after it) whose `link` is a key list of symbol descriptors
//! (0-based), with `keys.len() == vars.len() - 1` at all times: slot *i*
//! pairs with key *i − 1*.
//!
//! Contexts are append-only. Binding a word to a slot index is permanent,
//! because disrupting an index would invalidate every previously bound
//! reference. A key list may be shared by several contexts; extending
//! through a shared key list copies it first (copy-on-write), and the copy
//! records the list it was expanded from in its ancestry link. A key list
//! that is its own ancestor is the root of its chain.

use crate::errors::RuntimeError;
use crate::memory::heap::{BufferId, Heap};
use crate::memory::{BufferFlags, Flavor, Key};
use crate::value::cell::{Binding, Cell, CellFlags};
use crate::value::kind::Kind;
use crate::value::symbol::Symbol;

/// Handle to a context, identified by its var-list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context(pub BufferId);

impl Context {
    /// Allocate an empty context with room for `capacity` variables
    pub fn alloc(heap: &mut Heap, capacity: usize) -> Result<Context, RuntimeError> {
        let keylist = heap.allocate(capacity, Flavor::ParamList)?;
        // Self-pointing ancestry marks the chain root
        heap.get_mut(keylist)?.set_link(Some(keylist));

        let varlist = heap.allocate(capacity + 1, Flavor::VarList)?;
        {
            let buf = heap.get_mut(varlist)?;
            buf.set_link(Some(keylist));
            buf.push_cell(Cell::object(varlist))?;
        }
        Ok(Context(varlist))
    }

    /// Instantiate a context over an existing key list, which becomes
    /// shared. `kind` is [`Kind::Object`] or [`Kind::Frame`]; variables
    /// start blank.
    pub fn from_keylist(
        heap: &mut Heap,
        keylist: BufferId,
        kind: Kind,
    ) -> Result<Context, RuntimeError> {
        debug_assert!(matches!(kind, Kind::Object | Kind::Frame));
        let num_keys = heap.get(keylist)?.used();
        heap.get_mut(keylist)?.set_flag(BufferFlags::SHARED);

        let varlist = heap.allocate(num_keys + 1, Flavor::VarList)?;
        {
            let buf = heap.get_mut(varlist)?;
            buf.set_link(Some(keylist));
            let archetype = if kind == Kind::Frame {
                Cell::frame(varlist)
            } else {
                Cell::object(varlist)
            };
            buf.push_cell(archetype)?;
            for _ in 0..num_keys {
                buf.push_cell(Cell::blank())?;
            }
        }
        Ok(Context(varlist))
    }

    pub fn varlist(&self) -> BufferId {
        self.0
    }

    pub fn keylist(&self, heap: &Heap) -> Result<BufferId, RuntimeError> {
        Ok(heap
            .get(self.0)?
            .link()
            .expect("var-list without a key list"))
    }

    /// The canonical value for this context (slot 0)
    pub fn archetype(&self, heap: &Heap) -> Result<Cell, RuntimeError> {
        Ok(*heap.get(self.0)?.cell_at(0)?)
    }

    /// Number of variables (excludes the archetype slot)
    pub fn len(&self, heap: &Heap) -> Result<usize, RuntimeError> {
        Ok(heap.get(self.0)?.used() - 1)
    }

    pub fn is_empty(&self, heap: &Heap) -> Result<bool, RuntimeError> {
        Ok(self.len(heap)? == 0)
    }

    /// Read the variable at 1-based `index`
    pub fn var(&self, heap: &Heap, index: usize) -> Result<Cell, RuntimeError> {
        let buf = heap.get(self.0)?;
        if buf.is_stub() {
            return Err(RuntimeError::StaleFrame);
        }
        if index == 0 {
            return Err(RuntimeError::IndexOutOfRange {
                index,
                len: buf.used(),
            });
        }
        Ok(*buf.cell_at(index)?)
    }

    /// Overwrite the variable at 1-based `index`
    pub fn set_var(&self, heap: &mut Heap, index: usize, cell: Cell) -> Result<(), RuntimeError> {
        let buf = heap.get_mut(self.0)?;
        if buf.is_stub() {
            return Err(RuntimeError::StaleFrame);
        }
        if index == 0 {
            return Err(RuntimeError::IndexOutOfRange {
                index,
                len: buf.used(),
            });
        }
        let slot = buf.cell_at_mut(index)?;
        let hidden = slot.is_hidden();
        *slot = cell;
        if hidden {
            slot.set_flag(CellFlags::HIDDEN);
        }
        Ok(())
    }

    /// The key descriptor paired with 1-based variable `index`
    pub fn key(&self, heap: &Heap, index: usize) -> Result<Key, RuntimeError> {
        let keylist = self.keylist(heap)?;
        let keys = heap.get(keylist)?.keys();
        keys.get(index - 1)
            .copied()
            .ok_or(RuntimeError::IndexOutOfRange {
                index,
                len: keys.len() + 1,
            })
    }

    /// Find the 1-based slot bound to `symbol`
    pub fn find(&self, heap: &Heap, symbol: Symbol) -> Result<Option<usize>, RuntimeError> {
        let keylist = self.keylist(heap)?;
        let keys = heap.get(keylist)?.keys();
        Ok(keys
            .iter()
            .position(|k| k.symbol == symbol)
            .map(|pos| pos + 1))
    }

    /// Resolve a symbol to its variable, erroring if absent
    pub fn get(&self, heap: &Heap, symbol: Symbol, name: &str) -> Result<Cell, RuntimeError> {
        match self.find(heap, symbol)? {
            Some(index) => self.var(heap, index),
            None => Err(RuntimeError::UnknownField {
                word: name.to_string(),
            }),
        }
    }

    /// Append a key and its blank variable, returning the new permanent
    /// 1-based index. Copies the key list first if it is shared or frozen.
    pub fn append(&self, heap: &mut Heap, key: Key) -> Result<usize, RuntimeError> {
        let keylist = self.keylist(heap)?;
        let klflags = heap.get(keylist)?.flags();
        let target = if klflags.intersects(BufferFlags::SHARED | BufferFlags::FROZEN) {
            let expanded = self.copy_keylist_for_write(heap, keylist)?;
            heap.get_mut(self.0)?.set_link(Some(expanded));
            expanded
        } else {
            keylist
        };

        heap.get_mut(target)?.push_key(key)?;
        heap.append_cell(self.0, Cell::blank())?;

        let used = heap.get(self.0)?.used();
        debug_assert_eq!(heap.get(target)?.used(), used - 1);
        Ok(used - 1)
    }

    /// Hide the variable at `index` from enumeration. Per-instance: the
    /// flag lives on the variable's cell, not on the shared key, because
    /// one specialization may hide a parameter another does not.
    pub fn hide(&self, heap: &mut Heap, index: usize) -> Result<(), RuntimeError> {
        let buf = heap.get_mut(self.0)?;
        if buf.is_stub() {
            return Err(RuntimeError::StaleFrame);
        }
        let len = buf.used();
        if index == 0 || index >= len {
            return Err(RuntimeError::IndexOutOfRange { index, len });
        }
        buf.cells_mut_unchecked()[index].set_flag(CellFlags::HIDDEN);
        Ok(())
    }

    pub fn is_hidden(&self, heap: &Heap, index: usize) -> Result<bool, RuntimeError> {
        let buf = heap.get(self.0)?;
        Ok(buf.cell_at(index)?.is_hidden())
    }

    /// Visible (symbol, value) pairs, skipping hidden instances
    pub fn enumerate(&self, heap: &Heap) -> Result<Vec<(Symbol, Cell)>, RuntimeError> {
        let keylist = self.keylist(heap)?;
        let keys: Vec<Key> = heap.get(keylist)?.keys().to_vec();
        let buf = heap.get(self.0)?;
        if buf.is_stub() {
            return Err(RuntimeError::StaleFrame);
        }
        let mut out = Vec::new();
        for (pos, key) in keys.iter().enumerate() {
            let cell = buf.cell_at(pos + 1)?;
            if !cell.is_hidden() {
                out.push((key.symbol, *cell));
            }
        }
        Ok(out)
    }

    /// Bind a word cell specifically to this context if its symbol is here
    pub fn bind(&self, heap: &Heap, cell: &mut Cell) -> Result<bool, RuntimeError> {
        debug_assert!(cell.kind_of().is_word() || cell.inner_kind(heap).is_word());
        let Some(symbol) = cell.as_word() else {
            return Ok(false);
        };
        if self.find(heap, symbol)?.is_some() {
            cell.set_binding(Binding::Specific(self.0));
            return Ok(true);
        }
        Ok(false)
    }

    /// Is a frame built over `other` key-list compatible with this context:
    /// true when `other` appears in this key list's ancestry chain
    pub fn compatible_with(&self, heap: &Heap, other: BufferId) -> Result<bool, RuntimeError> {
        let mut cursor = self.keylist(heap)?;
        loop {
            if cursor == other {
                return Ok(true);
            }
            let ancestor = heap
                .get(cursor)?
                .link()
                .expect("key list without ancestry");
            if ancestor == cursor {
                return Ok(false); // self-pointing sentinel: chain root
            }
            cursor = ancestor;
        }
    }

    fn copy_keylist_for_write(
        &self,
        heap: &mut Heap,
        keylist: BufferId,
    ) -> Result<BufferId, RuntimeError> {
        let keys: Vec<Key> = heap.get(keylist)?.keys().to_vec();
        let expanded = heap.allocate(keys.len() + 1, Flavor::ParamList)?;
        {
            let buf = heap.get_mut(expanded)?;
            // Ancestry records what this list was expanded from
            buf.set_link(Some(keylist));
            for key in keys {
                buf.push_key(key)?;
            }
        }
        Ok(expanded)
    }
}
