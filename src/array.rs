//! Arrays: buffers of cells
//!
//! An [`Array`] is a thin handle over a cell-flavored buffer. The scanner
//! hands the core one array per bracketed group, the evaluator walks them,
//! and contexts and actions store their structure in them. Certain arrays
//! reserve index 0 for an *archetype* cell describing the whole structure
//! (a context's canonical object value, an action's canonical callable).

use crate::errors::RuntimeError;
use crate::memory::heap::{BufferId, Heap};
use crate::memory::Flavor;
use crate::value::cell::{Binding, Cell, Payload};
use crate::value::kind::Kind;

/// Handle to a plain cell array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Array(pub BufferId);

impl Array {
    /// Allocate a fresh manual array
    pub fn alloc(heap: &mut Heap, capacity: usize) -> Result<Array, RuntimeError> {
        Ok(Array(heap.allocate(capacity, Flavor::Array)?))
    }

    pub fn id(&self) -> BufferId {
        self.0
    }

    pub fn len(&self, heap: &Heap) -> Result<usize, RuntimeError> {
        Ok(heap.get(self.0)?.used())
    }

    /// Copy out the cell at `index`; out-of-range is always checked before
    /// the access, never clamped
    pub fn at(&self, heap: &Heap, index: usize) -> Result<Cell, RuntimeError> {
        Ok(*heap.get(self.0)?.cell_at(index)?)
    }

    pub fn set(&self, heap: &mut Heap, index: usize, cell: Cell) -> Result<(), RuntimeError> {
        *heap.get_mut(self.0)?.cell_at_mut(index)? = cell;
        Ok(())
    }

    pub fn push(&self, heap: &mut Heap, cell: Cell) -> Result<(), RuntimeError> {
        heap.append_cell(self.0, cell)
    }

    /// Insert a cell at `index`, sliding later elements up
    pub fn insert(&self, heap: &mut Heap, index: usize, cell: Cell) -> Result<(), RuntimeError> {
        heap.expand(self.0, index, 1)?;
        heap.get_mut(self.0)?.cells_mut_unchecked()[index] = cell;
        Ok(())
    }

    /// Remove `count` cells starting at `index`. Removal at the head is a
    /// bias adjustment, no copying.
    pub fn remove(&self, heap: &mut Heap, index: usize, count: usize) -> Result<(), RuntimeError> {
        heap.get_mut(self.0)?.remove(index, count)
    }

    /// Duplicate the cell sequence without recursing into nested series
    pub fn shallow_copy(&self, heap: &mut Heap) -> Result<Array, RuntimeError> {
        let cells: Vec<Cell> = heap.get(self.0)?.cells().to_vec();
        let copy = Array::alloc(heap, cells.len())?;
        for cell in cells {
            copy.push(heap, cell)?;
        }
        Ok(copy)
    }

    /// Duplicate the cell sequence, recursing into nested arrays.
    ///
    /// Values that must never be deep-copied keep their original payload:
    /// relatively bound words (their identity is their binding) and opaque
    /// handles.
    pub fn deep_copy(&self, heap: &mut Heap) -> Result<Array, RuntimeError> {
        let cells: Vec<Cell> = heap.get(self.0)?.cells().to_vec();
        let copy = Array::alloc(heap, cells.len())?;
        for mut cell in cells {
            if deep_copy_allowed(&cell) {
                if let Payload::Series { node, index } = cell.payload() {
                    if heap.get(node)?.flavor() == Flavor::Array {
                        let nested = Array(node).deep_copy(heap)?;
                        if let Payload::Series { node: n, index: i } = cell.payload_mut() {
                            *n = nested.0;
                            *i = index;
                        }
                    }
                }
            }
            copy.push(heap, cell)?;
        }
        Ok(copy)
    }
}

/// The documented deep-copy exclusion set
fn deep_copy_allowed(cell: &Cell) -> bool {
    if cell.kind_of() == Kind::Handle {
        return false;
    }
    !matches!(cell.binding(), Binding::Relative(_))
}
