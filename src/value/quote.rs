//! Quoting and unquoting
//!
//! Depths one through three live entirely in the kind byte (`byte + 64 *
//! levels`), so quoting to that range allocates nothing. Depth four and
//! beyond moves the unquoted value into a two-cell *pairing* on the heap:
//! slot 0 records the depth at creation, slot 1 is a verbatim copy of the
//! unquoted cell. The original cell becomes a protected reference to the
//! pairing carrying its own depth, so several quoted instances at different
//! depths can share one pairing. Collapsing back below depth four copies the
//! inner cell's bits out and forgets the pairing (the collector reclaims it
//! once unshared).

use crate::errors::RuntimeError;
use crate::memory::heap::{BufferId, Heap};
use crate::memory::Flavor;
use crate::value::cell::{Cell, CellFlags, Payload};
use crate::value::kind::{Kind, MAX_INLINE_QUOTE_DEPTH};

/// Add `n` quote levels to a cell. `n = 0` is a no-op.
///
/// Allocates only when the resulting depth exceeds
/// [`MAX_INLINE_QUOTE_DEPTH`] and the cell is not already pairing-backed.
pub fn quote(heap: &mut Heap, cell: &mut Cell, n: u32) -> Result<(), RuntimeError> {
    if n == 0 {
        return Ok(());
    }
    debug_assert!(cell.is_formatted(), "quote of unformatted cell");

    let depth = cell.quote_depth() + n;

    if let Payload::Quoted { depth: d, .. } = cell.payload_mut() {
        // Already pairing-backed: the pairing is shared verbatim, only this
        // instance's depth changes.
        *d = depth;
        return Ok(());
    }

    if depth <= u32::from(MAX_INLINE_QUOTE_DEPTH) {
        cell.set_byte(cell.kind_byte() + 64 * n as u8);
        return Ok(());
    }

    // Overwrite directly rather than through Cell::write: the binding
    // survives into the reference cell, and quoting may legitimately act
    // on a protected cell.
    let pairing = alloc_pairing(heap, cell, depth)?;
    *cell.payload_mut() = Payload::Quoted { pairing, depth };
    cell.set_byte(Kind::Quoted as u8);
    cell.set_flag(CellFlags::FIRST_IS_NODE);
    cell.set_flag(CellFlags::PROTECTED);
    Ok(())
}

/// Remove `n` quote levels from a cell. `n = 0` is a no-op.
///
/// Dropping below depth four restores the unquoted cell's bits exactly,
/// re-applying any remaining depth through the kind byte.
pub fn unquote(heap: &Heap, cell: &mut Cell, n: u32) {
    if n == 0 {
        return;
    }
    debug_assert!(cell.is_formatted(), "unquote of unformatted cell");
    let current = cell.quote_depth();
    debug_assert!(n <= current, "unquote past depth zero");
    let depth = current.saturating_sub(n);

    match cell.payload() {
        Payload::Quoted { pairing, .. } => {
            if depth > u32::from(MAX_INLINE_QUOTE_DEPTH) {
                if let Payload::Quoted { depth: d, .. } = cell.payload_mut() {
                    *d = depth;
                }
            } else {
                let inner = inner_cell(heap, pairing);
                *cell = inner;
                cell.set_byte(inner.heart() as u8 + 64 * depth as u8);
            }
        }
        _ => {
            cell.set_byte(cell.kind_byte() - 64 * n as u8);
        }
    }
}

/// The unquoted cell a pairing-backed quote refers to
pub(crate) fn inner_cell(heap: &Heap, pairing: BufferId) -> Cell {
    let buf = heap.get(pairing).expect("quote pairing reclaimed");
    buf.cells()[1]
}

fn alloc_pairing(heap: &mut Heap, cell: &Cell, depth: u32) -> Result<BufferId, RuntimeError> {
    let mut inner = *cell;
    inner.set_byte(cell.heart() as u8); // store the copy at depth zero

    let id = heap.allocate(2, Flavor::Pairing)?;
    {
        let buf = heap.get_mut(id)?;
        buf.push_cell(Cell::int(i64::from(depth)))?;
        buf.push_cell(inner)?;
        buf.freeze();
    }
    heap.manage(id);
    Ok(id)
}
