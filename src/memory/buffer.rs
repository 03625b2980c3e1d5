//! The buffer: a generic growable owned memory region
//!
//! A [`Buffer`] underlies every composite value. Its element storage is one
//! of a few content variants chosen by [`Flavor`], with shared bookkeeping:
//!
//! - `width`: element width in bytes
//! - `used`: elements in use
//! - `rest`: element capacity (dynamic buffers reserve one extra slot past
//!   `rest` as an implicit terminator for iteration safety)
//! - `bias`: unused headroom before element 0, making head-shrink O(1)
//!
//! Lifecycle (manual vs. managed) is the [`crate::memory::heap::Heap`]'s
//! business; the buffer only records the state in its flags.

use crate::errors::{ReadOnlyCause, RuntimeError};
use crate::memory::heap::BufferId;
use crate::memory::{BufferFlags, Flavor, Key};
use crate::value::cell::Cell;

/// Element storage, chosen by flavor
#[derive(Debug, Clone)]
pub enum BufferContent {
    Cells(Vec<Cell>),
    Keys(Vec<Key>),
    Bytes(Vec<u8>),
    Indices(Vec<u32>),
}

/// A generic owned memory region
#[derive(Debug, Clone)]
pub struct Buffer {
    flavor: Flavor,
    flags: BufferFlags,
    width: usize,
    used: usize,
    rest: usize,
    bias: usize,
    /// Flavor-interpreted extra bits (action property flags live here)
    info: u32,
    /// Flavor-interpreted reference the collector traces (key list of a
    /// var-list, ancestor of a key list, specialty of an identity)
    link: Option<BufferId>,
    /// Second flavor-interpreted reference (underlying identity of an
    /// action, meta of a var-list)
    misc: Option<BufferId>,
    content: BufferContent,
}

impl Buffer {
    /// Create a buffer with room for `capacity` elements.
    ///
    /// Capacity 0 or 1 uses inline-sized storage; anything larger is
    /// heap-backed with the terminator slot reserved.
    pub fn new(flavor: Flavor, capacity: usize) -> Buffer {
        let dynamic = capacity > 1;
        let rest = capacity.max(1);
        let reserve = if dynamic { rest + 1 } else { rest };
        let (content, width) = match flavor {
            f if f.holds_cells() => (
                BufferContent::Cells(Vec::with_capacity(reserve)),
                std::mem::size_of::<Cell>(),
            ),
            Flavor::ParamList => (
                BufferContent::Keys(Vec::with_capacity(reserve)),
                std::mem::size_of::<Key>(),
            ),
            Flavor::IndexList => (
                BufferContent::Indices(Vec::with_capacity(reserve)),
                std::mem::size_of::<u32>(),
            ),
            _ => (BufferContent::Bytes(Vec::with_capacity(reserve)), 1),
        };
        let mut flags = BufferFlags::empty();
        if dynamic {
            flags.insert(BufferFlags::DYNAMIC);
        }
        Buffer {
            flavor,
            flags,
            width,
            used: 0,
            rest,
            bias: 0,
            info: 0,
            link: None,
            misc: None,
            content,
        }
    }

    // --- bookkeeping accessors ---

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: BufferFlags) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: BufferFlags) {
        self.flags.remove(flag);
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn rest(&self) -> usize {
        self.rest
    }

    pub fn bias(&self) -> usize {
        self.bias
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Approximate footprint in bytes, for heap accounting
    pub fn byte_size(&self) -> usize {
        self.width * (self.bias + self.rest + 1)
    }

    pub fn link(&self) -> Option<BufferId> {
        self.link
    }

    pub fn set_link(&mut self, link: Option<BufferId>) {
        self.link = link;
    }

    pub fn misc(&self) -> Option<BufferId> {
        self.misc
    }

    pub fn set_misc(&mut self, misc: Option<BufferId>) {
        self.misc = misc;
    }

    pub fn info(&self) -> u32 {
        self.info
    }

    pub fn set_info(&mut self, info: u32) {
        self.info = info;
    }

    pub fn is_managed(&self) -> bool {
        self.flags.contains(BufferFlags::MANAGED)
    }

    pub fn is_stub(&self) -> bool {
        self.flags.contains(BufferFlags::STUB)
    }

    // --- read-only states ---

    /// Check whether writes are currently allowed, reporting the most
    /// specific refusal cause first.
    pub fn check_writable(&self) -> Result<(), RuntimeError> {
        let cause = if self.flags.contains(BufferFlags::AUTO_LOCKED) {
            ReadOnlyCause::AutoLocked
        } else if self.flags.contains(BufferFlags::HELD) {
            ReadOnlyCause::Held
        } else if self.flags.contains(BufferFlags::FROZEN) {
            ReadOnlyCause::Frozen
        } else if self.flags.contains(BufferFlags::PROTECTED) {
            ReadOnlyCause::Protected
        } else {
            return Ok(());
        };
        Err(RuntimeError::ReadOnly { cause })
    }

    /// Permanently immutable. There is no unfreeze.
    pub fn freeze(&mut self) {
        self.flags.insert(BufferFlags::FROZEN);
    }

    /// Temporarily immutable; pairs with [`Buffer::release_hold`]
    pub fn hold(&mut self) {
        self.flags.insert(BufferFlags::HELD);
    }

    pub fn release_hold(&mut self) {
        self.flags.remove(BufferFlags::HELD);
    }

    pub fn protect(&mut self) {
        self.flags.insert(BufferFlags::PROTECTED);
    }

    pub fn unprotect(&mut self) {
        self.flags.remove(BufferFlags::PROTECTED);
    }

    // --- cell content ---

    /// The used cells, bias-adjusted
    pub fn cells(&self) -> &[Cell] {
        match &self.content {
            BufferContent::Cells(v) => &v[self.bias..self.bias + self.used],
            _ => panic!("buffer flavor {:?} does not hold cells", self.flavor),
        }
    }

    /// Mutable view of the used cells; refused when read-only
    pub fn cells_mut(&mut self) -> Result<&mut [Cell], RuntimeError> {
        self.check_writable()?;
        Ok(self.cells_mut_unchecked())
    }

    /// Mutable cells without the writability check. For core machinery
    /// that operates on held or auto-locked buffers (frame fulfillment
    /// writes into an auto-locked var-list).
    pub(crate) fn cells_mut_unchecked(&mut self) -> &mut [Cell] {
        match &mut self.content {
            BufferContent::Cells(v) => &mut v[self.bias..self.bias + self.used],
            _ => panic!("buffer flavor does not hold cells"),
        }
    }

    /// Bounds-checked cell access
    pub fn cell_at(&self, index: usize) -> Result<&Cell, RuntimeError> {
        let cells = self.cells();
        cells.get(index).ok_or(RuntimeError::IndexOutOfRange {
            index,
            len: cells.len(),
        })
    }

    pub fn cell_at_mut(&mut self, index: usize) -> Result<&mut Cell, RuntimeError> {
        self.check_writable()?;
        let len = self.used;
        self.cells_mut_unchecked()
            .get_mut(index)
            .ok_or(RuntimeError::IndexOutOfRange { index, len })
    }

    /// Append a cell, growing if the capacity is exhausted
    pub fn push_cell(&mut self, cell: Cell) -> Result<(), RuntimeError> {
        self.check_writable()?;
        self.push_cell_unchecked(cell);
        Ok(())
    }

    pub(crate) fn push_cell_unchecked(&mut self, cell: Cell) {
        if self.used == self.rest {
            self.grow(1);
        }
        match &mut self.content {
            BufferContent::Cells(v) => {
                debug_assert_eq!(v.len(), self.bias + self.used);
                v.push(cell);
            }
            _ => panic!("buffer flavor does not hold cells"),
        }
        self.used += 1;
        debug_assert!(self.used <= self.rest);
    }

    // --- key content ---

    pub fn keys(&self) -> &[Key] {
        match &self.content {
            BufferContent::Keys(v) => &v[self.bias..self.bias + self.used],
            _ => panic!("buffer flavor {:?} does not hold keys", self.flavor),
        }
    }

    pub fn push_key(&mut self, key: Key) -> Result<(), RuntimeError> {
        self.check_writable()?;
        if self.used == self.rest {
            self.grow(1);
        }
        match &mut self.content {
            BufferContent::Keys(v) => v.push(key),
            _ => panic!("buffer flavor does not hold keys"),
        }
        self.used += 1;
        Ok(())
    }

    // --- byte content ---

    pub fn bytes(&self) -> &[u8] {
        match &self.content {
            BufferContent::Bytes(v) => &v[self.bias..self.bias + self.used],
            _ => panic!("buffer flavor {:?} does not hold bytes", self.flavor),
        }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        self.check_writable()?;
        if self.used + bytes.len() > self.rest {
            self.grow(bytes.len());
        }
        match &mut self.content {
            BufferContent::Bytes(v) => v.extend_from_slice(bytes),
            _ => panic!("buffer flavor does not hold bytes"),
        }
        self.used += bytes.len();
        Ok(())
    }

    // --- index content ---

    pub fn indices(&self) -> &[u32] {
        match &self.content {
            BufferContent::Indices(v) => &v[self.bias..self.bias + self.used],
            _ => panic!("buffer flavor {:?} does not hold indices", self.flavor),
        }
    }

    pub fn push_index(&mut self, index: u32) -> Result<(), RuntimeError> {
        self.check_writable()?;
        if self.used == self.rest {
            self.grow(1);
        }
        match &mut self.content {
            BufferContent::Indices(v) => v.push(index),
            _ => panic!("buffer flavor does not hold indices"),
        }
        self.used += 1;
        Ok(())
    }

    // --- structural operations ---

    /// Open `delta` element slots at logical index `at`. Grows in place
    /// when capacity allows, else reallocates with the bias dropped.
    pub fn expand(&mut self, at: usize, delta: usize) -> Result<(), RuntimeError> {
        self.check_writable()?;
        if at > self.used {
            return Err(RuntimeError::IndexOutOfRange {
                index: at,
                len: self.used,
            });
        }
        if delta == 0 {
            return Ok(());
        }
        if self.used + delta > self.rest {
            self.grow(delta);
        }
        let spot = self.bias + at;
        match &mut self.content {
            BufferContent::Cells(v) => {
                v.splice(spot..spot, std::iter::repeat(Cell::unformatted()).take(delta));
            }
            BufferContent::Keys(_) => panic!("key lists expand only by push"),
            BufferContent::Bytes(v) => {
                v.splice(spot..spot, std::iter::repeat(0u8).take(delta));
            }
            BufferContent::Indices(v) => {
                v.splice(spot..spot, std::iter::repeat(0u32).take(delta));
            }
        }
        self.used += delta;
        debug_assert!(self.used <= self.rest);
        Ok(())
    }

    /// Remove `count` elements starting at `at`
    pub fn remove(&mut self, at: usize, count: usize) -> Result<(), RuntimeError> {
        self.check_writable()?;
        if at + count > self.used {
            return Err(RuntimeError::IndexOutOfRange {
                index: at + count,
                len: self.used,
            });
        }
        if at == 0 {
            // Head removal is a bias adjustment, no copying
            self.bias += count;
            self.used -= count;
            return Ok(());
        }
        let spot = self.bias + at;
        match &mut self.content {
            BufferContent::Cells(v) => {
                v.drain(spot..spot + count);
            }
            BufferContent::Keys(v) => {
                v.drain(spot..spot + count);
            }
            BufferContent::Bytes(v) => {
                v.drain(spot..spot + count);
            }
            BufferContent::Indices(v) => {
                v.drain(spot..spot + count);
            }
        }
        self.used -= count;
        Ok(())
    }

    /// Empty a cell buffer for reuse, keeping its capacity
    pub(crate) fn clear_cells(&mut self) {
        match &mut self.content {
            BufferContent::Cells(v) => v.clear(),
            _ => panic!("buffer flavor does not hold cells"),
        }
        self.bias = 0;
        self.used = 0;
    }

    /// Reduce a var-list to a single-cell archetype stub, dropping its
    /// variables. The buffer is never used as a var-list again.
    pub(crate) fn decay_to_stub(&mut self) {
        debug_assert!(matches!(self.flavor, Flavor::VarList));
        match &mut self.content {
            BufferContent::Cells(v) => {
                let archetype = v[self.bias];
                v.clear();
                v.push(archetype);
            }
            _ => unreachable!(),
        }
        self.bias = 0;
        self.used = 1;
        self.rest = 1;
        self.flags.insert(BufferFlags::STUB);
    }

    /// Reallocate with room for at least `extra` more elements, dropping
    /// the bias so existing elements keep their logical positions.
    fn grow(&mut self, extra: usize) {
        let need = self.used + extra;
        let new_rest = need.next_power_of_two().max(4);
        tracing::trace!(
            flavor = ?self.flavor,
            used = self.used,
            rest = self.rest,
            new_rest,
            "buffer grow"
        );
        match &mut self.content {
            BufferContent::Cells(v) => {
                v.drain(..self.bias);
                v.reserve_exact(new_rest + 1 - v.len());
            }
            BufferContent::Keys(v) => {
                v.drain(..self.bias);
                v.reserve_exact(new_rest + 1 - v.len());
            }
            BufferContent::Bytes(v) => {
                v.drain(..self.bias);
                v.reserve_exact(new_rest + 1 - v.len());
            }
            BufferContent::Indices(v) => {
                v.drain(..self.bias);
                v.reserve_exact(new_rest + 1 - v.len());
            }
        }
        self.bias = 0;
        self.rest = new_rest;
        self.flags.insert(BufferFlags::DYNAMIC);
    }
}
