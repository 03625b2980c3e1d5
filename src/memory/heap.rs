//! The heap: a handle-addressed arena of buffers with a mark/sweep collector
//!
//! Buffers are addressed by stable generational handles ([`BufferId`]), so
//! key lists, parameter lists, and quote pairings can be shared freely
//! without Rust aliasing concerns, and a reclaimed buffer is detected as
//! stale rather than misread.
//!
//! # Collection
//!
//! Allocation decrements a ballast counter; once it crosses zero the owner
//! of the heap is expected to run [`Heap::collect`] at its next allocation
//! boundary, passing its roots. Marking starts from those roots plus the
//! guard stack, follows cell payloads and bindings plus each buffer's
//! flavor-interpreted `link`/`misc` slots, then sweeps unmarked *managed*
//! buffers. Manual buffers are never swept; they are freed explicitly (or
//! on failure unwind) and are not traced unless guarded or otherwise
//! reachable.
//!
//! # Errors
//!
//! Allocation failure is a recoverable [`RuntimeError::OutOfMemory`], never
//! a process abort. Double-manage and imbalanced guard stacks are
//! programmer errors checked with `debug_assert!`.

use smallvec::SmallVec;

use crate::errors::RuntimeError;
use crate::memory::buffer::Buffer;
use crate::memory::{BufferFlags, Flavor};
use crate::value::cell::Cell;

/// Stable handle to a buffer in the arena.
///
/// Handles to var-lists carry a tag bit in the index, so a stale handle
/// still reports whether it referred to a frame even after its slot has
/// been recycled for something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

const FRAME_BIT: u32 = 1 << 31;

impl BufferId {
    fn slot(self) -> usize {
        (self.index & !FRAME_BIT) as usize
    }

    /// Did this handle refer to a var-list
    pub fn is_frame(self) -> bool {
        self.index & FRAME_BIT != 0
    }
}

fn tag_id(index: u32, generation: u32, flavor: Flavor) -> BufferId {
    debug_assert!(index < FRAME_BIT);
    let index = if matches!(flavor, Flavor::VarList) {
        index | FRAME_BIT
    } else {
        index
    };
    BufferId { index, generation }
}

/// Staleness through `id`, classified by what the handle referred to
fn stale_error(id: BufferId) -> RuntimeError {
    if id.is_frame() {
        RuntimeError::StaleFrame
    } else {
        RuntimeError::StaleSeries
    }
}

#[derive(Debug)]
enum Slot {
    Occupied { generation: u32, buffer: Buffer },
    Free { generation: u32, next: Option<u32> },
}

/// Heap statistics, advisory (growth after allocation is approximated)
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    pub live: usize,
    pub bytes_allocated: usize,
    pub sweeps: usize,
    pub swept_total: usize,
}

/// The arena of buffers
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    /// Manual-allocation tracking list; freed explicitly or on unwind
    manual: Vec<BufferId>,
    /// Buffers the collector must treat as roots even though unrooted
    guards: SmallVec<[BufferId; 8]>,
    max_bytes: usize,
    bytes_allocated: usize,
    ballast: isize,
    ballast_reset: isize,
    stats: HeapStats,
}

/// Default ballast between collections, in bytes
pub const DEFAULT_BALLAST: isize = 64 * 1024;

impl Heap {
    /// Create a heap with a maximum size limit in bytes
    pub fn new(max_bytes: usize) -> Heap {
        Heap {
            slots: Vec::new(),
            free_head: None,
            manual: Vec::new(),
            guards: SmallVec::new(),
            max_bytes,
            bytes_allocated: 0,
            ballast: DEFAULT_BALLAST,
            ballast_reset: DEFAULT_BALLAST,
            stats: HeapStats::default(),
        }
    }

    /// Allocate a buffer with room for `capacity` elements of the flavor's
    /// width. The new buffer is manual until [`Heap::manage`]d.
    pub fn allocate(&mut self, capacity: usize, flavor: Flavor) -> Result<BufferId, RuntimeError> {
        let buffer = Buffer::new(flavor, capacity);
        let size = buffer.byte_size();
        if self.bytes_allocated + size > self.max_bytes {
            return Err(RuntimeError::OutOfMemory {
                requested: size,
                limit: self.max_bytes,
            });
        }

        let id = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let (generation, next) = match slot {
                    Slot::Free { generation, next } => (*generation + 1, *next),
                    Slot::Occupied { .. } => unreachable!("occupied slot on free list"),
                };
                self.free_head = next;
                *slot = Slot::Occupied { generation, buffer };
                tag_id(index, generation, flavor)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    buffer,
                });
                tag_id(index, 0, flavor)
            }
        };

        self.manual.push(id);
        self.bytes_allocated += size;
        self.ballast -= size as isize;
        self.stats.live += 1;
        self.stats.bytes_allocated = self.bytes_allocated;
        tracing::trace!(?flavor, capacity, index = id.slot(), "allocate");
        Ok(id)
    }

    /// Resolve a handle, reporting staleness if the buffer is gone
    pub fn get(&self, id: BufferId) -> Result<&Buffer, RuntimeError> {
        match self.slots.get(id.slot()) {
            Some(Slot::Occupied { generation, buffer }) if *generation == id.generation => {
                Ok(buffer)
            }
            _ => Err(stale_error(id)),
        }
    }

    pub fn get_mut(&mut self, id: BufferId) -> Result<&mut Buffer, RuntimeError> {
        match self.slots.get_mut(id.slot()) {
            Some(Slot::Occupied { generation, buffer }) if *generation == id.generation => {
                Ok(buffer)
            }
            _ => Err(stale_error(id)),
        }
    }

    /// Is the handle still live
    pub fn is_live(&self, id: BufferId) -> bool {
        self.get(id).is_ok()
    }

    /// Transfer a manual buffer to the collector. Irreversible; managing a
    /// buffer twice is a programmer error.
    pub fn manage(&mut self, id: BufferId) {
        let buffer = self.get_mut(id).expect("manage of reclaimed buffer");
        debug_assert!(!buffer.is_managed(), "buffer managed twice");
        buffer.set_flag(BufferFlags::MANAGED);
        if let Some(pos) = self.manual.iter().position(|&m| m == id) {
            self.manual.swap_remove(pos);
        }
    }

    /// Free a manual buffer. Managed buffers are freed only by a sweep.
    pub fn free(&mut self, id: BufferId) -> Result<(), RuntimeError> {
        let buffer = self.get(id)?;
        debug_assert!(!buffer.is_managed(), "explicit free of managed buffer");
        let size = buffer.byte_size();
        if let Some(pos) = self.manual.iter().position(|&m| m == id) {
            self.manual.swap_remove(pos);
        }
        self.release_slot(id, size);
        Ok(())
    }

    // --- guard stack ---

    /// Root a buffer for the duration of operations that might allocate.
    /// Must be balanced by [`Heap::unguard`] in LIFO order.
    pub fn guard(&mut self, id: BufferId) {
        self.guards.push(id);
    }

    pub fn unguard(&mut self, id: BufferId) {
        let top = self.guards.pop();
        debug_assert_eq!(top, Some(id), "guard stack imbalance");
        let _ = top;
    }

    // --- ballast / collection ---

    /// Has enough been allocated that the owner should collect at its next
    /// allocation boundary
    pub fn ballast_depleted(&self) -> bool {
        self.ballast <= 0
    }

    /// Mark from `roots` (plus the guard stack) and sweep every unmarked
    /// managed buffer. Returns the number of buffers swept.
    pub fn collect(&mut self, roots: &[BufferId]) -> usize {
        let mut worklist: Vec<BufferId> = Vec::new();
        worklist.extend_from_slice(roots);
        worklist.extend(self.guards.iter().copied());

        while let Some(id) = worklist.pop() {
            let buffer = match self.get_mut(id) {
                Ok(b) => b,
                Err(_) => continue,
            };
            if buffer.flags().contains(BufferFlags::MARKED) {
                continue;
            }
            buffer.set_flag(BufferFlags::MARKED);

            if let Some(link) = buffer.link() {
                worklist.push(link);
            }
            if let Some(misc) = buffer.misc() {
                worklist.push(misc);
            }
            if buffer.flavor().holds_cells() {
                for cell in buffer.cells() {
                    let (first, second) = cell.node_refs();
                    if let Some(node) = first {
                        worklist.push(node);
                    }
                    if let Some(node) = second {
                        worklist.push(node);
                    }
                }
            }
        }

        let mut swept = 0;
        for index in 0..self.slots.len() {
            let (reclaim, size) = match &mut self.slots[index] {
                Slot::Occupied { buffer, .. } => {
                    if buffer.flags().contains(BufferFlags::MARKED) {
                        buffer.clear_flag(BufferFlags::MARKED);
                        (false, 0)
                    } else if buffer.is_managed() {
                        (true, buffer.byte_size())
                    } else {
                        (false, 0)
                    }
                }
                Slot::Free { .. } => (false, 0),
            };
            if reclaim {
                let generation = match &self.slots[index] {
                    Slot::Occupied { generation, .. } => *generation,
                    Slot::Free { .. } => unreachable!(),
                };
                self.release_slot(
                    BufferId {
                        index: index as u32,
                        generation,
                    },
                    size,
                );
                swept += 1;
            }
        }

        self.ballast = self.ballast_reset;
        self.stats.sweeps += 1;
        self.stats.swept_total += swept;
        tracing::debug!(swept, live = self.stats.live, "gc sweep");
        swept
    }

    // --- structural wrappers with size accounting ---

    /// Open `delta` element slots at `at` in a buffer, growing or
    /// reallocating as needed
    pub fn expand(&mut self, id: BufferId, at: usize, delta: usize) -> Result<(), RuntimeError> {
        let limit = self.max_bytes;
        let allocated = self.bytes_allocated;
        let buffer = self.get_mut(id)?;
        let before = buffer.byte_size();
        // Expansion within capacity moves no bytes; only a regrow counts
        // against the limit
        if buffer.used() + delta > buffer.rest() {
            let new_rest = (buffer.used() + delta).next_power_of_two().max(4);
            let projected = buffer.width() * (new_rest + 1);
            let growth = projected.saturating_sub(before);
            if allocated + growth > limit {
                return Err(RuntimeError::OutOfMemory {
                    requested: growth,
                    limit,
                });
            }
        }
        buffer.expand(at, delta)?;
        let after = buffer.byte_size();
        self.account_growth(before, after);
        Ok(())
    }

    /// Reduce a var-list to a single-cell archetype stub, returning its
    /// storage bytes to the accounting. Extant handles keep resolving to
    /// the stub; variable access reports a dead frame.
    pub fn decay_to_stub(&mut self, id: BufferId) -> Result<(), RuntimeError> {
        let buffer = self.get_mut(id)?;
        let before = buffer.byte_size();
        buffer.decay_to_stub();
        let released = before.saturating_sub(buffer.byte_size());
        self.bytes_allocated = self.bytes_allocated.saturating_sub(released);
        self.stats.bytes_allocated = self.bytes_allocated;
        Ok(())
    }

    /// Append a cell to a cell-flavored buffer
    pub fn append_cell(&mut self, id: BufferId, cell: Cell) -> Result<(), RuntimeError> {
        let buffer = self.get_mut(id)?;
        let before = buffer.byte_size();
        buffer.push_cell(cell)?;
        let after = buffer.byte_size();
        self.account_growth(before, after);
        Ok(())
    }

    // --- statistics ---

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Number of buffers still on the manual-allocation list
    pub fn manual_count(&self) -> usize {
        self.manual.len()
    }

    fn account_growth(&mut self, before: usize, after: usize) {
        if after > before {
            let delta = after - before;
            self.bytes_allocated += delta;
            self.ballast -= delta as isize;
            self.stats.bytes_allocated = self.bytes_allocated;
        }
    }

    fn release_slot(&mut self, id: BufferId, size: usize) {
        tracing::trace!(index = id.slot(), "free");
        self.slots[id.slot()] = Slot::Free {
            generation: id.generation,
            next: self.free_head,
        };
        self.free_head = Some(id.slot() as u32);
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        self.stats.live -= 1;
        self.stats.bytes_allocated = self.bytes_allocated;
    }
}
