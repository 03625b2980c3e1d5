//! The engine: frame stack, data stack, and the invocation protocol
//!
//! The evaluator (outside this crate) drives three entry points per call:
//! [`Engine::push_frame`], the fulfillment steps ([`Engine::fulfill_arg`] /
//! [`Engine::fulfillment_ready`] / [`Engine::dispatch`]), and
//! [`Engine::drop_frame`]. The engine owns the single cooperative frame
//! chain — there is no parallel execution, and "suspension" is only a frame
//! pushing another frame.
//!
//! The engine is also the allocation boundary authority: it knows the roots
//! (frames, data stack, pooled storage), so it is the one that may run the
//! collector when the heap's ballast is depleted. Anything not reachable
//! from those roots must be guarded across a call into the engine that
//! might allocate.

use smallvec::SmallVec;

use crate::action::{Action, ActionFlags};
use crate::context::Context;
use crate::dispatch::{Bounce, Dispatcher, DispatcherRegistry, Throw};
use crate::errors::RuntimeError;
use crate::frame::{Frame, FrameState};
use crate::memory::heap::{BufferId, Heap};
use crate::memory::{BufferFlags, Flavor, Key, ParamClass};
use crate::value::cell::{Binding, Cell, CellFlags};
use crate::value::kind::Kind;
use crate::value::symbol::{Symbol, SymbolTable};

/// One embeddable instance of the core: heap, symbols, dispatcher table,
/// and the frame chain. Explicit teardown is just dropping it.
#[derive(Debug)]
pub struct Engine {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub dispatchers: DispatcherRegistry,
    frames: Vec<Frame>,
    data_stack: Vec<Cell>,
    /// One-deep reuse pool for dropped frame var-lists
    varlist_pool: Option<BufferId>,
    /// Set by the evaluator while it is gathering an argument
    fulfilling: bool,
}

impl Engine {
    pub fn new(max_heap_bytes: usize) -> Engine {
        Engine {
            heap: Heap::new(max_heap_bytes),
            symbols: SymbolTable::new(),
            dispatchers: DispatcherRegistry::new(),
            frames: Vec::new(),
            data_stack: Vec::new(),
            varlist_pool: None,
            fulfilling: false,
        }
    }

    // --- collection at allocation boundaries ---

    /// Run the collector with the engine's roots
    pub fn collect_now(&mut self) -> usize {
        let mut roots: Vec<BufferId> = Vec::new();
        for frame in &self.frames {
            roots.push(frame.varlist);
            roots.push(frame.phase.0);
            roots.push(frame.original.0);
            roots.extend(frame.handles.iter().copied());
            push_cell_roots(&mut roots, &frame.out);
        }
        for cell in &self.data_stack {
            push_cell_roots(&mut roots, cell);
        }
        if let Some(pool) = self.varlist_pool {
            roots.push(pool);
        }
        self.heap.collect(&roots)
    }

    /// Collect if the ballast has run out. Callers holding unrooted
    /// managed handles across this must guard them first.
    pub fn maybe_collect(&mut self) {
        if self.heap.ballast_depleted() {
            self.collect_now();
        }
    }

    // --- evaluator state ---

    /// The evaluator marks argument-gathering so barrier actions can
    /// refuse to be pushed mid-fulfillment
    pub fn set_fulfilling(&mut self, fulfilling: bool) {
        self.fulfilling = fulfilling;
    }

    pub fn is_fulfilling(&self) -> bool {
        self.fulfilling
    }

    // --- data stack ---

    pub fn stack_push(&mut self, cell: Cell) {
        self.data_stack.push(cell);
    }

    pub fn stack_len(&self) -> usize {
        self.data_stack.len()
    }

    // --- frame stack ---

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Begin an invocation: size and install the var-list, install the
    /// archetype, seed pending refinements from partial specialization.
    ///
    /// Fails without pushing anything if `action` is an expression barrier
    /// and the caller is mid-argument-fulfillment.
    pub fn push_frame(&mut self, action: Action) -> Result<usize, RuntimeError> {
        let flags = action.flags(&self.heap)?;
        if flags.contains(ActionFlags::IS_BARRIER) && self.fulfilling {
            let label = self.action_name(action)?;
            return Err(RuntimeError::ExpressionBarrier { label });
        }

        // The action's lists are reachable only through the caller's handle
        // until the frame is on the stack; keep them out of a boundary sweep
        // (marking reaches the paramlist and exemplar through the identity's
        // link).
        self.heap.guard(action.identity());
        self.maybe_collect();
        self.heap.unguard(action.identity());

        // Includes specialized-away and local slots
        let num_args = action.num_params(&self.heap)?;
        let paramlist = action.paramlist(&self.heap)?;

        let varlist = match self.varlist_pool.take() {
            Some(pooled)
                if self
                    .heap
                    .get(pooled)
                    .map(|b| b.rest() >= num_args + 1)
                    .unwrap_or(false) =>
            {
                self.heap.get_mut(pooled)?.clear_cells();
                tracing::trace!(index = ?pooled, "frame var-list reused from pool");
                pooled
            }
            other => {
                // Pooled buffer too small for this phase; retire it
                if let Some(small) = other {
                    self.heap.free(small)?;
                }
                self.heap.allocate(num_args + 1, Flavor::VarList)?
            }
        };

        {
            let buf = self.heap.get_mut(varlist)?;
            buf.set_link(Some(paramlist));
            buf.push_cell_unchecked(Cell::frame(varlist));
            for _ in 0..num_args {
                buf.push_cell_unchecked(Cell::blank());
            }
            buf.set_flag(BufferFlags::AUTO_LOCKED);
        }

        let stack_base = self.data_stack.len();

        // Partial specialization markers become pending arguments for this
        // call before ordinary fulfillment begins
        for symbol in action.partials(&self.heap)? {
            self.data_stack.push(Cell::word(symbol));
        }

        let label = action.label(&self.heap)?;
        let prior = self.frames.len().checked_sub(1);
        self.frames.push(Frame {
            phase: action,
            original: action,
            varlist,
            key_index: 0,
            arg_index: 1,
            state: FrameState::InitialEntry,
            out: Cell::blank(),
            stack_base,
            handles: SmallVec::new(),
            prior,
            label,
        });
        tracing::debug!(depth = self.frames.len(), ?label, "frame push");
        Ok(self.frames.len() - 1)
    }

    /// Supply the next evaluated argument to the top frame. Type-checks
    /// against the parameter's constraint set before the argument counts
    /// as fulfilled.
    pub fn fulfill_arg(&mut self, value: Cell) -> Result<(), RuntimeError> {
        let fi = self.top_index()?;
        match self.advance_to_input(fi)? {
            Some(key) => {
                self.typecheck(&key, &value)?;
                let frame = &mut self.frames[fi];
                let slot = frame.arg_index;
                set_frame_slot(&mut self.heap, frame.varlist, slot, value)?;
                frame.key_index += 1;
                frame.arg_index += 1;
                Ok(())
            }
            None => {
                let action = self.frames[fi].phase;
                let label = self.action_name(action)?;
                let expected = action
                    .enumerate_params(&self.heap)?
                    .iter()
                    .filter(|k| k.takes_input())
                    .count();
                Err(RuntimeError::TooManyArguments {
                    action: label,
                    expected,
                })
            }
        }
    }

    /// Advance over everything that needs no input. True when fulfillment
    /// is complete and the frame has moved to typechecking.
    pub fn fulfillment_ready(&mut self) -> Result<bool, RuntimeError> {
        let fi = self.top_index()?;
        if self.advance_to_input(fi)?.is_some() {
            return Ok(false);
        }
        let frame = &mut self.frames[fi];
        if frame.state == FrameState::InitialEntry {
            frame.state = FrameState::Typechecking;
        }
        Ok(true)
    }

    /// Finish typechecking and hand the frame to its phase's dispatcher
    pub fn dispatch(&mut self) -> Result<Bounce, RuntimeError> {
        let fi = self.top_index()?;
        if !self.fulfillment_ready()? {
            let key = self
                .advance_to_input(fi)?
                .expect("input parameter disappeared");
            let action = self.frames[fi].phase;
            return Err(RuntimeError::MissingArgument {
                action: self.action_name(action)?,
                param: self.symbols.name(key.symbol).to_string(),
            });
        }

        // Typechecking happened argument by argument; verify the frame is
        // structurally complete before dispatching
        let frame = &self.frames[fi];
        let varlist = frame.varlist;
        let used = self.heap.get(varlist)?.used();
        for slot in 1..used {
            debug_assert!(
                self.heap.get(varlist)?.cell_at(slot)?.is_formatted(),
                "unfulfilled frame slot"
            );
        }
        let phase = frame.phase;
        self.frames[fi].state = FrameState::Dispatching;

        match phase.dispatcher(&self.heap)? {
            Dispatcher::Native(id) => {
                let entry = self
                    .dispatchers
                    .get(id)
                    .expect("identity names an unregistered dispatcher");
                Ok(entry(self, fi))
            }
            // The evaluator owns running bodies; hand it back the block
            Dispatcher::Interpreted => Ok(Bounce::Value(phase.body(&self.heap)?)),
        }
    }

    /// End the invocation and dispose of the var-list:
    /// (a) captured and managed during the call — detach it for the
    ///     collector and let the next push allocate fresh;
    /// (b) unreferenced and still manual — clear instance flags and pool
    ///     it for reuse;
    /// (c) storage stolen out from under it — already a stub; leave the
    ///     stub alone and never treat it as a var-list again.
    pub fn drop_frame(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().expect("drop with no frame on the stack");
        self.data_stack.truncate(frame.stack_base);

        let poolable = match self.heap.get_mut(frame.varlist) {
            Ok(buf) => {
                buf.clear_flag(BufferFlags::AUTO_LOCKED);
                if buf.is_stub() {
                    tracing::trace!("frame var-list left as decayed stub");
                    false
                } else if buf.is_managed() {
                    tracing::trace!("frame var-list detached (externally referenced)");
                    false
                } else {
                    for cell in buf.cells_mut_unchecked() {
                        cell.clear_flag(CellFlags::HIDDEN);
                        cell.clear_flag(CellFlags::PARTIAL);
                    }
                    true
                }
            }
            Err(_) => false, // storage already reclaimed
        };
        if poolable {
            if self.varlist_pool.is_none() {
                self.varlist_pool = Some(frame.varlist);
            } else {
                self.heap.free(frame.varlist)?;
            }
        }
        tracing::debug!(depth = self.frames.len(), label = ?frame.label, "frame drop");
        Ok(())
    }

    /// Abort the top frame for a non-local unwind, releasing every handle
    /// allocated since its entry.
    ///
    /// A captured frame context must not outlive the abort: its var-list is
    /// reduced to an archetype stub, so references that escaped report a
    /// dead frame rather than reading torn-down variables.
    pub fn abort_frame(&mut self) -> Result<(), RuntimeError> {
        let fi = self.top_index()?;
        let handles: SmallVec<[BufferId; 4]> = self.frames[fi].handles.clone();
        for id in handles {
            if self.heap.is_live(id) && !self.heap.get(id)?.is_managed() {
                self.heap.free(id)?;
            }
        }
        let varlist = self.frames[fi].varlist;
        if self
            .heap
            .get(varlist)
            .map(|b| b.is_managed() && !b.is_stub())
            .unwrap_or(false)
        {
            self.heap.decay_to_stub(varlist)?;
        }
        self.drop_frame()
    }

    /// Unwind the whole frame chain for `throw`, frame by frame. The
    /// evaluator catches throws; if one reaches here uncaught the chain is
    /// fully torn down and the throw handed back.
    pub fn unwind(&mut self, throw: Throw) -> Result<Throw, RuntimeError> {
        while !self.frames.is_empty() {
            self.abort_frame()?;
        }
        Ok(throw)
    }

    /// Track an API-allocated handle for release if this frame unwinds
    pub fn track_handle(&mut self, frame: usize, id: BufferId) {
        self.frames[frame].handles.push(id);
    }

    // --- binding resolution ---

    /// Resolve a word cell through its binding to the variable it names.
    ///
    /// Specific bindings read straight from their context. Relative
    /// bindings only name an action; they need an instance of that action
    /// on the frame stack to become concrete, so the innermost matching
    /// frame supplies the value.
    pub fn resolve(&self, cell: &Cell) -> Result<Cell, RuntimeError> {
        debug_assert!(cell.kind_of().is_word(), "resolve of a non-word cell");
        let symbol = cell.as_word().expect("word cell without a symbol");
        match cell.binding() {
            Binding::Unbound => Err(RuntimeError::NotBound {
                word: self.symbols.name(symbol).to_string(),
            }),
            Binding::Specific(varlist) => {
                Context(varlist).get(&self.heap, symbol, self.symbols.name(symbol))
            }
            Binding::Relative(identity) => {
                for fi in (0..self.frames.len()).rev() {
                    let frame = &self.frames[fi];
                    if frame.phase.identity() == identity
                        || frame.phase.underlying(&self.heap)? == identity
                    {
                        return self.frame_var(fi, symbol);
                    }
                }
                Err(RuntimeError::RelativeOutsideFrame {
                    word: self.symbols.name(symbol).to_string(),
                })
            }
        }
    }

    // --- frame variable access ---

    /// Read a frame variable by parameter symbol (hidden slots included:
    /// the frame itself always sees its specialized values)
    pub fn frame_var(&self, frame: usize, symbol: Symbol) -> Result<Cell, RuntimeError> {
        let f = &self.frames[frame];
        let paramlist = f.phase.paramlist(&self.heap)?;
        let keys = self.heap.get(paramlist)?.keys();
        let pos = keys
            .iter()
            .position(|k| k.symbol == symbol)
            .ok_or_else(|| RuntimeError::UnknownField {
                word: self.symbols.name(symbol).to_string(),
            })?;
        let buf = self.heap.get(f.varlist)?;
        if buf.is_stub() {
            return Err(RuntimeError::StaleFrame);
        }
        Ok(*buf.cell_at(pos + 1)?)
    }

    /// Write the top frame's output cell
    pub fn set_out(&mut self, frame: usize, cell: Cell) {
        self.frames[frame].out = cell;
    }

    /// Make a frame visible as a context value. Its var-list becomes
    /// collector-managed; dropping the frame will then detach the storage
    /// so the external reference stays valid.
    pub fn context_of_frame(&mut self, frame: usize) -> Result<Context, RuntimeError> {
        let varlist = self.frames[frame].varlist;
        if !self.heap.get(varlist)?.is_managed() {
            self.heap.manage(varlist);
        }
        Ok(Context(varlist))
    }

    // --- fulfillment internals ---

    /// Advance the paired cursors over parameters that need no input:
    /// specialized-away slots (the outermost exemplar value wins), locals,
    /// returns, and refinements (consumed from pending arguments). Returns
    /// the next input-taking key, or None when fulfillment is complete.
    fn advance_to_input(&mut self, fi: usize) -> Result<Option<Key>, RuntimeError> {
        loop {
            let (phase, varlist, key_index, arg_index, stack_base) = {
                let f = &self.frames[fi];
                (f.phase, f.varlist, f.key_index, f.arg_index, f.stack_base)
            };
            let paramlist = phase.paramlist(&self.heap)?;
            let keys = self.heap.get(paramlist)?.keys();
            let Some(key) = keys.get(key_index).copied() else {
                return Ok(None);
            };

            // Specialized-away slot: exemplar value fills the argument
            if let Some(exemplar) = phase.exemplar(&self.heap)? {
                let cell = exemplar.var(&self.heap, arg_index)?;
                if cell.is_hidden() && !cell.flags().contains(CellFlags::PARTIAL) {
                    set_frame_slot(&mut self.heap, varlist, arg_index, cell)?;
                    self.frames[fi].key_index += 1;
                    self.frames[fi].arg_index += 1;
                    continue;
                }
            }

            match key.class {
                ParamClass::Local | ParamClass::Return => {
                    set_frame_slot(&mut self.heap, varlist, arg_index, Cell::blank())?;
                    self.frames[fi].key_index += 1;
                    self.frames[fi].arg_index += 1;
                }
                ParamClass::Refinement => {
                    let requested = self.consume_pending(stack_base, key.symbol);
                    let fill = Cell::logic(requested);
                    set_frame_slot(&mut self.heap, varlist, arg_index, fill)?;
                    self.frames[fi].key_index += 1;
                    self.frames[fi].arg_index += 1;
                }
                ParamClass::Field | ParamClass::Normal | ParamClass::Quoted => {
                    return Ok(Some(key));
                }
            }
        }
    }

    /// Remove a pending refinement word pushed for this call, if present
    fn consume_pending(&mut self, stack_base: usize, symbol: Symbol) -> bool {
        let pos = self.data_stack[stack_base..]
            .iter()
            .position(|c| c.as_word() == Some(symbol));
        match pos {
            Some(offset) => {
                self.data_stack.remove(stack_base + offset);
                true
            }
            None => false,
        }
    }

    fn typecheck(&self, key: &Key, value: &Cell) -> Result<(), RuntimeError> {
        if key.types.contains(value.kind_of()) {
            return Ok(());
        }
        if key.types.wants_refinement_path() && self.is_refinement_shaped(value)? {
            return Ok(());
        }
        if key.types.wants_predicate_tuple() && self.is_predicate_shaped(value)? {
            return Ok(());
        }
        Err(RuntimeError::ArgTypeMismatch {
            param: self.symbols.name(key.symbol).to_string(),
            expected: "its constraint set".to_string(),
            got: value.kind_of().name().to_string(),
        })
    }

    /// `/word` shape: a two-element path with a blank head and a word tail
    fn is_refinement_shaped(&self, value: &Cell) -> Result<bool, RuntimeError> {
        self.is_sigil_shaped(value, Kind::Path)
    }

    /// `.word` shape: a two-element tuple with a blank head and a word tail
    fn is_predicate_shaped(&self, value: &Cell) -> Result<bool, RuntimeError> {
        self.is_sigil_shaped(value, Kind::Tuple)
    }

    fn is_sigil_shaped(&self, value: &Cell, kind: Kind) -> Result<bool, RuntimeError> {
        if value.kind_of() != kind {
            return Ok(false);
        }
        let Some((node, _)) = value.as_series() else {
            return Ok(false);
        };
        let buf = self.heap.get(node)?;
        let cells = buf.cells();
        Ok(cells.len() == 2
            && cells[0].kind_of() == Kind::Blank
            && cells[1].kind_of().is_word())
    }

    fn top_index(&self) -> Result<usize, RuntimeError> {
        self.frames
            .len()
            .checked_sub(1)
            .ok_or(RuntimeError::StaleFrame)
    }

    fn action_name(&self, action: Action) -> Result<String, RuntimeError> {
        Ok(match action.label(&self.heap)? {
            Some(symbol) => self.symbols.name(symbol).to_string(),
            None => "anonymous".to_string(),
        })
    }
}

/// Write into an auto-locked frame var-list (fulfillment machinery only)
fn set_frame_slot(
    heap: &mut Heap,
    varlist: BufferId,
    slot: usize,
    cell: Cell,
) -> Result<(), RuntimeError> {
    let buf = heap.get_mut(varlist)?;
    let len = buf.used();
    let cells = buf.cells_mut_unchecked();
    let target = cells
        .get_mut(slot)
        .ok_or(RuntimeError::IndexOutOfRange { index: slot, len })?;
    *target = cell;
    Ok(())
}

fn push_cell_roots(roots: &mut Vec<BufferId>, cell: &Cell) {
    let (first, second) = cell.node_refs();
    if let Some(id) = first {
        roots.push(id);
    }
    if let Some(id) = second {
        roots.push(id);
    }
}
