//! Actions: the callable values
//!
//! An [`Action`] pairs a parameter list (the same key-list shape contexts
//! use, so frames can pair with it) with an *identity* array whose slot 0
//! is the archetype callable cell and whose remaining slots carry
//! dispatcher-specific data: the dispatcher selector, the label, the cached
//! underlying identity, and the body block if interpreted.
//!
//! The identity's `link` is the action's *specialty*: either the bare
//! parameter list, or an exemplar context holding pre-filled argument
//! values. Specializing a specialization merges the exemplars so only the
//! outermost layer need be consulted at call time, and the innermost
//! ("underlying") identity is cached in the identity itself.

use bitflags::bitflags;

use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::errors::RuntimeError;
use crate::memory::heap::{BufferId, Heap};
use crate::memory::{BufferFlags, Flavor, Key, ParamClass};
use crate::value::cell::{Cell, CellFlags, Payload};
use crate::value::kind::Kind;
use crate::value::symbol::Symbol;

/// Identity array slot layout
pub(crate) const IDX_ARCHETYPE: usize = 0;
pub(crate) const IDX_DISPATCHER: usize = 1;
pub(crate) const IDX_LABEL: usize = 2;
pub(crate) const IDX_UNDERLYING: usize = 3;
pub(crate) const IDX_BODY: usize = 4;
pub(crate) const IDENTITY_LEN: usize = 5;

bitflags! {
    /// Boolean properties computed once at construction
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionFlags: u32 {
        /// First argument is taken literally, not evaluated
        const QUOTES_FIRST = 1 << 0;
        /// First argument may be absent without error
        const SKIPPABLE_FIRST = 1 << 1;
        /// Takes its first argument from the evaluation to its left
        const ENFIXED = 1 << 2;
        /// Dispatches through the native table
        const IS_NATIVE = 1 << 3;
        /// May not be pushed while the caller is fulfilling an argument
        const IS_BARRIER = 1 << 4;
        /// Defers lookback processing of the expression to its left
        const DEFERS_LOOKBACK = 1 << 5;
    }
}

/// Handle to a callable, identified by its identity array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action(pub BufferId);

impl Action {
    /// Construct an action over fresh parameter and identity lists.
    ///
    /// `properties` supplies the declared flags (enfix, barrier, defers,
    /// skippable); quotes-first and native-ness are computed here. Both
    /// lists come back managed and locked.
    pub fn new(
        heap: &mut Heap,
        label: Symbol,
        params: &[Key],
        dispatcher: Dispatcher,
        body: Option<Cell>,
        properties: ActionFlags,
    ) -> Result<Action, RuntimeError> {
        let paramlist = heap.allocate(params.len(), Flavor::ParamList)?;
        {
            let buf = heap.get_mut(paramlist)?;
            buf.set_link(Some(paramlist)); // ancestry chain root
            for key in params {
                buf.push_key(*key)?;
            }
            buf.freeze();
        }

        let mut flags = properties;
        if matches!(dispatcher, Dispatcher::Native(_)) {
            flags.insert(ActionFlags::IS_NATIVE);
        }
        if let Some(first) = params.iter().find(|k| k.takes_input()) {
            if first.class == ParamClass::Quoted {
                flags.insert(ActionFlags::QUOTES_FIRST);
            }
        }

        let identity = heap.allocate(IDENTITY_LEN, Flavor::Identity)?;
        {
            let buf = heap.get_mut(identity)?;
            buf.set_link(Some(paramlist));
            buf.set_info(flags.bits());
            buf.push_cell(Cell::action(identity))?;
            let mut selector = Cell::blank();
            selector.write(Kind::Handle, dispatcher.encode());
            buf.push_cell(selector)?;
            buf.push_cell(Cell::word(label))?;
            buf.push_cell(Cell::action(identity))?; // its own underlying
            buf.push_cell(body.unwrap_or_else(Cell::blank))?;
            buf.set_flag(BufferFlags::AUTO_LOCKED);
        }

        heap.manage(paramlist);
        heap.manage(identity);
        Ok(Action(identity))
    }

    pub fn identity(&self) -> BufferId {
        self.0
    }

    /// The canonical callable cell
    pub fn archetype(&self, heap: &Heap) -> Result<Cell, RuntimeError> {
        Ok(*heap.get(self.0)?.cell_at(IDX_ARCHETYPE)?)
    }

    /// The specialty: bare parameter list, or exemplar var-list
    pub fn specialty(&self, heap: &Heap) -> Result<BufferId, RuntimeError> {
        Ok(heap
            .get(self.0)?
            .link()
            .expect("identity without a specialty"))
    }

    /// The parameter list, looking through an exemplar if present
    pub fn paramlist(&self, heap: &Heap) -> Result<BufferId, RuntimeError> {
        let specialty = self.specialty(heap)?;
        match heap.get(specialty)?.flavor() {
            Flavor::ParamList => Ok(specialty),
            Flavor::VarList => Ok(heap
                .get(specialty)?
                .link()
                .expect("exemplar without a key list")),
            other => panic!("specialty with flavor {:?}", other),
        }
    }

    /// The exemplar context of pre-filled arguments, if specialized
    pub fn exemplar(&self, heap: &Heap) -> Result<Option<Context>, RuntimeError> {
        let specialty = self.specialty(heap)?;
        match heap.get(specialty)?.flavor() {
            Flavor::VarList => Ok(Some(Context(specialty))),
            _ => Ok(None),
        }
    }

    pub fn params(&self, heap: &Heap) -> Result<Vec<Key>, RuntimeError> {
        let paramlist = self.paramlist(heap)?;
        Ok(heap.get(paramlist)?.keys().to_vec())
    }

    /// Total slot count a frame for this action needs (includes
    /// specialized-away and local slots)
    pub fn num_params(&self, heap: &Heap) -> Result<usize, RuntimeError> {
        let paramlist = self.paramlist(heap)?;
        Ok(heap.get(paramlist)?.used())
    }

    pub fn flags(&self, heap: &Heap) -> Result<ActionFlags, RuntimeError> {
        Ok(ActionFlags::from_bits_truncate(heap.get(self.0)?.info()))
    }

    pub fn label(&self, heap: &Heap) -> Result<Option<Symbol>, RuntimeError> {
        Ok(heap.get(self.0)?.cell_at(IDX_LABEL)?.as_word())
    }

    /// The innermost identity this action ultimately runs, cached so call
    /// sites never walk the specialization chain
    pub fn underlying(&self, heap: &Heap) -> Result<BufferId, RuntimeError> {
        Ok(heap
            .get(self.0)?
            .cell_at(IDX_UNDERLYING)?
            .as_action()
            .expect("underlying slot is not an action"))
    }

    pub fn dispatcher(&self, heap: &Heap) -> Result<Dispatcher, RuntimeError> {
        let selector = heap.get(self.0)?.cell_at(IDX_DISPATCHER)?;
        Ok(Dispatcher::decode(selector.payload()))
    }

    pub fn body(&self, heap: &Heap) -> Result<Cell, RuntimeError> {
        Ok(*heap.get(self.0)?.cell_at(IDX_BODY)?)
    }

    /// Replace the dispatcher selector in this identity. Every cell
    /// referencing the identity sees the new behavior immediately.
    pub fn hijack(&self, heap: &mut Heap, dispatcher: Dispatcher) -> Result<(), RuntimeError> {
        let buf = heap.get_mut(self.0)?;
        // The identity is auto-locked; hijack is core machinery
        let mut selector = Cell::blank();
        selector.write(Kind::Handle, dispatcher.encode());
        buf.cells_mut_unchecked()[IDX_DISPATCHER] = selector;
        Ok(())
    }

    /// Build a specialization with the given parameter fills. Filled slots
    /// are hidden from the new action's parameter enumeration; merging
    /// copies any existing exemplar values so only the outermost layer is
    /// ever consulted.
    pub fn specialize(
        &self,
        heap: &mut Heap,
        fills: &[(Symbol, Cell)],
    ) -> Result<Action, RuntimeError> {
        let paramlist = self.paramlist(heap)?;
        let exemplar = Context::from_keylist(heap, paramlist, Kind::Frame)?;

        // Walking outermost-in, the first non-null value wins; merging the
        // inner exemplar up front means a later lookup stops at one layer.
        if let Some(inner) = self.exemplar(heap)? {
            let len = inner.len(heap)?;
            for index in 1..=len {
                let cell = inner.var(heap, index)?;
                if cell.is_hidden() {
                    exemplar.set_var(heap, index, cell)?;
                    exemplar.hide(heap, index)?;
                }
            }
        }

        for (symbol, value) in fills {
            let index = match exemplar.find(heap, *symbol)? {
                Some(index) => index,
                None => {
                    return Err(RuntimeError::UnknownField {
                        word: format!("parameter #{}", symbol.0),
                    })
                }
            };
            exemplar.set_var(heap, index, *value)?;
            exemplar.hide(heap, index)?;
        }

        let flags = self.flags(heap)?;
        let underlying = self.underlying(heap)?;
        let label = self.label(heap)?;
        let body = self.body(heap)?;
        let dispatcher = self.dispatcher(heap)?;

        let identity = heap.allocate(IDENTITY_LEN, Flavor::Identity)?;
        {
            let buf = heap.get_mut(identity)?;
            buf.set_link(Some(exemplar.varlist()));
            buf.set_info(flags.bits());
            buf.push_cell(Cell::action(identity))?;
            let mut selector = Cell::blank();
            selector.write(Kind::Handle, dispatcher.encode());
            buf.push_cell(selector)?;
            buf.push_cell(match label {
                Some(sym) => Cell::word(sym),
                None => Cell::blank(),
            })?;
            let mut under = Cell::blank();
            under.write(Kind::Action, Payload::Action { identity: underlying });
            buf.push_cell(under)?;
            buf.push_cell(body)?;
            buf.set_flag(BufferFlags::AUTO_LOCKED);
        }

        heap.manage(exemplar.varlist());
        heap.manage(identity);
        Ok(Action(identity))
    }

    /// Visible parameters: skips locals, returns, and slots the exemplar
    /// has specialized away
    pub fn enumerate_params(&self, heap: &Heap) -> Result<Vec<Key>, RuntimeError> {
        let params = self.params(heap)?;
        let exemplar = self.exemplar(heap)?;
        let mut out = Vec::new();
        for (pos, key) in params.iter().enumerate() {
            if matches!(key.class, ParamClass::Local | ParamClass::Return) {
                continue;
            }
            if let Some(ex) = &exemplar {
                if ex.var(heap, pos + 1)?.is_hidden() {
                    continue;
                }
            }
            out.push(*key);
        }
        Ok(out)
    }

    /// Slots the specialization marked as pending at the callsite
    pub(crate) fn partials(&self, heap: &Heap) -> Result<Vec<Symbol>, RuntimeError> {
        let Some(exemplar) = self.exemplar(heap)? else {
            return Ok(Vec::new());
        };
        let len = exemplar.len(heap)?;
        let mut out = Vec::new();
        for index in 1..=len {
            let cell = exemplar.var(heap, index)?;
            if cell.flags().contains(CellFlags::PARTIAL) {
                out.push(exemplar.key(heap, index)?.symbol);
            }
        }
        Ok(out)
    }
}
