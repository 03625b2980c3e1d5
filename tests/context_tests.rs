// Context tests: key/var pairing, append-only growth, copy-on-write
// key lists, ancestry, per-instance hiding

use rebus::errors::RuntimeError;
use rebus::{Array, Cell, Context, Engine, Key, Kind, Symbol};

fn test_engine() -> Engine {
    Engine::new(1024 * 1024)
}

fn field(symbols: &mut rebus::SymbolTable, name: &str) -> Key {
    Key::field(symbols.intern(name))
}

#[test]
fn test_keys_and_vars_stay_parallel() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 2).expect("alloc failed");

    for name in ["a", "b", "c", "d", "e"] {
        let key = field(&mut engine.symbols, name);
        ctx.append(&mut engine.heap, key).expect("append failed");

        let vars = engine.heap.get(ctx.varlist()).expect("get").used();
        let keylist = ctx.keylist(&engine.heap).expect("keylist");
        let keys = engine.heap.get(keylist).expect("get").used();
        assert_eq!(keys, vars - 1, "keys must pair with vars after slot 0");
    }
    assert_eq!(ctx.len(&engine.heap).expect("len"), 5);
}

#[test]
fn test_archetype_occupies_slot_zero() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 2).expect("alloc failed");

    let archetype = ctx.archetype(&engine.heap).expect("archetype");
    assert_eq!(archetype.kind_of(), Kind::Object);
    assert_eq!(archetype.as_context(), Some(ctx.varlist()));

    // Slot 0 is not addressable as a variable
    assert!(matches!(
        ctx.var(&engine.heap, 0),
        Err(RuntimeError::IndexOutOfRange { .. })
    ));
}

#[test]
fn test_bound_index_survives_extension() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 1).expect("alloc failed");

    let a = engine.symbols.intern("a");
    let idx = ctx
        .append(&mut engine.heap, Key::field(a))
        .expect("append failed");
    ctx.set_var(&mut engine.heap, idx, Cell::int(7))
        .expect("set failed");

    // Bind a word to the slot, then grow the context well past its
    // original capacity; the recorded index must stay valid.
    let mut word = Cell::word(a);
    assert!(ctx.bind(&engine.heap, &mut word).expect("bind failed"));

    for i in 0..16 {
        let key = field(&mut engine.symbols, &format!("pad{i}"));
        ctx.append(&mut engine.heap, key).expect("append failed");
    }

    assert_eq!(ctx.find(&engine.heap, a).expect("find"), Some(idx));
    assert_eq!(
        ctx.var(&engine.heap, idx).expect("var").as_int(),
        Some(7)
    );
}

#[test]
fn test_shared_keylist_copies_on_append() {
    let mut engine = test_engine();
    let base = Context::alloc(&mut engine.heap, 2).expect("alloc failed");
    base.append(&mut engine.heap, field(&mut engine.symbols, "x"))
        .expect("append failed");

    let shared_list = base.keylist(&engine.heap).expect("keylist");
    let other = Context::from_keylist(&mut engine.heap, shared_list, Kind::Object)
        .expect("from_keylist failed");
    assert_eq!(other.keylist(&engine.heap).expect("keylist"), shared_list);

    // Appending through the shared list must not disturb `base`
    other
        .append(&mut engine.heap, field(&mut engine.symbols, "y"))
        .expect("append failed");

    let diverged = other.keylist(&engine.heap).expect("keylist");
    assert_ne!(diverged, shared_list, "append must copy a shared key list");
    assert_eq!(base.keylist(&engine.heap).expect("keylist"), shared_list);
    assert_eq!(base.len(&engine.heap).expect("len"), 1);
    assert_eq!(other.len(&engine.heap).expect("len"), 2);

    let y = engine.symbols.intern("y");
    assert_eq!(base.find(&engine.heap, y).expect("find"), None);
    assert_eq!(other.find(&engine.heap, y).expect("find"), Some(2));
}

#[test]
fn test_keylist_ancestry_chain() {
    let mut engine = test_engine();
    let base = Context::alloc(&mut engine.heap, 2).expect("alloc failed");
    base.append(&mut engine.heap, field(&mut engine.symbols, "x"))
        .expect("append failed");

    let root_list = base.keylist(&engine.heap).expect("keylist");
    // The root of a chain is its own ancestor
    assert_eq!(
        engine.heap.get(root_list).expect("get").link(),
        Some(root_list)
    );

    let other = Context::from_keylist(&mut engine.heap, root_list, Kind::Object)
        .expect("from_keylist failed");
    other
        .append(&mut engine.heap, field(&mut engine.symbols, "y"))
        .expect("append failed");

    let expanded = other.keylist(&engine.heap).expect("keylist");
    assert_eq!(
        engine.heap.get(expanded).expect("get").link(),
        Some(root_list),
        "copy records what it was expanded from"
    );

    // Compatibility walks the ancestry back to the root
    assert!(other
        .compatible_with(&engine.heap, root_list)
        .expect("compat"));
    assert!(!base
        .compatible_with(&engine.heap, expanded)
        .expect("compat"));
}

#[test]
fn test_get_by_symbol_and_unknown_field() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 2).expect("alloc failed");
    let name = engine.symbols.intern("name");
    let idx = ctx
        .append(&mut engine.heap, Key::field(name))
        .expect("append failed");
    ctx.set_var(&mut engine.heap, idx, Cell::int(42))
        .expect("set failed");

    assert_eq!(
        ctx.get(&engine.heap, name, "name").expect("get").as_int(),
        Some(42)
    );

    let missing = engine.symbols.intern("missing");
    assert_eq!(
        ctx.get(&engine.heap, missing, "missing"),
        Err(RuntimeError::UnknownField {
            word: "missing".to_string()
        })
    );
}

#[test]
fn test_hiding_is_per_instance() {
    let mut engine = test_engine();
    let base = Context::alloc(&mut engine.heap, 2).expect("alloc failed");
    let x = engine.symbols.intern("x");
    let y = engine.symbols.intern("y");
    base.append(&mut engine.heap, Key::field(x))
        .expect("append failed");
    base.append(&mut engine.heap, Key::field(y))
        .expect("append failed");

    let shared_list = base.keylist(&engine.heap).expect("keylist");
    let other = Context::from_keylist(&mut engine.heap, shared_list, Kind::Object)
        .expect("from_keylist failed");

    other.hide(&mut engine.heap, 1).expect("hide failed");
    assert!(other.is_hidden(&engine.heap, 1).expect("is_hidden"));
    assert!(!base.is_hidden(&engine.heap, 1).expect("is_hidden"));

    let visible: Vec<Symbol> = other
        .enumerate(&engine.heap)
        .expect("enumerate")
        .into_iter()
        .map(|(sym, _)| sym)
        .collect();
    assert_eq!(visible, vec![y]);

    let base_visible = base.enumerate(&engine.heap).expect("enumerate");
    assert_eq!(base_visible.len(), 2);
}

#[test]
fn test_set_var_preserves_hidden_flag() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 1).expect("alloc failed");
    ctx.append(&mut engine.heap, field(&mut engine.symbols, "x"))
        .expect("append failed");

    ctx.hide(&mut engine.heap, 1).expect("hide failed");
    ctx.set_var(&mut engine.heap, 1, Cell::int(9))
        .expect("set failed");
    assert!(ctx.is_hidden(&engine.heap, 1).expect("is_hidden"));
    assert_eq!(ctx.var(&engine.heap, 1).expect("var").as_int(), Some(9));
}

#[test]
fn test_bind_refuses_foreign_symbols() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 1).expect("alloc failed");
    ctx.append(&mut engine.heap, field(&mut engine.symbols, "x"))
        .expect("append failed");

    let elsewhere = engine.symbols.intern("elsewhere");
    let mut word = Cell::word(elsewhere);
    assert!(!ctx.bind(&engine.heap, &mut word).expect("bind failed"));
    assert_eq!(word.binding(), rebus::Binding::Unbound);
}

#[test]
fn test_specific_binding_resolves_through_the_engine() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 1).expect("alloc failed");
    let a = engine.symbols.intern("a");
    let idx = ctx
        .append(&mut engine.heap, Key::field(a))
        .expect("append failed");
    ctx.set_var(&mut engine.heap, idx, Cell::int(3))
        .expect("set failed");

    let mut word = Cell::word(a);
    assert!(ctx.bind(&engine.heap, &mut word).expect("bind failed"));
    assert_eq!(engine.resolve(&word).expect("resolve").as_int(), Some(3));
}

#[test]
fn test_freed_varlist_reports_stale_frame() {
    let mut engine = test_engine();
    let ctx = Context::alloc(&mut engine.heap, 1).expect("alloc failed");
    let varlist = ctx.varlist();
    engine.heap.free(varlist).expect("free failed");

    assert_eq!(ctx.var(&engine.heap, 1), Err(RuntimeError::StaleFrame));

    // A freed plain series reports the undistinguished form
    let arr = Array::alloc(&mut engine.heap, 1).expect("alloc failed");
    engine.heap.free(arr.id()).expect("free failed");
    assert_eq!(arr.len(&engine.heap), Err(RuntimeError::StaleSeries));
}
