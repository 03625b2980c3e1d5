// Cell representation, quoting, and binding tests

use pretty_assertions::assert_eq;
use rebus::value::{quote, unquote, Binding, Cell, CellFlags, Kind, Payload};
use rebus::{Context, Heap};

fn test_heap() -> Heap {
    Heap::new(1024 * 1024)
}

#[test]
fn test_format_write_read() {
    let mut cell = Cell::unformatted();
    assert!(!cell.is_formatted());
    cell.format();
    assert!(cell.is_formatted());
    cell.write(Kind::Integer, Payload::Int(42));
    assert_eq!(cell.kind_of(), Kind::Integer);
    assert_eq!(cell.as_int(), Some(42));
}

#[test]
fn test_constructors_report_their_kind() {
    assert_eq!(Cell::blank().kind_of(), Kind::Blank);
    assert_eq!(Cell::logic(true).kind_of(), Kind::Logic);
    assert_eq!(Cell::int(7).kind_of(), Kind::Integer);
}

#[test]
fn test_inline_quote_is_byte_arithmetic() {
    let mut heap = test_heap();
    let original = Cell::int(5);

    for n in 1..=3u32 {
        let mut cell = original;
        quote(&mut heap, &mut cell, n).expect("quote failed");
        // Depth 1-3 stays inline: no pairing payload
        assert!(!matches!(cell.payload(), Payload::Quoted { .. }));
        assert_eq!(cell.quote_depth(), n);
        assert_eq!(cell.kind_byte(), Kind::Integer as u8 + 64 * n as u8);
        assert_eq!(cell.kind_of(), Kind::Quoted);
        assert_eq!(cell.inner_kind(&heap), Kind::Integer);

        unquote(&heap, &mut cell, n);
        assert_eq!(cell, original);
    }
}

#[test]
fn test_quote_depth_four_allocates_pairing() {
    let mut heap = test_heap();
    let mut cell = Cell::int(9);
    quote(&mut heap, &mut cell, 4).expect("quote failed");

    assert!(matches!(cell.payload(), Payload::Quoted { .. }));
    assert_eq!(cell.quote_depth(), 4);
    assert_eq!(cell.kind_of(), Kind::Quoted);
    assert_eq!(cell.inner_kind(&heap), Kind::Integer);
    assert!(cell.is_protected());
}

#[test]
fn test_deep_quote_roundtrip_bit_for_bit() {
    // Scenario: quote a word-valued cell 5 times, unquote 5 times, and get
    // the original back exactly — kind, payload, binding, flags.
    let mut heap = test_heap();
    let ctx = Context::alloc(&mut heap, 2).expect("context alloc failed");

    let mut original = Cell::word(rebus::Symbol(17));
    original.set_binding(Binding::Specific(ctx.varlist()));
    original.set_flag(CellFlags::EVALUATED);

    let mut cell = original;
    quote(&mut heap, &mut cell, 5).expect("quote failed");
    assert_eq!(cell.quote_depth(), 5);
    assert_eq!(cell.binding(), original.binding());

    unquote(&heap, &mut cell, 5);
    assert_eq!(cell, original);
    assert!(cell.bits_eq(&original));
}

#[test]
fn test_quote_unquote_identity_for_any_n() {
    let mut heap = test_heap();
    let original = Cell::word(rebus::Symbol(3));

    for n in 0..=8u32 {
        let mut cell = original;
        quote(&mut heap, &mut cell, n).expect("quote failed");
        assert_eq!(cell.quote_depth(), n);
        if n >= 1 {
            assert_eq!(cell.kind_of(), Kind::Quoted);
        }
        // Inline depth never exceeds three
        if !matches!(cell.payload(), Payload::Quoted { .. }) {
            assert!(cell.quote_depth() <= 3);
        }
        unquote(&heap, &mut cell, n);
        assert_eq!(cell, original, "roundtrip at depth {}", n);
    }
}

#[test]
fn test_deep_quotes_share_the_pairing() {
    let mut heap = test_heap();
    let mut cell = Cell::int(1);
    quote(&mut heap, &mut cell, 5).expect("quote failed");
    let Payload::Quoted { pairing, .. } = cell.payload() else {
        panic!("expected pairing payload");
    };

    // Quoting a copy further shares the same pairing verbatim; only the
    // instance's depth differs
    let mut deeper = cell;
    quote(&mut heap, &mut deeper, 2).expect("quote failed");
    let Payload::Quoted {
        pairing: shared,
        depth,
    } = deeper.payload()
    else {
        panic!("expected pairing payload");
    };
    assert_eq!(shared, pairing);
    assert_eq!(depth, 7);
    assert_eq!(cell.quote_depth(), 5);
}

#[test]
fn test_collapsing_below_four_discards_pairing_reference() {
    let mut heap = test_heap();
    let mut cell = Cell::int(12);
    quote(&mut heap, &mut cell, 6).expect("quote failed");

    unquote(&heap, &mut cell, 4);
    assert_eq!(cell.quote_depth(), 2);
    assert!(!matches!(cell.payload(), Payload::Quoted { .. }));
    assert_eq!(cell.inner_kind(&heap), Kind::Integer);
}

#[test]
fn test_quote_zero_is_noop() {
    let mut heap = test_heap();
    let original = Cell::int(5);
    let mut cell = original;
    quote(&mut heap, &mut cell, 0).expect("quote failed");
    assert_eq!(cell, original);
    unquote(&heap, &mut cell, 0);
    assert_eq!(cell, original);
}

#[test]
fn test_binding_accessors() {
    let mut heap = test_heap();
    let ctx = Context::alloc(&mut heap, 1).expect("context alloc failed");

    let mut cell = Cell::word(rebus::Symbol(0));
    assert_eq!(cell.binding(), Binding::Unbound);
    cell.set_binding(Binding::Specific(ctx.varlist()));
    assert_eq!(cell.binding(), Binding::Specific(ctx.varlist()));

    // The binding is one of the node references the collector follows
    let (_, second) = cell.node_refs();
    assert_eq!(second, Some(ctx.varlist()));
}
