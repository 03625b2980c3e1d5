// Buffer engine tests: growth, bias, lifecycle, guard discipline, GC

use rebus::errors::{ReadOnlyCause, RuntimeError};
use rebus::{Array, BufferFlags, Cell, Flavor, Heap};

fn test_heap() -> Heap {
    Heap::new(1024 * 1024)
}

#[test]
fn test_append_beyond_capacity_grows_preserving_order() {
    // Scenario: allocate with capacity 4, append 5 cells; length becomes 5
    // and every element keeps its insertion position.
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 4).expect("alloc failed");

    for i in 0..5 {
        arr.push(&mut heap, Cell::int(i)).expect("push failed");
    }

    assert_eq!(arr.len(&heap).expect("len failed"), 5);
    for i in 0..5 {
        let cell = arr.at(&heap, i as usize).expect("read failed");
        assert_eq!(cell.as_int(), Some(i));
    }
}

#[test]
fn test_used_never_exceeds_rest() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 2).expect("alloc failed");

    for i in 0..20 {
        arr.push(&mut heap, Cell::int(i)).expect("push failed");
        let buf = heap.get(arr.id()).expect("get failed");
        assert!(buf.used() <= buf.rest(), "used {} > rest {}", buf.used(), buf.rest());
    }

    heap.expand(arr.id(), 3, 7).expect("expand failed");
    let buf = heap.get(arr.id()).expect("get failed");
    assert!(buf.used() <= buf.rest());
    assert_eq!(buf.used(), 27);
}

#[test]
fn test_expand_in_middle_preserves_surroundings() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 4).expect("alloc failed");
    for i in 0..4 {
        arr.push(&mut heap, Cell::int(i)).expect("push failed");
    }

    heap.expand(arr.id(), 2, 3).expect("expand failed");
    assert_eq!(arr.len(&heap).expect("len"), 7);
    assert_eq!(arr.at(&heap, 0).expect("read").as_int(), Some(0));
    assert_eq!(arr.at(&heap, 1).expect("read").as_int(), Some(1));
    assert_eq!(arr.at(&heap, 5).expect("read").as_int(), Some(2));
    assert_eq!(arr.at(&heap, 6).expect("read").as_int(), Some(3));
}

#[test]
fn test_head_removal_is_bias_adjustment() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 8).expect("alloc failed");
    for i in 0..6 {
        arr.push(&mut heap, Cell::int(i)).expect("push failed");
    }

    heap.get_mut(arr.id())
        .expect("get failed")
        .remove(0, 2)
        .expect("remove failed");

    let buf = heap.get(arr.id()).expect("get failed");
    assert_eq!(buf.bias(), 2, "head shrink should only move the bias");
    assert_eq!(buf.used(), 4);
    assert_eq!(arr.at(&heap, 0).expect("read").as_int(), Some(2));
}

#[test]
fn test_allocation_failure_is_recoverable() {
    let mut heap = Heap::new(512);
    let result = heap.allocate(4096, Flavor::Binary);
    assert!(matches!(result, Err(RuntimeError::OutOfMemory { .. })));

    // The heap is still usable afterwards
    let small = heap.allocate(4, Flavor::Binary).expect("small alloc failed");
    assert!(heap.is_live(small));
}

#[test]
fn test_expand_within_capacity_ignores_the_limit() {
    // Capacity 8 costs 9 bytes against a 12-byte limit; opening slots
    // inside the existing capacity moves no bytes and must not fail
    let mut heap = Heap::new(12);
    let id = heap.allocate(8, Flavor::Binary).expect("alloc failed");
    heap.get_mut(id)
        .expect("get failed")
        .push_bytes(&[1, 2])
        .expect("push failed");

    heap.expand(id, 1, 4).expect("in-capacity expand failed");
    assert_eq!(heap.get(id).expect("get failed").used(), 6);

    // A regrow past the limit is still refused, leaving the buffer intact
    let result = heap.expand(id, 0, 8);
    assert!(matches!(result, Err(RuntimeError::OutOfMemory { .. })));
    assert_eq!(heap.get(id).expect("get failed").used(), 6);
}

#[test]
fn test_index_out_of_range_is_checked_not_clamped() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 2).expect("alloc failed");
    arr.push(&mut heap, Cell::int(1)).expect("push failed");

    let result = arr.at(&heap, 5);
    assert_eq!(
        result,
        Err(RuntimeError::IndexOutOfRange { index: 5, len: 1 })
    );
}

#[test]
fn test_readonly_priority_order() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 2).expect("alloc failed");

    // protected alone
    heap.get_mut(arr.id()).expect("get").protect();
    assert_eq!(
        arr.push(&mut heap, Cell::blank()),
        Err(RuntimeError::ReadOnly {
            cause: ReadOnlyCause::Protected
        })
    );

    // frozen outranks protected
    heap.get_mut(arr.id()).expect("get").freeze();
    assert_eq!(
        arr.push(&mut heap, Cell::blank()),
        Err(RuntimeError::ReadOnly {
            cause: ReadOnlyCause::Frozen
        })
    );

    // held outranks frozen
    heap.get_mut(arr.id()).expect("get").hold();
    assert_eq!(
        arr.push(&mut heap, Cell::blank()),
        Err(RuntimeError::ReadOnly {
            cause: ReadOnlyCause::Held
        })
    );

    // auto-locked outranks everything
    heap.get_mut(arr.id())
        .expect("get")
        .set_flag(BufferFlags::AUTO_LOCKED);
    assert_eq!(
        arr.push(&mut heap, Cell::blank()),
        Err(RuntimeError::ReadOnly {
            cause: ReadOnlyCause::AutoLocked
        })
    );
}

#[test]
fn test_hold_is_released_freeze_is_not() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 2).expect("alloc failed");

    heap.get_mut(arr.id()).expect("get").hold();
    assert!(arr.push(&mut heap, Cell::blank()).is_err());
    heap.get_mut(arr.id()).expect("get").release_hold();
    assert!(arr.push(&mut heap, Cell::blank()).is_ok());

    heap.get_mut(arr.id()).expect("get").freeze();
    assert!(arr.push(&mut heap, Cell::blank()).is_err());
}

#[test]
fn test_stale_series_after_free() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 2).expect("alloc failed");
    let id = arr.id();
    heap.free(id).expect("free failed");
    assert_eq!(heap.get(id).err(), Some(RuntimeError::StaleSeries));
}

#[test]
fn test_stale_frame_is_distinct_from_stale_series() {
    let mut heap = test_heap();
    let varlist = heap.allocate(4, Flavor::VarList).expect("alloc failed");
    heap.free(varlist).expect("free failed");
    assert_eq!(heap.get(varlist).err(), Some(RuntimeError::StaleFrame));
}

#[test]
fn test_stale_frame_distinction_survives_slot_reuse() {
    let mut heap = test_heap();
    let varlist = heap.allocate(4, Flavor::VarList).expect("alloc failed");
    heap.free(varlist).expect("free failed");

    // The freed slot is recycled for an array; the old handle still
    // reports what it referred to
    let recycled = heap.allocate(4, Flavor::Array).expect("alloc failed");
    assert!(heap.is_live(recycled));
    assert_eq!(heap.get(varlist).err(), Some(RuntimeError::StaleFrame));
    assert_eq!(heap.get(recycled).err(), None);
}

#[test]
fn test_unreferenced_managed_buffer_is_swept() {
    let mut heap = test_heap();
    let id = heap.allocate(4, Flavor::Array).expect("alloc failed");
    heap.manage(id);

    let swept = heap.collect(&[]);
    assert_eq!(swept, 1);
    assert!(!heap.is_live(id));
}

#[test]
fn test_guard_roots_a_managed_buffer() {
    let mut heap = test_heap();
    let id = heap.allocate(4, Flavor::Array).expect("alloc failed");
    heap.manage(id);

    heap.guard(id);
    heap.collect(&[]);
    assert!(heap.is_live(id), "guarded buffer must survive the sweep");

    heap.unguard(id);
    heap.collect(&[]);
    assert!(!heap.is_live(id));
}

#[test]
fn test_manual_buffers_are_never_swept() {
    let mut heap = test_heap();
    let id = heap.allocate(4, Flavor::Array).expect("alloc failed");
    heap.collect(&[]);
    assert!(heap.is_live(id));
    assert_eq!(heap.manual_count(), 1);
}

#[test]
fn test_marking_follows_cell_references() {
    let mut heap = test_heap();
    let inner = Array::alloc(&mut heap, 1).expect("alloc failed");
    let outer = Array::alloc(&mut heap, 1).expect("alloc failed");
    outer
        .push(&mut heap, Cell::block(inner.id(), 0))
        .expect("push failed");
    heap.manage(inner.id());
    heap.manage(outer.id());

    // Rooting the outer array keeps the inner one alive through its cell
    heap.collect(&[outer.id()]);
    assert!(heap.is_live(outer.id()));
    assert!(heap.is_live(inner.id()));

    heap.collect(&[]);
    assert!(!heap.is_live(inner.id()));
}

#[test]
fn test_black_color_bit_is_transient() {
    let mut heap = test_heap();
    let id = heap.allocate(2, Flavor::Array).expect("alloc failed");

    let buf = heap.get_mut(id).expect("get failed");
    buf.set_flag(BufferFlags::BLACK);
    assert!(buf.flags().contains(BufferFlags::BLACK));
    buf.clear_flag(BufferFlags::BLACK);
    assert!(!buf.flags().contains(BufferFlags::BLACK));
}

#[test]
fn test_pairlist_and_indexlist_flavors() {
    let mut heap = test_heap();

    let pairs = heap.allocate(4, Flavor::PairList).expect("alloc failed");
    let buf = heap.get_mut(pairs).expect("get failed");
    buf.push_cell(Cell::word(rebus::Symbol(1))).expect("push failed");
    buf.push_cell(Cell::int(10)).expect("push failed");
    assert_eq!(buf.used(), 2);

    let cache = heap.allocate(4, Flavor::IndexList).expect("alloc failed");
    let buf = heap.get_mut(cache).expect("get failed");
    buf.push_index(3).expect("push failed");
    assert_eq!(buf.indices(), &[3]);
}

#[test]
fn test_insert_and_remove_slide_elements() {
    let mut heap = test_heap();
    let arr = Array::alloc(&mut heap, 4).expect("alloc failed");
    for i in 0..3 {
        arr.push(&mut heap, Cell::int(i)).expect("push failed");
    }

    arr.insert(&mut heap, 1, Cell::int(99)).expect("insert failed");
    let values: Vec<i64> = (0..4)
        .map(|i| arr.at(&heap, i).expect("read").as_int().expect("int"))
        .collect();
    assert_eq!(values, vec![0, 99, 1, 2]);

    arr.remove(&mut heap, 1, 2).expect("remove failed");
    assert_eq!(arr.len(&heap).expect("len"), 2);
    assert_eq!(arr.at(&heap, 1).expect("read").as_int(), Some(2));
}

#[test]
fn test_shallow_copy_does_not_recurse() {
    let mut heap = test_heap();
    let inner = Array::alloc(&mut heap, 1).expect("alloc failed");
    inner.push(&mut heap, Cell::int(1)).expect("push failed");
    let outer = Array::alloc(&mut heap, 1).expect("alloc failed");
    outer
        .push(&mut heap, Cell::block(inner.id(), 0))
        .expect("push failed");

    let copy = outer.shallow_copy(&mut heap).expect("copy failed");
    let (node, _) = copy.at(&heap, 0).expect("read").as_series().expect("series");
    assert_eq!(node, inner.id(), "shallow copy shares nested storage");
}

#[test]
fn test_deep_copy_recurses_into_arrays() {
    let mut heap = test_heap();
    let inner = Array::alloc(&mut heap, 1).expect("alloc failed");
    inner.push(&mut heap, Cell::int(1)).expect("push failed");
    let outer = Array::alloc(&mut heap, 1).expect("alloc failed");
    outer
        .push(&mut heap, Cell::block(inner.id(), 0))
        .expect("push failed");

    let copy = outer.deep_copy(&mut heap).expect("copy failed");
    let (node, _) = copy.at(&heap, 0).expect("read").as_series().expect("series");
    assert_ne!(node, inner.id(), "deep copy duplicates nested storage");
    let nested = Array(node);
    assert_eq!(nested.at(&heap, 0).expect("read").as_int(), Some(1));
}

#[test]
fn test_deep_copy_exclusion_for_relative_words() {
    use rebus::value::Binding;

    let mut heap = test_heap();
    let inner = Array::alloc(&mut heap, 1).expect("alloc failed");
    let outer = Array::alloc(&mut heap, 1).expect("alloc failed");

    // A relatively-bound block cell keeps its payload under deep copy
    let mut cell = Cell::block(inner.id(), 0);
    cell.set_binding(Binding::Relative(outer.id()));
    outer.push(&mut heap, cell).expect("push failed");

    let copy = outer.deep_copy(&mut heap).expect("copy failed");
    let (node, _) = copy.at(&heap, 0).expect("read").as_series().expect("series");
    assert_eq!(node, inner.id());
}
