use rejit_core::label::*;

#[test]
fn new_labels_are_unbound() {
    let mut t = LabelTable::new();
    let a = t.new_label();
    let b = t.new_label();
    assert_eq!(a, Label(0));
    assert_eq!(b, Label(1));
    assert_eq!(t.len(), 2);
    assert!(!t.is_bound(a));
    assert!(!t.is_linked(a));
    assert_eq!(t.pos(b), None);
}

#[test]
fn bind_hands_back_pending_uses() {
    let mut t = LabelTable::new();
    let l = t.new_label();
    t.add_use(l, 10, RelocKind::Rel32);
    t.add_use(l, 20, RelocKind::CodeOffset32);
    assert!(t.is_linked(l));

    let uses = t.bind(l, 100);
    assert_eq!(uses.len(), 2);
    assert_eq!(uses[0].offset, 10);
    assert_eq!(uses[1].kind, RelocKind::CodeOffset32);
    assert!(t.is_bound(l));
    assert!(!t.is_linked(l));
    assert_eq!(t.pos(l), Some(100));
}

#[test]
fn bind_without_uses() {
    let mut t = LabelTable::new();
    let l = t.new_label();
    assert!(t.bind(l, 7).is_empty());
    assert_eq!(t.pos(l), Some(7));
}

#[test]
#[should_panic(expected = "bound twice")]
fn binding_twice_panics() {
    let mut t = LabelTable::new();
    let l = t.new_label();
    t.bind(l, 0);
    t.bind(l, 4);
}

#[test]
fn first_unresolved_skips_bound_and_unused() {
    let mut t = LabelTable::new();
    let unused = t.new_label();
    let bound = t.new_label();
    let dangling = t.new_label();
    t.add_use(bound, 0, RelocKind::Rel32);
    t.bind(bound, 8);
    t.add_use(dangling, 4, RelocKind::Rel32);

    assert!(!t.is_linked(unused));
    assert_eq!(t.first_unresolved(), Some(dangling));

    t.clear_uses();
    assert_eq!(t.first_unresolved(), None);
}

#[test]
fn rel32_is_relative_to_field_end() {
    assert_eq!(RelocKind::Rel32.resolve(10, 100), 86);
    assert_eq!(RelocKind::Rel32.resolve(100, 10) as i32, -94);
    assert_eq!(RelocKind::Rel32.resolve(0, 4), 0);
}

#[test]
fn code_offset_is_absolute_within_code() {
    assert_eq!(RelocKind::CodeOffset32.resolve(5, 1234), 1234);
    assert_eq!(RelocKind::CodeOffset32.resolve(5000, 0), 0);
}
