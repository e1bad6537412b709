use rejit_exec::stack::ENTRY_SIZE;
use rejit_exec::BacktrackStack;

#[test]
fn fresh_stack_geometry() {
    let s = BacktrackStack::new(1024, 4096, 32);
    assert_eq!(s.size(), 1024);
    assert_eq!(s.top() - s.limit(), 1024 - 32 * ENTRY_SIZE);
    assert_eq!(s.used(s.top()), 0);
}

#[test]
fn grow_preserves_live_entries() {
    let mut s = BacktrackStack::new(1024, 4096, 32);
    let sp = s.top() - 3 * ENTRY_SIZE;
    // SAFETY: sp..top lies inside the stack's memory.
    unsafe {
        let p = sp as *mut u32;
        p.write(10);
        p.add(1).write(20);
        p.add(2).write(30);
    }
    let new_sp = s.grow(sp).unwrap();
    assert_eq!(s.size(), 2048);
    assert_eq!(s.used(new_sp), 3 * ENTRY_SIZE);
    let live = unsafe { std::slice::from_raw_parts(new_sp as *const u32, 3) };
    assert_eq!(live, &[10, 20, 30]);
}

#[test]
fn grow_stops_at_maximum() {
    let mut s = BacktrackStack::new(1024, 2048, 32);
    let sp = s.top();
    let sp = s.grow(sp).unwrap();
    assert_eq!(s.size(), 2048);
    assert_eq!(s.grow(sp), None);
    assert_eq!(s.size(), 2048);
}

#[test]
fn grow_rejects_foreign_pointer() {
    let mut s = BacktrackStack::new(1024, 8192, 32);
    let outside = s.top() + ENTRY_SIZE;
    assert_eq!(s.grow(outside), None);
}
