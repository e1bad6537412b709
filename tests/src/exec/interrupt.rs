use rejit_exec::{InterruptFlags, StackGuard};

#[test]
fn idle_guard_polls_against_native_limit() {
    let mut g = StackGuard::new(false);
    g.set_native_limit(0x1000);
    assert!(!g.has_pending());
    assert_eq!(g.interrupt_limit(), 0x1000);
}

#[test]
fn pending_request_forces_poll() {
    let mut g = StackGuard::new(false);
    g.set_native_limit(0x1000);
    g.request(InterruptFlags::RELOCATE);
    assert_eq!(g.interrupt_limit(), usize::MAX);
    assert!(g.take(InterruptFlags::RELOCATE));
    assert!(!g.take(InterruptFlags::RELOCATE));
    assert_eq!(g.interrupt_limit(), 0x1000);
}

#[test]
fn take_clears_only_named_flags() {
    let mut g = StackGuard::new(false);
    g.request(InterruptFlags::RELOCATE | InterruptFlags::TERMINATE);
    assert!(g.take(InterruptFlags::TERMINATE));
    assert_eq!(g.pending(), InterruptFlags::RELOCATE);
}

#[test]
fn stress_always_polls() {
    let mut g = StackGuard::new(true);
    g.set_native_limit(0x1000);
    assert!(g.is_stress());
    assert_eq!(g.interrupt_limit(), usize::MAX);
}
