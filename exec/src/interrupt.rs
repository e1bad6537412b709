use bitflags::bitflags;

bitflags! {
    /// Work the runtime wants done at the next preemption poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptFlags: u32 {
        /// Move code objects to fresh memory.
        const RELOCATE = 1 << 0;
        /// Abandon the running match.
        const TERMINATE = 1 << 1;
    }
}

/// Pending interrupts and the limit generated code polls against.
///
/// Generated code compares its stack pointer with
/// [`interrupt_limit`](Self::interrupt_limit); any pending interrupt (or
/// stress mode) raises the limit to `usize::MAX` so the next poll fires.
#[derive(Debug, Default)]
pub struct StackGuard {
    pending: InterruptFlags,
    native_limit: usize,
    stress: bool,
}

impl StackGuard {
    pub fn new(stress: bool) -> Self {
        Self {
            stress,
            ..Self::default()
        }
    }

    pub fn request(&mut self, flags: InterruptFlags) {
        self.pending |= flags;
    }

    /// Clear `flags`, reporting whether any of them was pending.
    pub fn take(&mut self, flags: InterruptFlags) -> bool {
        let hit = self.pending.intersects(flags);
        self.pending.remove(flags);
        hit
    }

    pub fn pending(&self) -> InterruptFlags {
        self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_stress(&self) -> bool {
        self.stress
    }

    /// Lowest native stack address the matcher may reach.
    pub fn native_limit(&self) -> usize {
        self.native_limit
    }

    pub fn set_native_limit(&mut self, limit: usize) {
        self.native_limit = limit;
    }

    pub fn interrupt_limit(&self) -> usize {
        if self.stress || self.has_pending() {
            usize::MAX
        } else {
            self.native_limit
        }
    }
}
