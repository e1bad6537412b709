use log::debug;

/// Bytes per backtrack stack entry.
pub const ENTRY_SIZE: usize = 4;

/// Backing memory for the matcher's backtrack stack.
///
/// The stack grows down from [`top`](Self::top). Generated code checks
/// against [`limit`](Self::limit), which sits `slack` entries above the
/// lowest address so that short unchecked push runs stay in bounds.
pub struct BacktrackStack {
    mem: Vec<u32>,
    max_bytes: usize,
    slack: usize,
}

impl BacktrackStack {
    pub fn new(initial_bytes: usize, max_bytes: usize, slack: usize) -> Self {
        Self {
            mem: vec![0; initial_bytes / ENTRY_SIZE],
            max_bytes,
            slack,
        }
    }

    /// Size of the backing memory in bytes.
    pub fn size(&self) -> usize {
        self.mem.len() * ENTRY_SIZE
    }

    fn base(&self) -> usize {
        self.mem.as_ptr() as usize
    }

    /// One past the highest entry: the stack pointer of an empty stack.
    pub fn top(&self) -> usize {
        self.base() + self.size()
    }

    /// Pushing at or below this address requires growing the stack.
    pub fn limit(&self) -> usize {
        self.base() + self.slack * ENTRY_SIZE
    }

    /// Bytes in use for stack pointer `sp`.
    pub fn used(&self, sp: usize) -> usize {
        self.top() - sp
    }

    /// Double the stack, preserving the entries above `sp`. Returns the
    /// new stack pointer, or `None` once the maximum size is reached.
    pub fn grow(&mut self, sp: usize) -> Option<usize> {
        let old_size = self.size();
        let new_size = old_size.checked_mul(2)?;
        if new_size > self.max_bytes || sp < self.base() || sp > self.top() {
            return None;
        }
        let used = self.used(sp) / ENTRY_SIZE;
        let mut mem = vec![0u32; new_size / ENTRY_SIZE];
        let (old_len, new_len) = (self.mem.len(), mem.len());
        mem[new_len - used..].copy_from_slice(&self.mem[old_len - used..]);
        self.mem = mem;
        debug!("backtrack stack grown from {} to {} bytes", old_size, new_size);
        Some(self.top() - used * ENTRY_SIZE)
    }
}
