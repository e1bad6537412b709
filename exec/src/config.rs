use crate::RuntimeError;

/// Smallest backtrack stack that still leaves room past the unchecked
/// slack area.
pub const MIN_BACKTRACK_STACK_SIZE: usize = 1024;

/// Runtime tuning for [`RegExpRuntime`](crate::RegExpRuntime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Bytes of backtrack stack allocated up front.
    pub initial_backtrack_stack_size: usize,
    /// Growth stops here; overflowing it reports a stack overflow.
    pub max_backtrack_stack_size: usize,
    /// Native stack the matcher may use below the caller's frame.
    pub native_stack_budget: usize,
    /// Re-entries allowed after the matcher asks to be retried.
    pub max_retries: u32,
    /// Move the running code at every preemption poll.
    pub stress_relocation: bool,
    /// Capture sets requested per native call by `find_all`.
    pub global_batch_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_backtrack_stack_size: 4 * 1024,
            max_backtrack_stack_size: 64 * 1024 * 1024,
            native_stack_budget: 512 * 1024,
            max_retries: 8,
            stress_relocation: false,
            global_batch_size: 16,
        }
    }
}

impl RuntimeConfig {
    pub fn with_backtrack_stack(mut self, initial: usize, max: usize) -> Self {
        self.initial_backtrack_stack_size = initial;
        self.max_backtrack_stack_size = max;
        self
    }

    pub fn with_native_stack_budget(mut self, bytes: usize) -> Self {
        self.native_stack_budget = bytes;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_stress_relocation(mut self, on: bool) -> Self {
        self.stress_relocation = on;
        self
    }

    pub fn with_global_batch_size(mut self, sets: usize) -> Self {
        self.global_batch_size = sets;
        self
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.initial_backtrack_stack_size < MIN_BACKTRACK_STACK_SIZE {
            return Err(RuntimeError::Config(format!(
                "initial backtrack stack of {} bytes is below the minimum of {}",
                self.initial_backtrack_stack_size, MIN_BACKTRACK_STACK_SIZE
            )));
        }
        if self.max_backtrack_stack_size < self.initial_backtrack_stack_size {
            return Err(RuntimeError::Config(format!(
                "maximum backtrack stack ({}) is smaller than the initial size ({})",
                self.max_backtrack_stack_size, self.initial_backtrack_stack_size
            )));
        }
        if self.global_batch_size == 0 {
            return Err(RuntimeError::Config("global batch size must be positive".into()));
        }
        Ok(())
    }
}
