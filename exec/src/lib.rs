//! Host runtime for native regexp matchers.
//!
//! Owns compiled code objects, the backtrack stack and the runtime
//! context generated code calls back through, and drives the
//! compile -> execute -> retry cycle.

pub mod bridge;
pub mod casefold;
pub mod code_store;
pub mod config;
mod exec_loop;
pub mod interrupt;
pub mod permission;
pub mod ranges;
pub mod stack;

use std::ffi::c_void;
use std::io;
use std::ptr::{self, NonNull};

use log::debug;
use rejit_backend::x86_64::STACK_LIMIT_SLACK;
use rejit_backend::NativeCode;
use rejit_core::{
    CompileError, CompileOptions, GlobalMode, Mode, NativeStatus, Program, RuntimeContext,
};
use thiserror::Error;

pub use code_store::{CodeHandle, CodeStore};
pub use config::RuntimeConfig;
pub use interrupt::{InterruptFlags, StackGuard};
pub use permission::{PermissionBase, PermissionScope, Permissions};
pub use stack::BacktrackStack;

use exec_loop::{exec_loop, NativeArgs};

/// Why a match could not produce an answer.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("backtrack stack overflow")]
    StackOverflow,

    #[error("match aborted by an interrupt")]
    Aborted,

    #[error("backtrack limit exceeded; retry with a fallback engine")]
    Fallback,

    #[error("subject is {found:?} but the code was compiled for {expected:?}")]
    ModeMismatch { expected: Mode, found: Mode },

    #[error("start index {index} is past the end of a subject of length {len}")]
    StartOutOfBounds { index: usize, len: usize },

    #[error("output holds {got} registers, {need} needed")]
    OutputTooSmall { need: usize, got: usize },

    #[error("code handle does not name a live code object")]
    InvalidHandle,

    #[error("code was compiled without global mode")]
    NotGlobal,

    #[error("permission denied for {0:?}")]
    PermissionDenied(PermissionScope),

    #[error("native code returned unexpected status {0}")]
    UnexpectedStatus(i64),
}

/// Failures outside of matching proper.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("permission denied for {0:?}")]
    PermissionDenied(PermissionScope),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("code memory: {0}")]
    Io(#[from] io::Error),
}

/// Counters kept across matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub executions: u64,
    /// Preemption polls that reached the runtime.
    pub polls: u64,
    pub relocations: u64,
    pub stack_growths: u64,
    pub retries: u64,
}

/// A subject string in one of the two supported encodings.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Latin1(&'a [u8]),
    Uc16(&'a [u16]),
}

impl<'a> Subject<'a> {
    pub fn mode(&self) -> Mode {
        match self {
            Subject::Latin1(_) => Mode::Latin1,
            Subject::Uc16(_) => Mode::Uc16,
        }
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        match self {
            Subject::Latin1(s) => s.len(),
            Subject::Uc16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index one character past `index`. In unicode mode a surrogate pair
    /// counts as one character.
    fn step(&self, index: usize, unicode: bool) -> usize {
        if let (true, Subject::Uc16(s)) = (unicode, self) {
            let lead = s.get(index).is_some_and(|&c| (0xD800..0xDC00).contains(&c));
            let trail = s.get(index + 1).is_some_and(|&c| (0xDC00..0xE000).contains(&c));
            if lead && trail {
                return index + 2;
            }
        }
        index + 1
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            Subject::Latin1(s) => s.as_ptr(),
            Subject::Uc16(s) => s.as_ptr() as *const u8,
        }
    }
}

/// Capture spans of one match, indexed by group (group 0 is the match).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures {
    spans: Vec<Option<(usize, usize)>>,
}

impl Captures {
    /// Decode `start, end` register pairs; `-1` marks an unset group.
    pub fn from_registers(regs: &[i32]) -> Self {
        let spans = regs
            .chunks_exact(2)
            .map(|p| match (usize::try_from(p[0]), usize::try_from(p[1])) {
                (Ok(s), Ok(e)) => Some((s, e)),
                _ => None,
            })
            .collect();
        Self { spans }
    }

    pub fn get(&self, group: usize) -> Option<(usize, usize)> {
        self.spans.get(group).copied().flatten()
    }

    /// Span of the whole match.
    pub fn span(&self) -> (usize, usize) {
        self.get(0).unwrap_or((0, 0))
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<(usize, usize)>> + '_ {
        self.spans.iter().copied()
    }
}

/// Mutable state shared with the runtime entry points while generated
/// code runs. Reached from [`RuntimeContext::host`].
pub(crate) struct HostState {
    pub(crate) code: CodeStore,
    pub(crate) stack: BacktrackStack,
    pub(crate) guard: StackGuard,
    pub(crate) stats: RuntimeStats,
    pub(crate) running: Option<CodeHandle>,
}

/// Compiles opcode programs to native code and runs them.
///
/// Single-owner: generated code reaches back into the runtime through
/// raw pointers, so the runtime is neither `Send` nor `Sync`.
pub struct RegExpRuntime {
    host: NonNull<HostState>,
    ctx: Box<RuntimeContext>,
    config: RuntimeConfig,
    permissions: Permissions,
}

impl RegExpRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let state = Box::new(HostState {
            code: CodeStore::new(),
            stack: BacktrackStack::new(
                config.initial_backtrack_stack_size,
                config.max_backtrack_stack_size,
                STACK_LIMIT_SLACK,
            ),
            guard: StackGuard::new(config.stress_relocation),
            stats: RuntimeStats::default(),
            running: None,
        });
        let host = NonNull::from(Box::leak(state));
        let ctx = Box::new(RuntimeContext {
            interrupt_limit: 0,
            code_base: 0,
            stack_memory_top: 0,
            stack_limit: 0,
            stack_pointer: 0,
            check_stack_guard_state: bridge::check_stack_guard_state,
            grow_stack: bridge::grow_stack,
            case_insensitive_compare: bridge::case_insensitive_compare,
            is_character_in_range_array: bridge::is_character_in_range_array,
            host: host.as_ptr() as *mut c_void,
        });
        debug!("regexp runtime created: {:?}", config);
        Ok(Self {
            host,
            ctx,
            config,
            permissions: Permissions::new(),
        })
    }

    fn state(&self) -> &HostState {
        // SAFETY: `host` is owned by `self` and only aliased while native
        // code runs inside `exec`, which holds `&mut self`.
        unsafe { self.host.as_ref() }
    }

    fn state_mut(&mut self) -> &mut HostState {
        // SAFETY: as in `state`.
        unsafe { self.host.as_mut() }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn permissions_mut(&mut self) -> &mut Permissions {
        &mut self.permissions
    }

    pub fn stats(&self) -> RuntimeStats {
        self.state().stats
    }

    pub fn code(&self, handle: CodeHandle) -> Option<&NativeCode> {
        self.state().code.get(handle)
    }

    /// Number of live code objects.
    pub fn code_count(&self) -> usize {
        self.state().code.len()
    }

    /// Current size of the backtrack stack in bytes.
    pub fn backtrack_stack_size(&self) -> usize {
        self.state().stack.size()
    }

    /// Compile `program`, reusing earlier code for the same program, source
    /// and options.
    pub fn compile(
        &mut self,
        program: &Program,
        options: CompileOptions,
        source: &str,
    ) -> Result<CodeHandle, RuntimeError> {
        if !self.permissions.is_granted(PermissionScope::CodeGeneration, source) {
            return Err(RuntimeError::PermissionDenied(PermissionScope::CodeGeneration));
        }
        if let Some(handle) = self.state().code.lookup(source, program, &options) {
            debug!("reusing compiled /{}/ as {:?}", source, handle);
            return Ok(handle);
        }
        let code = rejit_backend::compile(program, &options, source)?;
        Ok(self.state_mut().code.insert(code, program.clone(), options))
    }

    /// Drop a code object. Its handle becomes invalid.
    pub fn remove(&mut self, handle: CodeHandle) -> bool {
        self.state_mut().code.remove(handle).is_some()
    }

    /// Run the matcher at `handle` on `subject` from character `start`.
    ///
    /// Captures are written to `output` as `start, end` index pairs.
    /// Returns the number of capture sets written: 0 or 1, or up to
    /// `output.len() / saved registers` in global mode.
    pub fn exec(
        &mut self,
        handle: CodeHandle,
        subject: Subject<'_>,
        start: usize,
        output: &mut [i32],
    ) -> Result<usize, MatchError> {
        let (need, mode, source_granted) = {
            let code = self.state().code.get(handle).ok_or(MatchError::InvalidHandle)?;
            let granted = self
                .permissions
                .is_granted(PermissionScope::NativeExecution, code.source());
            (code.num_saved_registers(), code.mode(), granted)
        };
        if !source_granted {
            return Err(MatchError::PermissionDenied(PermissionScope::NativeExecution));
        }
        if subject.mode() != mode {
            return Err(MatchError::ModeMismatch {
                expected: mode,
                found: subject.mode(),
            });
        }
        if start > subject.len() {
            return Err(MatchError::StartOutOfBounds {
                index: start,
                len: subject.len(),
            });
        }
        if output.len() < need {
            return Err(MatchError::OutputTooSmall {
                need,
                got: output.len(),
            });
        }

        let cs = mode.char_size() as usize;
        let base = subject.as_ptr();
        let args = NativeArgs {
            input_string: base,
            start_index: start,
            input_start: base.wrapping_add(start * cs),
            input_end: base.wrapping_add(subject.len() * cs),
            output: if output.is_empty() {
                ptr::null_mut()
            } else {
                output.as_mut_ptr()
            },
            output_size: output.len(),
        };
        let ctx: *mut RuntimeContext = &mut *self.ctx;
        // SAFETY: the state and context are owned by `self`, which is
        // borrowed mutably for the whole call; `args` describes `subject`
        // and `output`, both alive until we return.
        let status = unsafe {
            exec_loop(
                self.host.as_ptr(),
                ctx,
                handle,
                &args,
                self.config.max_retries,
                self.config.native_stack_budget,
            )
        }?;
        match status {
            NativeStatus::Success(n) => Ok(n as usize),
            NativeStatus::Failure => Ok(0),
            NativeStatus::Exception => Err(MatchError::StackOverflow),
            NativeStatus::FallbackToExperimental => Err(MatchError::Fallback),
            NativeStatus::Retry => Err(MatchError::Aborted),
        }
    }

    /// First match at or after `start`.
    pub fn find(
        &mut self,
        handle: CodeHandle,
        subject: Subject<'_>,
        start: usize,
    ) -> Result<Option<Captures>, MatchError> {
        let need = self.saved_registers(handle)?;
        let mut output = vec![-1; need];
        match self.exec(handle, subject, start, &mut output)? {
            0 => Ok(None),
            _ => Ok(Some(Captures::from_registers(&output))),
        }
    }

    /// Every match of a global-mode matcher, left to right.
    pub fn find_all(
        &mut self,
        handle: CodeHandle,
        subject: Subject<'_>,
    ) -> Result<Vec<Captures>, MatchError> {
        let code = self.state().code.get(handle).ok_or(MatchError::InvalidHandle)?;
        let global_mode = code.global_mode();
        if !global_mode.is_global() {
            return Err(MatchError::NotGlobal);
        }
        let saved = code.num_saved_registers();
        let batch = self.config.global_batch_size;
        let mut output = vec![-1; saved * batch];
        let mut matches = Vec::new();
        let mut start = 0;

        while start <= subject.len() {
            let n = self.exec(handle, subject, start, &mut output)?;
            matches.extend(
                output
                    .chunks_exact(saved)
                    .take(n)
                    .map(Captures::from_registers),
            );
            if n < batch {
                break;
            }
            // The output filled up: resume after the last match.
            let (from, to) = matches.last().map(Captures::span).unwrap_or((start, start));
            start = if to == from {
                subject.step(to, global_mode == GlobalMode::GlobalUnicode)
            } else {
                to
            };
        }
        Ok(matches)
    }

    fn saved_registers(&self, handle: CodeHandle) -> Result<usize, MatchError> {
        self.state()
            .code
            .get(handle)
            .map(NativeCode::num_saved_registers)
            .ok_or(MatchError::InvalidHandle)
    }

    /// Ask the next preemption poll to handle `flags`.
    pub fn request_interrupt(&mut self, flags: InterruptFlags) {
        debug!("interrupt requested: {:?}", flags);
        self.state_mut().guard.request(flags);
    }

    /// Move every code object to fresh memory. Returns how many moved.
    pub fn collect_garbage(&mut self) -> Result<usize, RuntimeError> {
        let moved = self.state_mut().code.relocate_all()?;
        self.state_mut().stats.relocations += moved as u64;
        Ok(moved)
    }
}

impl Drop for RegExpRuntime {
    fn drop(&mut self) {
        // SAFETY: `host` came from `Box::leak` in `new` and is dropped once.
        unsafe { drop(Box::from_raw(self.host.as_ptr())) };
    }
}
