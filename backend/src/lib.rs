pub mod code_buffer;
pub mod translate;
pub mod x86_64;

use std::io;

use rejit_core::runtime::NativeEntry;
use rejit_core::types::TABLE_SIZE;
use rejit_core::{
    CharacterRange, CompileError, CompileOptions, GlobalMode, Implementation, Label, Mode,
    Program, StackCheckFlag, StandardCharacterSet,
};

pub use code_buffer::CodeBuffer;
pub use translate::translate;
pub use x86_64::RegExpMacroAssemblerX64;

/// Opcode contract every native matcher backend implements.
///
/// A pattern compiler drives an implementation op by op. Branch targets
/// are `Option<Label>`: `None` means "backtrack". Registers are indices
/// into the capture register file; registers below the saved count are
/// reported to the caller on success.
pub trait RegExpMacroAssembler {
    fn implementation(&self) -> Implementation;

    /// Number of entries that may be pushed without a stack limit check.
    fn stack_limit_slack(&self) -> usize;

    fn new_label(&mut self) -> Label;

    /// Bind `label` to the current position. A label is bound at most once.
    fn bind(&mut self, label: Label);

    /// Abandon code generation. `get_code` will fail afterwards.
    fn aborted_code_generation(&mut self);

    fn set_global_mode(&mut self, mode: GlobalMode);

    /// Give up after `limit` backtracks; report fallback instead of
    /// failure when `can_fallback` is set.
    fn set_backtrack_limit(&mut self, limit: u32, can_fallback: bool);

    // -- Position control --

    /// Move the current position by `by` characters, without bounds checks.
    fn advance_current_position(&mut self, by: i32);
    fn read_current_position_from_register(&mut self, reg: usize);
    fn write_current_position_to_register(&mut self, reg: usize, cp_offset: i32);
    /// Clamp the position to at most `by` characters before the end.
    fn set_current_position_from_end(&mut self, by: i32);

    // -- Character loads --

    /// Load `characters` characters at `cp_offset`, jumping to
    /// `on_end_of_input` when they are not all inside the input.
    fn load_current_character(
        &mut self,
        cp_offset: i32,
        on_end_of_input: Option<Label>,
        check_bounds: bool,
        characters: usize,
    ) {
        if check_bounds {
            let last = if cp_offset >= 0 {
                cp_offset + characters as i32 - 1
            } else {
                cp_offset
            };
            self.check_position(last, on_end_of_input);
        }
        self.load_current_character_unchecked(cp_offset, characters);
    }

    fn load_current_character_unchecked(&mut self, cp_offset: i32, characters: usize);

    // -- Character tests --

    fn check_character(&mut self, c: u32, on_equal: Option<Label>);
    fn check_not_character(&mut self, c: u32, on_not_equal: Option<Label>);
    fn check_character_after_and(&mut self, c: u32, mask: u32, on_equal: Option<Label>);
    fn check_not_character_after_and(&mut self, c: u32, mask: u32, on_not_equal: Option<Label>);
    /// Branch if `((current - minus) & mask) != c`.
    fn check_not_character_after_minus_and(
        &mut self,
        c: u32,
        minus: u32,
        mask: u32,
        on_not_equal: Option<Label>,
    );
    fn check_character_gt(&mut self, limit: u32, on_greater: Option<Label>);
    fn check_character_lt(&mut self, limit: u32, on_less: Option<Label>);
    fn check_character_in_range(&mut self, from: u32, to: u32, on_in_range: Option<Label>);
    fn check_character_not_in_range(&mut self, from: u32, to: u32, on_not_in_range: Option<Label>);

    /// Returns `false` when the backend cannot handle this array; the
    /// caller must then emit an equivalent sequence of simpler tests.
    fn check_character_in_range_array(
        &mut self,
        ranges: &[CharacterRange],
        on_in_range: Option<Label>,
    ) -> bool;
    fn check_character_not_in_range_array(
        &mut self,
        ranges: &[CharacterRange],
        on_not_in_range: Option<Label>,
    ) -> bool;

    /// Branch if `table[current & (TABLE_SIZE - 1)]` is non-zero.
    fn check_bit_in_table(&mut self, table: &[u8; TABLE_SIZE], on_bit_set: Option<Label>);

    /// Branch if the current character is *not* in `set`. Returns `false`
    /// when there is no fast path for the set in this mode.
    fn check_special_class_ranges(
        &mut self,
        set: StandardCharacterSet,
        on_no_match: Option<Label>,
    ) -> bool;

    // -- Position tests --

    fn check_at_start(&mut self, cp_offset: i32, on_at_start: Option<Label>);
    fn check_not_at_start(&mut self, cp_offset: i32, on_not_at_start: Option<Label>);
    /// Branch if the character at `cp_offset` lies outside the input.
    fn check_position(&mut self, cp_offset: i32, on_outside_input: Option<Label>);
    /// If the current position equals the backtrack stack top, drop the
    /// entry and branch: the loop body consumed nothing. Falls through on
    /// an empty stack.
    fn check_greedy_loop(&mut self, on_tos_equals_current_position: Option<Label>);

    // -- Backreferences --

    fn check_not_back_reference(
        &mut self,
        start_reg: usize,
        read_backward: bool,
        on_no_match: Option<Label>,
    );
    fn check_not_back_reference_ignore_case(
        &mut self,
        start_reg: usize,
        read_backward: bool,
        unicode: bool,
        on_no_match: Option<Label>,
    );

    // -- Backtrack stack and registers --

    fn push_backtrack(&mut self, label: Label);
    /// Pop a resumption point and continue there.
    fn backtrack(&mut self);
    fn push_current_position(&mut self);
    fn pop_current_position(&mut self);
    fn push_register(&mut self, reg: usize, check: StackCheckFlag);
    fn pop_register(&mut self, reg: usize);
    fn advance_register(&mut self, reg: usize, by: i32);
    fn set_register(&mut self, reg: usize, to: i32);
    /// Reset registers `from..=to` to the unset sentinel.
    fn clear_registers(&mut self, from: usize, to: usize);
    fn write_stack_pointer_to_register(&mut self, reg: usize);
    fn read_stack_pointer_from_register(&mut self, reg: usize);

    // -- Control transfer --

    fn go_to(&mut self, label: Option<Label>);
    fn if_register_ge(&mut self, reg: usize, comparand: i32, if_ge: Option<Label>);
    fn if_register_lt(&mut self, reg: usize, comparand: i32, if_lt: Option<Label>);
    fn if_register_eq_pos(&mut self, reg: usize, if_eq: Option<Label>);

    // -- Termination --

    /// Report a match. Returns whether the matcher restarts (global mode).
    fn succeed(&mut self) -> bool;
    fn fail(&mut self);

    /// Finalize: emit entry/exit code, resolve labels and hand back the
    /// executable artifact. Call once.
    fn get_code(&mut self, source: &str) -> Result<NativeCode, CompileError>;
}

/// A finalized, executable matcher plus the metadata needed to run it.
///
/// Tables referenced by the code are owned here, outside the code
/// buffer, so relocating the code never moves them.
pub struct NativeCode {
    pub(crate) buffer: CodeBuffer,
    pub(crate) implementation: Implementation,
    pub(crate) mode: Mode,
    pub(crate) global_mode: GlobalMode,
    pub(crate) num_registers: usize,
    pub(crate) num_saved_registers: usize,
    pub(crate) tables: Vec<Box<[u8]>>,
    pub(crate) range_arrays: Vec<Box<[u32]>>,
    pub(crate) source: String,
}

impl NativeCode {
    /// Address of the first instruction; the entry point.
    pub fn base(&self) -> usize {
        self.buffer.base_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.buffer.offset()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.offset() == 0
    }

    /// Whether `addr` points into this code object.
    pub fn contains(&self, addr: usize) -> bool {
        self.buffer.contains(addr)
    }

    pub fn entry(&self) -> NativeEntry {
        // SAFETY: the buffer is executable and starts with the entry jump.
        unsafe { std::mem::transmute::<*const u8, NativeEntry>(self.buffer.base_ptr()) }
    }

    /// Move the code to fresh memory and unmap the old copy.
    /// Returns `(old_base, new_base)`.
    pub fn relocate(&mut self) -> io::Result<(usize, usize)> {
        let old_base = self.base();
        let moved = self.buffer.relocated_copy()?;
        self.buffer = moved;
        Ok((old_base, self.base()))
    }

    pub fn code(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn implementation(&self) -> Implementation {
        self.implementation
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn global_mode(&self) -> GlobalMode {
        self.global_mode
    }

    pub fn num_registers(&self) -> usize {
        self.num_registers
    }

    pub fn num_saved_registers(&self) -> usize {
        self.num_saved_registers
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len() + self.range_arrays.len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for NativeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCode")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len())
            .field("mode", &self.mode)
            .field("global_mode", &self.global_mode)
            .field("num_registers", &self.num_registers)
            .field("num_saved_registers", &self.num_saved_registers)
            .field("source", &self.source)
            .finish()
    }
}

/// Create the native backend for the running host.
pub fn new_native_assembler(
    options: &CompileOptions,
    num_saved_registers: usize,
) -> Result<Box<dyn RegExpMacroAssembler>, CompileError> {
    #[cfg(target_arch = "x86_64")]
    {
        let mut masm = RegExpMacroAssemblerX64::new(options.mode, num_saved_registers)?;
        masm.set_global_mode(options.global_mode);
        if let Some(limit) = options.backtrack_limit {
            masm.set_backtrack_limit(limit, options.can_fallback);
        }
        Ok(Box::new(masm))
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (options, num_saved_registers);
        Err(CompileError::UnsupportedArchitecture)
    }
}

/// Compile `program` into native code for the running host.
pub fn compile(
    program: &Program,
    options: &CompileOptions,
    source: &str,
) -> Result<NativeCode, CompileError> {
    let mut masm = new_native_assembler(options, program.num_saved_registers())?;
    if let Err(e) = translate(program, masm.as_mut()) {
        masm.aborted_code_generation();
        return Err(e);
    }
    masm.get_code(source)
}
