use std::collections::HashSet;

use log::debug;
use rejit_core::frame::FrameSlot;
use rejit_core::runtime::{
    CASE_INSENSITIVE_COMPARE_OFFSET, CHECK_STACK_GUARD_STATE_OFFSET, CODE_BASE_OFFSET,
    COMPARE_UC16, COMPARE_UNICODE, GROW_STACK_OFFSET, INTERRUPT_LIMIT_OFFSET,
    IS_CHARACTER_IN_RANGE_ARRAY_OFFSET, STACK_LIMIT_OFFSET, STACK_MEMORY_TOP_OFFSET,
    STACK_POINTER_OFFSET,
};
use rejit_core::types::{status, MAX_RANGE_ARRAY_SIZE, MAX_REGISTER, TABLE_MASK, TABLE_SIZE};
use rejit_core::{
    CharacterRange, CompileError, GlobalMode, Implementation, Label, LabelTable, Mode, RelocKind,
    StackCheckFlag, StandardCharacterSet,
};

use crate::code_buffer::CodeBuffer;
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{
    frame_layout, saved_register, Reg, BACKTRACK_SP, CALLEE_SAVED, CODE_BASE, CURRENT_CHARACTER,
    CURRENT_POSITION, FRAME_POINTER, INPUT_END, STACK_ALIGN, WORD_SIZE,
};
use crate::{NativeCode, RegExpMacroAssembler};

/// Backtrack entries that may be pushed between two stack limit checks.
pub const STACK_LIMIT_SLACK: usize = 32;

/// Bytes per backtrack stack entry.
const STACK_ENTRY_SIZE: i32 = 4;

/// Register files larger than this are initialized with a loop.
const MAX_UNROLLED_CLEAR: usize = 8;

const POS: Reg = CURRENT_POSITION;
const CHR: Reg = CURRENT_CHARACTER;
const FP: Reg = FRAME_POINTER;

fn slot(s: FrameSlot) -> i32 {
    frame_layout().offset(s)
}

/// Native regexp matcher generator for x86-64 (System V).
///
/// Register roles: `r12` current position (negative offset from the end of
/// input), `r13` current character, `r14` end of input, `rbx` backtrack
/// stack pointer, `r15` start of the code object, `rbp` frame pointer.
///
/// The backtrack stack holds 4-byte entries and grows down. Code addresses
/// on it and on the native stack across runtime calls are stored relative
/// to `r15`, so the code object can move whenever the runtime is entered.
pub struct RegExpMacroAssemblerX64 {
    buf: CodeBuffer,
    labels: LabelTable,
    mode: Mode,
    num_registers: usize,
    num_saved_registers: usize,
    global_mode: GlobalMode,
    backtrack_limit: Option<u32>,
    can_fallback: bool,
    tables: Vec<Box<[u8]>>,
    range_arrays: Vec<Box<[u32]>>,
    /// Targets of every `call` emitted through [`Self::safe_call`].
    safe_call_sites: Vec<Label>,
    /// Labels bound with the relative-return prologue.
    safe_call_targets: HashSet<Label>,
    error: Option<CompileError>,
    aborted: bool,
    finalized: bool,

    entry_label: Label,
    start_label: Label,
    restart_label: Label,
    success_label: Label,
    exit_label: Label,
    return_label: Label,
    backtrack_label: Label,
    fail_label: Label,
    check_preempt_label: Label,
    stack_overflow_label: Label,
    exception_label: Label,
    fallback_label: Label,
}

impl RegExpMacroAssemblerX64 {
    pub fn new(mode: Mode, num_saved_registers: usize) -> Result<Self, CompileError> {
        let mut labels = LabelTable::new();
        let mut masm = Self {
            buf: CodeBuffer::with_default_size()?,
            mode,
            num_registers: num_saved_registers,
            num_saved_registers,
            global_mode: GlobalMode::NotGlobal,
            backtrack_limit: None,
            can_fallback: false,
            tables: Vec::new(),
            range_arrays: Vec::new(),
            safe_call_sites: Vec::new(),
            safe_call_targets: HashSet::new(),
            error: None,
            aborted: false,
            finalized: false,
            entry_label: labels.new_label(),
            start_label: labels.new_label(),
            restart_label: labels.new_label(),
            success_label: labels.new_label(),
            exit_label: labels.new_label(),
            return_label: labels.new_label(),
            backtrack_label: labels.new_label(),
            fail_label: labels.new_label(),
            check_preempt_label: labels.new_label(),
            stack_overflow_label: labels.new_label(),
            exception_label: labels.new_label(),
            fallback_label: labels.new_label(),
            labels,
        };
        if num_saved_registers > MAX_REGISTER {
            masm.record_error(CompileError::RegisterOutOfRange(num_saved_registers));
        }
        // The entry sequence is emitted last, once the register count is
        // known; the first instruction jumps there.
        masm.jmp_to(masm.entry_label);
        masm.bind_label(masm.start_label);
        Ok(masm)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Registers used so far, saved ones included.
    pub fn num_registers(&self) -> usize {
        self.num_registers
    }

    fn record_error(&mut self, e: CompileError) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    fn char_size(&self) -> i32 {
        self.mode.char_size()
    }

    /// Shift that scales a character count to bytes.
    fn char_shift(&self) -> u8 {
        (self.char_size() - 1) as u8
    }

    /// Frame offset of register `reg`, growing the register file as needed.
    fn register_location(&mut self, reg: usize) -> i32 {
        if reg > MAX_REGISTER {
            self.record_error(CompileError::RegisterOutOfRange(reg));
            return frame_layout().register_offset(0);
        }
        if reg >= self.num_registers {
            self.num_registers = reg + 1;
        }
        frame_layout().register_offset(reg)
    }

    // -- Labels and branches --

    fn link(&mut self, label: Label, kind: RelocKind) {
        let offset = self.buf.offset();
        self.buf.emit_u32(0);
        self.labels.add_use(label, offset, kind);
    }

    fn bind_label(&mut self, label: Label) {
        let pos = self.buf.offset();
        for u in self.labels.bind(label, pos) {
            self.buf.patch_u32(u.offset, u.kind.resolve(u.offset, pos));
        }
    }

    fn branch_to(&mut self, branch: Branch, label: Label) {
        match self.labels.pos(label) {
            Some(pos) => emit_branch(&mut self.buf, branch, pos),
            None => {
                emit_branch_opcode(&mut self.buf, branch);
                self.link(label, RelocKind::Rel32);
            }
        }
    }

    fn jmp_to(&mut self, label: Label) {
        self.branch_to(Branch::Jmp, label);
    }

    fn jcc_to(&mut self, cond: X86Cond, label: Label) {
        self.branch_to(Branch::Jcc(cond), label);
    }

    /// Jump to `to` (or backtrack when `None`), conditionally if `cond`.
    fn branch_or_backtrack(&mut self, cond: Option<X86Cond>, to: Option<Label>) {
        let target = to.unwrap_or(self.backtrack_label);
        match cond {
            Some(cond) => self.jcc_to(cond, target),
            None => self.jmp_to(target),
        }
    }

    fn branch(&mut self, cond: X86Cond, to: Option<Label>) {
        self.branch_or_backtrack(Some(cond), to);
    }

    /// Call a stub that converts its return address to a code offset on
    /// entry, so the code may move while the stub runs.
    fn safe_call(&mut self, target: Label) {
        self.safe_call_sites.push(target);
        self.branch_to(Branch::Call, target);
    }

    fn safe_call_target(&mut self, label: Label) {
        self.bind_label(label);
        self.safe_call_targets.insert(label);
        emit_arith_mr(&mut self.buf, ArithOp::Sub, true, Reg::Rsp, 0, CODE_BASE);
    }

    fn safe_return(&mut self) {
        emit_arith_mr(&mut self.buf, ArithOp::Add, true, Reg::Rsp, 0, CODE_BASE);
        emit_ret(&mut self.buf);
    }

    // -- Runtime context and calls --

    fn load_context(&mut self, dst: Reg) {
        emit_load(&mut self.buf, true, dst, FP, slot(FrameSlot::RuntimeContext));
    }

    fn reload_code_base(&mut self) {
        self.load_context(Reg::Rcx);
        emit_load(&mut self.buf, true, CODE_BASE, Reg::Rcx, CODE_BASE_OFFSET);
    }

    /// Align `rsp` for a C call, keeping the old value in the new slot.
    /// Arguments are set up afterwards.
    fn prepare_runtime_call(&mut self) {
        let b = &mut self.buf;
        emit_mov_rr(b, true, Reg::R10, Reg::Rsp);
        emit_arith_ri(b, ArithOp::Sub, true, Reg::Rsp, WORD_SIZE);
        emit_arith_ri(b, ArithOp::And, true, Reg::Rsp, -STACK_ALIGN);
        emit_store(b, true, Reg::R10, Reg::Rsp, 0);
    }

    /// Call the runtime function stored at `fn_offset` in the context and
    /// restore `rsp`. Result in `rax`; caller-saved registers are lost.
    fn call_runtime(&mut self, fn_offset: i32) {
        self.load_context(Reg::Rax);
        emit_call_mem(&mut self.buf, Reg::Rax, fn_offset);
        emit_load(&mut self.buf, true, Reg::Rsp, Reg::Rsp, 0);
    }

    fn check_preemption(&mut self) {
        let no_preempt = self.labels.new_label();
        self.load_context(Reg::Rax);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rsp, Reg::Rax, INTERRUPT_LIMIT_OFFSET);
        self.jcc_to(X86Cond::Ja, no_preempt);
        self.safe_call(self.check_preempt_label);
        self.bind_label(no_preempt);
    }

    fn check_stack_limit(&mut self) {
        let no_overflow = self.labels.new_label();
        self.load_context(Reg::Rax);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, BACKTRACK_SP, Reg::Rax, STACK_LIMIT_OFFSET);
        self.jcc_to(X86Cond::Ja, no_overflow);
        self.safe_call(self.stack_overflow_label);
        self.bind_label(no_overflow);
    }

    // -- Backtrack stack --

    fn push_reg(&mut self, src: Reg) {
        emit_arith_ri(&mut self.buf, ArithOp::Sub, true, BACKTRACK_SP, STACK_ENTRY_SIZE);
        emit_store(&mut self.buf, false, src, BACKTRACK_SP, 0);
    }

    /// Push the code offset of `label`.
    fn push_label(&mut self, label: Label) {
        emit_arith_ri(&mut self.buf, ArithOp::Sub, true, BACKTRACK_SP, STACK_ENTRY_SIZE);
        let known = self.labels.pos(label);
        emit_store_imm(&mut self.buf, false, BACKTRACK_SP, 0, known.unwrap_or(0) as i32);
        if known.is_none() {
            let imm = self.buf.offset() - 4;
            self.labels.add_use(label, imm, RelocKind::CodeOffset32);
        }
    }

    /// Pop a sign-extended entry into `dst`.
    fn pop_reg(&mut self, dst: Reg) {
        emit_load_sx(&mut self.buf, OPC_MOVSLQ, dst, BACKTRACK_SP, 0);
        self.drop_entry();
    }

    fn drop_entry(&mut self) {
        emit_arith_ri(&mut self.buf, ArithOp::Add, true, BACKTRACK_SP, STACK_ENTRY_SIZE);
    }

    /// `dst = stack_memory_top + stack base offset`: the empty stack.
    fn load_stack_base(&mut self, dst: Reg) {
        self.load_context(dst);
        emit_load(&mut self.buf, true, dst, dst, STACK_MEMORY_TOP_OFFSET);
        emit_arith_rm(&mut self.buf, ArithOp::Add, true, dst, FP, slot(FrameSlot::StackBasePointer));
    }

    // -- Character helpers --

    fn range_test(&mut self, from: u32, to: u32) {
        emit_lea(&mut self.buf, false, Reg::Rax, CHR, from.wrapping_neg() as i32);
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, to.wrapping_sub(from) as i32);
    }

    /// Call the range-array lookup, leaving non-zero in `rax` when the
    /// current character is inside one of `ranges`.
    fn call_range_array_lookup(&mut self, ranges: &[CharacterRange]) -> bool {
        if ranges.len() > MAX_RANGE_ARRAY_SIZE {
            return false;
        }
        let boundaries: Box<[u32]> = ranges
            .iter()
            .flat_map(|r| [r.from, r.to.saturating_add(1)])
            .collect();
        let ptr = boundaries.as_ptr() as u64;
        let len = boundaries.len() as u64;
        self.range_arrays.push(boundaries);

        self.prepare_runtime_call();
        emit_mov_rr(&mut self.buf, false, Reg::Rdi, CHR);
        emit_mov_ri(&mut self.buf, true, Reg::Rsi, ptr);
        emit_mov_ri(&mut self.buf, true, Reg::Rdx, len);
        self.call_runtime(IS_CHARACTER_IN_RANGE_ARRAY_OFFSET);
        self.reload_code_base();
        emit_test_rr(&mut self.buf, true, Reg::Rax, Reg::Rax);
        true
    }

    /// `rdx = start`, `rax = end - start` of capture `start_reg`; jumps to
    /// `empty` for a zero-length capture.
    fn load_capture_length(&mut self, start_reg: usize, empty: Label) {
        let start = self.register_location(start_reg);
        let end = self.register_location(start_reg + 1);
        emit_load(&mut self.buf, true, Reg::Rdx, FP, start);
        emit_load(&mut self.buf, true, Reg::Rax, FP, end);
        emit_arith_rr(&mut self.buf, ArithOp::Sub, true, Reg::Rax, Reg::Rdx);
        self.jcc_to(X86Cond::Je, empty);
    }

    /// Branch to `on_no_match` unless `rax` bytes fit before (backward) or
    /// after the current position.
    fn check_capture_fits(&mut self, read_backward: bool, on_no_match: Option<Label>) {
        if read_backward {
            emit_load(&mut self.buf, true, Reg::Rcx, FP, slot(FrameSlot::StringStartMinusOne));
            emit_arith_rr(&mut self.buf, ArithOp::Add, true, Reg::Rcx, Reg::Rax);
            emit_arith_rr(&mut self.buf, ArithOp::Cmp, true, POS, Reg::Rcx);
            self.branch(X86Cond::Jle, on_no_match);
        } else {
            emit_mov_rr(&mut self.buf, true, Reg::Rcx, POS);
            emit_arith_rr(&mut self.buf, ArithOp::Add, true, Reg::Rcx, Reg::Rax);
            self.branch(X86Cond::Jg, on_no_match);
        }
    }

    /// Move the position over capture `start_reg` after a successful
    /// comparison.
    fn skip_capture(&mut self, start_reg: usize, read_backward: bool) {
        let start = self.register_location(start_reg);
        let end = self.register_location(start_reg + 1);
        emit_load(&mut self.buf, true, Reg::Rax, FP, end);
        emit_arith_rm(&mut self.buf, ArithOp::Sub, true, Reg::Rax, FP, start);
        let op = if read_backward { ArithOp::Sub } else { ArithOp::Add };
        emit_arith_rr(&mut self.buf, op, true, POS, Reg::Rax);
    }

    /// Store `rax` into every register.
    fn fill_registers(&mut self) {
        let n = self.num_registers;
        if n == 0 {
            return;
        }
        if n <= MAX_UNROLLED_CLEAR {
            for i in 0..n {
                let loc = frame_layout().register_offset(i);
                emit_store(&mut self.buf, true, Reg::Rax, FP, loc);
            }
            return;
        }
        let lp = self.labels.new_label();
        let first = frame_layout().register_offset(0);
        emit_lea(&mut self.buf, true, Reg::Rcx, FP, first);
        emit_mov_ri(&mut self.buf, false, Reg::Rdx, n as u64);
        self.bind_label(lp);
        emit_store(&mut self.buf, true, Reg::Rax, Reg::Rcx, 0);
        emit_arith_ri(&mut self.buf, ArithOp::Sub, true, Reg::Rcx, WORD_SIZE);
        emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rdx, 1);
        self.jcc_to(X86Cond::Jne, lp);
    }

    // -- Fixed code emitted by get_code --

    fn emit_entry(&mut self) {
        let cs = self.char_size();
        let shift = self.char_shift();
        self.bind_label(self.entry_label);

        emit_push(&mut self.buf, Reg::Rbp);
        emit_mov_rr(&mut self.buf, true, Reg::Rbp, Reg::Rsp);
        for &s in frame_layout().slots_below() {
            match saved_register(s) {
                Some(r) => emit_push(&mut self.buf, r),
                None => emit_push_imm(&mut self.buf, 0),
            }
        }
        let file = frame_layout().register_file_size(self.num_registers);
        if file > 0 {
            emit_arith_ri(&mut self.buf, ArithOp::Sub, true, Reg::Rsp, file as i32);
        }

        // Code base and backtrack stack. The stack base is kept as an
        // offset from the top of stack memory, which moves when it grows.
        self.load_context(Reg::Rax);
        emit_load(&mut self.buf, true, CODE_BASE, Reg::Rax, CODE_BASE_OFFSET);
        emit_load(&mut self.buf, true, BACKTRACK_SP, Reg::Rax, STACK_POINTER_OFFSET);
        emit_mov_rr(&mut self.buf, true, Reg::Rcx, BACKTRACK_SP);
        emit_arith_rm(&mut self.buf, ArithOp::Sub, true, Reg::Rcx, Reg::Rax, STACK_MEMORY_TOP_OFFSET);
        emit_store(&mut self.buf, true, Reg::Rcx, FP, slot(FrameSlot::StackBasePointer));

        self.check_preemption();

        emit_load(&mut self.buf, true, INPUT_END, FP, slot(FrameSlot::InputEnd));
        emit_load(&mut self.buf, true, POS, FP, slot(FrameSlot::InputStart));
        emit_arith_rr(&mut self.buf, ArithOp::Sub, true, POS, INPUT_END);

        // Position of the character before the string start; doubles as
        // the "unset" register value.
        emit_load(&mut self.buf, true, Reg::Rcx, FP, slot(FrameSlot::StartIndex));
        emit_neg(&mut self.buf, true, Reg::Rcx);
        emit_lea_sib(&mut self.buf, true, Reg::Rax, POS, Reg::Rcx, shift, -cs);
        emit_store(&mut self.buf, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));

        // Global matching restarts here. Preload the previous character for
        // lookbehind-style tests; at the start of the string it reads as a
        // newline.
        self.bind_label(self.restart_label);
        let at_start = self.labels.new_label();
        let loaded = self.labels.new_label();
        emit_lea(&mut self.buf, true, Reg::Rax, POS, -cs);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));
        self.jcc_to(X86Cond::Je, at_start);
        self.load_current_character_unchecked(-1, 1);
        self.jmp_to(loaded);
        self.bind_label(at_start);
        emit_mov_ri(&mut self.buf, false, CHR, u64::from(b'\n'));
        self.bind_label(loaded);

        emit_load(&mut self.buf, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));
        self.fill_registers();
        self.jmp_to(self.start_label);
    }

    fn emit_success(&mut self) {
        let cs = self.char_size();
        let shift = self.char_shift();
        let saved = self.num_saved_registers;
        let zero_length_check =
            matches!(self.global_mode, GlobalMode::Global | GlobalMode::GlobalUnicode);
        self.bind_label(self.success_label);

        if saved > 0 {
            // rcx = byte length of the input before the start position,
            // turning register values into indices from the string start.
            emit_load(&mut self.buf, true, Reg::Rcx, FP, slot(FrameSlot::InputEnd));
            emit_arith_rm(&mut self.buf, ArithOp::Sub, true, Reg::Rcx, FP, slot(FrameSlot::InputStart));
            emit_load(&mut self.buf, true, Reg::Rax, FP, slot(FrameSlot::StartIndex));
            emit_lea_sib(&mut self.buf, true, Reg::Rcx, Reg::Rcx, Reg::Rax, shift, 0);
            emit_load(&mut self.buf, true, Reg::R8, FP, slot(FrameSlot::Output));
            for i in 0..saved {
                let loc = frame_layout().register_offset(i);
                emit_load(&mut self.buf, true, Reg::Rax, FP, loc);
                if i == 0 && zero_length_check {
                    emit_mov_rr(&mut self.buf, true, Reg::Rdx, Reg::Rax);
                }
                emit_arith_rr(&mut self.buf, ArithOp::Add, true, Reg::Rax, Reg::Rcx);
                if cs == 2 {
                    emit_shift_ri(&mut self.buf, ShiftOp::Sar, true, Reg::Rax, 1);
                }
                emit_store(&mut self.buf, false, Reg::Rax, Reg::R8, (i * 4) as i32);
            }
        }

        if !self.global_mode.is_global() {
            emit_mov_ri(&mut self.buf, false, Reg::Rax, status::SUCCESS as u64);
            self.jmp_to(self.return_label);
            return;
        }

        let saved = saved as i32;
        emit_inc_m(&mut self.buf, true, FP, slot(FrameSlot::SuccessfulCaptures));
        // Stop once the output cannot hold another match.
        emit_load(&mut self.buf, true, Reg::Rcx, FP, slot(FrameSlot::NumOutputRegisters));
        emit_arith_ri(&mut self.buf, ArithOp::Sub, true, Reg::Rcx, saved);
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, true, Reg::Rcx, saved);
        self.jcc_to(X86Cond::Jl, self.exit_label);
        emit_store(&mut self.buf, true, Reg::Rcx, FP, slot(FrameSlot::NumOutputRegisters));
        emit_arith_mi(&mut self.buf, ArithOp::Add, true, FP, slot(FrameSlot::Output), saved * 4);

        self.load_stack_base(BACKTRACK_SP);

        if zero_length_check {
            // An empty match must not be found again at the same place.
            let reload = self.labels.new_label();
            emit_arith_rr(&mut self.buf, ArithOp::Cmp, true, POS, Reg::Rdx);
            self.jcc_to(X86Cond::Jne, reload);
            emit_test_rr(&mut self.buf, true, POS, POS);
            self.jcc_to(X86Cond::Je, self.exit_label);
            let advance = self.labels.new_label();
            self.bind_label(advance);
            emit_arith_ri(&mut self.buf, ArithOp::Add, true, POS, cs);
            if self.global_mode == GlobalMode::GlobalUnicode && self.mode == Mode::Uc16 {
                // Never restart between the halves of a surrogate pair.
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, true, POS, 0);
                self.jcc_to(X86Cond::Jge, reload);
                emit_load_zx_sib(&mut self.buf, OPC_MOVZWL, Reg::Rax, INPUT_END, POS, -cs);
                emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rax, 0xD800);
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, 0x3FF);
                self.jcc_to(X86Cond::Ja, reload);
                emit_load_zx_sib(&mut self.buf, OPC_MOVZWL, Reg::Rax, INPUT_END, POS, 0);
                emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rax, 0xDC00);
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, 0x3FF);
                self.jcc_to(X86Cond::Jbe, advance);
            }
            self.bind_label(reload);
        }

        self.jmp_to(self.restart_label);
    }

    fn emit_exit(&mut self) {
        self.bind_label(self.exit_label);
        if self.global_mode.is_global() {
            emit_load(&mut self.buf, true, Reg::Rax, FP, slot(FrameSlot::SuccessfulCaptures));
        }
        self.bind_label(self.return_label);
        let last_saved = CALLEE_SAVED[CALLEE_SAVED.len() - 1];
        emit_lea(&mut self.buf, true, Reg::Rsp, FP, slot(FrameSlot::CalleeSaved(last_saved as u8)));
        for &r in CALLEE_SAVED.iter().rev() {
            emit_pop(&mut self.buf, r);
        }
        emit_mov_rr(&mut self.buf, true, Reg::Rsp, Reg::Rbp);
        emit_pop(&mut self.buf, Reg::Rbp);
        emit_ret(&mut self.buf);
    }

    fn emit_backtrack(&mut self) {
        self.bind_label(self.backtrack_label);
        self.check_preemption();
        if let Some(limit) = self.backtrack_limit {
            let within = self.labels.new_label();
            let count = slot(FrameSlot::BacktrackCount);
            emit_inc_m(&mut self.buf, true, FP, count);
            emit_arith_mi(&mut self.buf, ArithOp::Cmp, true, FP, count, limit as i32);
            self.jcc_to(X86Cond::Jle, within);
            if self.can_fallback {
                self.jmp_to(self.fallback_label);
            } else {
                self.jmp_to(self.fail_label);
            }
            self.bind_label(within);
        }
        // Nothing left to try: the match fails.
        self.load_stack_base(Reg::Rcx);
        emit_arith_rr(&mut self.buf, ArithOp::Cmp, true, BACKTRACK_SP, Reg::Rcx);
        self.jcc_to(X86Cond::Jae, self.fail_label);
        self.pop_reg(Reg::Rax);
        emit_arith_rr(&mut self.buf, ArithOp::Add, true, Reg::Rax, CODE_BASE);
        emit_jmp_reg(&mut self.buf, Reg::Rax);
    }

    fn emit_fail(&mut self) {
        self.bind_label(self.fail_label);
        emit_mov_ri(&mut self.buf, false, Reg::Rax, status::FAILURE as u64);
        self.jmp_to(self.exit_label);
    }

    /// Runtime check for interrupts and native stack exhaustion. The
    /// runtime may move the code; r15 is reloaded before returning.
    fn emit_check_preempt(&mut self) {
        self.safe_call_target(self.check_preempt_label);
        self.load_context(Reg::Rax);
        emit_store(&mut self.buf, true, BACKTRACK_SP, Reg::Rax, STACK_POINTER_OFFSET);
        self.prepare_runtime_call();
        // The callee's return address lands just below the aligned slot.
        emit_lea(&mut self.buf, true, Reg::Rdi, Reg::Rsp, -WORD_SIZE);
        emit_mov_rr(&mut self.buf, true, Reg::Rsi, CODE_BASE);
        emit_mov_rr(&mut self.buf, true, Reg::Rdx, FP);
        self.call_runtime(CHECK_STACK_GUARD_STATE_OFFSET);
        emit_test_rr(&mut self.buf, true, Reg::Rax, Reg::Rax);
        self.jcc_to(X86Cond::Jne, self.return_label);
        self.load_context(Reg::Rcx);
        emit_load(&mut self.buf, true, CODE_BASE, Reg::Rcx, CODE_BASE_OFFSET);
        emit_load(&mut self.buf, true, BACKTRACK_SP, Reg::Rcx, STACK_POINTER_OFFSET);
        self.safe_return();
    }

    fn emit_stack_overflow(&mut self) {
        self.safe_call_target(self.stack_overflow_label);
        self.load_context(Reg::Rax);
        emit_store(&mut self.buf, true, BACKTRACK_SP, Reg::Rax, STACK_POINTER_OFFSET);
        self.prepare_runtime_call();
        self.load_context(Reg::Rdi);
        self.call_runtime(GROW_STACK_OFFSET);
        emit_test_rr(&mut self.buf, true, Reg::Rax, Reg::Rax);
        self.jcc_to(X86Cond::Je, self.exception_label);
        emit_mov_rr(&mut self.buf, true, BACKTRACK_SP, Reg::Rax);
        self.reload_code_base();
        self.safe_return();
    }

    fn emit_status_exit(&mut self, label: Label, code: i64) {
        self.bind_label(label);
        emit_mov_ri(&mut self.buf, true, Reg::Rax, code as u64);
        self.jmp_to(self.return_label);
    }

    fn verify(&self) -> Result<(), CompileError> {
        if let Some(l) = self.labels.first_unresolved() {
            return Err(CompileError::UnboundLabel(l.0));
        }
        if let Some(l) = self
            .safe_call_sites
            .iter()
            .find(|&&l| !self.safe_call_targets.contains(&l))
        {
            return Err(CompileError::RelocationSafetyViolation(format!(
                "call to label {} without a relative-return prologue",
                l.0
            )));
        }
        Ok(())
    }
}

impl RegExpMacroAssembler for RegExpMacroAssemblerX64 {
    fn implementation(&self) -> Implementation {
        Implementation::X64
    }

    fn stack_limit_slack(&self) -> usize {
        STACK_LIMIT_SLACK
    }

    fn new_label(&mut self) -> Label {
        self.labels.new_label()
    }

    fn bind(&mut self, label: Label) {
        if self.labels.is_bound(label) {
            self.record_error(CompileError::LabelRebound(label.0));
            return;
        }
        self.bind_label(label);
    }

    fn aborted_code_generation(&mut self) {
        self.aborted = true;
        self.labels.clear_uses();
    }

    fn set_global_mode(&mut self, mode: GlobalMode) {
        self.global_mode = mode;
    }

    fn set_backtrack_limit(&mut self, limit: u32, can_fallback: bool) {
        self.backtrack_limit = Some(limit.min(i32::MAX as u32));
        self.can_fallback = can_fallback;
    }

    fn advance_current_position(&mut self, by: i32) {
        if by != 0 {
            let bytes = by * self.char_size();
            emit_arith_ri(&mut self.buf, ArithOp::Add, true, POS, bytes);
        }
    }

    fn read_current_position_from_register(&mut self, reg: usize) {
        let loc = self.register_location(reg);
        emit_load(&mut self.buf, true, POS, FP, loc);
    }

    fn write_current_position_to_register(&mut self, reg: usize, cp_offset: i32) {
        let loc = self.register_location(reg);
        if cp_offset == 0 {
            emit_store(&mut self.buf, true, POS, FP, loc);
        } else {
            let bytes = cp_offset * self.char_size();
            emit_lea(&mut self.buf, true, Reg::Rax, POS, bytes);
            emit_store(&mut self.buf, true, Reg::Rax, FP, loc);
        }
    }

    fn set_current_position_from_end(&mut self, by: i32) {
        let after = self.labels.new_label();
        let limit = -by * self.char_size();
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, true, POS, limit);
        self.jcc_to(X86Cond::Jge, after);
        emit_mov_ri(&mut self.buf, true, POS, limit as i64 as u64);
        // Reload the character before the new position.
        self.load_current_character_unchecked(-1, 1);
        self.bind_label(after);
    }

    fn load_current_character_unchecked(&mut self, cp_offset: i32, characters: usize) {
        let off = cp_offset * self.char_size();
        match (self.mode, characters) {
            (Mode::Latin1, 1) => emit_load_zx_sib(&mut self.buf, OPC_MOVZBL, CHR, INPUT_END, POS, off),
            (Mode::Latin1, 2) | (Mode::Uc16, 1) => {
                emit_load_zx_sib(&mut self.buf, OPC_MOVZWL, CHR, INPUT_END, POS, off)
            }
            (Mode::Latin1, 4) | (Mode::Uc16, 2) => {
                emit_load_sib(&mut self.buf, false, CHR, INPUT_END, POS, 0, off)
            }
            _ => self.record_error(CompileError::Unsupported(format!(
                "loading {} characters at once in {:?} mode",
                characters, self.mode
            ))),
        }
    }

    fn check_character(&mut self, c: u32, on_equal: Option<Label>) {
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, c as i32);
        self.branch(X86Cond::Je, on_equal);
    }

    fn check_not_character(&mut self, c: u32, on_not_equal: Option<Label>) {
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, c as i32);
        self.branch(X86Cond::Jne, on_not_equal);
    }

    fn check_character_after_and(&mut self, c: u32, mask: u32, on_equal: Option<Label>) {
        if c == 0 {
            emit_test_ri(&mut self.buf, false, CHR, mask);
        } else {
            emit_mov_rr(&mut self.buf, false, Reg::Rax, CHR);
            emit_arith_ri(&mut self.buf, ArithOp::And, false, Reg::Rax, mask as i32);
            emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, c as i32);
        }
        self.branch(X86Cond::Je, on_equal);
    }

    fn check_not_character_after_and(&mut self, c: u32, mask: u32, on_not_equal: Option<Label>) {
        if c == 0 {
            emit_test_ri(&mut self.buf, false, CHR, mask);
        } else {
            emit_mov_rr(&mut self.buf, false, Reg::Rax, CHR);
            emit_arith_ri(&mut self.buf, ArithOp::And, false, Reg::Rax, mask as i32);
            emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, c as i32);
        }
        self.branch(X86Cond::Jne, on_not_equal);
    }

    fn check_not_character_after_minus_and(
        &mut self,
        c: u32,
        minus: u32,
        mask: u32,
        on_not_equal: Option<Label>,
    ) {
        emit_lea(&mut self.buf, false, Reg::Rax, CHR, minus.wrapping_neg() as i32);
        emit_arith_ri(&mut self.buf, ArithOp::And, false, Reg::Rax, mask as i32);
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, c as i32);
        self.branch(X86Cond::Jne, on_not_equal);
    }

    fn check_character_gt(&mut self, limit: u32, on_greater: Option<Label>) {
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, limit as i32);
        self.branch(X86Cond::Ja, on_greater);
    }

    fn check_character_lt(&mut self, limit: u32, on_less: Option<Label>) {
        emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, limit as i32);
        self.branch(X86Cond::Jb, on_less);
    }

    fn check_character_in_range(&mut self, from: u32, to: u32, on_in_range: Option<Label>) {
        self.range_test(from, to);
        self.branch(X86Cond::Jbe, on_in_range);
    }

    fn check_character_not_in_range(&mut self, from: u32, to: u32, on_not_in_range: Option<Label>) {
        self.range_test(from, to);
        self.branch(X86Cond::Ja, on_not_in_range);
    }

    fn check_character_in_range_array(
        &mut self,
        ranges: &[CharacterRange],
        on_in_range: Option<Label>,
    ) -> bool {
        if !self.call_range_array_lookup(ranges) {
            return false;
        }
        self.branch(X86Cond::Jne, on_in_range);
        true
    }

    fn check_character_not_in_range_array(
        &mut self,
        ranges: &[CharacterRange],
        on_not_in_range: Option<Label>,
    ) -> bool {
        if !self.call_range_array_lookup(ranges) {
            return false;
        }
        self.branch(X86Cond::Je, on_not_in_range);
        true
    }

    fn check_bit_in_table(&mut self, table: &[u8; TABLE_SIZE], on_bit_set: Option<Label>) {
        let table: Box<[u8]> = Box::new(*table);
        let ptr = table.as_ptr() as u64;
        self.tables.push(table);
        emit_mov_ri(&mut self.buf, true, Reg::Rax, ptr);
        emit_mov_rr(&mut self.buf, false, Reg::Rcx, CHR);
        emit_arith_ri(&mut self.buf, ArithOp::And, false, Reg::Rcx, TABLE_MASK as i32);
        emit_load_zx_sib(&mut self.buf, OPC_MOVZBL, Reg::Rax, Reg::Rax, Reg::Rcx, 0);
        emit_test_rr(&mut self.buf, false, Reg::Rax, Reg::Rax);
        self.branch(X86Cond::Jne, on_bit_set);
    }

    fn check_special_class_ranges(
        &mut self,
        set: StandardCharacterSet,
        on_no_match: Option<Label>,
    ) -> bool {
        use StandardCharacterSet as S;
        let latin1 = self.mode == Mode::Latin1;
        match set {
            S::Whitespace | S::NotWhitespace if !latin1 => false,
            S::Whitespace => {
                // \t \n \v \f \r, space and no-break space.
                let matched = self.labels.new_label();
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, ' ' as i32);
                self.jcc_to(X86Cond::Je, matched);
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, 0xA0);
                self.jcc_to(X86Cond::Je, matched);
                self.range_test('\t' as u32, '\r' as u32);
                self.branch(X86Cond::Ja, on_no_match);
                self.bind_label(matched);
                true
            }
            S::NotWhitespace => {
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, ' ' as i32);
                self.branch(X86Cond::Je, on_no_match);
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, 0xA0);
                self.branch(X86Cond::Je, on_no_match);
                self.range_test('\t' as u32, '\r' as u32);
                self.branch(X86Cond::Jbe, on_no_match);
                true
            }
            S::Digit => {
                self.range_test('0' as u32, '9' as u32);
                self.branch(X86Cond::Ja, on_no_match);
                true
            }
            S::NotDigit => {
                self.range_test('0' as u32, '9' as u32);
                self.branch(X86Cond::Jbe, on_no_match);
                true
            }
            S::Word | S::NotWord => {
                let mut table = [0u8; TABLE_SIZE];
                for c in (b'0'..=b'9').chain(b'A'..=b'Z').chain(b'a'..=b'z').chain([b'_']) {
                    table[c as usize] = 1;
                }
                let table: Box<[u8]> = Box::new(table);
                let ptr = table.as_ptr() as u64;
                self.tables.push(table);
                if set == S::Word {
                    emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, 'z' as i32);
                    self.branch(X86Cond::Ja, on_no_match);
                }
                let done = self.labels.new_label();
                if set == S::NotWord {
                    emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, CHR, 'z' as i32);
                    self.jcc_to(X86Cond::Ja, done);
                }
                emit_mov_ri(&mut self.buf, true, Reg::Rax, ptr);
                emit_load_zx_sib(&mut self.buf, OPC_MOVZBL, Reg::Rax, Reg::Rax, CHR, 0);
                emit_test_rr(&mut self.buf, false, Reg::Rax, Reg::Rax);
                let cond = if set == S::Word { X86Cond::Je } else { X86Cond::Jne };
                self.branch(cond, on_no_match);
                self.bind_label(done);
                true
            }
            S::LineTerminator => {
                // \n \r, plus U+2028 and U+2029 outside Latin-1.
                let matched = self.labels.new_label();
                emit_mov_rr(&mut self.buf, false, Reg::Rax, CHR);
                emit_arith_ri(&mut self.buf, ArithOp::Xor, false, Reg::Rax, 0x01);
                emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rax, 0x0B);
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, 0x0C - 0x0B);
                if latin1 {
                    self.branch(X86Cond::Ja, on_no_match);
                } else {
                    self.jcc_to(X86Cond::Jbe, matched);
                    emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rax, 0x2028 - 0x0B);
                    emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, 1);
                    self.branch(X86Cond::Ja, on_no_match);
                }
                self.bind_label(matched);
                true
            }
            S::NotLineTerminator => {
                emit_mov_rr(&mut self.buf, false, Reg::Rax, CHR);
                emit_arith_ri(&mut self.buf, ArithOp::Xor, false, Reg::Rax, 0x01);
                emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rax, 0x0B);
                emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, 0x0C - 0x0B);
                self.branch(X86Cond::Jbe, on_no_match);
                if !latin1 {
                    emit_arith_ri(&mut self.buf, ArithOp::Sub, false, Reg::Rax, 0x2028 - 0x0B);
                    emit_arith_ri(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, 1);
                    self.branch(X86Cond::Jbe, on_no_match);
                }
                true
            }
            S::Everything => true,
        }
    }

    fn check_at_start(&mut self, cp_offset: i32, on_at_start: Option<Label>) {
        let bytes = (cp_offset - 1) * self.char_size();
        emit_lea(&mut self.buf, true, Reg::Rax, POS, bytes);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));
        self.branch(X86Cond::Je, on_at_start);
    }

    fn check_not_at_start(&mut self, cp_offset: i32, on_not_at_start: Option<Label>) {
        let bytes = (cp_offset - 1) * self.char_size();
        emit_lea(&mut self.buf, true, Reg::Rax, POS, bytes);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));
        self.branch(X86Cond::Jne, on_not_at_start);
    }

    fn check_position(&mut self, cp_offset: i32, on_outside_input: Option<Label>) {
        let bytes = cp_offset * self.char_size();
        if cp_offset >= 0 {
            emit_arith_ri(&mut self.buf, ArithOp::Cmp, true, POS, -bytes);
            self.branch(X86Cond::Jge, on_outside_input);
        } else {
            emit_lea(&mut self.buf, true, Reg::Rax, POS, bytes);
            emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));
            self.branch(X86Cond::Jle, on_outside_input);
        }
    }

    fn check_greedy_loop(&mut self, on_tos_equals_current_position: Option<Label>) {
        let fallthrough = self.labels.new_label();
        // An empty stack has no top to compare against.
        self.load_stack_base(Reg::Rcx);
        emit_arith_rr(&mut self.buf, ArithOp::Cmp, true, BACKTRACK_SP, Reg::Rcx);
        self.jcc_to(X86Cond::Jae, fallthrough);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, false, POS, BACKTRACK_SP, 0);
        self.jcc_to(X86Cond::Jne, fallthrough);
        self.drop_entry();
        self.branch_or_backtrack(None, on_tos_equals_current_position);
        self.bind_label(fallthrough);
    }

    fn check_not_back_reference(
        &mut self,
        start_reg: usize,
        read_backward: bool,
        on_no_match: Option<Label>,
    ) {
        let cs = self.char_size();
        let fallthrough = self.labels.new_label();
        let lp = self.labels.new_label();
        self.load_capture_length(start_reg, fallthrough);
        self.check_capture_fits(read_backward, on_no_match);

        // r8 walks the subject, rdx the capture, r9 is the capture end.
        emit_lea_sib(&mut self.buf, true, Reg::R8, INPUT_END, POS, 0, 0);
        if read_backward {
            emit_arith_rr(&mut self.buf, ArithOp::Sub, true, Reg::R8, Reg::Rax);
        }
        emit_arith_rr(&mut self.buf, ArithOp::Add, true, Reg::Rdx, INPUT_END);
        emit_lea_sib(&mut self.buf, true, Reg::R9, Reg::Rdx, Reg::Rax, 0, 0);

        self.bind_label(lp);
        let load = if self.mode == Mode::Latin1 { OPC_MOVZBL } else { OPC_MOVZWL };
        emit_load_zx(&mut self.buf, load, Reg::Rax, Reg::Rdx, 0);
        emit_load_zx(&mut self.buf, load, Reg::Rcx, Reg::R8, 0);
        emit_arith_rr(&mut self.buf, ArithOp::Cmp, false, Reg::Rax, Reg::Rcx);
        self.branch(X86Cond::Jne, on_no_match);
        emit_arith_ri(&mut self.buf, ArithOp::Add, true, Reg::R8, cs);
        emit_arith_ri(&mut self.buf, ArithOp::Add, true, Reg::Rdx, cs);
        emit_arith_rr(&mut self.buf, ArithOp::Cmp, true, Reg::Rdx, Reg::R9);
        self.jcc_to(X86Cond::Jb, lp);

        if read_backward {
            self.skip_capture(start_reg, true);
        } else {
            emit_mov_rr(&mut self.buf, true, POS, Reg::R8);
            emit_arith_rr(&mut self.buf, ArithOp::Sub, true, POS, INPUT_END);
        }
        self.bind_label(fallthrough);
    }

    fn check_not_back_reference_ignore_case(
        &mut self,
        start_reg: usize,
        read_backward: bool,
        unicode: bool,
        on_no_match: Option<Label>,
    ) {
        let fallthrough = self.labels.new_label();
        self.load_capture_length(start_reg, fallthrough);
        self.check_capture_fits(read_backward, on_no_match);

        let mut flags = 0;
        if self.mode == Mode::Uc16 {
            flags |= COMPARE_UC16;
        }
        if unicode {
            flags |= COMPARE_UNICODE;
        }
        self.prepare_runtime_call();
        emit_lea_sib(&mut self.buf, true, Reg::Rdi, INPUT_END, Reg::Rdx, 0, 0);
        emit_lea_sib(&mut self.buf, true, Reg::Rsi, INPUT_END, POS, 0, 0);
        if read_backward {
            emit_arith_rr(&mut self.buf, ArithOp::Sub, true, Reg::Rsi, Reg::Rax);
        }
        emit_mov_rr(&mut self.buf, true, Reg::Rdx, Reg::Rax);
        emit_mov_ri(&mut self.buf, false, Reg::Rcx, u64::from(flags));
        self.call_runtime(CASE_INSENSITIVE_COMPARE_OFFSET);
        self.reload_code_base();
        emit_test_rr(&mut self.buf, true, Reg::Rax, Reg::Rax);
        self.branch(X86Cond::Je, on_no_match);
        self.skip_capture(start_reg, read_backward);
        self.bind_label(fallthrough);
    }

    fn push_backtrack(&mut self, label: Label) {
        self.push_label(label);
        self.check_stack_limit();
    }

    fn backtrack(&mut self) {
        self.jmp_to(self.backtrack_label);
    }

    fn push_current_position(&mut self) {
        self.push_reg(POS);
        self.check_stack_limit();
    }

    fn pop_current_position(&mut self) {
        self.pop_reg(POS);
    }

    fn push_register(&mut self, reg: usize, check: StackCheckFlag) {
        let loc = self.register_location(reg);
        emit_load(&mut self.buf, true, Reg::Rax, FP, loc);
        self.push_reg(Reg::Rax);
        if check == StackCheckFlag::CheckStackLimit {
            self.check_stack_limit();
        }
    }

    fn pop_register(&mut self, reg: usize) {
        let loc = self.register_location(reg);
        self.pop_reg(Reg::Rax);
        emit_store(&mut self.buf, true, Reg::Rax, FP, loc);
    }

    fn advance_register(&mut self, reg: usize, by: i32) {
        let loc = self.register_location(reg);
        if by != 0 {
            emit_arith_mi(&mut self.buf, ArithOp::Add, true, FP, loc, by);
        }
    }

    fn set_register(&mut self, reg: usize, to: i32) {
        let loc = self.register_location(reg);
        emit_store_imm(&mut self.buf, true, FP, loc, to);
    }

    fn clear_registers(&mut self, from: usize, to: usize) {
        emit_load(&mut self.buf, true, Reg::Rax, FP, slot(FrameSlot::StringStartMinusOne));
        for reg in from..=to {
            let loc = self.register_location(reg);
            emit_store(&mut self.buf, true, Reg::Rax, FP, loc);
        }
    }

    fn write_stack_pointer_to_register(&mut self, reg: usize) {
        let loc = self.register_location(reg);
        self.load_context(Reg::Rax);
        emit_mov_rr(&mut self.buf, true, Reg::Rcx, BACKTRACK_SP);
        emit_arith_rm(&mut self.buf, ArithOp::Sub, true, Reg::Rcx, Reg::Rax, STACK_MEMORY_TOP_OFFSET);
        emit_store(&mut self.buf, true, Reg::Rcx, FP, loc);
    }

    fn read_stack_pointer_from_register(&mut self, reg: usize) {
        let loc = self.register_location(reg);
        self.load_context(Reg::Rax);
        emit_load(&mut self.buf, true, BACKTRACK_SP, Reg::Rax, STACK_MEMORY_TOP_OFFSET);
        emit_arith_rm(&mut self.buf, ArithOp::Add, true, BACKTRACK_SP, FP, loc);
    }

    fn go_to(&mut self, label: Option<Label>) {
        match label {
            None => self.backtrack(),
            Some(l) => {
                // Backward jumps close loops; give the runtime a chance.
                if self.labels.is_bound(l) {
                    self.check_preemption();
                }
                self.jmp_to(l);
            }
        }
    }

    fn if_register_ge(&mut self, reg: usize, comparand: i32, if_ge: Option<Label>) {
        let loc = self.register_location(reg);
        emit_arith_mi(&mut self.buf, ArithOp::Cmp, true, FP, loc, comparand);
        self.branch(X86Cond::Jge, if_ge);
    }

    fn if_register_lt(&mut self, reg: usize, comparand: i32, if_lt: Option<Label>) {
        let loc = self.register_location(reg);
        emit_arith_mi(&mut self.buf, ArithOp::Cmp, true, FP, loc, comparand);
        self.branch(X86Cond::Jl, if_lt);
    }

    fn if_register_eq_pos(&mut self, reg: usize, if_eq: Option<Label>) {
        let loc = self.register_location(reg);
        emit_arith_rm(&mut self.buf, ArithOp::Cmp, true, POS, FP, loc);
        self.branch(X86Cond::Je, if_eq);
    }

    fn succeed(&mut self) -> bool {
        self.jmp_to(self.success_label);
        self.global_mode.is_global()
    }

    fn fail(&mut self) {
        self.jmp_to(self.fail_label);
    }

    fn get_code(&mut self, source: &str) -> Result<NativeCode, CompileError> {
        if std::mem::replace(&mut self.finalized, true) {
            return Err(CompileError::AlreadyFinalized);
        }
        if self.aborted {
            return Err(CompileError::Aborted);
        }
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.global_mode.is_global() && self.num_saved_registers < 2 {
            return Err(CompileError::Unsupported(
                "global matching without capture registers".into(),
            ));
        }

        self.emit_entry();
        if self.labels.is_linked(self.success_label) {
            self.emit_success();
        }
        self.emit_exit();
        if self.labels.is_linked(self.backtrack_label) {
            self.emit_backtrack();
        }
        if self.labels.is_linked(self.fail_label) {
            self.emit_fail();
        }
        if self.labels.is_linked(self.check_preempt_label) {
            self.emit_check_preempt();
        }
        if self.labels.is_linked(self.stack_overflow_label) {
            self.emit_stack_overflow();
        }
        if self.labels.is_linked(self.exception_label) {
            self.emit_status_exit(self.exception_label, status::EXCEPTION);
        }
        if self.labels.is_linked(self.fallback_label) {
            self.emit_status_exit(self.fallback_label, status::FALLBACK_TO_EXPERIMENTAL);
        }
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.verify()?;

        let mut buffer = std::mem::replace(&mut self.buf, CodeBuffer::empty());
        buffer.set_executable()?;
        debug!(
            "regexp /{}/: {} bytes of {:?} code, {} registers ({} saved)",
            source,
            buffer.offset(),
            self.mode,
            self.num_registers,
            self.num_saved_registers
        );
        Ok(NativeCode {
            buffer,
            implementation: Implementation::X64,
            mode: self.mode,
            global_mode: self.global_mode,
            num_registers: self.num_registers,
            num_saved_registers: self.num_saved_registers,
            tables: std::mem::take(&mut self.tables),
            range_arrays: std::mem::take(&mut self.range_arrays),
            source: source.to_string(),
        })
    }
}
