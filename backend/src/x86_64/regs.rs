use std::sync::OnceLock;

use rejit_core::frame::{FrameLayout, FrameSlot};

/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }
}

/// Logical roles of the matcher's fixed registers.
///
/// Every role sits in a callee-saved register, so values survive calls
/// into the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Current position: negative byte offset from the end of input.
    CurrentPosition,
    /// Character(s) loaded by the last load opcode.
    CurrentCharacter,
    /// Address one past the last input byte.
    InputEnd,
    /// Backtrack stack pointer.
    BacktrackStackPointer,
    /// Start of the executing code object.
    CodeBase,
    FramePointer,
}

impl Role {
    pub const fn reg(self) -> Reg {
        match self {
            Role::CurrentPosition => Reg::R12,
            Role::CurrentCharacter => Reg::R13,
            Role::InputEnd => Reg::R14,
            Role::BacktrackStackPointer => Reg::Rbx,
            Role::CodeBase => Reg::R15,
            Role::FramePointer => Reg::Rbp,
        }
    }
}

pub const CURRENT_POSITION: Reg = Role::CurrentPosition.reg();
pub const CURRENT_CHARACTER: Reg = Role::CurrentCharacter.reg();
pub const INPUT_END: Reg = Role::InputEnd.reg();
pub const BACKTRACK_SP: Reg = Role::BacktrackStackPointer.reg();
pub const CODE_BASE: Reg = Role::CodeBase.reg();
pub const FRAME_POINTER: Reg = Role::FramePointer.reg();

/// Callee-saved registers the entry sequence saves, in push order
/// (System V ABI; RBP is saved separately as the frame pointer).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

pub const STACK_ALIGN: i32 = 16;
pub const WORD_SIZE: i32 = 8;

/// Incoming parameters saved below the frame pointer, in push order;
/// parallel to [`CALL_ARG_REGS`].
const PARAM_SLOTS: [FrameSlot; 6] = [
    FrameSlot::InputString,
    FrameSlot::StartIndex,
    FrameSlot::InputStart,
    FrameSlot::InputEnd,
    FrameSlot::Output,
    FrameSlot::NumOutputRegisters,
];

/// Bookkeeping locals, in push order.
pub const LOCAL_SLOTS: [FrameSlot; 4] = [
    FrameSlot::SuccessfulCaptures,
    FrameSlot::StringStartMinusOne,
    FrameSlot::BacktrackCount,
    FrameSlot::StackBasePointer,
];

/// Frame layout built by the x86-64 entry sequence.
///
/// ```text
///   rbp + 24  runtime context       (stack argument 8)
///   rbp + 16  direct call flag      (stack argument 7)
///   rbp +  8  return address
///   rbp +  0  saved rbp
///   rbp -  8  input string ... output register count   (rdi..r9)
///             saved rbx r12 r13 r14 r15
///             successful captures, string start - 1,
///             backtrack count, backtrack stack base
///             register 0, register 1, ...
/// ```
pub fn frame_layout() -> &'static FrameLayout {
    static LAYOUT: OnceLock<FrameLayout> = OnceLock::new();
    LAYOUT.get_or_init(|| {
        let above = [
            FrameSlot::SavedFramePointer,
            FrameSlot::ReturnAddress,
            FrameSlot::DirectCall,
            FrameSlot::RuntimeContext,
        ];
        let mut below: Vec<FrameSlot> = PARAM_SLOTS.to_vec();
        below.extend(CALLEE_SAVED.iter().map(|&r| FrameSlot::CalleeSaved(r as u8)));
        below.extend(LOCAL_SLOTS);
        FrameLayout::new(WORD_SIZE, &above, &below)
    })
}

/// Register whose incoming value the entry sequence saves in `slot`, or
/// `None` for bookkeeping slots that start out zero.
pub fn saved_register(slot: FrameSlot) -> Option<Reg> {
    if let Some(i) = PARAM_SLOTS.iter().position(|&s| s == slot) {
        return Some(CALL_ARG_REGS[i]);
    }
    match slot {
        FrameSlot::CalleeSaved(n) => CALLEE_SAVED.iter().copied().find(|&r| r as u8 == n),
        _ => None,
    }
}
