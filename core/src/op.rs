use crate::label::Label;
use crate::types::{CharacterRange, StackCheckFlag, StandardCharacterSet};

/// One matcher opcode.
///
/// Branch targets are `Option<Label>`; `None` means "backtrack". Labels
/// belong to the owning [`Program`] and are remapped onto assembler
/// labels when the program is translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    Bind(Label),
    AdvanceCurrentPosition(i32),
    AdvanceRegister { reg: usize, by: i32 },
    Backtrack,
    CheckAtStart { cp_offset: i32, on_at_start: Option<Label> },
    CheckNotAtStart { cp_offset: i32, on_not_at_start: Option<Label> },
    CheckCharacter { c: u32, on_equal: Option<Label> },
    CheckNotCharacter { c: u32, on_not_equal: Option<Label> },
    CheckCharacterAfterAnd { c: u32, mask: u32, on_equal: Option<Label> },
    CheckNotCharacterAfterAnd { c: u32, mask: u32, on_not_equal: Option<Label> },
    CheckNotCharacterAfterMinusAnd { c: u32, minus: u32, mask: u32, on_not_equal: Option<Label> },
    CheckCharacterGt { limit: u32, on_greater: Option<Label> },
    CheckCharacterLt { limit: u32, on_less: Option<Label> },
    CheckCharacterInRange { from: u32, to: u32, on_in_range: Option<Label> },
    CheckCharacterNotInRange { from: u32, to: u32, on_not_in_range: Option<Label> },
    CheckCharacterInRangeArray { ranges: Vec<CharacterRange>, on_in_range: Option<Label> },
    CheckCharacterNotInRangeArray { ranges: Vec<CharacterRange>, on_not_in_range: Option<Label> },
    CheckBitInTable { table: Vec<u8>, on_bit_set: Option<Label> },
    CheckGreedyLoop { on_tos_equals_current_position: Option<Label> },
    CheckNotBackReference { start_reg: usize, read_backward: bool, on_no_match: Option<Label> },
    CheckNotBackReferenceIgnoreCase {
        start_reg: usize,
        read_backward: bool,
        unicode: bool,
        on_no_match: Option<Label>,
    },
    CheckPosition { cp_offset: i32, on_outside_input: Option<Label> },
    CheckSpecialClassRanges { set: StandardCharacterSet, on_no_match: Option<Label> },
    Fail,
    GoTo(Option<Label>),
    IfRegisterGe { reg: usize, comparand: i32, if_ge: Option<Label> },
    IfRegisterLt { reg: usize, comparand: i32, if_lt: Option<Label> },
    IfRegisterEqPos { reg: usize, if_eq: Option<Label> },
    LoadCurrentCharacter {
        cp_offset: i32,
        on_end_of_input: Option<Label>,
        check_bounds: bool,
        characters: usize,
    },
    PopCurrentPosition,
    PopRegister(usize),
    PushBacktrack(Label),
    PushCurrentPosition,
    PushRegister { reg: usize, check: StackCheckFlag },
    ReadCurrentPositionFromRegister(usize),
    ReadStackPointerFromRegister(usize),
    SetCurrentPositionFromEnd(i32),
    SetRegister { reg: usize, to: i32 },
    Succeed,
    WriteCurrentPositionToRegister { reg: usize, cp_offset: i32 },
    ClearRegisters { from: usize, to: usize },
    WriteStackPointerToRegister(usize),
}

/// A recorded opcode stream: what a pattern compiler hands to a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    insns: Vec<Insn>,
    num_labels: u32,
    num_saved_registers: usize,
}

impl Program {
    /// `num_saved_registers` capture registers are reported on success
    /// (two per capture group, group 0 included).
    pub fn new(num_saved_registers: usize) -> Self {
        Self {
            insns: Vec::new(),
            num_labels: 0,
            num_saved_registers,
        }
    }

    pub fn new_label(&mut self) -> Label {
        let l = Label(self.num_labels);
        self.num_labels += 1;
        l
    }

    pub fn emit(&mut self, insn: Insn) -> &mut Self {
        self.insns.push(insn);
        self
    }

    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels as usize
    }

    pub fn num_saved_registers(&self) -> usize {
        self.num_saved_registers
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }
}
