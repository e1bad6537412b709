use rejit_core::types::TABLE_SIZE;
use rejit_core::{CompileError, Insn, Label, Program};

use crate::RegExpMacroAssembler;

/// Replay `program` onto `masm`, one opcode at a time.
///
/// Program labels are remapped onto fresh assembler labels. Opcodes the
/// backend reports as unsupported become `CompileError::Unsupported`.
pub fn translate(
    program: &Program,
    masm: &mut dyn RegExpMacroAssembler,
) -> Result<(), CompileError> {
    let labels: Vec<Label> = (0..program.num_labels()).map(|_| masm.new_label()).collect();
    let map = |l: Label| -> Result<Label, CompileError> {
        labels.get(l.index()).copied().ok_or(CompileError::UnknownLabel(l.0))
    };
    let target = |t: &Option<Label>| -> Result<Option<Label>, CompileError> {
        t.map(|l| map(l)).transpose()
    };

    let mut bound = vec![false; labels.len()];

    for insn in program.insns() {
        match insn {
            Insn::Bind(l) => {
                let idx = map(*l)?;
                if std::mem::replace(&mut bound[l.index()], true) {
                    return Err(CompileError::LabelRebound(l.0));
                }
                masm.bind(idx);
            }
            Insn::AdvanceCurrentPosition(by) => masm.advance_current_position(*by),
            Insn::AdvanceRegister { reg, by } => masm.advance_register(*reg, *by),
            Insn::Backtrack => masm.backtrack(),
            Insn::CheckAtStart { cp_offset, on_at_start } => {
                masm.check_at_start(*cp_offset, target(on_at_start)?)
            }
            Insn::CheckNotAtStart { cp_offset, on_not_at_start } => {
                masm.check_not_at_start(*cp_offset, target(on_not_at_start)?)
            }
            Insn::CheckCharacter { c, on_equal } => masm.check_character(*c, target(on_equal)?),
            Insn::CheckNotCharacter { c, on_not_equal } => {
                masm.check_not_character(*c, target(on_not_equal)?)
            }
            Insn::CheckCharacterAfterAnd { c, mask, on_equal } => {
                masm.check_character_after_and(*c, *mask, target(on_equal)?)
            }
            Insn::CheckNotCharacterAfterAnd { c, mask, on_not_equal } => {
                masm.check_not_character_after_and(*c, *mask, target(on_not_equal)?)
            }
            Insn::CheckNotCharacterAfterMinusAnd { c, minus, mask, on_not_equal } => masm
                .check_not_character_after_minus_and(*c, *minus, *mask, target(on_not_equal)?),
            Insn::CheckCharacterGt { limit, on_greater } => {
                masm.check_character_gt(*limit, target(on_greater)?)
            }
            Insn::CheckCharacterLt { limit, on_less } => {
                masm.check_character_lt(*limit, target(on_less)?)
            }
            Insn::CheckCharacterInRange { from, to, on_in_range } => {
                masm.check_character_in_range(*from, *to, target(on_in_range)?)
            }
            Insn::CheckCharacterNotInRange { from, to, on_not_in_range } => {
                masm.check_character_not_in_range(*from, *to, target(on_not_in_range)?)
            }
            Insn::CheckCharacterInRangeArray { ranges, on_in_range } => {
                if !masm.check_character_in_range_array(ranges, target(on_in_range)?) {
                    return Err(unsupported_ranges(ranges.len()));
                }
            }
            Insn::CheckCharacterNotInRangeArray { ranges, on_not_in_range } => {
                if !masm.check_character_not_in_range_array(ranges, target(on_not_in_range)?) {
                    return Err(unsupported_ranges(ranges.len()));
                }
            }
            Insn::CheckBitInTable { table, on_bit_set } => {
                let table: &[u8; TABLE_SIZE] = table.as_slice().try_into().map_err(|_| {
                    CompileError::Unsupported(format!(
                        "bit table of {} entries (expected {})",
                        table.len(),
                        TABLE_SIZE
                    ))
                })?;
                masm.check_bit_in_table(table, target(on_bit_set)?)
            }
            Insn::CheckGreedyLoop { on_tos_equals_current_position } => {
                masm.check_greedy_loop(target(on_tos_equals_current_position)?)
            }
            Insn::CheckNotBackReference { start_reg, read_backward, on_no_match } => {
                masm.check_not_back_reference(*start_reg, *read_backward, target(on_no_match)?)
            }
            Insn::CheckNotBackReferenceIgnoreCase {
                start_reg,
                read_backward,
                unicode,
                on_no_match,
            } => masm.check_not_back_reference_ignore_case(
                *start_reg,
                *read_backward,
                *unicode,
                target(on_no_match)?,
            ),
            Insn::CheckPosition { cp_offset, on_outside_input } => {
                masm.check_position(*cp_offset, target(on_outside_input)?)
            }
            Insn::CheckSpecialClassRanges { set, on_no_match } => {
                if !masm.check_special_class_ranges(*set, target(on_no_match)?) {
                    return Err(CompileError::Unsupported(format!(
                        "no fast path for class {:?}",
                        set
                    )));
                }
            }
            Insn::Fail => masm.fail(),
            Insn::GoTo(t) => masm.go_to(target(t)?),
            Insn::IfRegisterGe { reg, comparand, if_ge } => {
                masm.if_register_ge(*reg, *comparand, target(if_ge)?)
            }
            Insn::IfRegisterLt { reg, comparand, if_lt } => {
                masm.if_register_lt(*reg, *comparand, target(if_lt)?)
            }
            Insn::IfRegisterEqPos { reg, if_eq } => masm.if_register_eq_pos(*reg, target(if_eq)?),
            Insn::LoadCurrentCharacter { cp_offset, on_end_of_input, check_bounds, characters } => {
                masm.load_current_character(
                    *cp_offset,
                    target(on_end_of_input)?,
                    *check_bounds,
                    *characters,
                )
            }
            Insn::PopCurrentPosition => masm.pop_current_position(),
            Insn::PopRegister(reg) => masm.pop_register(*reg),
            Insn::PushBacktrack(l) => masm.push_backtrack(map(*l)?),
            Insn::PushCurrentPosition => masm.push_current_position(),
            Insn::PushRegister { reg, check } => masm.push_register(*reg, *check),
            Insn::ReadCurrentPositionFromRegister(reg) => {
                masm.read_current_position_from_register(*reg)
            }
            Insn::ReadStackPointerFromRegister(reg) => masm.read_stack_pointer_from_register(*reg),
            Insn::SetCurrentPositionFromEnd(by) => masm.set_current_position_from_end(*by),
            Insn::SetRegister { reg, to } => masm.set_register(*reg, *to),
            Insn::Succeed => {
                masm.succeed();
            }
            Insn::WriteCurrentPositionToRegister { reg, cp_offset } => {
                masm.write_current_position_to_register(*reg, *cp_offset)
            }
            Insn::ClearRegisters { from, to } => masm.clear_registers(*from, *to),
            Insn::WriteStackPointerToRegister(reg) => masm.write_stack_pointer_to_register(*reg),
        }
    }
    Ok(())
}

fn unsupported_ranges(len: usize) -> CompileError {
    CompileError::Unsupported(format!("range array of {} ranges", len))
}
