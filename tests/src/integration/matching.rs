use rejit_core::{CompileOptions, Insn, Mode, Program, StackCheckFlag};
use rejit_exec::Subject;

use super::*;

/// a(b)c
fn capture_program() -> Program {
    search(4, |p| {
        open(p);
        literal_at(p, 0, "abc");
        p.emit(Insn::WriteCurrentPositionToRegister { reg: 2, cp_offset: 1 })
            .emit(Insn::WriteCurrentPositionToRegister { reg: 3, cp_offset: 2 })
            .emit(Insn::AdvanceCurrentPosition(3));
        close_and_succeed(p);
    })
}

#[test]
fn literal_with_capture() {
    let mut rt = runtime();
    let p = capture_program();
    assert_eq!(
        find_latin1(&mut rt, &p, "a(b)c", "xxabcx"),
        Some(vec![Some((2, 5)), Some((3, 4))])
    );
    assert_eq!(find_latin1(&mut rt, &p, "a(b)c", "abd"), None);
    assert_eq!(find_latin1(&mut rt, &p, "a(b)c", ""), None);
}

#[test]
fn exec_writes_raw_registers() {
    let mut rt = runtime();
    let h = rt
        .compile(&capture_program(), CompileOptions::new(Mode::Latin1), "a(b)c")
        .unwrap();
    let mut out = [0i32; 6];
    assert_eq!(rt.exec(h, Subject::Latin1(b"abc"), 0, &mut out).unwrap(), 1);
    assert_eq!(&out[..4], &[0, 3, 1, 2]);

    let mut out = [7i32; 4];
    assert_eq!(rt.exec(h, Subject::Latin1(b"abx"), 0, &mut out).unwrap(), 0);
}

/// cat|dog
fn alternation() -> Program {
    search(2, |p| {
        let second = p.new_label();
        let matched = p.new_label();
        open(p);
        p.emit(Insn::PushCurrentPosition)
            .emit(Insn::PushBacktrack(second));
        literal(p, "cat");
        p.emit(Insn::GoTo(Some(matched)))
            .emit(Insn::Bind(second))
            .emit(Insn::PopCurrentPosition);
        literal(p, "dog");
        p.emit(Insn::Bind(matched));
        close_and_succeed(p);
    })
}

#[test]
fn alternation_tries_second_choice() {
    let mut rt = runtime();
    let p = alternation();
    assert_eq!(find_latin1(&mut rt, &p, "cat|dog", "hotdog"), Some(vec![Some((3, 6))]));
    assert_eq!(find_latin1(&mut rt, &p, "cat|dog", "cat"), Some(vec![Some((0, 3))]));
    assert_eq!(find_latin1(&mut rt, &p, "cat|dog", "cow"), None);
}

/// `a*` followed by `tail`, as a greedy loop that gives characters back
/// one at a time.
pub(super) fn greedy_star_then(tail: &'static str) -> Program {
    search(2, move |p| {
        let lp = p.new_label();
        let loop_failed = p.new_label();
        let second_choice = p.new_label();
        let retreat = p.new_label();
        open(p);
        p.emit(Insn::PushCurrentPosition)
            .emit(Insn::Bind(lp))
            .emit(Insn::LoadCurrentCharacter {
                cp_offset: 0,
                on_end_of_input: Some(loop_failed),
                check_bounds: true,
                characters: 1,
            })
            .emit(Insn::CheckNotCharacter { c: 'a' as u32, on_not_equal: Some(loop_failed) })
            .emit(Insn::AdvanceCurrentPosition(1))
            .emit(Insn::GoTo(Some(lp)))
            .emit(Insn::Bind(loop_failed))
            .emit(Insn::Bind(second_choice));
        for (i, c) in tail.chars().enumerate() {
            p.emit(Insn::LoadCurrentCharacter {
                cp_offset: i as i32,
                on_end_of_input: Some(retreat),
                check_bounds: true,
                characters: 1,
            })
            .emit(Insn::CheckNotCharacter { c: c as u32, on_not_equal: Some(retreat) });
        }
        p.emit(Insn::AdvanceCurrentPosition(tail.len() as i32));
        close_and_succeed(p);
        p.emit(Insn::Bind(retreat))
            .emit(Insn::CheckGreedyLoop { on_tos_equals_current_position: None })
            .emit(Insn::AdvanceCurrentPosition(-1))
            .emit(Insn::GoTo(Some(second_choice)));
    })
}

#[test]
fn greedy_loop() {
    let mut rt = runtime();
    let p = greedy_star_then("b");
    assert_eq!(find_latin1(&mut rt, &p, "a*b", "xaaab"), Some(vec![Some((1, 5))]));
    assert_eq!(find_latin1(&mut rt, &p, "a*b", "b"), Some(vec![Some((0, 1))]));
    assert_eq!(find_latin1(&mut rt, &p, "a*b", "aaac"), None);
}

#[test]
fn greedy_loop_gives_back() {
    let mut rt = runtime();
    let p = greedy_star_then("ab");
    assert_eq!(find_latin1(&mut rt, &p, "a*ab", "aaab"), Some(vec![Some((0, 4))]));
    assert_eq!(find_latin1(&mut rt, &p, "a*ab", "xab"), Some(vec![Some((1, 3))]));
    assert_eq!(find_latin1(&mut rt, &p, "a*ab", "aaa"), None);
}

#[test]
fn greedy_loop_check_on_empty_stack_falls_through() {
    let mut p = Program::new(2);
    let gave_up = p.new_label();
    p.emit(Insn::CheckGreedyLoop { on_tos_equals_current_position: Some(gave_up) });
    open(&mut p);
    close_and_succeed(&mut p);
    p.emit(Insn::Bind(gave_up)).emit(Insn::Fail);

    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "(?:)*", "x"), Some(vec![Some((0, 0))]));
    assert_eq!(find_latin1(&mut rt, &p, "(?:)*", ""), Some(vec![Some((0, 0))]));
}

/// (a)\1
fn backreference(ignore_case: bool) -> Program {
    search(4, move |p| {
        open(p);
        p.emit(Insn::WriteCurrentPositionToRegister { reg: 2, cp_offset: 0 });
        literal(p, "a");
        p.emit(Insn::WriteCurrentPositionToRegister { reg: 3, cp_offset: 0 });
        p.emit(if ignore_case {
            Insn::CheckNotBackReferenceIgnoreCase {
                start_reg: 2,
                read_backward: false,
                unicode: false,
                on_no_match: None,
            }
        } else {
            Insn::CheckNotBackReference { start_reg: 2, read_backward: false, on_no_match: None }
        });
        close_and_succeed(p);
    })
}

#[test]
fn backreference_ignoring_case() {
    let mut rt = runtime();
    let p = backreference(true);
    assert_eq!(
        find_latin1(&mut rt, &p, "(a)\\1/i", "aA"),
        Some(vec![Some((0, 2)), Some((0, 1))])
    );
    assert_eq!(find_latin1(&mut rt, &p, "(a)\\1/i", "ab"), None);
}

#[test]
fn backreference_exact() {
    let mut rt = runtime();
    let p = backreference(false);
    assert_eq!(
        find_latin1(&mut rt, &p, "(a)\\1", "xaa"),
        Some(vec![Some((1, 3)), Some((1, 2))])
    );
    assert_eq!(find_latin1(&mut rt, &p, "(a)\\1", "aA"), None);
    // The capture may not run past the end of input.
    assert_eq!(find_latin1(&mut rt, &p, "(a)\\1", "a"), None);
}

#[test]
fn backreference_ignoring_case_uc16() {
    let mut rt = runtime();
    let p = backreference(true);
    assert_eq!(
        find_uc16(&mut rt, &p, "(a)\\1/i", &utf16("xaA")),
        Some(vec![Some((1, 3)), Some((1, 2))])
    );
}

#[test]
fn backreference_read_backward() {
    // Capture the first character, jump past three, then match the
    // capture backward from there.
    let mut p = Program::new(4);
    open(&mut p);
    p.emit(Insn::WriteCurrentPositionToRegister { reg: 2, cp_offset: 0 })
        .emit(Insn::WriteCurrentPositionToRegister { reg: 3, cp_offset: 1 })
        .emit(Insn::CheckPosition { cp_offset: 2, on_outside_input: None })
        .emit(Insn::AdvanceCurrentPosition(3))
        .emit(Insn::CheckNotBackReference { start_reg: 2, read_backward: true, on_no_match: None });
    close_and_succeed(&mut p);

    let mut rt = runtime();
    assert_eq!(
        find_latin1(&mut rt, &p, "back", "aXa"),
        Some(vec![Some((0, 2)), Some((0, 1))])
    );
    assert_eq!(find_latin1(&mut rt, &p, "back", "aXb"), None);
}

#[test]
fn unset_capture_matches_empty() {
    let mut p = Program::new(4);
    open(&mut p);
    p.emit(Insn::CheckNotBackReference { start_reg: 2, read_backward: false, on_no_match: None });
    literal(&mut p, "q");
    close_and_succeed(&mut p);

    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "\\1q", "q"), Some(vec![Some((0, 1)), None]));
}

#[test]
fn start_index_preloads_previous_character() {
    let mut p = Program::new(2);
    open(&mut p);
    p.emit(Insn::CheckNotCharacter { c: 'a' as u32, on_not_equal: None });
    close_and_succeed(&mut p);

    let mut rt = runtime();
    let h = rt.compile(&p, CompileOptions::new(Mode::Latin1), "(?<=a)").unwrap();
    let found = rt.find(h, Subject::Latin1(b"ab"), 1).unwrap();
    assert_eq!(found.map(|c| spans(&c)), Some(vec![Some((1, 1))]));
    // At the start the previous character reads as a newline.
    assert!(rt.find(h, Subject::Latin1(b"ab"), 0).unwrap().is_none());
}

#[test]
fn start_anchor() {
    let mut p = Program::new(2);
    open(&mut p);
    p.emit(Insn::CheckNotAtStart { cp_offset: 0, on_not_at_start: None });
    close_and_succeed(&mut p);

    let mut rt = runtime();
    let h = rt.compile(&p, CompileOptions::new(Mode::Uc16), "^").unwrap();
    let s = utf16("xy");
    assert!(rt.find(h, Subject::Uc16(&s), 0).unwrap().is_some());
    assert!(rt.find(h, Subject::Uc16(&s), 1).unwrap().is_none());
}

#[test]
fn position_from_end() {
    let mut p = Program::new(2);
    p.emit(Insn::SetCurrentPositionFromEnd(2));
    open(&mut p);
    close_and_succeed(&mut p);

    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "end", "abcdef"), Some(vec![Some((4, 4))]));
    assert_eq!(find_latin1(&mut rt, &p, "end", "a"), Some(vec![Some((0, 0))]));
}

#[test]
fn register_arithmetic_and_stack() {
    let mut p = Program::new(2);
    let ok = p.new_label();
    let bad = p.new_label();
    open(&mut p);
    p.emit(Insn::SetRegister { reg: 2, to: 5 })
        .emit(Insn::PushRegister { reg: 2, check: StackCheckFlag::CheckStackLimit })
        .emit(Insn::SetRegister { reg: 2, to: 9 })
        .emit(Insn::AdvanceRegister { reg: 2, by: 1 })
        .emit(Insn::IfRegisterLt { reg: 2, comparand: 10, if_lt: Some(bad) })
        .emit(Insn::PopRegister(2))
        .emit(Insn::IfRegisterGe { reg: 2, comparand: 6, if_ge: Some(bad) })
        .emit(Insn::IfRegisterLt { reg: 2, comparand: 6, if_lt: Some(ok) })
        .emit(Insn::Bind(bad))
        .emit(Insn::Fail)
        .emit(Insn::Bind(ok))
        .emit(Insn::WriteCurrentPositionToRegister { reg: 3, cp_offset: 0 })
        .emit(Insn::IfRegisterEqPos { reg: 3, if_eq: None })
        .emit(Insn::Succeed);

    // reg 3 equals the position, so the last test backtracks to failure.
    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "regs", "z"), None);
}

#[test]
fn register_comparisons_reach_success() {
    let mut p = Program::new(2);
    let ok = p.new_label();
    open(&mut p);
    p.emit(Insn::SetRegister { reg: 2, to: 5 })
        .emit(Insn::PushRegister { reg: 2, check: StackCheckFlag::NoStackLimitCheck })
        .emit(Insn::SetRegister { reg: 2, to: 9 })
        .emit(Insn::PopRegister(2))
        .emit(Insn::IfRegisterLt { reg: 2, comparand: 6, if_lt: Some(ok) })
        .emit(Insn::Fail)
        .emit(Insn::Bind(ok))
        .emit(Insn::ReadCurrentPositionFromRegister(0))
        .emit(Insn::AdvanceCurrentPosition(1));
    close_and_succeed(&mut p);

    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "regs-ok", "zz"), Some(vec![Some((0, 1))]));
}

#[test]
fn clear_registers_unsets_captures() {
    let mut p = Program::new(4);
    open(&mut p);
    p.emit(Insn::SetRegister { reg: 2, to: 0 })
        .emit(Insn::SetRegister { reg: 3, to: 0 })
        .emit(Insn::ClearRegisters { from: 2, to: 3 });
    close_and_succeed(&mut p);

    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "clear", "x"), Some(vec![Some((0, 0)), None]));
}

#[test]
fn stack_pointer_save_and_restore() {
    let mut p = Program::new(2);
    let good = p.new_label();
    let bad = p.new_label();
    p.emit(Insn::PushBacktrack(good))
        .emit(Insn::WriteStackPointerToRegister(2))
        .emit(Insn::PushBacktrack(bad))
        .emit(Insn::PushCurrentPosition)
        .emit(Insn::ReadStackPointerFromRegister(2))
        .emit(Insn::Backtrack)
        .emit(Insn::Bind(bad))
        .emit(Insn::Fail)
        .emit(Insn::Bind(good));
    open(&mut p);
    close_and_succeed(&mut p);

    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "sp", ""), Some(vec![Some((0, 0))]));
}

#[test]
fn backtracking_past_the_bottom_fails() {
    let mut p = Program::new(2);
    p.emit(Insn::Backtrack);
    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "bt", "abc"), None);
}

#[test]
fn uc16_literal() {
    let mut rt = runtime();
    let p = search_literal("\u{e9}\u{3b1}");
    assert_eq!(find_uc16(&mut rt, &p, "é α", &utf16("caf\u{e9}\u{3b1}")), Some(vec![Some((3, 5))]));
    assert_eq!(find_uc16(&mut rt, &p, "é α", &utf16("\u{e9}a")), None);
}

#[test]
fn multi_character_loads() {
    let mut p = search(2, |p| {
        open(p);
        p.emit(Insn::LoadCurrentCharacter {
            cp_offset: 0,
            on_end_of_input: None,
            check_bounds: true,
            characters: 4,
        })
        .emit(Insn::CheckNotCharacter { c: u32::from_le_bytes(*b"abcd"), on_not_equal: None })
        .emit(Insn::AdvanceCurrentPosition(4));
        close_and_succeed(p);
    });
    let mut rt = runtime();
    assert_eq!(find_latin1(&mut rt, &p, "abcd", "xxabcd"), Some(vec![Some((2, 6))]));
    assert_eq!(find_latin1(&mut rt, &p, "abcd", "abc"), None);

    p = search(2, |p| {
        open(p);
        p.emit(Insn::LoadCurrentCharacter {
            cp_offset: 0,
            on_end_of_input: None,
            check_bounds: true,
            characters: 2,
        })
        .emit(Insn::CheckNotCharacter { c: 'h' as u32 | ('i' as u32) << 16, on_not_equal: None })
        .emit(Insn::AdvanceCurrentPosition(2));
        close_and_succeed(p);
    });
    assert_eq!(find_uc16(&mut rt, &p, "hi", &utf16("ohi")), Some(vec![Some((1, 3))]));
}
