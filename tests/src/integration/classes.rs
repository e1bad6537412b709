use rejit_core::{
    CharacterRange, CompileError, CompileOptions, Insn, Label, Mode, Program,
    StandardCharacterSet,
};
use rejit_exec::{RuntimeError, Subject};

use super::*;

/// Search for one character accepted by `check`, which backtracks on a
/// mismatch.
fn one_char(check: impl FnOnce(&mut Program)) -> Program {
    search(2, |p| {
        open(p);
        p.emit(Insn::LoadCurrentCharacter {
            cp_offset: 0,
            on_end_of_input: None,
            check_bounds: true,
            characters: 1,
        });
        check(p);
        p.emit(Insn::AdvanceCurrentPosition(1));
        close_and_succeed(p);
    })
}

/// Like [`one_char`], for checks that branch when the character is
/// accepted.
fn one_char_on_hit(check: impl FnOnce(&mut Program, Label)) -> Program {
    one_char(|p| {
        let hit = p.new_label();
        check(p, hit);
        p.emit(Insn::Backtrack).emit(Insn::Bind(hit));
    })
}

fn class(set: StandardCharacterSet) -> Program {
    one_char(|p| {
        p.emit(Insn::CheckSpecialClassRanges { set, on_no_match: None });
    })
}

fn first_latin1(rt: &mut RegExpRuntime, p: &Program, source: &str, subject: &[u8]) -> Option<(usize, usize)> {
    let h = rt.compile(p, CompileOptions::new(Mode::Latin1), source).unwrap();
    rt.find(h, Subject::Latin1(subject), 0).unwrap().map(|c| c.span())
}

fn first_uc16(rt: &mut RegExpRuntime, p: &Program, source: &str, subject: &str) -> Option<(usize, usize)> {
    let h = rt.compile(p, CompileOptions::new(Mode::Uc16), source).unwrap();
    let s = utf16(subject);
    rt.find(h, Subject::Uc16(&s), 0).unwrap().map(|c| c.span())
}

fn letters() -> Vec<CharacterRange> {
    vec![CharacterRange::new('a' as u32, 'c' as u32), CharacterRange::new('x' as u32, 'z' as u32)]
}

#[test]
fn range_array() {
    let mut rt = runtime();
    let p = one_char(|p| {
        p.emit(Insn::CheckCharacterNotInRangeArray { ranges: letters(), on_not_in_range: None });
    });
    assert_eq!(first_latin1(&mut rt, &p, "[a-cx-z]", b"mmzb"), Some((2, 3)));
    assert_eq!(first_latin1(&mut rt, &p, "[a-cx-z]", b"dw{"), None);

    let p = one_char_on_hit(|p, hit| {
        p.emit(Insn::CheckCharacterInRangeArray { ranges: letters(), on_in_range: Some(hit) });
    });
    assert_eq!(first_uc16(&mut rt, &p, "[a-cx-z]+", "\u{3b1}dc"), Some((2, 3)));
}

#[test]
fn digits() {
    let mut rt = runtime();
    let p = class(StandardCharacterSet::Digit);
    assert_eq!(first_latin1(&mut rt, &p, "\\d", b"ab7"), Some((2, 3)));
    assert_eq!(first_latin1(&mut rt, &p, "\\d", b"/:"), None);

    let p = class(StandardCharacterSet::NotDigit);
    assert_eq!(first_latin1(&mut rt, &p, "\\D", b"12x"), Some((2, 3)));
}

#[test]
fn word_characters() {
    let mut rt = runtime();
    let p = class(StandardCharacterSet::Word);
    assert_eq!(first_latin1(&mut rt, &p, "\\w", b"--_"), Some((2, 3)));
    assert_eq!(first_latin1(&mut rt, &p, "\\w", b"{\xe9 "), None);
    assert_eq!(first_uc16(&mut rt, &p, "\\w", "\u{100}Z"), Some((1, 2)));

    let p = class(StandardCharacterSet::NotWord);
    assert_eq!(first_latin1(&mut rt, &p, "\\W", b"ab!"), Some((2, 3)));
    assert_eq!(first_uc16(&mut rt, &p, "\\W", "a\u{100}"), Some((1, 2)));
}

#[test]
fn latin1_whitespace() {
    let mut rt = runtime();
    let p = class(StandardCharacterSet::Whitespace);
    assert_eq!(first_latin1(&mut rt, &p, "\\s", b"ab\xa0"), Some((2, 3)));
    assert_eq!(first_latin1(&mut rt, &p, "\\s", b"x\t"), Some((1, 2)));
    assert_eq!(first_latin1(&mut rt, &p, "\\s", b"xyz"), None);

    let p = class(StandardCharacterSet::NotWhitespace);
    assert_eq!(first_latin1(&mut rt, &p, "\\S", b" \r\nq"), Some((3, 4)));
}

#[test]
fn uc16_whitespace_has_no_fast_path() {
    let mut rt = runtime();
    let p = class(StandardCharacterSet::Whitespace);
    let err = rt.compile(&p, CompileOptions::new(Mode::Uc16), "\\s").unwrap_err();
    assert!(matches!(err, RuntimeError::Compile(CompileError::Unsupported(_))));
    assert_eq!(rt.code_count(), 0);
}

#[test]
fn line_terminators() {
    let mut rt = runtime();
    let p = class(StandardCharacterSet::LineTerminator);
    assert_eq!(first_uc16(&mut rt, &p, "[\\n\\r\\u2028\\u2029]", "ab\u{2028}"), Some((2, 3)));
    assert_eq!(first_uc16(&mut rt, &p, "[\\n\\r\\u2028\\u2029]", "a\u{2029}"), Some((1, 2)));
    assert_eq!(first_latin1(&mut rt, &p, "[\\n\\r\\u2028\\u2029]", b"x\r"), Some((1, 2)));
    assert_eq!(first_latin1(&mut rt, &p, "[\\n\\r\\u2028\\u2029]", b"\x0b\x0c"), None);

    let p = class(StandardCharacterSet::NotLineTerminator);
    assert_eq!(first_uc16(&mut rt, &p, ".", "\n\u{2028}z"), Some((2, 3)));
}

#[test]
fn bit_table() {
    let mut table = vec![0u8; 128];
    table['q' as usize] = 1;
    table['5' as usize] = 1;
    let p = one_char_on_hit(move |p, hit| {
        p.emit(Insn::CheckBitInTable { table, on_bit_set: Some(hit) });
    });
    let mut rt = runtime();
    assert_eq!(first_latin1(&mut rt, &p, "[q5]", b"ab5"), Some((2, 3)));
    // Only the low bits index the table.
    assert_eq!(first_uc16(&mut rt, &p, "[q5]", "\u{f1}"), Some((0, 1)));
}

#[test]
fn masked_comparisons() {
    let mut rt = runtime();
    // Upper and lower case ASCII letters differ only in bit 5.
    let p = one_char(|p| {
        p.emit(Insn::CheckNotCharacterAfterAnd {
            c: 'K' as u32,
            mask: !0x20,
            on_not_equal: None,
        });
    });
    assert_eq!(first_latin1(&mut rt, &p, "k/i", b"ak"), Some((1, 2)));
    assert_eq!(first_latin1(&mut rt, &p, "k/i", b"Kk"), Some((0, 1)));

    let p = one_char_on_hit(|p, hit| {
        p.emit(Insn::CheckCharacterAfterAnd { c: 0, mask: 0x80, on_equal: Some(hit) });
    });
    assert_eq!(first_latin1(&mut rt, &p, "[\\0-\\x7f]", b"\xff\xfe!"), Some((2, 3)));

    // 'c' - 'a' == 2, and the mask folds in 'C' - 'A' too.
    let p = one_char(|p| {
        p.emit(Insn::CheckNotCharacterAfterMinusAnd {
            c: 2,
            minus: 'A' as u32,
            mask: !0x20,
            on_not_equal: None,
        });
    });
    assert_eq!(first_latin1(&mut rt, &p, "c/i-minus", b"bC"), Some((1, 2)));
    assert_eq!(first_latin1(&mut rt, &p, "c/i-minus", b"xyc"), Some((2, 3)));
}

#[test]
fn range_and_ordering_checks() {
    let mut rt = runtime();
    let p = one_char_on_hit(|p, hit| {
        p.emit(Insn::CheckCharacterInRange { from: '0' as u32, to: '3' as u32, on_in_range: Some(hit) });
    });
    assert_eq!(first_latin1(&mut rt, &p, "[0-3]", b"942"), Some((2, 3)));

    let p = one_char(|p| {
        p.emit(Insn::CheckCharacterNotInRange {
            from: 'a' as u32,
            to: 'f' as u32,
            on_not_in_range: None,
        });
    });
    assert_eq!(first_latin1(&mut rt, &p, "[a-f]", b"zze"), Some((2, 3)));

    let p = one_char_on_hit(|p, hit| {
        p.emit(Insn::CheckCharacterGt { limit: 0xff, on_greater: Some(hit) });
    });
    assert_eq!(first_uc16(&mut rt, &p, "[^\\0-\\xff]", "\u{ff}\u{100}"), Some((1, 2)));

    let p = one_char_on_hit(|p, hit| {
        p.emit(Insn::CheckCharacterLt { limit: 'a' as u32, on_less: Some(hit) });
    });
    assert_eq!(first_latin1(&mut rt, &p, "[\\0-`]", b"ab`"), Some((2, 3)));

    let p = one_char_on_hit(|p, hit| {
        p.emit(Insn::CheckCharacter { c: 'y' as u32, on_equal: Some(hit) });
    });
    assert_eq!(first_latin1(&mut rt, &p, "y", b"xy"), Some((1, 2)));
}

#[test]
fn everything_accepts_any_character() {
    let mut rt = runtime();
    let p = class(StandardCharacterSet::Everything);
    assert_eq!(first_uc16(&mut rt, &p, "[^]", "\u{ffff}"), Some((0, 1)));
    assert_eq!(first_latin1(&mut rt, &p, "[^]", b""), None);
}
