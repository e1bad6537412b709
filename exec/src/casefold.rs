//! Case-insensitive character comparison used by backreferences.

fn single<I: Iterator<Item = char>>(mut it: I) -> Option<char> {
    let c = it.next()?;
    it.next().is_none().then_some(c)
}

/// Canonical form of `c` for case-insensitive matching.
///
/// Unicode mode uses simple case folding. Otherwise `c` is uppercased,
/// except that a character never maps into ASCII from outside it and
/// multi-character expansions leave `c` alone. Surrogates and other
/// non-scalar values are their own canonical form.
pub fn canonicalize(c: u32, unicode: bool) -> u32 {
    let Some(ch) = char::from_u32(c) else {
        return c;
    };
    if unicode {
        let upper = single(ch.to_uppercase()).unwrap_or(ch);
        return single(upper.to_lowercase()).unwrap_or(upper) as u32;
    }
    match single(ch.to_uppercase()) {
        Some(u) if c >= 128 && (u as u32) < 128 => c,
        Some(u) => u as u32,
        None => c,
    }
}

/// Code points of a UTF-16 sequence, pairing surrogates. Unpaired
/// surrogates come through as themselves.
fn code_points(units: &[u16]) -> impl Iterator<Item = u32> + '_ {
    char::decode_utf16(units.iter().copied()).map(|r| match r {
        Ok(c) => c as u32,
        Err(e) => u32::from(e.unpaired_surrogate()),
    })
}

fn equal_folded<A, B>(a: A, b: B, unicode: bool) -> bool
where
    A: Iterator<Item = u32>,
    B: Iterator<Item = u32>,
{
    a.map(|c| canonicalize(c, unicode))
        .eq(b.map(|c| canonicalize(c, unicode)))
}

pub fn equal_ignore_case_latin1(a: &[u8], b: &[u8], unicode: bool) -> bool {
    a.len() == b.len()
        && equal_folded(
            a.iter().map(|&c| u32::from(c)),
            b.iter().map(|&c| u32::from(c)),
            unicode,
        )
}

/// In unicode mode surrogate pairs compare as single code points;
/// otherwise code units compare one by one.
pub fn equal_ignore_case_uc16(a: &[u16], b: &[u16], unicode: bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if unicode {
        equal_folded(code_points(a), code_points(b), true)
    } else {
        equal_folded(
            a.iter().map(|&c| u32::from(c)),
            b.iter().map(|&c| u32::from(c)),
            false,
        )
    }
}
