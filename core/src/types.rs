/// Subject encoding a compiled matcher reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    /// One byte per character.
    Latin1 = 1,
    /// Two bytes per character (UTF-16 code units).
    Uc16 = 2,
}

impl Mode {
    /// Bytes per character.
    #[inline]
    pub const fn char_size(self) -> i32 {
        self as i32
    }

    /// Largest character value representable in this mode.
    #[inline]
    pub const fn max_char(self) -> u32 {
        match self {
            Mode::Latin1 => 0xFF,
            Mode::Uc16 => 0xFFFF,
        }
    }
}

/// Whether a push must be followed by a backtrack stack limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackCheckFlag {
    NoStackLimitCheck,
    CheckStackLimit,
}

/// Global (repeated) matching behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GlobalMode {
    #[default]
    NotGlobal,
    /// Restart after each match; an empty match advances one character.
    Global,
    /// Restart after each match; the pattern can never match empty.
    GlobalNoZeroLengthCheck,
    /// Like `Global`, but an empty match never splits a surrogate pair.
    GlobalUnicode,
}

impl GlobalMode {
    #[inline]
    pub fn is_global(self) -> bool {
        self != GlobalMode::NotGlobal
    }
}

/// Character classes that backends may test with a hand-written sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardCharacterSet {
    /// `\s`
    Whitespace,
    /// `\S`
    NotWhitespace,
    /// `\w`
    Word,
    /// `\W`
    NotWord,
    /// `\d`
    Digit,
    /// `\D`
    NotDigit,
    /// `\n`, `\r`, U+2028 and U+2029.
    LineTerminator,
    /// `.` without the dot-all flag.
    NotLineTerminator,
    /// Any character.
    Everything,
}

/// Inclusive character range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharacterRange {
    pub from: u32,
    pub to: u32,
}

impl CharacterRange {
    pub const fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    pub const fn singleton(c: u32) -> Self {
        Self { from: c, to: c }
    }

    #[inline]
    pub fn contains(&self, c: u32) -> bool {
        self.from <= c && c <= self.to
    }
}

/// Which kind of caller entered the generated code.
///
/// A direct call comes from a context that cannot service interrupts in
/// place, so a firing preemption poll must unwind with `RETRY` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum CallOrigin {
    FromRuntime = 0,
    FromDirect = 1,
}

/// Raw status values returned by generated code.
pub mod status {
    pub const FAILURE: i64 = 0;
    pub const SUCCESS: i64 = 1;
    /// Backtrack stack overflow or native stack exhaustion.
    pub const EXCEPTION: i64 = -1;
    /// Cooperative abort; the host must handle interrupts and re-run.
    pub const RETRY: i64 = -2;
    /// Backtrack limit exceeded; fall back to another engine.
    pub const FALLBACK_TO_EXPERIMENTAL: i64 = -3;
}

/// Decoded outcome of one native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    /// Number of capture sets written (always 1 outside global mode).
    Success(u32),
    Failure,
    Exception,
    Retry,
    FallbackToExperimental,
}

impl NativeStatus {
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            status::FAILURE => Some(NativeStatus::Failure),
            status::EXCEPTION => Some(NativeStatus::Exception),
            status::RETRY => Some(NativeStatus::Retry),
            status::FALLBACK_TO_EXPERIMENTAL => Some(NativeStatus::FallbackToExperimental),
            n if n > 0 && n <= u32::MAX as i64 => Some(NativeStatus::Success(n as u32)),
            _ => None,
        }
    }
}

/// Which native backend produced a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implementation {
    X64,
}

/// Options that shape one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    pub mode: Mode,
    pub global_mode: GlobalMode,
    /// Maximum number of backtracks before giving up.
    pub backtrack_limit: Option<u32>,
    /// On hitting the limit, report fallback instead of failure.
    pub can_fallback: bool,
}

impl CompileOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            global_mode: GlobalMode::NotGlobal,
            backtrack_limit: None,
            can_fallback: false,
        }
    }

    pub fn with_global_mode(mut self, global_mode: GlobalMode) -> Self {
        self.global_mode = global_mode;
        self
    }

    pub fn with_backtrack_limit(mut self, limit: u32, can_fallback: bool) -> Self {
        self.backtrack_limit = Some(limit);
        self.can_fallback = can_fallback;
        self
    }
}

/// Highest register index a matcher may use.
pub const MAX_REGISTER: usize = (1 << 16) - 1;

/// Largest range array the generated code hands to the runtime lookup.
pub const MAX_RANGE_ARRAY_SIZE: usize = 128;

/// Size of the tables consulted by `check_bit_in_table`.
pub const TABLE_SIZE: usize = 128;
pub const TABLE_MASK: u32 = TABLE_SIZE as u32 - 1;

/// Value a capture register holds before it is set, after conversion.
pub const UNSET_CAPTURE: i32 = -1;
