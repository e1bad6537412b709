use std::ffi::c_void;
use std::mem::offset_of;

/// `check_stack_guard_state(return_address, code_base, frame) -> status`.
///
/// Called from a firing preemption poll. `return_address` points at the
/// absolute return address of this very call, so the callee can repair it
/// when the code object moves. Returns 0 to continue, or a status the
/// generated code returns verbatim.
pub type CheckStackGuardStateFn =
    unsafe extern "C" fn(return_address: *mut usize, code_base: usize, frame: *mut u8) -> i64;

/// `grow_stack(ctx) -> new backtrack stack pointer`, or 0 when the
/// configured maximum would be exceeded.
pub type GrowStackFn = unsafe extern "C" fn(ctx: *mut RuntimeContext) -> usize;

/// `case_insensitive_compare(a, b, byte_length, flags) -> 1 | 0`.
pub type CaseInsensitiveCompareFn =
    unsafe extern "C" fn(a: *const u8, b: *const u8, byte_length: usize, flags: u32) -> i64;

/// `is_character_in_range_array(c, boundaries, len) -> 1 | 0`.
pub type IsCharacterInRangeArrayFn =
    unsafe extern "C" fn(c: u32, boundaries: *const u32, len: usize) -> i64;

/// Flag bits for [`CaseInsensitiveCompareFn`].
pub const COMPARE_UC16: u32 = 1 << 0;
pub const COMPARE_UNICODE: u32 = 1 << 1;

/// Host state reachable from generated code.
///
/// Generated code addresses fields by fixed offset (see the `*_OFFSET`
/// constants), so the layout is `repr(C)`. Everything a relocation or a
/// stack growth may change lives here and is reloaded by the code after
/// each runtime call.
#[repr(C)]
pub struct RuntimeContext {
    /// Native stack pointer limit polled by generated code. Set to
    /// `usize::MAX` to force the next poll to call into the runtime.
    pub interrupt_limit: usize,
    /// Start of the code object currently executing.
    pub code_base: usize,
    /// Highest address of the backtrack stack region; the stack grows down.
    pub stack_memory_top: usize,
    /// Pushes crossing this address must grow the stack.
    pub stack_limit: usize,
    /// Backtrack stack pointer, spilled around runtime calls.
    pub stack_pointer: usize,
    pub check_stack_guard_state: CheckStackGuardStateFn,
    pub grow_stack: GrowStackFn,
    pub case_insensitive_compare: CaseInsensitiveCompareFn,
    pub is_character_in_range_array: IsCharacterInRangeArrayFn,
    /// Opaque pointer for the runtime's own bookkeeping.
    pub host: *mut c_void,
}

pub const INTERRUPT_LIMIT_OFFSET: i32 = offset_of!(RuntimeContext, interrupt_limit) as i32;
pub const CODE_BASE_OFFSET: i32 = offset_of!(RuntimeContext, code_base) as i32;
pub const STACK_MEMORY_TOP_OFFSET: i32 = offset_of!(RuntimeContext, stack_memory_top) as i32;
pub const STACK_LIMIT_OFFSET: i32 = offset_of!(RuntimeContext, stack_limit) as i32;
pub const STACK_POINTER_OFFSET: i32 = offset_of!(RuntimeContext, stack_pointer) as i32;
pub const CHECK_STACK_GUARD_STATE_OFFSET: i32 =
    offset_of!(RuntimeContext, check_stack_guard_state) as i32;
pub const GROW_STACK_OFFSET: i32 = offset_of!(RuntimeContext, grow_stack) as i32;
pub const CASE_INSENSITIVE_COMPARE_OFFSET: i32 =
    offset_of!(RuntimeContext, case_insensitive_compare) as i32;
pub const IS_CHARACTER_IN_RANGE_ARRAY_OFFSET: i32 =
    offset_of!(RuntimeContext, is_character_in_range_array) as i32;

/// Entry point of a finalized matcher (System V calling convention).
///
/// Arguments 7 and 8 are passed on the native stack and land directly
/// above the return address in the frame.
pub type NativeEntry = unsafe extern "C" fn(
    input_string: *const u8,
    start_index: i64,
    input_start: *const u8,
    input_end: *const u8,
    output: *mut i32,
    output_size: i64,
    direct_call: i64,
    ctx: *mut RuntimeContext,
) -> i64;
