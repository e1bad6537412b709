//! Runtime entry points called from generated code.
//!
//! Each function reaches the owning runtime through
//! [`RuntimeContext::host`]. They run while the matcher's frame is live,
//! so they must not unwind.

use log::{debug, error, trace, warn};
use rejit_backend::x86_64::frame_layout;
use rejit_core::runtime::{RuntimeContext, COMPARE_UC16, COMPARE_UNICODE};
use rejit_core::types::status;
use rejit_core::{CallOrigin, FrameSlot};

use crate::casefold::{equal_ignore_case_latin1, equal_ignore_case_uc16};
use crate::interrupt::InterruptFlags;
use crate::ranges::is_in_range_array;
use crate::HostState;

/// Status telling generated code to carry on after a poll.
const CONTINUE: i64 = 0;

/// Translate a return address into a moved code object. `None` when the
/// address does not point into the old object.
pub fn rebase_return_address(
    addr: usize,
    old_base: usize,
    new_base: usize,
    len: usize,
) -> Option<usize> {
    let offset = addr.checked_sub(old_base)?;
    (offset < len).then(|| new_base + offset)
}

fn fatal(msg: std::fmt::Arguments<'_>) -> ! {
    error!("{}", msg);
    std::process::abort()
}

unsafe fn frame_word(frame: *mut u8, slot: FrameSlot) -> usize {
    let offset = frame_layout().offset(slot) as isize;
    *(frame.offset(offset) as *const usize)
}

unsafe fn host<'a>(ctx: *mut RuntimeContext) -> &'a mut HostState {
    &mut *((*ctx).host as *mut HostState)
}

/// Preemption poll handler.
///
/// `return_address` points at the return address of this very call, inside
/// the running code; it is rewritten when the code moves. Returns 0 to
/// continue, `RETRY` to unwind for the host retry loop, or `EXCEPTION`
/// when the native stack is exhausted.
pub(crate) unsafe extern "C" fn check_stack_guard_state(
    return_address: *mut usize,
    code_base: usize,
    frame: *mut u8,
) -> i64 {
    let ctx = frame_word(frame, FrameSlot::RuntimeContext) as *mut RuntimeContext;
    let direct = frame_word(frame, FrameSlot::DirectCall) as i64 == CallOrigin::FromDirect as i64;
    let host = host(ctx);
    host.stats.polls += 1;

    let Some(handle) = host.running else {
        fatal(format_args!("stack guard check with no running matcher"));
    };
    let (base, len) = match host.code.get(handle) {
        Some(code) => (code.base(), code.len()),
        None => fatal(format_args!("running matcher {:?} was removed", handle)),
    };
    if base != code_base || !(base..base + len).contains(&*return_address) {
        fatal(format_args!(
            "stale code address: return {:#x}, code base {:#x}, live object at {:#x}",
            *return_address, code_base, base
        ));
    }

    // The register file lies below the frame pointer; the return address
    // slot marks the low end of everything the matcher has pushed.
    let low = return_address as usize;
    if low <= host.guard.native_limit() {
        debug!("native stack exhausted at {:#x}", low);
        return status::EXCEPTION;
    }

    trace!(
        "poll: direct={} pending={:?} stress={}",
        direct,
        host.guard.pending(),
        host.guard.is_stress()
    );
    if direct {
        // Nothing may move under a direct caller; let the host re-enter.
        if host.guard.has_pending() || host.guard.is_stress() {
            return status::RETRY;
        }
        return CONTINUE;
    }

    if host.guard.pending().contains(InterruptFlags::TERMINATE) {
        return status::RETRY;
    }
    if host.guard.take(InterruptFlags::RELOCATE) || host.guard.is_stress() {
        match host.code.relocate(handle) {
            Ok((old, new)) => {
                match rebase_return_address(*return_address, old, new, len) {
                    Some(addr) => *return_address = addr,
                    None => fatal(format_args!(
                        "return address {:#x} outside relocated code at {:#x}",
                        *return_address, old
                    )),
                }
                (*ctx).code_base = new;
                host.stats.relocations += 1;
            }
            Err(e) => warn!("code relocation failed, continuing in place: {}", e),
        }
    }
    (*ctx).interrupt_limit = host.guard.interrupt_limit();
    CONTINUE
}

/// Grow the backtrack stack. Returns the new stack pointer, or 0 when the
/// maximum size is reached.
pub(crate) unsafe extern "C" fn grow_stack(ctx: *mut RuntimeContext) -> usize {
    let host = host(ctx);
    match host.stack.grow((*ctx).stack_pointer) {
        Some(sp) => {
            (*ctx).stack_memory_top = host.stack.top();
            (*ctx).stack_limit = host.stack.limit();
            (*ctx).stack_pointer = sp;
            host.stats.stack_growths += 1;
            sp
        }
        None => {
            debug!("backtrack stack exhausted at {} bytes", host.stack.size());
            0
        }
    }
}

/// Compare `byte_length` bytes at `a` and `b` ignoring case. Returns 1
/// when equal.
pub(crate) unsafe extern "C" fn case_insensitive_compare(
    a: *const u8,
    b: *const u8,
    byte_length: usize,
    flags: u32,
) -> i64 {
    let unicode = flags & COMPARE_UNICODE != 0;
    let equal = if flags & COMPARE_UC16 != 0 {
        let n = byte_length / 2;
        let a = std::slice::from_raw_parts(a as *const u16, n);
        let b = std::slice::from_raw_parts(b as *const u16, n);
        equal_ignore_case_uc16(a, b, unicode)
    } else {
        let a = std::slice::from_raw_parts(a, byte_length);
        let b = std::slice::from_raw_parts(b, byte_length);
        equal_ignore_case_latin1(a, b, unicode)
    };
    i64::from(equal)
}

/// Returns 1 when `c` falls inside the ranges encoded in `boundaries`.
pub(crate) unsafe extern "C" fn is_character_in_range_array(
    c: u32,
    boundaries: *const u32,
    len: usize,
) -> i64 {
    if len == 0 {
        return 0;
    }
    let boundaries = std::slice::from_raw_parts(boundaries, len);
    i64::from(is_in_range_array(c, boundaries))
}
