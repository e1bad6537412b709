use log::{debug, trace};
use rejit_core::{CallOrigin, NativeStatus, RuntimeContext};

use crate::code_store::CodeHandle;
use crate::interrupt::InterruptFlags;
use crate::{HostState, MatchError};

/// Native arguments of one match attempt, validated by the caller.
pub(crate) struct NativeArgs {
    pub input_string: *const u8,
    pub start_index: usize,
    pub input_start: *const u8,
    pub input_end: *const u8,
    pub output: *mut i32,
    pub output_size: usize,
}

/// Run the matcher at `handle` until it returns something other than
/// `RETRY`.
///
/// The first attempt is a direct call. A retry re-enters from the
/// runtime, where pending interrupts can be serviced in place; a pending
/// termination ends the loop with [`MatchError::Aborted`].
///
/// # Safety
/// `host` and `ctx` must be the runtime's own state, with no outstanding
/// references, and `args` must describe live memory of the code's mode.
pub(crate) unsafe fn exec_loop(
    host: *mut HostState,
    ctx: *mut RuntimeContext,
    handle: CodeHandle,
    args: &NativeArgs,
    max_retries: u32,
    native_stack_budget: usize,
) -> Result<NativeStatus, MatchError> {
    let mut origin = CallOrigin::FromDirect;
    let mut retries = 0;

    loop {
        let entry = {
            let h = &mut *host;
            let code = h.code.get(handle).ok_or(MatchError::InvalidHandle)?;
            let entry = code.entry();
            let base = code.base();

            let marker = 0u8;
            let sp = &marker as *const u8 as usize;
            h.guard.set_native_limit(sp.saturating_sub(native_stack_budget));

            let c = &mut *ctx;
            c.code_base = base;
            c.stack_memory_top = h.stack.top();
            c.stack_limit = h.stack.limit();
            c.stack_pointer = h.stack.top();
            c.interrupt_limit = h.guard.interrupt_limit();
            h.running = Some(handle);
            h.stats.executions += 1;
            entry
        };

        let raw = entry(
            args.input_string,
            args.start_index as i64,
            args.input_start,
            args.input_end,
            args.output,
            args.output_size as i64,
            origin as i64,
            ctx,
        );

        let h = &mut *host;
        h.running = None;
        let status = NativeStatus::from_raw(raw).ok_or(MatchError::UnexpectedStatus(raw))?;
        if status != NativeStatus::Retry {
            trace!("{:?} returned {:?}", handle, status);
            return Ok(status);
        }

        h.stats.retries += 1;
        if h.guard.take(InterruptFlags::TERMINATE) {
            debug!("{:?} terminated by interrupt", handle);
            return Err(MatchError::Aborted);
        }
        if retries >= max_retries {
            debug!("{:?} gave up after {} retries", handle, retries);
            return Err(MatchError::Aborted);
        }
        retries += 1;
        origin = CallOrigin::FromRuntime;
    }
}
