pub mod emitter;
pub mod masm;
pub mod regs;

pub use masm::RegExpMacroAssemblerX64;
pub use masm::STACK_LIMIT_SLACK;
pub use regs::{frame_layout, saved_register, Reg, Role};
