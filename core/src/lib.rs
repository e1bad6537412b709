pub mod error;
pub mod frame;
pub mod label;
pub mod op;
pub mod runtime;
pub mod types;

pub use error::CompileError;
pub use frame::{FrameLayout, FrameSlot};
pub use label::{Label, LabelTable, LabelUse, RelocKind};
pub use op::{Insn, Program};
pub use runtime::{NativeEntry, RuntimeContext};
pub use types::{
    CallOrigin, CharacterRange, CompileOptions, GlobalMode, Implementation, Mode, NativeStatus,
    StackCheckFlag, StandardCharacterSet,
};
