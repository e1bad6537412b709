/// A named slot in a matcher's native stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSlot {
    // Above the frame pointer.
    SavedFramePointer,
    ReturnAddress,
    DirectCall,
    RuntimeContext,

    // Below the frame pointer: incoming parameters.
    InputString,
    StartIndex,
    InputStart,
    InputEnd,
    Output,
    NumOutputRegisters,

    /// A callee-saved register, by hardware number.
    CalleeSaved(u8),

    // Bookkeeping.
    SuccessfulCaptures,
    StringStartMinusOne,
    BacktrackCount,
    /// Backtrack stack base, as an offset from the stack's top.
    StackBasePointer,
}

/// Frame descriptor: maps each [`FrameSlot`] to its offset from the frame
/// pointer.
///
/// `above` lists slots at increasing addresses starting at the frame
/// pointer itself; `below` lists slots at decreasing addresses starting
/// one word below it. Capture registers follow the last `below` slot and
/// grow downward.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    word_size: i32,
    above: Vec<FrameSlot>,
    below: Vec<FrameSlot>,
}

impl FrameLayout {
    pub fn new(word_size: i32, above: &[FrameSlot], below: &[FrameSlot]) -> Self {
        let layout = Self {
            word_size,
            above: above.to_vec(),
            below: below.to_vec(),
        };
        for (i, slot) in layout.above.iter().chain(layout.below.iter()).enumerate() {
            let dup = layout
                .above
                .iter()
                .chain(layout.below.iter())
                .skip(i + 1)
                .any(|s| s == slot);
            assert!(!dup, "frame slot {:?} listed twice", slot);
        }
        layout
    }

    #[inline]
    pub fn word_size(&self) -> i32 {
        self.word_size
    }

    /// Offset of `slot` from the frame pointer, if the layout has it.
    pub fn try_offset(&self, slot: FrameSlot) -> Option<i32> {
        if let Some(i) = self.above.iter().position(|&s| s == slot) {
            return Some(i as i32 * self.word_size);
        }
        self.below
            .iter()
            .position(|&s| s == slot)
            .map(|i| -(i as i32 + 1) * self.word_size)
    }

    /// Offset of `slot` from the frame pointer.
    ///
    /// Panics if the layout has no such slot: code generators only ask for
    /// slots their own layout declares.
    pub fn offset(&self, slot: FrameSlot) -> i32 {
        match self.try_offset(slot) {
            Some(off) => off,
            None => panic!("frame layout has no {:?} slot", slot),
        }
    }

    /// Offset of capture register `index` from the frame pointer.
    pub fn register_offset(&self, index: usize) -> i32 {
        -((self.below.len() + 1 + index) as i32) * self.word_size
    }

    /// Bytes between the frame pointer and the lowest fixed slot.
    pub fn fixed_below_size(&self) -> usize {
        self.below.len() * self.word_size as usize
    }

    /// Bytes the register file occupies below the fixed slots.
    pub fn register_file_size(&self, num_registers: usize) -> usize {
        num_registers * self.word_size as usize
    }

    pub fn slots_below(&self) -> &[FrameSlot] {
        &self.below
    }

    pub fn slots_above(&self) -> &[FrameSlot] {
        &self.above
    }
}
