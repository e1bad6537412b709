/// A branch target in generated matcher code.
///
/// Labels are cheap handles into a [`LabelTable`]. They support forward
/// references: a branch can name a label before it is bound, and the
/// assembler back-patches every recorded use once the label's offset is
/// known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl Label {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A forward reference to a label: records where a branch or an
/// embedded code offset was emitted so it can be patched once the
/// label's position is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelUse {
    /// Offset in the code buffer of the 32-bit field to patch.
    pub offset: usize,
    /// Type of relocation needed.
    pub kind: RelocKind,
}

/// Relocation types for label back-patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// x86-64 RIP-relative 32-bit displacement, measured from the end of
    /// the field.
    Rel32,
    /// Code-relative 32-bit offset of the label itself. Used for
    /// backtrack entries, which must survive the code object moving.
    CodeOffset32,
}

impl RelocKind {
    /// Value to store at `use_offset` for a label bound at `target`.
    pub fn resolve(self, use_offset: usize, target: usize) -> u32 {
        match self {
            RelocKind::Rel32 => {
                let disp = target as i64 - (use_offset as i64 + 4);
                assert!(
                    disp >= i32::MIN as i64 && disp <= i32::MAX as i64,
                    "jump displacement out of i32 range"
                );
                disp as i32 as u32
            }
            RelocKind::CodeOffset32 => {
                assert!(target <= u32::MAX as usize, "code offset out of u32 range");
                target as u32
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LabelState {
    pos: Option<usize>,
    uses: Vec<LabelUse>,
}

/// Positions and pending uses of every label allocated by one assembler.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: Vec<LabelState>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(LabelState::default());
        Label(id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Bound position, if any.
    pub fn pos(&self, label: Label) -> Option<usize> {
        self.labels[label.index()].pos
    }

    pub fn is_bound(&self, label: Label) -> bool {
        self.pos(label).is_some()
    }

    /// Whether the label is unbound and has been referenced.
    pub fn is_linked(&self, label: Label) -> bool {
        let state = &self.labels[label.index()];
        state.pos.is_none() && !state.uses.is_empty()
    }

    /// Record a forward reference to an unbound label.
    pub fn add_use(&mut self, label: Label, offset: usize, kind: RelocKind) {
        let state = &mut self.labels[label.index()];
        assert!(state.pos.is_none(), "use recorded against bound label {}", label.0);
        state.uses.push(LabelUse { offset, kind });
    }

    /// Bind `label` at `pos` and hand back the uses that now need patching.
    ///
    /// Panics if the label is already bound: a label names exactly one
    /// program point.
    pub fn bind(&mut self, label: Label, pos: usize) -> Vec<LabelUse> {
        let state = &mut self.labels[label.index()];
        assert!(state.pos.is_none(), "label {} bound twice", label.0);
        state.pos = Some(pos);
        std::mem::take(&mut state.uses)
    }

    /// First label that is still referenced but was never bound.
    pub fn first_unresolved(&self) -> Option<Label> {
        self.labels
            .iter()
            .position(|s| s.pos.is_none() && !s.uses.is_empty())
            .map(|i| Label(i as u32))
    }

    /// Forget every pending use. Used when code generation is abandoned.
    pub fn clear_uses(&mut self) {
        for state in &mut self.labels {
            state.uses.clear();
        }
    }
}
