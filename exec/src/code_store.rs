use std::collections::HashMap;
use std::io;

use log::debug;
use rejit_backend::NativeCode;
use rejit_core::{CompileOptions, Program};

/// Index of a compiled matcher in a [`CodeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeHandle(pub(crate) usize);

impl CodeHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct CodeEntry {
    code: NativeCode,
    program: Program,
    options: CompileOptions,
}

/// Owner of every live code object, with a cache keyed by source and
/// compile options. A cache hit also requires the same opcode program.
///
/// Handles stay valid until the entry is removed; slots of removed
/// entries are never reused.
#[derive(Default)]
pub struct CodeStore {
    entries: Vec<Option<CodeEntry>>,
    index: HashMap<(String, CompileOptions), usize>,
}

impl CodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        code: NativeCode,
        program: Program,
        options: CompileOptions,
    ) -> CodeHandle {
        let idx = self.entries.len();
        self.index.insert((code.source().to_string(), options), idx);
        self.entries.push(Some(CodeEntry { code, program, options }));
        CodeHandle(idx)
    }

    /// Previously compiled code for `program` under `source` and `options`.
    pub fn lookup(
        &self,
        source: &str,
        program: &Program,
        options: &CompileOptions,
    ) -> Option<CodeHandle> {
        let idx = *self.index.get(&(source.to_string(), *options))?;
        let entry = self.entries.get(idx)?.as_ref()?;
        (entry.program == *program).then_some(CodeHandle(idx))
    }

    pub fn get(&self, handle: CodeHandle) -> Option<&NativeCode> {
        self.entries.get(handle.0)?.as_ref().map(|e| &e.code)
    }

    pub fn get_mut(&mut self, handle: CodeHandle) -> Option<&mut NativeCode> {
        self.entries.get_mut(handle.0)?.as_mut().map(|e| &mut e.code)
    }

    pub fn options(&self, handle: CodeHandle) -> Option<&CompileOptions> {
        self.entries.get(handle.0)?.as_ref().map(|e| &e.options)
    }

    pub fn remove(&mut self, handle: CodeHandle) -> Option<NativeCode> {
        let entry = self.entries.get_mut(handle.0)?.take()?;
        let key = (entry.code.source().to_string(), entry.options);
        if self.index.get(&key) == Some(&handle.0) {
            self.index.remove(&key);
        }
        Some(entry.code)
    }

    /// Move one code object. Returns `(old_base, new_base)`.
    pub fn relocate(&mut self, handle: CodeHandle) -> io::Result<(usize, usize)> {
        let code = self
            .get_mut(handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such code object"))?;
        let (old, new) = code.relocate()?;
        debug!("relocated /{}/ from {:#x} to {:#x}", code.source(), old, new);
        Ok((old, new))
    }

    /// Move every live code object; returns how many moved.
    pub fn relocate_all(&mut self) -> io::Result<usize> {
        let handles: Vec<CodeHandle> = self.handles().collect();
        for &h in &handles {
            self.relocate(h)?;
        }
        Ok(handles.len())
    }

    pub fn handles(&self) -> impl Iterator<Item = CodeHandle> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| CodeHandle(i))
    }

    /// Number of live code objects.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of machine code across live objects.
    pub fn code_size(&self) -> usize {
        self.entries.iter().flatten().map(|e| e.code.len()).sum()
    }
}
