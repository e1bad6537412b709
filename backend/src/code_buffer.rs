use std::io;
use std::ptr;

/// Initial capacity of a matcher's code buffer.
const DEFAULT_CODE_BUF_SIZE: usize = 4096;

/// JIT code buffer backed by mmap'd memory.
///
/// Follows W^X discipline: the buffer is either writable or executable,
/// never both. While writable it grows on demand (the contents move, so
/// nothing may hold absolute addresses into it until it is frozen).
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    executable: bool,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a new code buffer of the given size (rounded up to page size).
    pub fn new(size: usize) -> io::Result<Self> {
        let size = round_to_page(size.max(1));
        let ptr = map_rw(size)?;
        Ok(Self {
            ptr,
            size,
            offset: 0,
            executable: false,
        })
    }

    /// Allocate with the default size.
    pub fn with_default_size() -> io::Result<Self> {
        Self::new(DEFAULT_CODE_BUF_SIZE)
    }

    /// A buffer with no backing memory. Maps pages on first write.
    pub fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            size: 0,
            offset: 0,
            executable: false,
        }
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Raw pointer to the start of the buffer.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    #[inline]
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Whether `addr` points into the emitted code.
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.ptr as usize;
        !self.ptr.is_null() && addr >= base && addr < base + self.offset
    }

    /// Make room for `n` more bytes, moving the contents if needed.
    fn reserve(&mut self, n: usize) {
        if self.offset + n <= self.size {
            return;
        }
        assert!(!self.executable, "write to executable code buffer");
        let new_size = round_to_page((self.size * 2).max(self.offset + n).max(DEFAULT_CODE_BUF_SIZE));
        let new_ptr = match map_rw(new_size) {
            Ok(p) => p,
            Err(e) => panic!("code buffer growth failed: {}", e),
        };
        if !self.ptr.is_null() {
            // SAFETY: both regions are live and at least `offset` bytes long.
            unsafe {
                ptr::copy_nonoverlapping(self.ptr, new_ptr, self.offset);
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
        self.ptr = new_ptr;
        self.size = new_size;
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.reserve(1);
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.reserve(4);
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.reserve(8);
        unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
        self.offset += 8;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.reserve(data.len());
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(self.offset), data.len());
        }
        self.offset += data.len();
    }

    /// Patch a u32 at the given offset (label back-patching).
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.offset, "patch outside emitted code");
        assert!(!self.executable, "patch of executable code buffer");
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    /// Read a u32 at the given offset.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.offset);
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    // -- Permission management (W^X) --

    /// Make the buffer executable and non-writable.
    pub fn set_executable(&mut self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        self.executable = true;
        Ok(())
    }

    /// Make the buffer writable and non-executable.
    pub fn set_writable(&mut self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        self.executable = false;
        Ok(())
    }

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        if self.ptr.is_null() {
            return Ok(());
        }
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Copy the emitted code into a fresh mapping with the same
    /// protection. The copy is exact: generated code holds no absolute
    /// addresses into itself.
    pub fn relocated_copy(&self) -> io::Result<Self> {
        let mut copy = Self::new(self.offset)?;
        // SAFETY: `copy` was just mapped with at least `offset` bytes.
        unsafe { ptr::copy_nonoverlapping(self.ptr, copy.ptr, self.offset) };
        copy.offset = self.offset;
        if self.executable {
            copy.set_executable()?;
        }
        Ok(copy)
    }

    /// Get the generated code as a byte slice (up to current offset).
    pub fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        // SAFETY: ptr..ptr+offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn map_rw(size: usize) -> io::Result<*mut u8> {
    // SAFETY: mmap with MAP_ANONYMOUS | MAP_PRIVATE, no file backing.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

fn round_to_page(size: usize) -> usize {
    let page_size = page_size();
    (size + page_size - 1) & !(page_size - 1)
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
