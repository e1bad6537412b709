use rejit_backend::code_buffer::CodeBuffer;

#[test]
fn emit_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0x90); // NOP
    buf.emit_u32(0xDEADBEEF);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), 0xDEADBEEF);
}

#[test]
fn patch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    buf.patch_u32(0, 0x12345678);
    assert_eq!(buf.read_u32(0), 0x12345678);
}

#[test]
fn permissions() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0xC3);
    buf.set_executable().unwrap();
    assert!(buf.is_executable());
    buf.set_writable().unwrap();
    assert!(!buf.is_executable());
}

#[test]
fn grows_past_initial_capacity() {
    let mut buf = CodeBuffer::new(16).unwrap();
    let cap = buf.capacity();
    for i in 0..cap + 100 {
        buf.emit_u8(i as u8);
    }
    assert_eq!(buf.offset(), cap + 100);
    assert!(buf.capacity() > cap);
    assert_eq!(buf.as_slice()[cap + 99], (cap + 99) as u8);
}

#[test]
fn empty_buffer_maps_on_first_write() {
    let mut buf = CodeBuffer::empty();
    assert!(buf.as_slice().is_empty());
    buf.emit_bytes(&[1, 2, 3]);
    assert_eq!(buf.as_slice(), &[1, 2, 3]);
}

#[test]
fn relocated_copy_moves_bytes() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_bytes(&[0x55, 0x48, 0x89, 0xE5, 0xC3]);
    buf.set_executable().unwrap();
    let copy = buf.relocated_copy().unwrap();
    assert_ne!(copy.base_ptr(), buf.base_ptr());
    assert_eq!(copy.as_slice(), buf.as_slice());
    assert!(copy.is_executable());
    let addr = copy.base_ptr() as usize;
    assert!(copy.contains(addr + 4));
    assert!(!copy.contains(addr + 5));
    assert!(!buf.contains(addr));
}
