use rejit_backend::code_buffer::CodeBuffer;
use rejit_backend::x86_64::emitter::*;
use rejit_backend::x86_64::Reg;

fn emit(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
    let mut buf = CodeBuffer::new(4096).unwrap();
    f(&mut buf);
    buf.as_slice().to_vec()
}

#[test]
fn code_relative_return_address() {
    // sub [rsp], r15 / add [rsp], r15
    let sub = emit(|b| emit_arith_mr(b, ArithOp::Sub, true, Reg::Rsp, 0, Reg::R15));
    assert_eq!(sub, [0x4C, 0x29, 0x3C, 0x24]);
    let add = emit(|b| emit_arith_mr(b, ArithOp::Add, true, Reg::Rsp, 0, Reg::R15));
    assert_eq!(add, [0x4C, 0x01, 0x3C, 0x24]);
}

#[test]
fn push_pop() {
    assert_eq!(emit(|b| emit_push(b, Reg::Rbp)), [0x55]);
    assert_eq!(emit(|b| emit_push(b, Reg::R12)), [0x41, 0x54]);
    assert_eq!(emit(|b| emit_pop(b, Reg::R15)), [0x41, 0x5F]);
    assert_eq!(emit(|b| emit_push_imm(b, 0)), [0x6A, 0x00]);
    assert_eq!(emit(|b| emit_push_imm(b, 0x1000)), [0x68, 0x00, 0x10, 0x00, 0x00]);
}

#[test]
fn frame_access() {
    // mov rax, [rbp+24]
    assert_eq!(emit(|b| emit_load(b, true, Reg::Rax, Reg::Rbp, 24)), [0x48, 0x8B, 0x45, 0x18]);
    // lea rsp, [rbp-88]
    assert_eq!(emit(|b| emit_lea(b, true, Reg::Rsp, Reg::Rbp, -88)), [0x48, 0x8D, 0x65, 0xA8]);
    // inc qword [rbp-112]
    assert_eq!(emit(|b| emit_inc_m(b, true, Reg::Rbp, -112)), [0x48, 0xFF, 0x45, 0x90]);
    // cmp rsp, [rax]
    assert_eq!(
        emit(|b| emit_arith_rm(b, ArithOp::Cmp, true, Reg::Rsp, Reg::Rax, 0)),
        [0x48, 0x3B, 0x20]
    );
}

#[test]
fn character_load() {
    // movzx r13d, byte [r14+r12]
    assert_eq!(
        emit(|b| emit_load_zx_sib(b, OPC_MOVZBL, Reg::R13, Reg::R14, Reg::R12, 0)),
        [0x47, 0x0F, 0xB6, 0x2C, 0x26]
    );
    // movzx r13d, word [r14+r12-2]
    assert_eq!(
        emit(|b| emit_load_zx_sib(b, OPC_MOVZWL, Reg::R13, Reg::R14, Reg::R12, -2)),
        [0x47, 0x0F, 0xB7, 0x6C, 0x26, 0xFE]
    );
}

#[test]
fn backtrack_dispatch() {
    // movsxd rax, [rbx]
    assert_eq!(emit(|b| emit_load_sx(b, OPC_MOVSLQ, Reg::Rax, Reg::Rbx, 0)), [0x48, 0x63, 0x03]);
    // add rax, r15
    assert_eq!(
        emit(|b| emit_arith_rr(b, ArithOp::Add, true, Reg::Rax, Reg::R15)),
        [0x49, 0x03, 0xC7]
    );
    // jmp rax
    assert_eq!(emit(|b| emit_jmp_reg(b, Reg::Rax)), [0xFF, 0xE0]);
    // call [rax+0x40]
    assert_eq!(emit(|b| emit_call_mem(b, Reg::Rax, 0x40)), [0xFF, 0x50, 0x40]);
}

#[test]
fn immediates() {
    assert_eq!(emit(|b| emit_mov_ri(b, false, Reg::Rax, 1)), [0xB8, 0x01, 0x00, 0x00, 0x00]);
    // Zero is materialized with xor.
    assert_eq!(emit(|b| emit_mov_ri(b, false, Reg::Rax, 0)), [0x31, 0xC0]);
    assert_eq!(
        emit(|b| emit_mov_ri(b, true, Reg::Rax, u64::MAX)),
        [0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]
    );
    let abs = emit(|b| emit_mov_ri(b, true, Reg::Rsi, 0x1234_5678_9ABC));
    assert_eq!(abs[..2], [0x48, 0xBE]);
    assert_eq!(abs.len(), 10);
    // sar rax, 1
    assert_eq!(emit(|b| emit_shift_ri(b, ShiftOp::Sar, true, Reg::Rax, 1)), [0x48, 0xD1, 0xF8]);
}

#[test]
fn branches() {
    // je back to offset 0
    assert_eq!(
        emit(|b| emit_branch(b, Branch::Jcc(X86Cond::Je), 0)),
        [0x0F, 0x84, 0xFA, 0xFF, 0xFF, 0xFF]
    );
    assert_eq!(emit(|b| emit_branch(b, Branch::Jmp, 5)), [0xE9, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(emit(|b| emit_branch(b, Branch::Call, 0)), [0xE8, 0xFB, 0xFF, 0xFF, 0xFF]);
    assert_eq!(emit(|b| emit_branch_opcode(b, Branch::Jcc(X86Cond::Jle))), [0x0F, 0x8E]);
    assert_eq!(emit(emit_ret), [0xC3]);
}

#[test]
fn memory_operands() {
    // mov dword [rbx], 0x40
    assert_eq!(
        emit(|b| emit_store_imm(b, false, Reg::Rbx, 0, 0x40)),
        [0xC7, 0x03, 0x40, 0x00, 0x00, 0x00]
    );
    // mov [r12+0x200], rax needs a SIB byte and a 32-bit displacement.
    assert_eq!(
        emit(|b| emit_store(b, true, Reg::Rax, Reg::R12, 0x200)),
        [0x49, 0x89, 0x84, 0x24, 0x00, 0x02, 0x00, 0x00]
    );
    // mov eax, [r13] uses an explicit zero displacement.
    assert_eq!(emit(|b| emit_load(b, false, Reg::Rax, Reg::R13, 0)), [0x41, 0x8B, 0x45, 0x00]);
    // lea rax, [r12+rcx*2-2]
    assert_eq!(
        emit(|b| emit_lea_sib(b, true, Reg::Rax, Reg::R12, Reg::Rcx, 1, -2)),
        [0x49, 0x8D, 0x44, 0x4C, 0xFE]
    );
}
