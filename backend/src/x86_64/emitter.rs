//! x86-64 encodings used by generated matchers.
//!
//! Every instruction that takes a ModR/M operand goes through [`encode`]:
//! a register, or a `[base + index << shift + disp]` memory operand.
//! Branches carry 32-bit displacements so the label table can patch them.

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::Reg;

/// `0x0F` escape byte before the opcode.
const P_EXT: u32 = 0x100;
/// REX.W: 64-bit operand size.
const P_REXW: u32 = 0x1000;

pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSLQ: u32 = 0x63 | P_REXW;

const OPC_ALU_IMM8: u32 = 0x83;
const OPC_ALU_IMM32: u32 = 0x81;
/// `op r/m, reg`; the ALU operation is added in bits 3..6.
const OPC_ALU_STORE: u32 = 0x01;
/// `op reg, r/m`.
const OPC_ALU_LOAD: u32 = 0x03;
const OPC_SHIFT_BY_1: u32 = 0xD1;
const OPC_SHIFT_IMM: u32 = 0xC1;
const OPC_MOV_STORE: u32 = 0x89;
const OPC_MOV_LOAD: u32 = 0x8B;
const OPC_MOV_IMM32: u32 = 0xC7;
const OPC_MOV_IMM_REG: u32 = 0xB8;
const OPC_XOR_STORE: u32 = 0x31;
const OPC_LEA: u32 = 0x8D;
const OPC_TEST: u32 = 0x85;
const OPC_GROUP3: u32 = 0xF7;
const OPC_GROUP5: u32 = 0xFF;
const OPC_PUSH_REG: u32 = 0x50;
const OPC_POP_REG: u32 = 0x58;
const OPC_PUSH_IMM8: u8 = 0x6A;
const OPC_PUSH_IMM32: u8 = 0x68;
const OPC_RET: u8 = 0xC3;

// ModR/M reg-field extensions of the group opcodes.
const GROUP3_TEST: u8 = 0;
const GROUP3_NEG: u8 = 3;
const GROUP5_INC: u8 = 0;
const GROUP5_CALL: u8 = 2;
const GROUP5_JMP: u8 = 4;

/// ALU operations, numbered as in the `0x81`/`0x83` reg field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Condition codes, in `Jcc` encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

/// Branches with a 32-bit displacement relative to the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Jmp,
    Jcc(X86Cond),
    Call,
}

/// `[base + (index << shift) + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mem {
    base: Reg,
    index: Option<(Reg, u8)>,
    disp: i32,
}

impl Mem {
    fn at(base: Reg, disp: i32) -> Self {
        Self { base, index: None, disp }
    }

    fn indexed(base: Reg, index: Reg, shift: u8, disp: i32) -> Self {
        debug_assert!(index != Reg::Rsp, "rsp cannot index memory");
        Self {
            base,
            index: Some((index, shift)),
            disp,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operand {
    Reg(Reg),
    Mem(Mem),
}

fn width(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// REX prefix (when any bit is needed), escape byte and opcode. `r`, `x`
/// and `b` are the full register numbers extended by REX.R/X/B.
fn emit_opcode(buf: &mut CodeBuffer, opc: u32, r: u8, x: u8, b: u8) {
    let w = if opc & P_REXW != 0 { 0x08 } else { 0 };
    let rex = w | ((r >> 3) << 2) | ((x >> 3) << 1) | (b >> 3);
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// ModR/M, optional SIB and displacement of a memory operand.
fn emit_mem(buf: &mut CodeBuffer, reg: u8, m: Mem) {
    let base = m.base.low3();
    // No displacement-free form exists with rbp/r13 as base.
    let mode = if m.disp == 0 && base != 5 {
        0
    } else if i8::try_from(m.disp).is_ok() {
        1
    } else {
        2
    };
    match m.index {
        Some((index, shift)) => {
            buf.emit_u8(modrm(mode, reg, 4));
            buf.emit_u8((shift << 6) | (index.low3() << 3) | base);
        }
        // rsp/r12 as base always need a SIB byte.
        None if base == 4 => {
            buf.emit_u8(modrm(mode, reg, 4));
            buf.emit_u8(0x24);
        }
        None => buf.emit_u8(modrm(mode, reg, base)),
    }
    match mode {
        1 => buf.emit_u8(m.disp as u8),
        2 => buf.emit_u32(m.disp as u32),
        _ => {}
    }
}

/// Opcode followed by its ModR/M operand. `field` is the reg field: a
/// register number or a group extension.
fn encode(buf: &mut CodeBuffer, opc: u32, field: u8, rm: Operand) {
    match rm {
        Operand::Reg(r) => {
            emit_opcode(buf, opc, field, 0, r as u8);
            buf.emit_u8(modrm(3, field, r.low3()));
        }
        Operand::Mem(m) => {
            let x = m.index.map_or(0, |(i, _)| i as u8);
            emit_opcode(buf, opc, field, x, m.base as u8);
            emit_mem(buf, field, m);
        }
    }
}

/// Opcode with the register in its low three bits.
fn encode_short(buf: &mut CodeBuffer, opc: u32, reg: Reg) {
    emit_opcode(buf, opc + reg.low3() as u32, 0, 0, reg as u8);
}

fn alu(op: ArithOp, base_opc: u32, rexw: bool) -> u32 {
    (base_opc + ((op as u32) << 3)) | width(rexw)
}

/// ALU op with an immediate, using the short form when it fits.
fn encode_alu_imm(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, rm: Operand, imm: i32) {
    match i8::try_from(imm) {
        Ok(imm8) => {
            encode(buf, OPC_ALU_IMM8 | width(rexw), op as u8, rm);
            buf.emit_u8(imm8 as u8);
        }
        Err(_) => {
            encode(buf, OPC_ALU_IMM32 | width(rexw), op as u8, rm);
            buf.emit_u32(imm as u32);
        }
    }
}

// -- ALU --

/// `op dst, src`
pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    encode(buf, alu(op, OPC_ALU_LOAD, rexw), dst as u8, Operand::Reg(src));
}

pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    encode_alu_imm(buf, op, rexw, Operand::Reg(dst), imm);
}

/// `op [base + offset], src`
pub fn emit_arith_mr(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    base: Reg,
    offset: i32,
    src: Reg,
) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, alu(op, OPC_ALU_STORE, rexw), src as u8, mem);
}

/// `op dst, [base + offset]`
pub fn emit_arith_rm(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    dst: Reg,
    base: Reg,
    offset: i32,
) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, alu(op, OPC_ALU_LOAD, rexw), dst as u8, mem);
}

pub fn emit_arith_mi(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    base: Reg,
    offset: i32,
    imm: i32,
) {
    encode_alu_imm(buf, op, rexw, Operand::Mem(Mem::at(base, offset)), imm);
}

pub fn emit_neg(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    encode(buf, OPC_GROUP3 | width(rexw), GROUP3_NEG, Operand::Reg(reg));
}

pub fn emit_inc_m(buf: &mut CodeBuffer, rexw: bool, base: Reg, offset: i32) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, OPC_GROUP5 | width(rexw), GROUP5_INC, mem);
}

pub fn emit_shift_ri(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, dst: Reg, imm: u8) {
    if imm == 1 {
        encode(buf, OPC_SHIFT_BY_1 | width(rexw), op as u8, Operand::Reg(dst));
    } else {
        encode(buf, OPC_SHIFT_IMM | width(rexw), op as u8, Operand::Reg(dst));
        buf.emit_u8(imm);
    }
}

pub fn emit_test_rr(buf: &mut CodeBuffer, rexw: bool, r1: Reg, r2: Reg) {
    encode(buf, OPC_TEST | width(rexw), r1 as u8, Operand::Reg(r2));
}

pub fn emit_test_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, imm: u32) {
    encode(buf, OPC_GROUP3 | width(rexw), GROUP3_TEST, Operand::Reg(reg));
    buf.emit_u32(imm);
}

// -- Moves --

pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    encode(buf, OPC_MOV_STORE | width(rexw), src as u8, Operand::Reg(dst));
}

/// Load `val` with the shortest encoding: `xor` for zero, a zero-extended
/// 32-bit move, a sign-extended 32-bit immediate, or a full `movabs`.
pub fn emit_mov_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        encode(buf, OPC_XOR_STORE, reg as u8, Operand::Reg(reg));
    } else if !rexw || u32::try_from(val).is_ok() {
        encode_short(buf, OPC_MOV_IMM_REG, reg);
        buf.emit_u32(val as u32);
    } else if let Ok(imm) = i32::try_from(val as i64) {
        encode(buf, OPC_MOV_IMM32 | P_REXW, 0, Operand::Reg(reg));
        buf.emit_u32(imm as u32);
    } else {
        encode_short(buf, OPC_MOV_IMM_REG | P_REXW, reg);
        buf.emit_u64(val);
    }
}

/// `mov dst, [base + offset]`
pub fn emit_load(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, OPC_MOV_LOAD | width(rexw), dst as u8, mem);
}

/// `mov dst, [base + (index << shift) + offset]`
pub fn emit_load_sib(
    buf: &mut CodeBuffer,
    rexw: bool,
    dst: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    let mem = Operand::Mem(Mem::indexed(base, index, shift, offset));
    encode(buf, OPC_MOV_LOAD | width(rexw), dst as u8, mem);
}

/// `mov [base + offset], src`
pub fn emit_store(buf: &mut CodeBuffer, rexw: bool, src: Reg, base: Reg, offset: i32) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, OPC_MOV_STORE | width(rexw), src as u8, mem);
}

/// `mov [base + offset], imm32`; the immediate is the last four bytes.
pub fn emit_store_imm(buf: &mut CodeBuffer, rexw: bool, base: Reg, offset: i32, imm: i32) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, OPC_MOV_IMM32 | width(rexw), 0, mem);
    buf.emit_u32(imm as u32);
}

pub fn emit_lea(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, offset: i32) {
    let mem = Operand::Mem(Mem::at(base, offset));
    encode(buf, OPC_LEA | width(rexw), dst as u8, mem);
}

pub fn emit_lea_sib(
    buf: &mut CodeBuffer,
    rexw: bool,
    dst: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    offset: i32,
) {
    let mem = Operand::Mem(Mem::indexed(base, index, shift, offset));
    encode(buf, OPC_LEA | width(rexw), dst as u8, mem);
}

/// Zero-extending load; `opc` is [`OPC_MOVZBL`] or [`OPC_MOVZWL`].
pub fn emit_load_zx(buf: &mut CodeBuffer, opc: u32, dst: Reg, base: Reg, offset: i32) {
    encode(buf, opc, dst as u8, Operand::Mem(Mem::at(base, offset)));
}

/// Zero-extending load of a character at `[base + index + offset]`.
pub fn emit_load_zx_sib(
    buf: &mut CodeBuffer,
    opc: u32,
    dst: Reg,
    base: Reg,
    index: Reg,
    offset: i32,
) {
    let mem = Operand::Mem(Mem::indexed(base, index, 0, offset));
    encode(buf, opc, dst as u8, mem);
}

/// Sign-extending load; `opc` is [`OPC_MOVSLQ`].
pub fn emit_load_sx(buf: &mut CodeBuffer, opc: u32, dst: Reg, base: Reg, offset: i32) {
    encode(buf, opc, dst as u8, Operand::Mem(Mem::at(base, offset)));
}

// -- Control flow --

/// Opcode bytes of `branch`; the displacement follows.
pub fn emit_branch_opcode(buf: &mut CodeBuffer, branch: Branch) {
    match branch {
        Branch::Jmp => buf.emit_u8(0xE9),
        Branch::Call => buf.emit_u8(0xE8),
        Branch::Jcc(cond) => {
            buf.emit_u8(0x0F);
            buf.emit_u8(0x80 + cond as u8);
        }
    }
}

/// `branch` to code offset `target`.
pub fn emit_branch(buf: &mut CodeBuffer, branch: Branch, target: usize) {
    emit_branch_opcode(buf, branch);
    let next = buf.offset() + 4;
    buf.emit_u32((target as i64 - next as i64) as u32);
}

pub fn emit_jmp_reg(buf: &mut CodeBuffer, reg: Reg) {
    encode(buf, OPC_GROUP5, GROUP5_JMP, Operand::Reg(reg));
}

/// `call [base + offset]`
pub fn emit_call_mem(buf: &mut CodeBuffer, base: Reg, offset: i32) {
    encode(buf, OPC_GROUP5, GROUP5_CALL, Operand::Mem(Mem::at(base, offset)));
}

pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    encode_short(buf, OPC_PUSH_REG, reg);
}

pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    encode_short(buf, OPC_POP_REG, reg);
}

/// `push imm`, sign-extended to 64 bits.
pub fn emit_push_imm(buf: &mut CodeBuffer, imm: i32) {
    match i8::try_from(imm) {
        Ok(imm8) => {
            buf.emit_u8(OPC_PUSH_IMM8);
            buf.emit_u8(imm8 as u8);
        }
        Err(_) => {
            buf.emit_u8(OPC_PUSH_IMM32);
            buf.emit_u32(imm as u32);
        }
    }
}

pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(OPC_RET);
}
