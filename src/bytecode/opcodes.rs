//! JVM opcodes and instruction decoding.

use super::BytecodeError;

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_5: u8 = 0x08;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ALOAD_0: u8 = 0x2a;
pub const ISTORE: u8 = 0x36;
pub const ASTORE: u8 = 0x3a;
pub const AASTORE: u8 = 0x53;
pub const DUP: u8 = 0x59;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const GETFIELD: u8 = 0xb4;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsnKind {
    Plain,
    /// `if*`, `goto`, `jsr` (16-bit offset) and `goto_w`, `jsr_w` (32-bit).
    Branch { target: u32 },
    TableSwitch { default: u32, low: i32, high: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
}

/// One decoded instruction; branch targets are absolute code offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insn {
    pub pc: u32,
    pub opcode: u8,
    pub len: u32,
    pub kind: InsnKind,
}

impl Insn {
    pub fn is_return(&self) -> bool {
        (IRETURN..=RETURN).contains(&self.opcode)
    }

    /// Control never falls through to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(self.opcode, GOTO | GOTO_W | TABLESWITCH | LOOKUPSWITCH | ATHROW | RET) || self.is_return()
    }

    pub fn is_wide_branch(&self) -> bool {
        matches!(self.opcode, GOTO_W | JSR_W)
    }
}

fn is_branch(opcode: u8) -> bool {
    (IFEQ..=JSR).contains(&opcode) || opcode == IFNULL || opcode == IFNONNULL
}

pub(crate) fn read_u2(code: &[u8], at: usize) -> Result<u16, BytecodeError> {
    match code.get(at..at + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(BytecodeError::Truncated(at as u32)),
    }
}

pub(crate) fn read_i32(code: &[u8], at: usize) -> Result<i32, BytecodeError> {
    match code.get(at..at + 4) {
        Some(b) => Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(BytecodeError::Truncated(at as u32)),
    }
}

/// Padding after a switch opcode at `pc` so its operands start 4-aligned.
pub fn switch_padding(pc: u32) -> u32 {
    (4 - (pc + 1) % 4) % 4
}

fn relative(pc: u32, offset: i32) -> Result<u32, BytecodeError> {
    let target = pc as i64 + offset as i64;
    u32::try_from(target).map_err(|_| BytecodeError::InvalidBranchTarget { pc, target })
}

/// Length of the instruction at `pc`.
pub fn instruction_length(code: &[u8], pc: u32) -> Result<u32, BytecodeError> {
    let at = pc as usize;
    let opcode = *code.get(at).ok_or(BytecodeError::Truncated(pc))?;
    let len = match opcode {
        BIPUSH | LDC | NEWARRAY | RET => 2,
        ILOAD..=ALOAD | ISTORE..=ASTORE => 2,
        SIPUSH | LDC_W | LDC2_W | IINC => 3,
        op if is_branch(op) => 3,
        GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | 0xc1 => 3,
        MULTIANEWARRAY => 4,
        INVOKEINTERFACE | INVOKEDYNAMIC | GOTO_W | JSR_W => 5,
        WIDE => match code.get(at + 1) {
            Some(&IINC) => 6,
            Some(_) => 4,
            None => return Err(BytecodeError::Truncated(pc)),
        },
        TABLESWITCH => {
            let base = at + 1 + switch_padding(pc) as usize;
            let low = read_i32(code, base + 4)? as i64;
            let high = read_i32(code, base + 8)? as i64;
            if high < low {
                return Err(BytecodeError::InvalidSwitch(pc));
            }
            (base - at) as u32 + 12 + 4 * (high - low + 1) as u32
        }
        LOOKUPSWITCH => {
            let base = at + 1 + switch_padding(pc) as usize;
            let npairs = read_i32(code, base + 4)?;
            if npairs < 0 {
                return Err(BytecodeError::InvalidSwitch(pc));
            }
            (base - at) as u32 + 8 + 8 * npairs as u32
        }
        0..=0xc9 => 1,
        _ => return Err(BytecodeError::InvalidOpcode { pc, opcode }),
    };
    if at + len as usize > code.len() {
        return Err(BytecodeError::Truncated(pc));
    }
    Ok(len)
}

/// Decodes a method body into instructions.
pub fn decode(code: &[u8]) -> Result<Vec<Insn>, BytecodeError> {
    let mut insns = Vec::new();
    let mut pc = 0u32;
    while (pc as usize) < code.len() {
        let opcode = code[pc as usize];
        let len = instruction_length(code, pc)?;
        let at = pc as usize;
        let kind = match opcode {
            op if is_branch(op) => {
                let offset = read_u2(code, at + 1)? as i16 as i32;
                InsnKind::Branch { target: relative(pc, offset)? }
            }
            GOTO_W | JSR_W => InsnKind::Branch { target: relative(pc, read_i32(code, at + 1)?)? },
            TABLESWITCH => {
                let base = at + 1 + switch_padding(pc) as usize;
                let default = relative(pc, read_i32(code, base)?)?;
                let low = read_i32(code, base + 4)?;
                let high = read_i32(code, base + 8)?;
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for i in 0..count {
                    targets.push(relative(pc, read_i32(code, base + 12 + 4 * i)?)?);
                }
                InsnKind::TableSwitch { default, low, high, targets }
            }
            LOOKUPSWITCH => {
                let base = at + 1 + switch_padding(pc) as usize;
                let default = relative(pc, read_i32(code, base)?)?;
                let npairs = read_i32(code, base + 4)? as usize;
                let mut pairs = Vec::with_capacity(npairs);
                for i in 0..npairs {
                    let key = read_i32(code, base + 8 + 8 * i)?;
                    let target = relative(pc, read_i32(code, base + 12 + 8 * i)?)?;
                    pairs.push((key, target));
                }
                InsnKind::LookupSwitch { default, pairs }
            }
            _ => InsnKind::Plain,
        };
        insns.push(Insn { pc, opcode, len, kind });
        pc += len;
    }
    Ok(insns)
}
