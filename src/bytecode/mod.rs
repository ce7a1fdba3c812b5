//! Method bytecode: instruction decoding, verifier type inference and
//! re-assembly with relocated offsets.

pub mod assembler;
pub mod frames;
pub mod opcodes;

use crate::classfile::ClassFileError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    #[error("code truncated at pc {0}")]
    Truncated(u32),
    #[error("invalid opcode {opcode:#04x} at pc {pc}")]
    InvalidOpcode { pc: u32, opcode: u8 },
    #[error("malformed switch at pc {0}")]
    InvalidSwitch(u32),
    #[error("branch at pc {pc} targets {target}, which is not an instruction")]
    InvalidBranchTarget { pc: u32, target: i64 },
    #[error("operand stack underflow at pc {0}")]
    StackUnderflow(u32),
    #[error("subroutines (jsr/ret) are not supported (pc {0})")]
    Subroutine(u32),
    #[error("relocated branch at pc {0} no longer fits a 16-bit offset")]
    BranchOverflow(u32),
    #[error("method code exceeds 65535 bytes")]
    CodeTooLarge,
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
}
