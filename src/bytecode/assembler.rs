//! Emitting injected code and relocating the original instructions around it.

use super::opcodes::{self, switch_padding, Insn, InsnKind};
use super::BytecodeError;
use crate::classfile::descriptor::FieldType;
use crate::classfile::ConstantPool;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Position-independent code with forward branches to its own labels.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub code: Vec<u8>,
    /// Offsets of bound labels; each one is a branch target needing a frame.
    pub labels: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn op(&mut self, opcode: u8) {
        self.code.push(opcode);
    }

    pub fn op_u2(&mut self, opcode: u8, operand: u16) {
        self.code.push(opcode);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len() as u32);
    }

    pub fn ifeq(&mut self, label: Label) {
        self.fixups.push((self.code.len(), label));
        self.op_u2(opcodes::IFEQ, 0);
    }

    /// Loads a single-slot constant, picking `ldc` or `ldc_w` by index.
    pub fn ldc(&mut self, index: u16) {
        match u8::try_from(index) {
            Ok(narrow) => {
                self.code.push(opcodes::LDC);
                self.code.push(narrow);
            }
            Err(_) => self.op_u2(opcodes::LDC_W, index),
        }
    }

    pub fn ldc_string(&mut self, cp: &mut ConstantPool, text: &str) -> Result<(), BytecodeError> {
        let index = cp.add_string(text)?;
        self.ldc(index);
        Ok(())
    }

    pub fn push_int(&mut self, cp: &mut ConstantPool, value: i32) -> Result<(), BytecodeError> {
        match value {
            -1..=5 => self.op((opcodes::ICONST_0 as i32 + value) as u8),
            -128..=127 => {
                self.code.push(opcodes::BIPUSH);
                self.code.push(value as i8 as u8);
            }
            -32768..=32767 => self.op_u2(opcodes::SIPUSH, value as i16 as u16),
            _ => {
                let index = cp.add_integer(value)?;
                self.ldc(index);
            }
        }
        Ok(())
    }

    pub fn invokestatic(&mut self, methodref: u16) {
        self.op_u2(opcodes::INVOKESTATIC, methodref);
    }

    /// Loads local `slot` of type `ty`.
    pub fn load(&mut self, ty: &FieldType, slot: u16) {
        let opcode = match ty {
            FieldType::Long => opcodes::LLOAD,
            FieldType::Float => opcodes::FLOAD,
            FieldType::Double => opcodes::DLOAD,
            FieldType::Object(_) | FieldType::Array(_) => opcodes::ALOAD,
            _ => opcodes::ILOAD,
        };
        match u8::try_from(slot) {
            Ok(narrow) => {
                self.code.push(opcode);
                self.code.push(narrow);
            }
            Err(_) => {
                self.code.push(opcodes::WIDE);
                self.op_u2(opcode, slot);
            }
        }
    }

    pub fn finish(mut self) -> Result<Block, BytecodeError> {
        for (at, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label.0].ok_or(BytecodeError::Truncated(at as u32))?;
            let offset = i16::try_from(target as i64 - at as i64).map_err(|_| BytecodeError::BranchOverflow(at as u32))?;
            self.code[at + 1..at + 3].copy_from_slice(&offset.to_be_bytes());
        }
        let mut labels: Vec<u32> = self.labels.into_iter().flatten().collect();
        labels.sort_unstable();
        labels.dedup();
        Ok(Block { code: self.code, labels })
    }
}

/// Code inserted in front of one original instruction. `head` sits before
/// the point branches to that instruction land on; `body` after it.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub head: Vec<u8>,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct Relocated {
    pub code: Vec<u8>,
    targets: BTreeMap<u32, u32>,
    positions: BTreeMap<u32, u32>,
}

impl Relocated {
    /// New offset a branch to original `pc` lands on (start of `body`).
    /// The original code length maps to the end of the relocated code.
    pub fn target(&self, pc: u32) -> Result<u32, BytecodeError> {
        self.targets
            .get(&pc)
            .copied()
            .ok_or(BytecodeError::InvalidBranchTarget { pc, target: pc as i64 })
    }

    /// New offset of the original instruction at `pc` itself.
    pub fn position(&self, pc: u32) -> Result<u32, BytecodeError> {
        self.positions
            .get(&pc)
            .copied()
            .ok_or(BytecodeError::InvalidBranchTarget { pc, target: pc as i64 })
    }

    pub fn end(&self) -> u32 {
        self.code.len() as u32
    }
}

fn relocated_len(insn: &Insn, position: u32) -> u32 {
    match insn.kind {
        InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => {
            insn.len - switch_padding(insn.pc) + switch_padding(position)
        }
        _ => insn.len,
    }
}

/// Lays out `insns` with `patches` inserted and rewrites every branch and
/// switch to the new offsets.
pub fn relocate(insns: &[Insn], code: &[u8], patches: &BTreeMap<u32, Patch>) -> Result<Relocated, BytecodeError> {
    let empty = Patch::default();
    let mut targets = BTreeMap::new();
    let mut positions = BTreeMap::new();
    let mut pos = 0u32;
    for insn in insns {
        let patch = patches.get(&insn.pc).unwrap_or(&empty);
        pos += patch.head.len() as u32;
        targets.insert(insn.pc, pos);
        pos += patch.body.len() as u32;
        positions.insert(insn.pc, pos);
        pos += relocated_len(insn, pos);
    }
    targets.insert(code.len() as u32, pos);
    if pos > u16::MAX as u32 {
        return Err(BytecodeError::CodeTooLarge);
    }

    let mut out = Vec::with_capacity(pos as usize);
    let lookup = |pc: u32, target: u32| -> Result<i64, BytecodeError> {
        let new_target = targets
            .get(&target)
            .copied()
            .ok_or(BytecodeError::InvalidBranchTarget { pc, target: target as i64 })?;
        Ok(new_target as i64)
    };

    for insn in insns {
        let patch = patches.get(&insn.pc).unwrap_or(&empty);
        out.extend_from_slice(&patch.head);
        out.extend_from_slice(&patch.body);
        let here = out.len() as i64;
        match &insn.kind {
            InsnKind::Plain => {
                let start = insn.pc as usize;
                out.extend_from_slice(&code[start..start + insn.len as usize]);
            }
            InsnKind::Branch { target } => {
                let offset = lookup(insn.pc, *target)? - here;
                out.push(insn.opcode);
                if insn.is_wide_branch() {
                    out.extend_from_slice(&(offset as i32).to_be_bytes());
                } else {
                    let narrow = i16::try_from(offset).map_err(|_| BytecodeError::BranchOverflow(insn.pc))?;
                    out.extend_from_slice(&narrow.to_be_bytes());
                }
            }
            InsnKind::TableSwitch { default, low, high, targets: cases } => {
                out.push(insn.opcode);
                out.resize(out.len() + switch_padding(here as u32) as usize, 0);
                out.extend_from_slice(&((lookup(insn.pc, *default)? - here) as i32).to_be_bytes());
                out.extend_from_slice(&low.to_be_bytes());
                out.extend_from_slice(&high.to_be_bytes());
                for case in cases {
                    out.extend_from_slice(&((lookup(insn.pc, *case)? - here) as i32).to_be_bytes());
                }
            }
            InsnKind::LookupSwitch { default, pairs } => {
                out.push(insn.opcode);
                out.resize(out.len() + switch_padding(here as u32) as usize, 0);
                out.extend_from_slice(&((lookup(insn.pc, *default)? - here) as i32).to_be_bytes());
                out.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                for (key, case) in pairs {
                    out.extend_from_slice(&key.to_be_bytes());
                    out.extend_from_slice(&((lookup(insn.pc, *case)? - here) as i32).to_be_bytes());
                }
            }
        }
    }

    Ok(Relocated { code: out, targets, positions })
}
