//! Verifier types and the linear abstract interpreter that recovers the
//! frame in effect before every instruction.
//!
//! Locals are kept slot-expanded (`long`/`double` occupy two entries, the
//! second being `Top`); the operand stack keeps one entry per value, as
//! StackMapTable does.

use super::opcodes::{self, Insn};
use super::BytecodeError;
use crate::classfile::descriptor::{FieldType, MethodDescriptor};
use crate::classfile::{ConstantPool, CpInfo, StackMapFrame, VerificationTypeInfo};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal class name, or an array descriptor such as `[I`.
    Object(String),
    /// Value created by the `new` at this (original) code offset.
    Uninitialized(u32),
}

impl VType {
    pub fn is_category2(&self) -> bool {
        matches!(self, VType::Long | VType::Double)
    }

    pub fn from_field_type(ty: &FieldType) -> VType {
        match ty {
            FieldType::Boolean | FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int => {
                VType::Integer
            }
            FieldType::Long => VType::Long,
            FieldType::Float => VType::Float,
            FieldType::Double => VType::Double,
            FieldType::Object(name) => VType::Object(name.clone()),
            FieldType::Array(_) => VType::Object(ty.descriptor()),
        }
    }

    fn from_descriptor(descriptor: &str) -> Result<VType, BytecodeError> {
        Ok(VType::from_field_type(&FieldType::parse(descriptor)?))
    }

    fn from_verification(info: &VerificationTypeInfo, cp: &ConstantPool) -> Result<VType, BytecodeError> {
        Ok(match info {
            VerificationTypeInfo::Top => VType::Top,
            VerificationTypeInfo::Integer => VType::Integer,
            VerificationTypeInfo::Float => VType::Float,
            VerificationTypeInfo::Long => VType::Long,
            VerificationTypeInfo::Double => VType::Double,
            VerificationTypeInfo::Null => VType::Null,
            VerificationTypeInfo::UninitializedThis => VType::UninitializedThis,
            VerificationTypeInfo::Object(index) => VType::Object(cp.class_name(*index)?.to_string()),
            VerificationTypeInfo::Uninitialized(offset) => VType::Uninitialized(*offset as u32),
        })
    }

    /// `map_new` relocates the offset carried by `Uninitialized`.
    pub fn to_verification(
        &self,
        cp: &mut ConstantPool,
        map_new: &impl Fn(u32) -> Result<u16, BytecodeError>,
    ) -> Result<VerificationTypeInfo, BytecodeError> {
        Ok(match self {
            VType::Top => VerificationTypeInfo::Top,
            VType::Integer => VerificationTypeInfo::Integer,
            VType::Float => VerificationTypeInfo::Float,
            VType::Long => VerificationTypeInfo::Long,
            VType::Double => VerificationTypeInfo::Double,
            VType::Null => VerificationTypeInfo::Null,
            VType::UninitializedThis => VerificationTypeInfo::UninitializedThis,
            VType::Object(name) => VerificationTypeInfo::Object(cp.add_class(name)?),
            VType::Uninitialized(offset) => VerificationTypeInfo::Uninitialized(map_new(*offset)?),
        })
    }

    /// Whether a value of this verifier type can be loaded as `ty` and
    /// handed to a hook.
    pub fn is_assignable_to(&self, ty: &FieldType) -> bool {
        match ty {
            FieldType::Boolean | FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int => {
                *self == VType::Integer
            }
            FieldType::Long => *self == VType::Long,
            FieldType::Float => *self == VType::Float,
            FieldType::Double => *self == VType::Double,
            FieldType::Object(_) | FieldType::Array(_) => matches!(self, VType::Object(_) | VType::Null),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

impl Frame {
    /// Frame at method entry.
    pub fn initial(this_class: &str, method_name: &str, is_static: bool, descriptor: &MethodDescriptor) -> Frame {
        let mut locals = Vec::new();
        if !is_static {
            if method_name == "<init>" && this_class != "java/lang/Object" {
                locals.push(VType::UninitializedThis);
            } else {
                locals.push(VType::Object(this_class.to_string()));
            }
        }
        for param in &descriptor.params {
            let v = VType::from_field_type(param);
            let wide = v.is_category2();
            locals.push(v);
            if wide {
                locals.push(VType::Top);
            }
        }
        Frame { locals, stack: Vec::new() }
    }

    pub fn local(&self, slot: u16) -> &VType {
        self.locals.get(slot as usize).unwrap_or(&VType::Top)
    }

    /// `this` has been initialised (not inside a constructor before its
    /// `super()`/`this()` call).
    pub fn this_initialized(&self) -> bool {
        !matches!(self.locals.first(), Some(VType::UninitializedThis))
    }

    fn set_local(&mut self, slot: usize, v: VType) {
        let wide = v.is_category2();
        let needed = slot + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VType::Top);
        }
        if slot > 0 && self.locals[slot - 1].is_category2() {
            self.locals[slot - 1] = VType::Top;
        }
        self.locals[slot] = v;
        if wide {
            self.locals[slot + 1] = VType::Top;
        }
    }

    fn push(&mut self, v: VType) {
        self.stack.push(v);
    }

    fn pop(&mut self, pc: u32) -> Result<VType, BytecodeError> {
        self.stack.pop().ok_or(BytecodeError::StackUnderflow(pc))
    }

    fn pop_n(&mut self, n: usize, pc: u32) -> Result<(), BytecodeError> {
        for _ in 0..n {
            self.pop(pc)?;
        }
        Ok(())
    }

    fn replace_all(&mut self, from: &VType, to: &VType) {
        for v in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if v == from {
                *v = to.clone();
            }
        }
    }

    fn compressed_locals(&self) -> Vec<&VType> {
        let mut out = Vec::with_capacity(self.locals.len());
        let mut i = 0;
        while i < self.locals.len() {
            let v = &self.locals[i];
            out.push(v);
            i += if v.is_category2() { 2 } else { 1 };
        }
        while matches!(out.last(), Some(VType::Top)) {
            out.pop();
        }
        out
    }
}

fn expand(compressed: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(compressed.len());
    for v in compressed {
        out.push(v.clone());
        if v.is_category2() {
            out.push(VType::Top);
        }
    }
    out
}

fn compress(expanded: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(expanded.len());
    let mut i = 0;
    while i < expanded.len() {
        out.push(expanded[i].clone());
        i += if expanded[i].is_category2() { 2 } else { 1 };
    }
    out
}

/// Resolves a StackMapTable into absolute code offsets.
pub fn decode_stack_map(
    initial: &Frame,
    frames: &[StackMapFrame],
    cp: &ConstantPool,
) -> Result<BTreeMap<u32, Frame>, BytecodeError> {
    let mut out = BTreeMap::new();
    let mut locals = compress(&initial.locals);
    let mut offset: i64 = -1;

    for frame in frames {
        offset += frame.offset_delta() as i64 + 1;
        let stack = match frame {
            StackMapFrame::Same { .. } | StackMapFrame::SameExtended { .. } => Vec::new(),
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => {
                vec![VType::from_verification(stack, cp)?]
            }
            StackMapFrame::Chop { k, .. } => {
                let keep = locals.len().saturating_sub(*k as usize);
                locals.truncate(keep);
                Vec::new()
            }
            StackMapFrame::Append { locals: added, .. } => {
                for v in added {
                    locals.push(VType::from_verification(v, cp)?);
                }
                Vec::new()
            }
            StackMapFrame::Full { locals: full, stack, .. } => {
                locals = full
                    .iter()
                    .map(|v| VType::from_verification(v, cp))
                    .collect::<Result<_, _>>()?;
                stack
                    .iter()
                    .map(|v| VType::from_verification(v, cp))
                    .collect::<Result<_, _>>()?
            }
        };
        out.insert(offset as u32, Frame { locals: expand(&locals), stack });
    }
    Ok(out)
}

/// Encodes frames keyed by code offset as a StackMapTable of full frames.
pub fn encode_stack_map(
    frames: &BTreeMap<u32, Frame>,
    cp: &mut ConstantPool,
    map_new: &impl Fn(u32) -> Result<u16, BytecodeError>,
) -> Result<Vec<StackMapFrame>, BytecodeError> {
    let mut out = Vec::with_capacity(frames.len());
    let mut previous: i64 = -1;
    for (&offset, frame) in frames {
        let delta = u16::try_from(offset as i64 - previous - 1).map_err(|_| BytecodeError::CodeTooLarge)?;
        let locals = frame
            .compressed_locals()
            .into_iter()
            .map(|v| v.to_verification(cp, map_new))
            .collect::<Result<_, _>>()?;
        let stack = frame
            .stack
            .iter()
            .map(|v| v.to_verification(cp, map_new))
            .collect::<Result<_, _>>()?;
        out.push(StackMapFrame::Full { offset_delta: delta, locals, stack });
        previous = offset as i64;
    }
    Ok(out)
}

/// Frame before each reachable instruction, keyed by pc.
///
/// Interpretation is linear: a recorded StackMapTable frame replaces the
/// running state, and code after an unconditional transfer with no frame
/// of its own is treated as unreachable.
pub fn analyze(
    insns: &[Insn],
    code: &[u8],
    cp: &ConstantPool,
    this_class: &str,
    initial: Frame,
    anchors: &BTreeMap<u32, Frame>,
) -> Result<BTreeMap<u32, Frame>, BytecodeError> {
    let mut states = BTreeMap::new();
    let mut current = Some(initial);
    for insn in insns {
        if let Some(anchor) = anchors.get(&insn.pc) {
            current = Some(anchor.clone());
        }
        let Some(mut frame) = current.take() else {
            continue;
        };
        states.insert(insn.pc, frame.clone());
        step(&mut frame, insn, code, cp, this_class)?;
        if !insn.ends_block() {
            current = Some(frame);
        }
    }
    Ok(states)
}

fn ldc_type(cp: &ConstantPool, index: u16) -> Result<VType, BytecodeError> {
    Ok(match cp.get(index)? {
        CpInfo::Integer(_) => VType::Integer,
        CpInfo::Float(_) => VType::Float,
        CpInfo::Long(_) => VType::Long,
        CpInfo::Double(_) => VType::Double,
        CpInfo::String { .. } => VType::Object("java/lang/String".into()),
        CpInfo::Class { .. } => VType::Object("java/lang/Class".into()),
        CpInfo::MethodType { .. } => VType::Object("java/lang/invoke/MethodType".into()),
        CpInfo::MethodHandle { .. } => VType::Object("java/lang/invoke/MethodHandle".into()),
        CpInfo::Dynamic { .. } => {
            let (_, descriptor) = cp.dynamic_name_and_type(index)?;
            VType::from_descriptor(descriptor)?
        }
        _ => {
            return Err(crate::classfile::ClassFileError::UnexpectedConstant { index, expected: "loadable constant" }.into())
        }
    })
}

fn array_of(class_name: &str) -> VType {
    if class_name.starts_with('[') {
        VType::Object(format!("[{class_name}"))
    } else {
        VType::Object(format!("[L{class_name};"))
    }
}

fn component_of(array: &VType) -> VType {
    match array {
        VType::Null => VType::Null,
        VType::Object(name) => match name.strip_prefix('[') {
            Some(component) if component.starts_with('L') && component.ends_with(';') => {
                VType::Object(component[1..component.len() - 1].to_string())
            }
            Some(component) if component.starts_with('[') => VType::Object(component.to_string()),
            _ => VType::Object("java/lang/Object".into()),
        },
        _ => VType::Object("java/lang/Object".into()),
    }
}

/// Typed load/store kinds in opcode order: i, l, f, d, a.
fn typed(kind: u8) -> Option<VType> {
    match kind {
        0 => Some(VType::Integer),
        1 => Some(VType::Long),
        2 => Some(VType::Float),
        3 => Some(VType::Double),
        _ => None,
    }
}

fn load(frame: &mut Frame, kind: u8, slot: u16) {
    let v = typed(kind).unwrap_or_else(|| frame.local(slot).clone());
    frame.push(v);
}

fn store(frame: &mut Frame, kind: u8, slot: u16, pc: u32) -> Result<(), BytecodeError> {
    let value = frame.pop(pc)?;
    frame.set_local(slot as usize, typed(kind).unwrap_or(value));
    Ok(())
}

fn step(frame: &mut Frame, insn: &Insn, code: &[u8], cp: &ConstantPool, this_class: &str) -> Result<(), BytecodeError> {
    use opcodes::*;
    let pc = insn.pc;
    let at = pc as usize;
    let op = insn.opcode;
    let u2 = || read_u2(code, at + 1);

    match op {
        NOP => {}
        ACONST_NULL => frame.push(VType::Null),
        ICONST_M1..=ICONST_5 | BIPUSH | SIPUSH => frame.push(VType::Integer),
        0x09 | 0x0a => frame.push(VType::Long),
        0x0b..=0x0d => frame.push(VType::Float),
        0x0e | 0x0f => frame.push(VType::Double),
        LDC => {
            let index = code.get(at + 1).copied().ok_or(BytecodeError::Truncated(pc))?;
            frame.push(ldc_type(cp, index as u16)?);
        }
        LDC_W | LDC2_W => frame.push(ldc_type(cp, u2()?)?),
        ILOAD..=ALOAD => {
            let slot = code.get(at + 1).copied().ok_or(BytecodeError::Truncated(pc))?;
            load(frame, op - ILOAD, slot as u16);
        }
        0x1a..=0x2d => load(frame, (op - 0x1a) / 4, ((op - 0x1a) % 4) as u16),
        0x2e | 0x33 | 0x34 | 0x35 => {
            frame.pop_n(2, pc)?;
            frame.push(VType::Integer);
        }
        0x2f => {
            frame.pop_n(2, pc)?;
            frame.push(VType::Long);
        }
        0x30 => {
            frame.pop_n(2, pc)?;
            frame.push(VType::Float);
        }
        0x31 => {
            frame.pop_n(2, pc)?;
            frame.push(VType::Double);
        }
        0x32 => {
            frame.pop(pc)?;
            let array = frame.pop(pc)?;
            frame.push(component_of(&array));
        }
        ISTORE..=ASTORE => {
            let slot = code.get(at + 1).copied().ok_or(BytecodeError::Truncated(pc))?;
            store(frame, op - ISTORE, slot as u16, pc)?;
        }
        0x3b..=0x4e => store(frame, (op - 0x3b) / 4, ((op - 0x3b) % 4) as u16, pc)?,
        0x4f..=0x56 => frame.pop_n(3, pc)?,
        0x57 => frame.pop_n(1, pc)?,
        0x58 => {
            let v = frame.pop(pc)?;
            if !v.is_category2() {
                frame.pop(pc)?;
            }
        }
        DUP => {
            let v = frame.pop(pc)?;
            frame.push(v.clone());
            frame.push(v);
        }
        0x5a => {
            let v1 = frame.pop(pc)?;
            let v2 = frame.pop(pc)?;
            frame.stack.extend([v1.clone(), v2, v1]);
        }
        0x5b => {
            let v1 = frame.pop(pc)?;
            let v2 = frame.pop(pc)?;
            if v2.is_category2() {
                frame.stack.extend([v1.clone(), v2, v1]);
            } else {
                let v3 = frame.pop(pc)?;
                frame.stack.extend([v1.clone(), v3, v2, v1]);
            }
        }
        0x5c => {
            let v1 = frame.pop(pc)?;
            if v1.is_category2() {
                frame.stack.extend([v1.clone(), v1]);
            } else {
                let v2 = frame.pop(pc)?;
                frame.stack.extend([v2.clone(), v1.clone(), v2, v1]);
            }
        }
        0x5d => {
            let v1 = frame.pop(pc)?;
            let v2 = frame.pop(pc)?;
            if v1.is_category2() {
                frame.stack.extend([v1.clone(), v2, v1]);
            } else {
                let v3 = frame.pop(pc)?;
                frame.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
            }
        }
        0x5e => {
            let v1 = frame.pop(pc)?;
            let v2 = frame.pop(pc)?;
            match (v1.is_category2(), v2.is_category2()) {
                (true, true) => frame.stack.extend([v1.clone(), v2, v1]),
                (true, false) => {
                    let v3 = frame.pop(pc)?;
                    frame.stack.extend([v1.clone(), v3, v2, v1]);
                }
                (false, _) => {
                    let v3 = frame.pop(pc)?;
                    if v3.is_category2() {
                        frame.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                    } else {
                        let v4 = frame.pop(pc)?;
                        frame.stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                    }
                }
            }
        }
        0x5f => {
            let v1 = frame.pop(pc)?;
            let v2 = frame.pop(pc)?;
            frame.stack.extend([v1, v2]);
        }
        0x60..=0x73 => {
            frame.pop_n(2, pc)?;
            frame.push(typed((op - 0x60) % 4).unwrap_or(VType::Top));
        }
        0x74..=0x77 => {
            let v = frame.pop(pc)?;
            frame.push(v);
        }
        0x78..=0x83 => {
            frame.pop_n(2, pc)?;
            frame.push(if (op - 0x78) % 2 == 0 { VType::Integer } else { VType::Long });
        }
        IINC => {}
        0x85..=0x93 => {
            frame.pop(pc)?;
            frame.push(match op {
                0x85 | 0x8c | 0x8f => VType::Long,
                0x86 | 0x89 | 0x90 => VType::Float,
                0x87 | 0x8a | 0x8d => VType::Double,
                _ => VType::Integer,
            });
        }
        0x94..=0x98 => {
            frame.pop_n(2, pc)?;
            frame.push(VType::Integer);
        }
        IFEQ..=0x9e | IFNULL | IFNONNULL => frame.pop_n(1, pc)?,
        0x9f..=IF_ACMPNE => frame.pop_n(2, pc)?,
        GOTO | GOTO_W | RETURN => {}
        JSR | RET | JSR_W => return Err(BytecodeError::Subroutine(pc)),
        TABLESWITCH | LOOKUPSWITCH | IRETURN..=0xb0 | ATHROW => frame.pop_n(1, pc)?,
        GETSTATIC | GETFIELD => {
            let field = cp.member_ref(u2()?)?;
            let v = VType::from_descriptor(field.descriptor)?;
            if op == GETFIELD {
                frame.pop(pc)?;
            }
            frame.push(v);
        }
        0xb3 => frame.pop_n(1, pc)?,
        0xb5 => frame.pop_n(2, pc)?,
        INVOKEVIRTUAL..=INVOKEINTERFACE => {
            let method = cp.member_ref(u2()?)?;
            let descriptor = MethodDescriptor::parse(method.descriptor)?;
            frame.pop_n(descriptor.params.len(), pc)?;
            if op != INVOKESTATIC {
                let receiver = frame.pop(pc)?;
                if op == INVOKESPECIAL && method.name == "<init>" {
                    let initialized = match receiver {
                        VType::UninitializedThis => Some(VType::Object(this_class.to_string())),
                        VType::Uninitialized(new_pc) => {
                            let index = read_u2(code, new_pc as usize + 1)?;
                            Some(VType::Object(cp.class_name(index)?.to_string()))
                        }
                        _ => None,
                    };
                    if let Some(initialized) = initialized {
                        frame.replace_all(&receiver, &initialized);
                    }
                }
            }
            if let Some(ret) = &descriptor.ret {
                frame.push(VType::from_field_type(ret));
            }
        }
        INVOKEDYNAMIC => {
            let (_, descriptor) = cp.dynamic_name_and_type(u2()?)?;
            let descriptor = MethodDescriptor::parse(descriptor)?;
            frame.pop_n(descriptor.params.len(), pc)?;
            if let Some(ret) = &descriptor.ret {
                frame.push(VType::from_field_type(ret));
            }
        }
        NEW => frame.push(VType::Uninitialized(pc)),
        NEWARRAY => {
            frame.pop(pc)?;
            let atype = code.get(at + 1).copied().ok_or(BytecodeError::Truncated(pc))?;
            let descriptor = match atype {
                4 => "[Z",
                5 => "[C",
                6 => "[F",
                7 => "[D",
                8 => "[B",
                9 => "[S",
                10 => "[I",
                11 => "[J",
                _ => return Err(BytecodeError::InvalidOpcode { pc, opcode: op }),
            };
            frame.push(VType::Object(descriptor.into()));
        }
        ANEWARRAY => {
            frame.pop(pc)?;
            let class_name = cp.class_name(u2()?)?;
            frame.push(array_of(class_name));
        }
        0xbe => {
            frame.pop(pc)?;
            frame.push(VType::Integer);
        }
        CHECKCAST => {
            frame.pop(pc)?;
            frame.push(VType::Object(cp.class_name(u2()?)?.to_string()));
        }
        0xc1 => {
            frame.pop(pc)?;
            frame.push(VType::Integer);
        }
        0xc2 | 0xc3 => frame.pop_n(1, pc)?,
        WIDE => {
            let sub = code.get(at + 1).copied().ok_or(BytecodeError::Truncated(pc))?;
            let slot = read_u2(code, at + 2)?;
            match sub {
                ILOAD..=ALOAD => load(frame, sub - ILOAD, slot),
                ISTORE..=ASTORE => store(frame, sub - ISTORE, slot, pc)?,
                IINC => {}
                RET => return Err(BytecodeError::Subroutine(pc)),
                _ => return Err(BytecodeError::InvalidOpcode { pc, opcode: sub }),
            }
        }
        MULTIANEWARRAY => {
            let class_name = cp.class_name(u2()?)?.to_string();
            let dims = code.get(at + 3).copied().ok_or(BytecodeError::Truncated(pc))?;
            frame.pop_n(dims as usize, pc)?;
            frame.push(VType::Object(class_name));
        }
        _ => return Err(BytecodeError::InvalidOpcode { pc, opcode: op }),
    }
    Ok(())
}
