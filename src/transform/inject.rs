use crate::bytecode::assembler::{relocate, Block, CodeBuilder, Patch};
use crate::bytecode::frames::{analyze, decode_stack_map, encode_stack_map, Frame, VType};
use crate::bytecode::opcodes;
use crate::bytecode::BytecodeError;
use crate::classfile::descriptor::{FieldType, MethodDescriptor};
use crate::classfile::{
    Attribute, AttributeBody, CodeAttribute, ConstantPool, ExceptionTableEntry, LocalVariableEntry, MemberInfo,
};
use crate::hooks::HookRefs;
use crate::instrument::model::InstrumentKind;
use crate::instrument::ActiveLiveInstrument;
use crate::metadata::{ClassField, ClassMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Operand stack slots the injected code may need on top of the original.
const EXTRA_STACK: u16 = 6;

pub(super) struct ClassContext<'a> {
    pub internal_name: &'a str,
    pub dotted_name: &'a str,
    pub metadata: &'a ClassMetadata,
    pub hooks: HookRefs,
    pub requires_frames: bool,
}

pub(super) struct MethodTarget<'a> {
    pub name: &'a str,
    pub raw_descriptor: &'a str,
    pub descriptor: &'a MethodDescriptor,
}

/// A branch target inside the code injected in front of original `pc`,
/// as an offset from the start of that patch's body.
struct InjectedLabel {
    pc: u32,
    offset: u32,
}

type Targets<'a> = BTreeMap<u32, Vec<(u16, &'a Arc<ActiveLiveInstrument>)>>;

fn narrow(value: u32) -> Result<u16, BytecodeError> {
    u16::try_from(value).map_err(|_| BytecodeError::CodeTooLarge)
}

/// Every `LineNumberTable` entry of each instrumented line in this method.
/// A line compiled to several blocks (a `for` header, a `while` condition)
/// is instrumented at each of them.
fn line_targets<'a>(code: &CodeAttribute, lines: &BTreeMap<u16, Vec<&'a Arc<ActiveLiveInstrument>>>) -> Targets<'a> {
    let table = code.line_numbers();
    let mut targets: Targets<'a> = BTreeMap::new();
    for (&line, instruments) in lines {
        let pcs: BTreeSet<u32> =
            table.iter().filter(|e| e.line_number == line).map(|e| e.start_pc as u32).collect();
        for pc in pcs {
            let slot = targets.entry(pc).or_default();
            slot.extend(instruments.iter().map(|active| (line, *active)));
            slot.sort_by_key(|(_, active)| active.seq());
        }
    }
    targets
}

/// Ids of the instruments this method would receive, lines first.
pub(super) fn placed_ids(
    code: &CodeAttribute,
    lines: &BTreeMap<u16, Vec<&Arc<ActiveLiveInstrument>>>,
    spans: &[&Arc<ActiveLiveInstrument>],
) -> Vec<String> {
    let targets = line_targets(code, lines);
    let mut ids: Vec<String> = Vec::new();
    for active in targets.values().flatten().map(|(_, active)| *active).chain(spans.iter().copied()) {
        if !ids.iter().any(|id| id == active.id()) {
            ids.push(active.id().to_string());
        }
    }
    ids
}

impl ClassContext<'_> {
    /// Injects into one method and returns the number of instruments placed.
    pub(super) fn inject(
        &self,
        cp: &mut ConstantPool,
        method: &mut MemberInfo,
        target: &MethodTarget<'_>,
        lines: &BTreeMap<u16, Vec<&Arc<ActiveLiveInstrument>>>,
        spans: &[&Arc<ActiveLiveInstrument>],
    ) -> Result<usize, BytecodeError> {
        let is_static = method.is_static();
        let Some(code) = method.code_mut() else {
            return Ok(0);
        };
        let targets = line_targets(code, lines);
        if targets.is_empty() && spans.is_empty() {
            return Ok(0);
        }

        let insns = opcodes::decode(&code.code)?;
        let frames = if self.requires_frames {
            let initial = Frame::initial(self.internal_name, target.name, is_static, target.descriptor);
            let anchors = decode_stack_map(&initial, code.stack_map().unwrap_or(&[]), cp)?;
            let states = analyze(&insns, &code.code, cp, self.internal_name, initial, &anchors)?;
            Some((anchors, states))
        } else {
            None
        };

        let mut patches: BTreeMap<u32, Patch> = BTreeMap::new();
        let mut labels: Vec<(InjectedLabel, Frame)> = Vec::new();
        let mut injected = 0;

        for (&pc, instruments) in &targets {
            let state = match &frames {
                Some((_, states)) => match states.get(&pc) {
                    Some(state) => Some(state),
                    None => {
                        debug!(method = target.name, pc, "line start is unreachable, skipping");
                        continue;
                    }
                },
                None => None,
            };
            for (line, active) in instruments {
                let block = self.line_block(cp, active, *line, pc, is_static, target, state)?;
                let patch = patches.entry(pc).or_default();
                let base = patch.body.len() as u32;
                if let Some(state) = state {
                    labels.extend(block.labels.iter().map(|offset| {
                        (InjectedLabel { pc, offset: base + offset }, state.clone())
                    }));
                }
                patch.body.extend_from_slice(&block.code);
                injected += 1;
                trace!(id = active.id(), line, pc, "instrument injected");
            }
        }

        if !spans.is_empty() {
            let mut head = CodeBuilder::new();
            for span in spans {
                head.ldc_string(cp, span.id())?;
                head.invokestatic(self.hooks.open_local_span);
            }
            patches.entry(0).or_default().head = head.finish()?.code;

            for insn in insns.iter().filter(|insn| insn.is_return()) {
                if frames.as_ref().is_some_and(|(_, states)| !states.contains_key(&insn.pc)) {
                    continue;
                }
                let close = self.close_spans(cp, spans, self.hooks.close_local_span)?;
                patches.entry(insn.pc).or_default().body.extend_from_slice(&close.code);
            }
            injected += spans.len();
        }

        if injected == 0 {
            return Ok(0);
        }

        let mut relocated = relocate(&insns, &code.code, &patches)?;
        let handler_pos = relocated.end();
        let mut new_code = std::mem::take(&mut relocated.code);
        if !spans.is_empty() {
            let mut handler = self.close_spans(cp, spans, self.hooks.close_local_span_and_throw)?.code;
            handler.push(opcodes::ATHROW);
            new_code.extend_from_slice(&handler);
        }
        if new_code.len() > u16::MAX as usize {
            return Err(BytecodeError::CodeTooLarge);
        }

        for entry in &mut code.exception_table {
            entry.start_pc = narrow(relocated.target(entry.start_pc as u32)?)?;
            entry.end_pc = narrow(relocated.target(entry.end_pc as u32)?)?;
            entry.handler_pc = narrow(relocated.target(entry.handler_pc as u32)?)?;
        }
        if !spans.is_empty() {
            code.exception_table.push(ExceptionTableEntry {
                start_pc: narrow(relocated.target(0)?)?,
                end_pc: narrow(handler_pos)?,
                handler_pc: narrow(handler_pos)?,
                catch_type: 0,
            });
        }

        for attribute in &mut code.attributes {
            match &mut attribute.body {
                AttributeBody::LineNumberTable(entries) => {
                    for entry in entries.iter_mut() {
                        entry.start_pc = narrow(relocated.target(entry.start_pc as u32)?)?;
                    }
                }
                AttributeBody::LocalVariableTable(entries) | AttributeBody::LocalVariableTypeTable(entries) => {
                    for entry in entries.iter_mut() {
                        remap_local(entry, |pc| relocated.target(pc))?;
                    }
                }
                _ => {}
            }
        }

        if let Some((anchors, _)) = frames {
            let mut table: BTreeMap<u32, Frame> = BTreeMap::new();
            for (pc, frame) in anchors {
                table.insert(relocated.target(pc)?, frame);
            }
            for (label, frame) in labels {
                table.insert(relocated.target(label.pc)? + label.offset, frame);
            }
            if !spans.is_empty() {
                let throwable = VType::Object("java/lang/Throwable".to_string());
                table.insert(handler_pos, Frame { locals: Vec::new(), stack: vec![throwable] });
            }
            let map_new = |pc: u32| narrow(relocated.position(pc)?);
            let encoded = encode_stack_map(&table, cp, &map_new)?;
            match code.attributes.iter_mut().find(|a| matches!(a.body, AttributeBody::StackMapTable(_))) {
                Some(attribute) => attribute.body = AttributeBody::StackMapTable(encoded),
                None if !encoded.is_empty() => code.attributes.push(Attribute {
                    name_index: cp.add_utf8("StackMapTable")?,
                    body: AttributeBody::StackMapTable(encoded),
                }),
                None => {}
            }
        }

        code.code = new_code;
        code.max_stack = code.max_stack.saturating_add(EXTRA_STACK);
        debug!(
            class = self.dotted_name,
            method = %format_args!("{}{}", target.name, target.raw_descriptor),
            injected,
            "method instrumented"
        );
        Ok(injected)
    }

    /// `ldc id; invokestatic hook` per span, innermost (last opened) first.
    fn close_spans(
        &self,
        cp: &mut ConstantPool,
        spans: &[&Arc<ActiveLiveInstrument>],
        hook: u16,
    ) -> Result<Block, BytecodeError> {
        let mut b = CodeBuilder::new();
        for span in spans.iter().rev() {
            b.ldc_string(cp, span.id())?;
            b.invokestatic(hook);
        }
        b.finish()
    }

    #[allow(clippy::too_many_arguments)]
    fn line_block(
        &self,
        cp: &mut ConstantPool,
        active: &ActiveLiveInstrument,
        line: u16,
        pc: u32,
        is_static: bool,
        target: &MethodTarget<'_>,
        state: Option<&Frame>,
    ) -> Result<Block, BytecodeError> {
        let mut b = CodeBuilder::new();
        let skip = b.new_label();
        let id = cp.add_string(active.id())?;

        b.ldc(id);
        b.invokestatic(self.hooks.is_instrument_enabled);
        b.ifeq(skip);

        if active.needs_capture() {
            self.capture_locals(&mut b, cp, id, line, pc, target, state)?;
            if self.this_available(is_static, target, state) {
                for field in &self.metadata.fields {
                    self.capture_field(&mut b, cp, id, field, false)?;
                }
            }
            for field in &self.metadata.static_fields {
                self.capture_field(&mut b, cp, id, field, true)?;
            }
        }

        b.ldc(id);
        b.invokestatic(self.hooks.is_hit);
        b.ifeq(skip);

        match &active.instrument.kind {
            InstrumentKind::Breakpoint { .. } => {
                b.ldc(id);
                b.ldc_string(cp, self.dotted_name)?;
                b.push_int(cp, line as i32)?;
                b.invokestatic(self.hooks.put_breakpoint);
            }
            InstrumentKind::Log { log_format, log_arguments } => {
                b.ldc(id);
                b.ldc_string(cp, log_format)?;
                b.push_int(cp, log_arguments.len() as i32)?;
                b.op_u2(opcodes::ANEWARRAY, cp.add_class("java/lang/String")?);
                for (i, argument) in log_arguments.iter().enumerate() {
                    b.op(opcodes::DUP);
                    b.push_int(cp, i as i32)?;
                    b.ldc_string(cp, argument)?;
                    b.op(opcodes::AASTORE);
                }
                b.invokestatic(self.hooks.put_log);
            }
            InstrumentKind::Meter { .. } => {
                b.ldc(id);
                b.invokestatic(self.hooks.put_meter);
            }
            InstrumentKind::Span { .. } => {}
        }

        b.bind(skip);
        b.finish()
    }

    /// `this` can be read: an instance method outside the part of a
    /// constructor that runs before `super()`.
    fn this_available(&self, is_static: bool, target: &MethodTarget<'_>, state: Option<&Frame>) -> bool {
        if is_static {
            return false;
        }
        match state {
            Some(frame) => {
                frame.this_initialized() && matches!(frame.local(0), VType::Object(name) if name == self.internal_name)
            }
            None => target.name != "<init>",
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn capture_locals(
        &self,
        b: &mut CodeBuilder,
        cp: &mut ConstantPool,
        id: u16,
        line: u16,
        pc: u32,
        target: &MethodTarget<'_>,
        state: Option<&Frame>,
    ) -> Result<(), BytecodeError> {
        for variable in self.metadata.variables(target.name, target.raw_descriptor) {
            if !variable.is_live_at_line(line as i32) {
                continue;
            }
            let ty = FieldType::parse(&variable.descriptor)?;
            let readable = match state {
                Some(frame) => frame.local(variable.slot).is_assignable_to(&ty),
                None => variable.covers_pc(pc),
            };
            if !readable {
                continue;
            }
            b.ldc(id);
            b.ldc_string(cp, &variable.name)?;
            b.load(&ty, variable.slot);
            self.finish_put(b, cp, &ty, self.hooks.put_local_variable)?;
        }
        Ok(())
    }

    fn capture_field(
        &self,
        b: &mut CodeBuilder,
        cp: &mut ConstantPool,
        id: u16,
        field: &ClassField,
        is_static: bool,
    ) -> Result<(), BytecodeError> {
        let ty = FieldType::parse(&field.descriptor)?;
        let fieldref = cp.add_fieldref(self.internal_name, &field.name, &field.descriptor)?;
        b.ldc(id);
        b.ldc_string(cp, &field.name)?;
        if is_static {
            b.op_u2(opcodes::GETSTATIC, fieldref);
            self.finish_put(b, cp, &ty, self.hooks.put_static_field)
        } else {
            b.op(opcodes::ALOAD_0);
            b.op_u2(opcodes::GETFIELD, fieldref);
            self.finish_put(b, cp, &ty, self.hooks.put_field)
        }
    }

    /// Boxes the value on the stack, pushes its type name and calls `hook`.
    fn finish_put(&self, b: &mut CodeBuilder, cp: &mut ConstantPool, ty: &FieldType, hook: u16) -> Result<(), BytecodeError> {
        if let Some((owner, descriptor)) = ty.boxing() {
            let value_of = cp.add_methodref(owner, "valueOf", descriptor)?;
            b.invokestatic(value_of);
        }
        b.ldc_string(cp, &ty.java_name())?;
        b.invokestatic(hook);
        Ok(())
    }
}

fn remap_local(
    entry: &mut LocalVariableEntry,
    target: impl Fn(u32) -> Result<u32, BytecodeError>,
) -> Result<(), BytecodeError> {
    let start = target(entry.start_pc as u32)?;
    let end = target(entry.start_pc as u32 + entry.length as u32)?;
    entry.start_pc = narrow(start)?;
    entry.length = narrow(end.saturating_sub(start))?;
    Ok(())
}
