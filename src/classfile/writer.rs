use super::constant_pool::{ConstantPool, CpInfo};
use super::{
    Attribute, AttributeBody, ClassFile, ClassFileError, CodeAttribute, LocalVariableEntry, MemberInfo,
    StackMapFrame, VerificationTypeInfo,
};

#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn u1(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u2(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn u4(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    fn len_u2(&mut self, len: usize, what: &str) -> Result<(), ClassFileError> {
        let len = u16::try_from(len).map_err(|_| ClassFileError::InvalidAttribute(what.to_string()))?;
        self.u2(len);
        Ok(())
    }
}

impl ClassFile {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFileError> {
        let mut w = Writer::default();
        w.u4(0xCAFEBABE);
        w.u2(self.minor_version);
        w.u2(self.major_version);

        write_constant_pool(&mut w, &self.constant_pool)?;

        w.u2(self.access_flags);
        w.u2(self.this_class);
        w.u2(self.super_class);
        w.len_u2(self.interfaces.len(), "interfaces")?;
        for i in &self.interfaces {
            w.u2(*i);
        }

        write_members(&mut w, &self.fields)?;
        write_members(&mut w, &self.methods)?;
        write_attributes(&mut w, &self.attributes)?;
        Ok(w.buf)
    }
}

fn write_constant_pool(w: &mut Writer, cp: &ConstantPool) -> Result<(), ClassFileError> {
    let count = u16::try_from(cp.count()).map_err(|_| ClassFileError::ConstantPoolOverflow)?;
    w.u2(count);
    for (_, entry) in cp.iter() {
        match entry {
            CpInfo::Utf8 { bytes, .. } => {
                w.u1(1);
                let len = u16::try_from(bytes.len()).map_err(|_| ClassFileError::StringTooLong(bytes.len()))?;
                w.u2(len);
                w.bytes(bytes);
            }
            CpInfo::Integer(v) => {
                w.u1(3);
                w.u4(*v as u32);
            }
            CpInfo::Float(bits) => {
                w.u1(4);
                w.u4(*bits);
            }
            CpInfo::Long(v) => {
                w.u1(5);
                w.u4((*v as u64 >> 32) as u32);
                w.u4(*v as u64 as u32);
            }
            CpInfo::Double(bits) => {
                w.u1(6);
                w.u4((bits >> 32) as u32);
                w.u4(*bits as u32);
            }
            CpInfo::Class { name_index } => {
                w.u1(7);
                w.u2(*name_index);
            }
            CpInfo::String { string_index } => {
                w.u1(8);
                w.u2(*string_index);
            }
            CpInfo::Fieldref { class_index, name_and_type_index } => {
                w.u1(9);
                w.u2(*class_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::Methodref { class_index, name_and_type_index } => {
                w.u1(10);
                w.u2(*class_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                w.u1(11);
                w.u2(*class_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::NameAndType { name_index, descriptor_index } => {
                w.u1(12);
                w.u2(*name_index);
                w.u2(*descriptor_index);
            }
            CpInfo::MethodHandle { reference_kind, reference_index } => {
                w.u1(15);
                w.u1(*reference_kind);
                w.u2(*reference_index);
            }
            CpInfo::MethodType { descriptor_index } => {
                w.u1(16);
                w.u2(*descriptor_index);
            }
            CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
                w.u1(17);
                w.u2(*bootstrap_method_attr_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                w.u1(18);
                w.u2(*bootstrap_method_attr_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::Module { name_index } => {
                w.u1(19);
                w.u2(*name_index);
            }
            CpInfo::Package { name_index } => {
                w.u1(20);
                w.u2(*name_index);
            }
        }
    }
    Ok(())
}

fn write_members(w: &mut Writer, members: &[MemberInfo]) -> Result<(), ClassFileError> {
    w.len_u2(members.len(), "members")?;
    for m in members {
        w.u2(m.access_flags);
        w.u2(m.name_index);
        w.u2(m.descriptor_index);
        write_attributes(w, &m.attributes)?;
    }
    Ok(())
}

fn write_attributes(w: &mut Writer, attrs: &[Attribute]) -> Result<(), ClassFileError> {
    w.len_u2(attrs.len(), "attributes")?;
    for attr in attrs {
        let mut body = Writer::default();
        match &attr.body {
            AttributeBody::Code(code) => write_code(&mut body, code)?,
            AttributeBody::StackMapTable(frames) => write_stack_map_table(&mut body, frames)?,
            AttributeBody::LineNumberTable(entries) => {
                body.len_u2(entries.len(), "LineNumberTable")?;
                for e in entries {
                    body.u2(e.start_pc);
                    body.u2(e.line_number);
                }
            }
            AttributeBody::LocalVariableTable(entries) => write_local_variables(&mut body, entries)?,
            AttributeBody::LocalVariableTypeTable(entries) => write_local_variables(&mut body, entries)?,
            AttributeBody::SourceFile { sourcefile_index } => body.u2(*sourcefile_index),
            AttributeBody::Unknown(info) => body.bytes(info),
        }
        w.u2(attr.name_index);
        w.u4(body.buf.len() as u32);
        w.bytes(&body.buf);
    }
    Ok(())
}

fn write_code(w: &mut Writer, code: &CodeAttribute) -> Result<(), ClassFileError> {
    w.u2(code.max_stack);
    w.u2(code.max_locals);
    w.u4(code.code.len() as u32);
    w.bytes(&code.code);
    w.len_u2(code.exception_table.len(), "Code")?;
    for e in &code.exception_table {
        w.u2(e.start_pc);
        w.u2(e.end_pc);
        w.u2(e.handler_pc);
        w.u2(e.catch_type);
    }
    write_attributes(w, &code.attributes)
}

fn write_local_variables(w: &mut Writer, entries: &[LocalVariableEntry]) -> Result<(), ClassFileError> {
    w.len_u2(entries.len(), "LocalVariableTable")?;
    for e in entries {
        w.u2(e.start_pc);
        w.u2(e.length);
        w.u2(e.name_index);
        w.u2(e.descriptor_index);
        w.u2(e.index);
    }
    Ok(())
}

fn write_stack_map_table(w: &mut Writer, frames: &[StackMapFrame]) -> Result<(), ClassFileError> {
    w.len_u2(frames.len(), "StackMapTable")?;
    for frame in frames {
        match frame {
            StackMapFrame::Same { offset_delta } => w.u1(*offset_delta as u8),
            StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
                w.u1(64 + *offset_delta as u8);
                write_verification_type(w, stack);
            }
            StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
                w.u1(247);
                w.u2(*offset_delta);
                write_verification_type(w, stack);
            }
            StackMapFrame::Chop { offset_delta, k } => {
                w.u1(251 - k);
                w.u2(*offset_delta);
            }
            StackMapFrame::SameExtended { offset_delta } => {
                w.u1(251);
                w.u2(*offset_delta);
            }
            StackMapFrame::Append { offset_delta, locals } => {
                w.u1(251 + locals.len() as u8);
                w.u2(*offset_delta);
                for l in locals {
                    write_verification_type(w, l);
                }
            }
            StackMapFrame::Full { offset_delta, locals, stack } => {
                w.u1(255);
                w.u2(*offset_delta);
                w.len_u2(locals.len(), "StackMapTable")?;
                for l in locals {
                    write_verification_type(w, l);
                }
                w.len_u2(stack.len(), "StackMapTable")?;
                for s in stack {
                    write_verification_type(w, s);
                }
            }
        }
    }
    Ok(())
}

fn write_verification_type(w: &mut Writer, info: &VerificationTypeInfo) {
    match info {
        VerificationTypeInfo::Top => w.u1(0),
        VerificationTypeInfo::Integer => w.u1(1),
        VerificationTypeInfo::Float => w.u1(2),
        VerificationTypeInfo::Double => w.u1(3),
        VerificationTypeInfo::Long => w.u1(4),
        VerificationTypeInfo::Null => w.u1(5),
        VerificationTypeInfo::UninitializedThis => w.u1(6),
        VerificationTypeInfo::Object(index) => {
            w.u1(7);
            w.u2(*index);
        }
        VerificationTypeInfo::Uninitialized(offset) => {
            w.u1(8);
            w.u2(*offset);
        }
    }
}
