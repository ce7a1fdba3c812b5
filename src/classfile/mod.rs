//! Class file model, reader and writer.
//!
//! Only the attributes the rewriter needs are decoded (`Code`,
//! `StackMapTable`, `LineNumberTable`, `LocalVariableTable`,
//! `LocalVariableTypeTable`, `SourceFile`); everything else is kept as raw
//! bytes. Writing a parsed class that was not modified reproduces the input
//! byte for byte.

pub mod constant_pool;
pub mod descriptor;
mod reader;
mod writer;

pub use constant_pool::{ConstantPool, CpInfo, MemberRef};
use thiserror::Error;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// First class file version whose methods must carry StackMapTable frames.
pub const FRAMES_REQUIRED_VERSION: u16 = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("unexpected end of class data")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedConstant { index: u16, expected: &'static str },
    #[error("malformed {0} attribute")]
    InvalidAttribute(String),
    #[error("invalid descriptor: {0:?}")]
    InvalidDescriptor(String),
    #[error("constant pool is full")]
    ConstantPoolOverflow,
    #[error("string constant of {0} bytes does not fit a Utf8 entry")]
    StringTooLong(usize),
    #[error("{0} trailing bytes after class data")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

/// A field or method declaration.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name_index: u16,
    pub body: AttributeBody,
}

#[derive(Debug, Clone)]
pub enum AttributeBody {
    Code(CodeAttribute),
    StackMapTable(Vec<StackMapFrame>),
    LineNumberTable(Vec<LineNumberEntry>),
    LocalVariableTable(Vec<LocalVariableEntry>),
    LocalVariableTypeTable(Vec<LocalVariableEntry>),
    SourceFile { sourcefile_index: u16 },
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationTypeInfo },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationTypeInfo },
    Chop { offset_delta: u16, k: u8 },
    SameExtended { offset_delta: u16 },
    Append { offset_delta: u16, locals: Vec<VerificationTypeInfo> },
    Full { offset_delta: u16, locals: Vec<VerificationTypeInfo>, stack: Vec<VerificationTypeInfo> },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class` entry.
    Object(u16),
    /// Code offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

/// An entry of `LocalVariableTable` or `LocalVariableTypeTable`; for the
/// latter `descriptor_index` points at the generic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

impl ClassFile {
    /// Internal name of this class, e.g. `com/example/Foo$Inner`.
    pub fn this_class_name(&self) -> Result<&str, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Dotted name of this class, e.g. `com.example.Foo$Inner`.
    pub fn dotted_name(&self) -> Result<String, ClassFileError> {
        Ok(self.this_class_name()?.replace('/', "."))
    }

    pub fn requires_frames(&self) -> bool {
        self.major_version >= FRAMES_REQUIRED_VERSION
    }

    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a.body {
            AttributeBody::SourceFile { sourcefile_index } => self.constant_pool.utf8(sourcefile_index).ok(),
            _ => None,
        })
    }
}

impl MemberInfo {
    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.utf8(self.descriptor_index)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match &a.body {
            AttributeBody::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match &mut a.body {
            AttributeBody::Code(code) => Some(code),
            _ => None,
        })
    }
}

impl CodeAttribute {
    /// All line number entries, across every `LineNumberTable` attribute.
    pub fn line_numbers(&self) -> Vec<LineNumberEntry> {
        self.attributes
            .iter()
            .filter_map(|a| match &a.body {
                AttributeBody::LineNumberTable(entries) => Some(entries.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn local_variables(&self) -> Vec<LocalVariableEntry> {
        self.attributes
            .iter()
            .filter_map(|a| match &a.body {
                AttributeBody::LocalVariableTable(entries) => Some(entries.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn stack_map(&self) -> Option<&[StackMapFrame]> {
        self.attributes.iter().find_map(|a| match &a.body {
            AttributeBody::StackMapTable(frames) => Some(frames.as_slice()),
            _ => None,
        })
    }

    /// Source line in effect at `pc`: the entry with the greatest start
    /// not after `pc`.
    pub fn line_at(&self, pc: u16) -> Option<u16> {
        line_at(&self.line_numbers(), pc)
    }
}

pub fn line_at(lines: &[LineNumberEntry], pc: u16) -> Option<u16> {
    lines
        .iter()
        .filter(|e| e.start_pc <= pc)
        .max_by_key(|e| e.start_pc)
        .map(|e| e.line_number)
}
