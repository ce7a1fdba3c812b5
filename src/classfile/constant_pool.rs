//! Constant pool model.
//!
//! Entries are only ever appended, so indices referenced by untouched
//! attributes stay valid across a rewrite.

use super::ClassFileError;

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    /// `bytes` is the modified UTF-8 exactly as stored; `text` is its decoding.
    Utf8 { bytes: Vec<u8>, text: String },
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl CpInfo {
    fn is_wide(&self) -> bool {
        matches!(self, CpInfo::Long(_) | CpInfo::Double(_))
    }
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    // index 0 and the slot after a Long/Double are `None`
    entries: Vec<Option<CpInfo>>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self { entries: vec![None] }
    }

    pub(crate) fn from_entries(entries: Vec<Option<CpInfo>>) -> Self {
        Self { entries }
    }

    /// The `constant_pool_count` value written to the class file.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &CpInfo)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8 { text, .. } => Ok(text.as_str()),
            _ => Err(ClassFileError::UnexpectedConstant { index, expected: "Utf8" }),
        }
    }

    /// Internal name of a `Class` entry, e.g. `java/lang/String` or `[I`.
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFileError::UnexpectedConstant { index, expected: "Class" }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFileError> {
        match self.get(index)? {
            CpInfo::NameAndType { name_index, descriptor_index } => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::UnexpectedConstant { index, expected: "NameAndType" }),
        }
    }

    /// Resolves a Fieldref, Methodref or InterfaceMethodref.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassFileError> {
        match self.get(index)? {
            CpInfo::Fieldref { class_index, name_and_type_index }
            | CpInfo::Methodref { class_index, name_and_type_index }
            | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                let class_name = self.class_name(*class_index)?;
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok(MemberRef { class_name, name, descriptor })
            }
            _ => Err(ClassFileError::UnexpectedConstant { index, expected: "member reference" }),
        }
    }

    /// Name and descriptor of an `InvokeDynamic` or `Dynamic` entry.
    pub fn dynamic_name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFileError> {
        match self.get(index)? {
            CpInfo::InvokeDynamic { name_and_type_index, .. }
            | CpInfo::Dynamic { name_and_type_index, .. } => self.name_and_type(*name_and_type_index),
            _ => Err(ClassFileError::UnexpectedConstant { index, expected: "InvokeDynamic" }),
        }
    }

    pub fn find_utf8(&self, text: &str) -> Option<u16> {
        self.iter().find_map(|(i, e)| match e {
            CpInfo::Utf8 { text: t, .. } if t == text => Some(i),
            _ => None,
        })
    }

    fn find(&self, entry: &CpInfo) -> Option<u16> {
        self.iter().find_map(|(i, e)| (e == entry).then_some(i))
    }

    fn push(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        let wide = entry.is_wide();
        let index = self.entries.len();
        let needed = if wide { 2 } else { 1 };
        if index + needed > u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(index as u16)
    }

    fn add(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        match self.find(&entry) {
            Some(i) => Ok(i),
            None => self.push(entry),
        }
    }

    pub fn add_utf8(&mut self, text: &str) -> Result<u16, ClassFileError> {
        if let Some(i) = self.find_utf8(text) {
            return Ok(i);
        }
        let bytes = encode_modified_utf8(text);
        if bytes.len() > u16::MAX as usize {
            return Err(ClassFileError::StringTooLong(bytes.len()));
        }
        self.push(CpInfo::Utf8 { bytes, text: text.to_string() })
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.add_utf8(internal_name)?;
        self.add(CpInfo::Class { name_index })
    }

    pub fn add_string(&mut self, text: &str) -> Result<u16, ClassFileError> {
        let string_index = self.add_utf8(text)?;
        self.add(CpInfo::String { string_index })
    }

    pub fn add_integer(&mut self, value: i32) -> Result<u16, ClassFileError> {
        self.add(CpInfo::Integer(value))
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(CpInfo::NameAndType { name_index, descriptor_index })
    }

    pub fn add_methodref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(CpInfo::Methodref { class_index, name_and_type_index })
    }

    pub fn add_fieldref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(CpInfo::Fieldref { class_index, name_and_type_index })
    }
}

/// Decodes the JVM's modified UTF-8 (NUL as `C0 80`, supplementary
/// characters as surrogate pairs). Malformed input decodes lossily.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        if !bytes.iter().any(|&b| b == 0xC0 || b == 0xED) {
            return s.to_string();
        }
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            units.push((((b & 0x1F) as u16) << 6) | (bytes[i + 1] & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            units.push(
                (((b & 0x0F) as u16) << 12)
                    | (((bytes[i + 1] & 0x3F) as u16) << 6)
                    | (bytes[i + 2] & 0x3F) as u16,
            );
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
