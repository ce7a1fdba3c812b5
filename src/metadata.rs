//! Field and local-variable metadata gathered from an unmodified class.

use crate::classfile::{ClassFile, ClassFileError, ACC_STATIC};
use std::collections::HashMap;

const GROOVY_META_CLASS: &str = "Lgroovy/lang/MetaClass;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassField {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

/// A `LocalVariableTable` entry resolved to source lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub start_line: i32,
    /// Exclusive; `i32::MAX` when the variable is live to the end of the method.
    pub end_line: i32,
    pub slot: u16,
    pub start_pc: u32,
    pub end_pc: u32,
}

impl LocalVariable {
    pub fn is_live_at_line(&self, line: i32) -> bool {
        self.start_line <= line && line < self.end_line
    }

    pub fn covers_pc(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassMetadata {
    pub fields: Vec<ClassField>,
    pub static_fields: Vec<ClassField>,
    /// Keyed by method name followed by its descriptor, e.g. `run(I)V`.
    pub variables: HashMap<String, Vec<LocalVariable>>,
}

impl ClassMetadata {
    pub fn variables(&self, method_name: &str, descriptor: &str) -> &[LocalVariable] {
        self.variables
            .get(&format!("{method_name}{descriptor}"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Walks field declarations and every method's `LocalVariableTable`.
pub fn collect(class: &ClassFile) -> Result<ClassMetadata, ClassFileError> {
    let cp = &class.constant_pool;
    let mut metadata = ClassMetadata::default();

    for field in &class.fields {
        let name = field.name(cp)?;
        let descriptor = field.descriptor(cp)?;
        if name.contains('$') || descriptor == GROOVY_META_CLASS {
            continue;
        }
        let entry = ClassField { access: field.access_flags, name: name.to_string(), descriptor: descriptor.to_string() };
        if field.access_flags & ACC_STATIC != 0 {
            metadata.static_fields.push(entry);
        } else {
            metadata.fields.push(entry);
        }
    }

    for method in &class.methods {
        let Some(code) = method.code() else { continue };
        let lines = code.line_numbers();
        if lines.is_empty() {
            continue;
        }
        let code_length = code.code.len() as u32;
        let line_at = |pc: u32| -> i32 {
            lines
                .iter()
                .filter(|e| e.start_pc as u32 <= pc)
                .max_by_key(|e| e.start_pc)
                .map(|e| e.line_number as i32)
                .unwrap_or(1)
        };

        let mut variables = Vec::new();
        for entry in code.local_variables() {
            let name = cp.utf8(entry.name_index)?;
            if name.contains('$') {
                continue;
            }
            let start_pc = entry.start_pc as u32;
            let end_pc = start_pc + entry.length as u32;
            let end_line = if end_pc >= code_length { i32::MAX } else { line_at(end_pc) };
            variables.push(LocalVariable {
                name: name.to_string(),
                descriptor: cp.utf8(entry.descriptor_index)?.to_string(),
                start_line: line_at(start_pc),
                end_line,
                slot: entry.index,
                start_pc,
                end_pc,
            });
        }
        if !variables.is_empty() {
            let key = format!("{}{}", method.name(cp)?, method.descriptor(cp)?);
            metadata.variables.entry(key).or_default().extend(variables);
        }
    }

    Ok(metadata)
}
