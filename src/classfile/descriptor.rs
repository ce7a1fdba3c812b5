//! Field and method descriptors.

use super::ClassFileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn parse(descriptor: &str) -> Result<Self, ClassFileError> {
        match Self::parse_prefix(descriptor)? {
            (ty, "") => Ok(ty),
            _ => Err(ClassFileError::InvalidDescriptor(descriptor.to_string())),
        }
    }

    fn parse_prefix(s: &str) -> Result<(Self, &str), ClassFileError> {
        let invalid = || ClassFileError::InvalidDescriptor(s.to_string());
        let mut chars = s.chars();
        let ty = match chars.next().ok_or_else(invalid)? {
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'D' => FieldType::Double,
            'F' => FieldType::Float,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'S' => FieldType::Short,
            'Z' => FieldType::Boolean,
            'L' => {
                let rest = &s[1..];
                let end = rest.find(';').ok_or_else(invalid)?;
                if end == 0 {
                    return Err(invalid());
                }
                return Ok((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]));
            }
            '[' => {
                let (component, rest) = Self::parse_prefix(&s[1..])?;
                return Ok((FieldType::Array(Box::new(component)), rest));
            }
            _ => return Err(invalid()),
        };
        Ok((ty, &s[1..]))
    }

    pub fn descriptor(&self) -> String {
        match self {
            FieldType::Byte => "B".into(),
            FieldType::Char => "C".into(),
            FieldType::Double => "D".into(),
            FieldType::Float => "F".into(),
            FieldType::Int => "I".into(),
            FieldType::Long => "J".into(),
            FieldType::Short => "S".into(),
            FieldType::Boolean => "Z".into(),
            FieldType::Object(name) => format!("L{name};"),
            FieldType::Array(component) => format!("[{}", component.descriptor()),
        }
    }

    /// Source-level type name: `int`, `java.lang.String`, `int[][]`.
    pub fn java_name(&self) -> String {
        match self {
            FieldType::Byte => "byte".into(),
            FieldType::Char => "char".into(),
            FieldType::Double => "double".into(),
            FieldType::Float => "float".into(),
            FieldType::Int => "int".into(),
            FieldType::Long => "long".into(),
            FieldType::Short => "short".into(),
            FieldType::Boolean => "boolean".into(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    /// Number of local variable slots a value of this type occupies.
    pub fn slot_size(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Wrapper class used to box a primitive, with its `valueOf` descriptor.
    pub fn boxing(&self) -> Option<(&'static str, &'static str)> {
        Some(match self {
            FieldType::Boolean => ("java/lang/Boolean", "(Z)Ljava/lang/Boolean;"),
            FieldType::Byte => ("java/lang/Byte", "(B)Ljava/lang/Byte;"),
            FieldType::Char => ("java/lang/Character", "(C)Ljava/lang/Character;"),
            FieldType::Short => ("java/lang/Short", "(S)Ljava/lang/Short;"),
            FieldType::Int => ("java/lang/Integer", "(I)Ljava/lang/Integer;"),
            FieldType::Long => ("java/lang/Long", "(J)Ljava/lang/Long;"),
            FieldType::Float => ("java/lang/Float", "(F)Ljava/lang/Float;"),
            FieldType::Double => ("java/lang/Double", "(D)Ljava/lang/Double;"),
            FieldType::Object(_) | FieldType::Array(_) => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`.
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, ClassFileError> {
        let invalid = || ClassFileError::InvalidDescriptor(descriptor.to_string());
        let mut rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            if rest.is_empty() {
                return Err(invalid());
            }
            let (ty, tail) = FieldType::parse_prefix(rest)?;
            params.push(ty);
            rest = tail;
        }
        let ret = match &rest[1..] {
            "V" => None,
            other => Some(FieldType::parse(other).map_err(|_| invalid())?),
        };
        Ok(Self { params, ret })
    }

    /// Slots taken by the parameters, excluding `this`.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slot_size).sum()
    }
}

/// `com.example.Foo.bar(int,java.lang.String[])`, the form span locations use.
pub fn java_method_signature(class_name: &str, method_name: &str, descriptor: &MethodDescriptor) -> String {
    let params: Vec<String> = descriptor.params.iter().map(FieldType::java_name).collect();
    format!("{}.{}({})", class_name.replace('/', "."), method_name, params.join(","))
}

/// Source-level type name for a raw descriptor, falling back to the
/// descriptor itself when it does not parse.
pub fn java_type_name(descriptor: &str) -> String {
    FieldType::parse(descriptor)
        .map(|t| t.java_name())
        .unwrap_or_else(|_| descriptor.to_string())
}
