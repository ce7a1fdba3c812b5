//! Read-only introspection of captured runtime values.
//!
//! The serializer and the condition evaluator only see the target heap
//! through [`Heap`]; the agent implements it over JNI/JVMTI
//! ([`crate::jni_heap::JniHeap`]).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// A Java exception was thrown while inspecting the value.
    #[error("{0}")]
    Exception(String),
    #[error("{0} failed")]
    Call(&'static str),
    #[error("no field named {0:?}")]
    NoSuchField(String),
    #[error("{0} is not indexable")]
    NotIndexable(String),
}

/// A value read from the heap. Boxed primitives and strings are resolved to
/// their scalar form by [`Heap::resolve`]; everything else stays a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<R> {
    Null,
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Object(R),
}

impl<R> Value<R> {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Null | Value::Object(_))
    }
}

/// How an object is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Plain,
    Array { length: usize },
    Collection { size: usize },
    Map { size: usize },
}

pub trait Heap {
    type Ref: Clone;

    /// Unboxes wrappers and strings; any other object comes back as `Object`.
    fn resolve(&self, obj: &Self::Ref) -> Result<Value<Self::Ref>, HeapError>;

    /// Runtime class name as `Class.getName()` reports it, e.g.
    /// `java.util.ArrayList` or `[I`.
    fn class_name(&self, obj: &Self::Ref) -> Result<String, HeapError>;

    fn identity_hash(&self, obj: &Self::Ref) -> Result<i32, HeapError>;

    fn same_object(&self, a: &Self::Ref, b: &Self::Ref) -> bool;

    /// Shallow object size in bytes.
    fn object_size(&self, obj: &Self::Ref) -> Result<u64, HeapError>;

    fn shape(&self, obj: &Self::Ref) -> Result<Shape, HeapError>;

    /// First `limit` elements of an array or collection.
    fn elements(&self, obj: &Self::Ref, limit: usize) -> Result<Vec<Value<Self::Ref>>, HeapError>;

    /// First `limit` map entries, keys rendered with `toString()`.
    fn entries(&self, obj: &Self::Ref, limit: usize) -> Result<Vec<(String, Value<Self::Ref>)>, HeapError>;

    /// Instance fields of the object's class and its superclasses.
    fn fields(&self, obj: &Self::Ref) -> Result<Vec<(String, Value<Self::Ref>)>, HeapError>;

    fn field(&self, obj: &Self::Ref, name: &str) -> Result<Value<Self::Ref>, HeapError> {
        self.fields(obj)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| HeapError::NoSuchField(name.to_string()))
    }

    /// `toString()` of the object.
    fn display(&self, obj: &Self::Ref) -> Result<String, HeapError>;

    /// Identity token used by the wire format: the identity hash in lowercase hex.
    fn identity(&self, obj: &Self::Ref) -> Result<String, HeapError> {
        Ok(format!("{:x}", self.identity_hash(obj)? as u32))
    }
}

/// Renders a value the way `String.valueOf` would.
pub fn display_value<H: Heap>(heap: &H, value: &Value<H::Ref>) -> Result<String, HeapError> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Char(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => java_float(*v as f64),
        Value::Double(v) => java_float(*v),
        Value::String(v) => v.clone(),
        Value::Object(obj) => heap.display(obj)?,
    })
}

fn java_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e7 {
        format!("{v:.1}")
    } else if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        v.to_string()
    }
}
