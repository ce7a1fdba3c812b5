//! Bounded, cycle-safe serialization of captured values to JSON.
//!
//! Output shape (consumed verbatim by collectors):
//!
//! * expanded object: `{"@class", "@id", <field>: <value>, ...}`
//! * map: `{"@id", "@class", <key>: <value>, ...}`
//! * array or collection: `[<value>, ...]`
//! * back reference: `{"@ref", "@class"}`
//! * capped values: `{"@skip": "MAX_DEPTH_EXCEEDED" | "MAX_SIZE_EXCEEDED" |
//!   "MAX_LENGTH_EXCEEDED" | "EXCEPTION_OCCURRED", ...}`

use crate::classfile::descriptor::java_type_name;
use crate::heap::{Heap, HeapError, Shape, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

pub const DEFAULT_MAX_OBJECT_DEPTH: u32 = 5;
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_MAX_COLLECTION_LENGTH: usize = 100;

/// Optional cap overrides; accepts both the camelCase protocol spelling and
/// snake_case config keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapOverride {
    #[serde(rename = "maxObjectDepth", alias = "max_object_depth", default, skip_serializing_if = "Option::is_none")]
    pub max_object_depth: Option<u32>,
    #[serde(rename = "maxObjectSize", alias = "max_object_size", default, skip_serializing_if = "Option::is_none")]
    pub max_object_size: Option<u64>,
    #[serde(
        rename = "maxCollectionLength",
        alias = "max_collection_length",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_collection_length: Option<usize>,
}

/// Per-breakpoint overrides carried on the instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointVariableControl {
    #[serde(flatten)]
    pub defaults: CapOverride,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variable_name_config: HashMap<String, CapOverride>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variable_type_config: HashMap<String, CapOverride>,
}

/// Process-wide caps from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VariableControl {
    pub max_object_depth: u32,
    pub max_object_size: u64,
    pub max_collection_length: usize,
    pub by_name: HashMap<String, CapOverride>,
    pub by_type: HashMap<String, CapOverride>,
}

impl Default for VariableControl {
    fn default() -> Self {
        Self {
            max_object_depth: DEFAULT_MAX_OBJECT_DEPTH,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            max_collection_length: DEFAULT_MAX_COLLECTION_LENGTH,
            by_name: HashMap::new(),
            by_type: HashMap::new(),
        }
    }
}

/// Type name caps are keyed by: `java.lang.String`, `int[]`, `java.lang.String[]`.
fn type_key(class_name: &str) -> String {
    if class_name.starts_with('[') {
        java_type_name(class_name)
    } else {
        class_name.to_string()
    }
}

pub struct Serializer<'a, H: Heap> {
    heap: &'a H,
    control: &'a VariableControl,
    breakpoint: Option<&'a BreakpointVariableControl>,
}

impl<'a, H: Heap> Serializer<'a, H> {
    pub fn new(heap: &'a H, control: &'a VariableControl) -> Self {
        Self { heap, control, breakpoint: None }
    }

    pub fn with_breakpoint(mut self, breakpoint: Option<&'a BreakpointVariableControl>) -> Self {
        self.breakpoint = breakpoint;
        self
    }

    /// Serializes the value of variable `name`.
    pub fn serialize(&self, name: &str, value: &Value<H::Ref>) -> Json {
        let mut walk = Walk { ser: self, root_name: name, seen: Vec::new(), depth: self.default_depth(), custom_active: false };
        walk.write(value, None)
    }

    /// Serializes a captured variable with its envelope:
    /// `{"@class", "@id", <name>: <value>}`, or
    /// `{"@class": <declared type>, "@null": true, <name>: null}` for null.
    pub fn serialize_variable(&self, name: &str, declared_type: &str, value: Option<&H::Ref>) -> Json {
        let mut envelope = Map::new();
        let Some(obj) = value else {
            envelope.insert("@class".into(), Json::from(declared_type));
            envelope.insert("@null".into(), Json::Bool(true));
            envelope.insert(name.to_string(), Json::Null);
            return Json::Object(envelope);
        };
        let class_name = self.heap.class_name(obj).unwrap_or_else(|_| declared_type.to_string());
        envelope.insert("@class".into(), Json::from(class_name));
        if let Ok(id) = self.heap.identity(obj) {
            envelope.insert("@id".into(), Json::from(id));
        }
        envelope.insert(name.to_string(), self.serialize(name, &Value::Object(obj.clone())));
        Json::Object(envelope)
    }

    fn default_depth(&self) -> u32 {
        self.breakpoint
            .and_then(|bp| bp.defaults.max_object_depth)
            .unwrap_or(self.control.max_object_depth)
    }

    fn resolve<T>(&self, name: &str, type_name: &str, pick: impl Fn(&CapOverride) -> Option<T>, default: T) -> T {
        if let Some(bp) = self.breakpoint {
            if let Some(v) = bp.variable_name_config.get(name).and_then(&pick) {
                return v;
            }
            if let Some(v) = bp.variable_type_config.get(type_name).and_then(&pick) {
                return v;
            }
            if let Some(v) = pick(&bp.defaults) {
                return v;
            }
        }
        if let Some(v) = self.control.by_name.get(name).and_then(&pick) {
            return v;
        }
        if let Some(v) = self.control.by_type.get(type_name).and_then(&pick) {
            return v;
        }
        default
    }

    fn max_size(&self, name: &str, type_name: &str) -> u64 {
        self.resolve(name, type_name, |c| c.max_object_size, self.control.max_object_size)
    }

    fn max_length(&self, name: &str, type_name: &str) -> usize {
        self.resolve(name, type_name, |c| c.max_collection_length, self.control.max_collection_length)
    }

    /// Depth override for a specific variable or type; the breakpoint's
    /// default depth is not one (it only replaces the global default).
    fn custom_depth(&self, name: &str, type_name: &str) -> Option<u32> {
        if let Some(bp) = self.breakpoint {
            if let Some(v) = bp.variable_name_config.get(name).and_then(|c| c.max_object_depth) {
                return Some(v);
            }
            if let Some(v) = bp.variable_type_config.get(type_name).and_then(|c| c.max_object_depth) {
                return Some(v);
            }
        }
        if let Some(v) = self.control.by_name.get(name).and_then(|c| c.max_object_depth) {
            return Some(v);
        }
        self.control.by_type.get(type_name).and_then(|c| c.max_object_depth)
    }
}

/// State of one top-level serialization.
struct Walk<'s, 'a, H: Heap> {
    ser: &'s Serializer<'a, H>,
    root_name: &'s str,
    seen: Vec<(H::Ref, String)>,
    depth: u32,
    custom_active: bool,
}

impl<H: Heap> Walk<'_, '_, H> {
    fn heap(&self) -> &H {
        self.ser.heap
    }

    fn write(&mut self, value: &Value<H::Ref>, name: Option<&str>) -> Json {
        let obj = match value {
            Value::Object(obj) => obj,
            scalar => return scalar_json(scalar),
        };
        match self.heap().resolve(obj) {
            Ok(Value::Object(_)) => {}
            Ok(scalar) => return scalar_json(&scalar),
            Err(e) => return self.exception_marker(obj, None, &e),
        }

        let class_name = match self.heap().class_name(obj) {
            Ok(c) => c,
            Err(e) => return self.exception_marker(obj, None, &e),
        };
        if let Some(id) = self.reference_to(obj) {
            let mut m = Map::new();
            m.insert("@ref".into(), Json::from(id));
            m.insert("@class".into(), Json::from(class_name));
            return Json::Object(m);
        }

        let var_name = name.unwrap_or(self.root_name).to_string();
        let type_name = type_key(&class_name);

        let saved_depth = self.depth;
        let custom = if self.custom_active { None } else { self.ser.custom_depth(&var_name, &type_name) };
        if let Some(depth) = custom {
            self.depth = depth;
            self.custom_active = true;
        }

        let out = self.write_object(obj, &class_name, &var_name, &type_name);

        if custom.is_some() {
            self.custom_active = false;
            self.depth = saved_depth;
        }
        out
    }

    fn write_object(&mut self, obj: &H::Ref, class_name: &str, var_name: &str, type_name: &str) -> Json {
        if self.depth == 0 {
            return self.depth_marker(obj, class_name);
        }
        let size = match self.heap().object_size(obj) {
            Ok(s) => s,
            Err(e) => return self.exception_marker(obj, None, &e),
        };
        let max_size = self.ser.max_size(var_name, type_name);
        if size > max_size {
            return self.size_marker(obj, class_name, size, max_size);
        }
        let max_length = self.ser.max_length(var_name, type_name);

        self.depth -= 1;
        let out = match self.expand(obj, class_name, max_length) {
            Ok(json) => json,
            Err(e) => self.exception_marker(obj, Some(size), &e),
        };
        self.depth += 1;
        out
    }

    fn expand(&mut self, obj: &H::Ref, class_name: &str, max_length: usize) -> Result<Json, HeapError> {
        match self.heap().shape(obj)? {
            Shape::Array { length: len } | Shape::Collection { size: len } => {
                let elements = self.heap().elements(obj, len.min(max_length))?;
                let mut out = Vec::with_capacity(elements.len() + 1);
                for element in &elements {
                    out.push(self.write(element, None));
                }
                if len > max_length {
                    let mut skip = Map::new();
                    append_length_exceeded(&mut skip, len, max_length);
                    out.push(Json::Object(skip));
                }
                Ok(Json::Array(out))
            }
            Shape::Map { size } => {
                let id = self.register(obj)?;
                let entries = self.heap().entries(obj, size.min(max_length))?;
                let mut m = Map::new();
                m.insert("@id".into(), Json::from(id));
                m.insert("@class".into(), Json::from(class_name));
                for (key, value) in &entries {
                    let json = self.write(value, Some(key));
                    m.insert(key.clone(), json);
                }
                if size > max_length {
                    append_length_exceeded(&mut m, size, max_length);
                }
                Ok(Json::Object(m))
            }
            Shape::Plain => {
                let id = self.register(obj)?;
                let fields = self.heap().fields(obj)?;
                let mut m = Map::new();
                m.insert("@class".into(), Json::from(class_name));
                m.insert("@id".into(), Json::from(id));
                for (field, value) in &fields {
                    let json = self.write(value, Some(field));
                    m.insert(field.clone(), json);
                }
                Ok(Json::Object(m))
            }
        }
    }

    fn register(&mut self, obj: &H::Ref) -> Result<String, HeapError> {
        let id = self.heap().identity(obj)?;
        self.seen.push((obj.clone(), id.clone()));
        Ok(id)
    }

    fn reference_to(&self, obj: &H::Ref) -> Option<String> {
        self.seen
            .iter()
            .find(|(seen, _)| self.heap().same_object(seen, obj))
            .map(|(_, id)| id.clone())
    }

    fn identity_or_unknown(&self, obj: &H::Ref) -> Json {
        self.heap().identity(obj).map(Json::from).unwrap_or(Json::Null)
    }

    fn depth_marker(&self, obj: &H::Ref, class_name: &str) -> Json {
        let mut m = Map::new();
        m.insert("@skip".into(), Json::from("MAX_DEPTH_EXCEEDED"));
        m.insert("@class".into(), Json::from(class_name));
        m.insert("@size".into(), self.heap().object_size(obj).map(Json::from).unwrap_or(Json::Null));
        m.insert("@id".into(), self.identity_or_unknown(obj));
        Json::Object(m)
    }

    fn size_marker(&self, obj: &H::Ref, class_name: &str, size: u64, max: u64) -> Json {
        let mut m = Map::new();
        m.insert("@skip".into(), Json::from("MAX_SIZE_EXCEEDED"));
        m.insert("@class".into(), Json::from(class_name));
        m.insert("@skip[size]".into(), Json::from(size));
        m.insert("@skip[max]".into(), Json::from(max));
        m.insert("@id".into(), self.identity_or_unknown(obj));
        Json::Object(m)
    }

    fn exception_marker(&self, obj: &H::Ref, size: Option<u64>, cause: &HeapError) -> Json {
        let class_name = self.heap().class_name(obj).unwrap_or_else(|_| "java.lang.Object".to_string());
        let size = size.or_else(|| self.heap().object_size(obj).ok());
        let mut m = Map::new();
        m.insert("@skip".into(), Json::from("EXCEPTION_OCCURRED"));
        m.insert("@class".into(), Json::from(class_name));
        m.insert("@size".into(), size.map(Json::from).unwrap_or(Json::Null));
        m.insert("@cause".into(), Json::from(cause.to_string()));
        m.insert("@id".into(), self.identity_or_unknown(obj));
        Json::Object(m)
    }
}

fn append_length_exceeded(m: &mut Map<String, Json>, size: usize, max: usize) {
    m.insert("@skip".into(), Json::from("MAX_LENGTH_EXCEEDED"));
    m.insert("@skip[size]".into(), Json::from(size));
    m.insert("@skip[max]".into(), Json::from(max));
}

pub fn scalar_json<R>(value: &Value<R>) -> Json {
    match value {
        Value::Null | Value::Object(_) => Json::Null,
        Value::Boolean(v) => Json::Bool(*v),
        Value::Byte(v) => Json::from(*v),
        Value::Char(v) => Json::from(v.to_string()),
        Value::Short(v) => Json::from(*v),
        Value::Int(v) => Json::from(*v),
        Value::Long(v) => Json::from(*v),
        Value::Float(v) => float_json(v.to_string().parse().unwrap_or(*v as f64)),
        Value::Double(v) => float_json(*v),
        Value::String(v) => Json::from(v.as_str()),
    }
}

fn float_json(v: f64) -> Json {
    serde_json::Number::from_f64(v)
        .map(Json::Number)
        .unwrap_or_else(|| Json::from(v.to_string()))
}
