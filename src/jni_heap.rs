//! [`Heap`] over a live JVM.
//!
//! Objects are held as JNI global references so that values captured by one
//! hook call survive until the report call that consumes them. Every JNI call
//! that can run Java code is followed by an exception check; a pending
//! exception is cleared and surfaces as [`HeapError::Exception`].

use crate::env::{GlobalRef, JniEnv, Jvmti, LocalRef};
use crate::heap::{Heap, HeapError, Shape, Value};
use crate::sys::jni;
use std::rc::Rc;

const ACC_STATIC: jni::jint = 0x0008;

/// A captured Java object.
#[derive(Clone)]
pub struct JavaRef(Rc<GlobalRef>);

impl JavaRef {
    /// Promotes `local` to a global reference; `None` for null.
    ///
    /// # Safety
    ///
    /// `local` must be a valid reference for `jni`, and the result must be
    /// dropped on the thread owning `jni`.
    pub unsafe fn new(jni: &JniEnv, local: jni::jobject) -> Option<Self> {
        if local.is_null() {
            return None;
        }
        Some(JavaRef(Rc::new(GlobalRef::new(jni, local))))
    }

    pub fn raw(&self) -> jni::jobject {
        self.0.get()
    }
}

struct Boxed {
    class: jni::jclass,
    value: jni::jfieldID,
}

/// Classes and member ids resolved once when the hooks are bound.
pub struct JavaTypes {
    string: jni::jclass,
    boolean: Boxed,
    byte: Boxed,
    character: Boxed,
    short: Boxed,
    integer: Boxed,
    long: Boxed,
    float: Boxed,
    double: Boxed,
    collection: jni::jclass,
    map: jni::jclass,
    to_string: jni::jmethodID,
    collection_size: jni::jmethodID,
    collection_iterator: jni::jmethodID,
    map_size: jni::jmethodID,
    map_entry_set: jni::jmethodID,
    iterator_has_next: jni::jmethodID,
    iterator_next: jni::jmethodID,
    entry_key: jni::jmethodID,
    entry_value: jni::jmethodID,
}

// Class handles are global references and member ids are valid on every
// thread for as long as their class is loaded.
unsafe impl Send for JavaTypes {}
unsafe impl Sync for JavaTypes {}

impl JavaTypes {
    /// Resolves everything through `jni`. `None` if a JDK class or member is
    /// missing.
    pub fn load(jni: &JniEnv) -> Option<Self> {
        let class = |name: &str| -> Option<jni::jclass> {
            let local = jni.find_class(name)?;
            let global = jni.new_global_ref(local);
            jni.delete_local_ref(local);
            (!global.is_null()).then_some(global)
        };
        let boxed = |name: &str, descriptor: &str| -> Option<Boxed> {
            let class = class(name)?;
            let value = jni.get_field_id(class, "value", descriptor)?;
            Some(Boxed { class, value })
        };

        let object = class("java/lang/Object")?;
        let collection = class("java/util/Collection")?;
        let map = class("java/util/Map")?;
        let iterator = class("java/util/Iterator")?;
        let entry = class("java/util/Map$Entry")?;
        let set = class("java/util/Set")?;
        let types = JavaTypes {
            string: class("java/lang/String")?,
            boolean: boxed("java/lang/Boolean", "Z")?,
            byte: boxed("java/lang/Byte", "B")?,
            character: boxed("java/lang/Character", "C")?,
            short: boxed("java/lang/Short", "S")?,
            integer: boxed("java/lang/Integer", "I")?,
            long: boxed("java/lang/Long", "J")?,
            float: boxed("java/lang/Float", "F")?,
            double: boxed("java/lang/Double", "D")?,
            collection,
            map,
            to_string: jni.get_method_id(object, "toString", "()Ljava/lang/String;")?,
            collection_size: jni.get_method_id(collection, "size", "()I")?,
            collection_iterator: jni.get_method_id(collection, "iterator", "()Ljava/util/Iterator;")?,
            map_size: jni.get_method_id(map, "size", "()I")?,
            map_entry_set: jni.get_method_id(map, "entrySet", "()Ljava/util/Set;")?,
            iterator_has_next: jni.get_method_id(iterator, "hasNext", "()Z")?,
            iterator_next: jni.get_method_id(iterator, "next", "()Ljava/lang/Object;")?,
            entry_key: jni.get_method_id(entry, "getKey", "()Ljava/lang/Object;")?,
            entry_value: jni.get_method_id(entry, "getValue", "()Ljava/lang/Object;")?,
        };
        for helper in [object, iterator, entry, set] {
            jni.delete_global_ref(helper);
        }
        Some(types)
    }
}

/// `Lcom/example/Foo;` to `com.example.Foo`; array signatures keep the
/// `Class.getName()` form, e.g. `[Ljava.lang.String;`.
pub fn class_name_from_signature(signature: &str) -> String {
    if signature.starts_with('[') {
        return signature.replace('/', ".");
    }
    signature
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(signature)
        .replace('/', ".")
}

pub struct JniHeap<'a> {
    jni: &'a JniEnv,
    jvmti: Jvmti,
    types: &'a JavaTypes,
}

impl<'a> JniHeap<'a> {
    pub fn new(jni: &'a JniEnv, jvmti: Jvmti, types: &'a JavaTypes) -> Self {
        JniHeap { jni, jvmti, types }
    }

    fn check(&self, call: &'static str) -> Result<(), HeapError> {
        if self.jni.take_exception() {
            return Err(HeapError::Exception(format!("exception thrown by {call}")));
        }
        Ok(())
    }

    fn wrap(&self, local: jni::jobject) -> Value<JavaRef> {
        // SAFETY: `local` was just returned by a JNI call on this thread.
        let value = unsafe { JavaRef::new(self.jni, local) };
        if !local.is_null() {
            self.jni.delete_local_ref(local);
        }
        value.map_or(Value::Null, Value::Object)
    }

    fn signature(&self, obj: jni::jobject) -> Result<String, HeapError> {
        let class = LocalRef::new(self.jni, self.jni.get_object_class(obj));
        self.jvmti.get_class_signature(class.get()).map_err(|_| HeapError::Call("GetClassSignature"))
    }

    fn call_object(&self, obj: jni::jobject, method: jni::jmethodID, call: &'static str) -> Result<jni::jobject, HeapError> {
        let result = self.jni.call_object_method(obj, method, &[]);
        self.check(call)?;
        Ok(result)
    }

    fn call_int(&self, obj: jni::jobject, method: jni::jmethodID, call: &'static str) -> Result<i32, HeapError> {
        let result = self.jni.call_int_method(obj, method, &[]);
        self.check(call)?;
        Ok(result)
    }

    fn string(&self, obj: jni::jstring) -> Result<String, HeapError> {
        let s = self.jni.get_string_utf(obj);
        self.check("GetStringUTFChars")?;
        s.ok_or(HeapError::Call("GetStringUTFChars"))
    }

    fn iterate(&self, iterator: jni::jobject, limit: usize) -> Result<Vec<jni::jobject>, HeapError> {
        let mut items = Vec::new();
        while items.len() < limit {
            let has_next = self.jni.call_boolean_method(iterator, self.types.iterator_has_next, &[]);
            self.check("Iterator.hasNext")?;
            if !has_next {
                break;
            }
            items.push(self.call_object(iterator, self.types.iterator_next, "Iterator.next")?);
        }
        Ok(items)
    }

    fn array_elements(&self, array: jni::jarray, element: char, limit: usize) -> Result<Vec<Value<JavaRef>>, HeapError> {
        let length = (self.jni.get_array_length(array).max(0) as usize).min(limit);
        let n = length as jni::jsize;
        macro_rules! region {
            ($get:ident, $ty:ty, $map:expr) => {{
                let mut buf: Vec<$ty> = vec![Default::default(); length];
                self.jni.$get(array, 0, &mut buf);
                self.check(stringify!($get))?;
                buf.into_iter().map($map).collect()
            }};
        }
        let values = match element {
            'Z' => region!(get_boolean_array_region, jni::jboolean, |v| Value::Boolean(v != 0)),
            'B' => region!(get_byte_array_region, jni::jbyte, Value::Byte),
            'C' => region!(get_char_array_region, jni::jchar, |v| Value::Char(java_char(v))),
            'S' => region!(get_short_array_region, jni::jshort, Value::Short),
            'I' => region!(get_int_array_region, jni::jint, Value::Int),
            'J' => region!(get_long_array_region, jni::jlong, Value::Long),
            'F' => region!(get_float_array_region, jni::jfloat, Value::Float),
            'D' => region!(get_double_array_region, jni::jdouble, Value::Double),
            _ => {
                let mut values = Vec::with_capacity(length);
                for index in 0..n {
                    let local = self.jni.get_object_array_element(array, index);
                    self.check("GetObjectArrayElement")?;
                    values.push(self.wrap(local));
                }
                values
            }
        };
        Ok(values)
    }

    fn read_field(&self, obj: jni::jobject, field: jni::jfieldID, descriptor: &str) -> Value<JavaRef> {
        let jni = self.jni;
        match descriptor.as_bytes().first() {
            Some(b'Z') => Value::Boolean(jni.get_boolean_field(obj, field)),
            Some(b'B') => Value::Byte(jni.get_byte_field(obj, field)),
            Some(b'C') => Value::Char(java_char(jni.get_char_field(obj, field))),
            Some(b'S') => Value::Short(jni.get_short_field(obj, field)),
            Some(b'I') => Value::Int(jni.get_int_field(obj, field)),
            Some(b'J') => Value::Long(jni.get_long_field(obj, field)),
            Some(b'F') => Value::Float(jni.get_float_field(obj, field)),
            Some(b'D') => Value::Double(jni.get_double_field(obj, field)),
            _ => self.wrap(jni.get_object_field(obj, field)),
        }
    }
}

fn java_char(v: jni::jchar) -> char {
    char::from_u32(v as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
}

impl Heap for JniHeap<'_> {
    type Ref = JavaRef;

    fn resolve(&self, obj: &JavaRef) -> Result<Value<JavaRef>, HeapError> {
        let raw = obj.raw();
        let jni = self.jni;
        let t = self.types;
        if jni.is_instance_of(raw, t.string) {
            return self.string(raw).map(Value::String);
        }
        let value = if jni.is_instance_of(raw, t.integer.class) {
            Value::Int(jni.get_int_field(raw, t.integer.value))
        } else if jni.is_instance_of(raw, t.long.class) {
            Value::Long(jni.get_long_field(raw, t.long.value))
        } else if jni.is_instance_of(raw, t.boolean.class) {
            Value::Boolean(jni.get_boolean_field(raw, t.boolean.value))
        } else if jni.is_instance_of(raw, t.double.class) {
            Value::Double(jni.get_double_field(raw, t.double.value))
        } else if jni.is_instance_of(raw, t.float.class) {
            Value::Float(jni.get_float_field(raw, t.float.value))
        } else if jni.is_instance_of(raw, t.short.class) {
            Value::Short(jni.get_short_field(raw, t.short.value))
        } else if jni.is_instance_of(raw, t.byte.class) {
            Value::Byte(jni.get_byte_field(raw, t.byte.value))
        } else if jni.is_instance_of(raw, t.character.class) {
            Value::Char(java_char(jni.get_char_field(raw, t.character.value)))
        } else {
            Value::Object(obj.clone())
        };
        Ok(value)
    }

    fn class_name(&self, obj: &JavaRef) -> Result<String, HeapError> {
        Ok(class_name_from_signature(&self.signature(obj.raw())?))
    }

    fn identity_hash(&self, obj: &JavaRef) -> Result<i32, HeapError> {
        self.jvmti.get_object_hash_code(obj.raw()).map_err(|_| HeapError::Call("GetObjectHashCode"))
    }

    fn same_object(&self, a: &JavaRef, b: &JavaRef) -> bool {
        self.jni.is_same_object(a.raw(), b.raw())
    }

    fn object_size(&self, obj: &JavaRef) -> Result<u64, HeapError> {
        self.jvmti
            .get_object_size(obj.raw())
            .map(|size| size.max(0) as u64)
            .map_err(|_| HeapError::Call("GetObjectSize"))
    }

    fn shape(&self, obj: &JavaRef) -> Result<Shape, HeapError> {
        let raw = obj.raw();
        if self.signature(raw)?.starts_with('[') {
            let length = self.jni.get_array_length(raw).max(0) as usize;
            return Ok(Shape::Array { length });
        }
        if self.jni.is_instance_of(raw, self.types.map) {
            let size = self.call_int(raw, self.types.map_size, "Map.size")?;
            return Ok(Shape::Map { size: size.max(0) as usize });
        }
        if self.jni.is_instance_of(raw, self.types.collection) {
            let size = self.call_int(raw, self.types.collection_size, "Collection.size")?;
            return Ok(Shape::Collection { size: size.max(0) as usize });
        }
        Ok(Shape::Plain)
    }

    fn elements(&self, obj: &JavaRef, limit: usize) -> Result<Vec<Value<JavaRef>>, HeapError> {
        let raw = obj.raw();
        let signature = self.signature(raw)?;
        if let Some(element) = signature.strip_prefix('[') {
            let kind = element.chars().next().unwrap_or('L');
            return self.array_elements(raw, kind, limit);
        }
        if !self.jni.is_instance_of(raw, self.types.collection) {
            return Err(HeapError::NotIndexable(class_name_from_signature(&signature)));
        }
        let iterator = LocalRef::new(self.jni, self.call_object(raw, self.types.collection_iterator, "Collection.iterator")?);
        let items = self.iterate(iterator.get(), limit)?;
        Ok(items.into_iter().map(|item| self.wrap(item)).collect())
    }

    fn entries(&self, obj: &JavaRef, limit: usize) -> Result<Vec<(String, Value<JavaRef>)>, HeapError> {
        let raw = obj.raw();
        if !self.jni.is_instance_of(raw, self.types.map) {
            return Err(HeapError::NotIndexable(self.class_name(obj)?));
        }
        let entry_set = LocalRef::new(self.jni, self.call_object(raw, self.types.map_entry_set, "Map.entrySet")?);
        let iterator =
            LocalRef::new(self.jni, self.call_object(entry_set.get(), self.types.collection_iterator, "Set.iterator")?);

        let mut entries = Vec::new();
        for entry in self.iterate(iterator.get(), limit)? {
            let entry = LocalRef::new(self.jni, entry);
            let key = self.wrap(self.call_object(entry.get(), self.types.entry_key, "Map.Entry.getKey")?);
            let key = match &key {
                Value::Object(key) => match self.resolve(key)? {
                    Value::String(s) => s,
                    _ => self.display(key)?,
                },
                _ => "null".to_string(),
            };
            let value = self.wrap(self.call_object(entry.get(), self.types.entry_value, "Map.Entry.getValue")?);
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn fields(&self, obj: &JavaRef) -> Result<Vec<(String, Value<JavaRef>)>, HeapError> {
        let raw = obj.raw();
        let mut fields = Vec::new();
        let mut class = Some(self.jni.get_object_class(raw));
        while let Some(current) = class {
            let current = LocalRef::new(self.jni, current);
            let ids = self.jvmti.get_class_fields(current.get()).map_err(|_| HeapError::Call("GetClassFields"))?;
            for field in ids {
                let modifiers = self
                    .jvmti
                    .get_field_modifiers(current.get(), field)
                    .map_err(|_| HeapError::Call("GetFieldModifiers"))?;
                if modifiers & ACC_STATIC != 0 {
                    continue;
                }
                let (name, descriptor) =
                    self.jvmti.get_field_name(current.get(), field).map_err(|_| HeapError::Call("GetFieldName"))?;
                fields.push((name, self.read_field(raw, field, &descriptor)));
            }
            class = self.jni.get_superclass(current.get());
        }
        Ok(fields)
    }

    fn display(&self, obj: &JavaRef) -> Result<String, HeapError> {
        let s = LocalRef::new(self.jni, self.call_object(obj.raw(), self.types.to_string, "toString")?);
        if s.is_null() {
            return Ok("null".to_string());
        }
        self.string(s.get())
    }
}
