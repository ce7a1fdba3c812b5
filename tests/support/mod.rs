#![allow(dead_code)]

use jvmti_probe::config::ProbeConfig;
use jvmti_probe::error::ProbeError;
use jvmti_probe::event::{EventSink, RecordingSink};
use jvmti_probe::heap::{Heap, HeapError, Shape, Value};
use jvmti_probe::instrument::Instrumentation;
use jvmti_probe::probe::Probe;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Class assembly
// ---------------------------------------------------------------------------

pub struct CpBuilder {
    entries: Vec<Vec<u8>>,
}

impl CpBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut entry = vec![1];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        self.push(entry)
    }

    pub fn class(&mut self, name_index: u16) -> u16 {
        let mut entry = vec![7];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    pub fn name_and_type(&mut self, name_index: u16, descriptor_index: u16) -> u16 {
        let mut entry = vec![12];
        entry.extend_from_slice(&name_index.to_be_bytes());
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.push(entry)
    }

    pub fn methodref(&mut self, class_index: u16, name_and_type_index: u16) -> u16 {
        let mut entry = vec![10];
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push(entry)
    }

    pub fn fieldref(&mut self, class_index: u16, name_and_type_index: u16) -> u16 {
        let mut entry = vec![9];
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push(entry)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry)
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        u2(out, self.entries.len() as u16 + 1);
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
    }
}

pub fn u1(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn push_attr(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    u2(out, name_index);
    u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

/// `(start_pc, line)` pairs.
fn line_table(name_index: u16, entries: &[(u16, u16)]) -> Vec<u8> {
    let mut info = Vec::new();
    u2(&mut info, entries.len() as u16);
    for (pc, line) in entries {
        u2(&mut info, *pc);
        u2(&mut info, *line);
    }
    let mut out = Vec::new();
    push_attr(&mut out, name_index, &info);
    out
}

/// `(start_pc, length, name, descriptor, slot)` entries.
fn local_table(name_index: u16, entries: &[(u16, u16, u16, u16, u16)]) -> Vec<u8> {
    let mut info = Vec::new();
    u2(&mut info, entries.len() as u16);
    for (start, length, name, descriptor, slot) in entries {
        u2(&mut info, *start);
        u2(&mut info, *length);
        u2(&mut info, *name);
        u2(&mut info, *descriptor);
        u2(&mut info, *slot);
    }
    let mut out = Vec::new();
    push_attr(&mut out, name_index, &info);
    out
}

#[allow(clippy::too_many_arguments)]
fn method(out: &mut Vec<u8>, access: u16, name: u16, descriptor: u16, code_name: u16, max: (u16, u16), code: &[u8], attrs: &[Vec<u8>]) {
    u2(out, access);
    u2(out, name);
    u2(out, descriptor);
    u2(out, 1);

    let mut info = Vec::new();
    u2(&mut info, max.0);
    u2(&mut info, max.1);
    u4(&mut info, code.len() as u32);
    info.extend_from_slice(code);
    u2(&mut info, 0);
    u2(&mut info, attrs.len() as u16);
    for attr in attrs {
        info.extend_from_slice(attr);
    }
    push_attr(out, code_name, &info);
}

pub const COUNTER: &str = "com.example.Counter";

/// `com/example/Counter` with debug info, as javac would lay it out:
///
/// ```java
/// public class Counter {                 // line 1
///     private int count;
///     static String label;
///     public Counter() { super(); }      // line 3
///
///     public int add(int amount) {
///         count += amount;               // line 10
///         return count;                  // line 11
///     }
///
///     public static int twice(int value) {
///         int result = value * 2;        // line 20
///         return result;                 // line 21
///     }
///
///     public static int abs(int value) {
///         if (value < 0)                 // line 30
///             return -value;             // line 31
///         return value;                  // line 32, the branch target
///     }
/// }
/// ```
///
/// Versions below 50 carry no StackMapTable.
pub fn counter_class(major_version: u16) -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let utf_counter = cp.utf8("com/example/Counter");
    let class_counter = cp.class(utf_counter);
    let utf_object = cp.utf8("java/lang/Object");
    let class_object = cp.class(utf_object);
    let utf_init = cp.utf8("<init>");
    let utf_void = cp.utf8("()V");
    let nat_init = cp.name_and_type(utf_init, utf_void);
    let mref_object_init = cp.methodref(class_object, nat_init);
    let utf_count = cp.utf8("count");
    let utf_int = cp.utf8("I");
    let nat_count = cp.name_and_type(utf_count, utf_int);
    let fref_count = cp.fieldref(class_counter, nat_count);
    let utf_label = cp.utf8("label");
    let utf_string = cp.utf8("Ljava/lang/String;");
    let utf_outer = cp.utf8("this$0");
    let utf_add = cp.utf8("add");
    let utf_int_int = cp.utf8("(I)I");
    let utf_twice = cp.utf8("twice");
    let utf_abs = cp.utf8("abs");
    let utf_code = cp.utf8("Code");
    let utf_lnt = cp.utf8("LineNumberTable");
    let utf_lvt = cp.utf8("LocalVariableTable");
    let utf_smt = cp.utf8("StackMapTable");
    let utf_this = cp.utf8("this");
    let utf_counter_desc = cp.utf8("Lcom/example/Counter;");
    let utf_amount = cp.utf8("amount");
    let utf_value = cp.utf8("value");
    let utf_result = cp.utf8("result");
    let utf_source_file = cp.utf8("SourceFile");
    let utf_source_name = cp.utf8("Counter.java");

    let mut bytes = Vec::new();
    u4(&mut bytes, 0xCAFEBABE);
    u2(&mut bytes, 0);
    u2(&mut bytes, major_version);
    cp.write(&mut bytes);
    u2(&mut bytes, 0x0021);
    u2(&mut bytes, class_counter);
    u2(&mut bytes, class_object);
    u2(&mut bytes, 0);

    // fields
    u2(&mut bytes, 3);
    for (access, name, descriptor) in [(0x0002, utf_count, utf_int), (0x0008, utf_label, utf_string), (0x1010, utf_outer, utf_counter_desc)] {
        u2(&mut bytes, access);
        u2(&mut bytes, name);
        u2(&mut bytes, descriptor);
        u2(&mut bytes, 0);
    }

    // methods
    u2(&mut bytes, 4);

    let [hi, lo] = mref_object_init.to_be_bytes();
    method(
        &mut bytes,
        0x0001,
        utf_init,
        utf_void,
        utf_code,
        (1, 1),
        &[0x2a, 0xb7, hi, lo, 0xb1],
        &[line_table(utf_lnt, &[(0, 3)]), local_table(utf_lvt, &[(0, 5, utf_this, utf_counter_desc, 0)])],
    );

    let [hi, lo] = fref_count.to_be_bytes();
    method(
        &mut bytes,
        0x0001,
        utf_add,
        utf_int_int,
        utf_code,
        (3, 2),
        &[
            0x2a, // aload_0
            0x59, // dup
            0xb4, hi, lo, // getfield count
            0x1b, // iload_1
            0x60, // iadd
            0xb5, hi, lo, // putfield count
            0x2a, // aload_0
            0xb4, hi, lo, // getfield count
            0xac, // ireturn
        ],
        &[
            line_table(utf_lnt, &[(0, 10), (10, 11)]),
            local_table(utf_lvt, &[(0, 15, utf_this, utf_counter_desc, 0), (0, 15, utf_amount, utf_int, 1)]),
        ],
    );

    method(
        &mut bytes,
        0x0009,
        utf_twice,
        utf_int_int,
        utf_code,
        (2, 2),
        &[
            0x1a, // iload_0
            0x05, // iconst_2
            0x68, // imul
            0x3c, // istore_1
            0x1b, // iload_1
            0xac, // ireturn
        ],
        &[
            line_table(utf_lnt, &[(0, 20), (4, 21)]),
            local_table(utf_lvt, &[(0, 6, utf_value, utf_int, 0), (4, 2, utf_result, utf_int, 1)]),
        ],
    );

    let mut abs_attrs = vec![
        line_table(utf_lnt, &[(0, 30), (4, 31), (7, 32)]),
        local_table(utf_lvt, &[(0, 9, utf_value, utf_int, 0)]),
    ];
    if major_version >= 50 {
        // one `same` frame at pc 7, the branch target
        let mut smt = Vec::new();
        push_attr(&mut smt, utf_smt, &[0, 1, 7]);
        abs_attrs.push(smt);
    }
    method(
        &mut bytes,
        0x0009,
        utf_abs,
        utf_int_int,
        utf_code,
        (1, 1),
        &[
            0x1a, // 0: iload_0
            0x9c, 0x00, 0x06, // 1: ifge 7
            0x1a, // 4: iload_0
            0x74, // 5: ineg
            0xac, // 6: ireturn
            0x1a, // 7: iload_0
            0xac, // 8: ireturn
        ],
        &abs_attrs,
    );

    // class attributes
    u2(&mut bytes, 1);
    let mut source = Vec::new();
    u2(&mut source, utf_source_name);
    push_attr(&mut bytes, utf_source_file, &source);

    bytes
}

pub const LOOP: &str = "com.example.Loop";

/// `com.example.Loop`, class version 49:
///
/// ```java
/// static int sum(int n) {
///     int total = 0;                   // line 40
///     for (int i = 0; i < n; i++)      // line 41, at pc 2 and pc 13
///         total += i;                  // line 42
///     return total;                    // line 43
/// }
/// ```
pub fn loop_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let utf_loop = cp.utf8("com/example/Loop");
    let class_loop = cp.class(utf_loop);
    let utf_object = cp.utf8("java/lang/Object");
    let class_object = cp.class(utf_object);
    let utf_sum = cp.utf8("sum");
    let utf_int_int = cp.utf8("(I)I");
    let utf_int = cp.utf8("I");
    let utf_n = cp.utf8("n");
    let utf_total = cp.utf8("total");
    let utf_i = cp.utf8("i");
    let utf_code = cp.utf8("Code");
    let utf_lnt = cp.utf8("LineNumberTable");
    let utf_lvt = cp.utf8("LocalVariableTable");

    let mut bytes = Vec::new();
    u4(&mut bytes, 0xCAFEBABE);
    u2(&mut bytes, 0);
    u2(&mut bytes, 49);
    cp.write(&mut bytes);
    u2(&mut bytes, 0x0021);
    u2(&mut bytes, class_loop);
    u2(&mut bytes, class_object);
    u2(&mut bytes, 0);
    u2(&mut bytes, 0);

    u2(&mut bytes, 1);
    method(
        &mut bytes,
        0x0008,
        utf_sum,
        utf_int_int,
        utf_code,
        (2, 3),
        &[
            0x03, // 0: iconst_0
            0x3c, // 1: istore_1
            0x03, // 2: iconst_0
            0x3d, // 3: istore_2
            0x1c, // 4: iload_2
            0x1a, // 5: iload_0
            0xa2, 0x00, 0x0d, // 6: if_icmpge 19
            0x1b, // 9: iload_1
            0x1c, // 10: iload_2
            0x60, // 11: iadd
            0x3c, // 12: istore_1
            0x84, 0x02, 0x01, // 13: iinc 2, 1
            0xa7, 0xff, 0xf4, // 16: goto 4
            0x1b, // 19: iload_1
            0xac, // 20: ireturn
        ],
        &[
            line_table(utf_lnt, &[(0, 40), (2, 41), (9, 42), (13, 41), (19, 43)]),
            local_table(utf_lvt, &[(0, 21, utf_n, utf_int, 0), (2, 19, utf_total, utf_int, 1), (4, 15, utf_i, utf_int, 2)]),
        ],
    );

    u2(&mut bytes, 0);
    bytes
}

pub const BIG: &str = "com.example.Big";

/// `com.example.Big`: `small()` on line 4, and `huge()` whose code is a
/// few bytes short of the 64 KiB limit, with line 100 at pc 900.
pub fn big_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let utf_big = cp.utf8("com/example/Big");
    let class_big = cp.class(utf_big);
    let utf_object = cp.utf8("java/lang/Object");
    let class_object = cp.class(utf_object);
    let utf_void = cp.utf8("()V");
    let utf_small = cp.utf8("small");
    let utf_huge = cp.utf8("huge");
    let utf_code = cp.utf8("Code");
    let utf_lnt = cp.utf8("LineNumberTable");

    let mut bytes = Vec::new();
    u4(&mut bytes, 0xCAFEBABE);
    u2(&mut bytes, 0);
    u2(&mut bytes, 52);
    cp.write(&mut bytes);
    u2(&mut bytes, 0x0021);
    u2(&mut bytes, class_big);
    u2(&mut bytes, class_object);
    u2(&mut bytes, 0);
    u2(&mut bytes, 0);

    u2(&mut bytes, 2);
    method(&mut bytes, 0x0009, utf_small, utf_void, utf_code, (0, 0), &[0xb1], &[line_table(utf_lnt, &[(0, 4)])]);
    let mut huge = vec![0x00; 65530];
    huge.push(0xb1);
    method(&mut bytes, 0x0009, utf_huge, utf_void, utf_code, (0, 0), &huge, &[line_table(utf_lnt, &[(0, 10), (900, 100)])]);

    u2(&mut bytes, 0);
    bytes
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Obj {
    Str(String),
    Boxed(Value<usize>),
    Plain { class: String, fields: Vec<(String, Value<usize>)> },
    Array { class: String, elements: Vec<Value<usize>> },
    List { class: String, elements: Vec<Value<usize>> },
    Map { class: String, entries: Vec<(String, Value<usize>)> },
    /// Every introspection call throws.
    Broken { class: String },
}

/// An in-memory heap; references are indices into `objects`.
#[derive(Debug, Default)]
pub struct MemHeap {
    objects: Vec<Obj>,
    sizes: Vec<u64>,
}

impl MemHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, obj: Obj) -> usize {
        let size = match &obj {
            Obj::Array { elements, .. } => 16 + 4 * elements.len() as u64,
            _ => 24,
        };
        self.objects.push(obj);
        self.sizes.push(size);
        self.objects.len() - 1
    }

    pub fn string(&mut self, s: &str) -> usize {
        self.alloc(Obj::Str(s.to_string()))
    }

    pub fn int(&mut self, v: i32) -> usize {
        self.alloc(Obj::Boxed(Value::Int(v)))
    }

    pub fn long(&mut self, v: i64) -> usize {
        self.alloc(Obj::Boxed(Value::Long(v)))
    }

    pub fn boolean(&mut self, v: bool) -> usize {
        self.alloc(Obj::Boxed(Value::Boolean(v)))
    }

    pub fn double(&mut self, v: f64) -> usize {
        self.alloc(Obj::Boxed(Value::Double(v)))
    }

    pub fn object(&mut self, class: &str, fields: Vec<(&str, Value<usize>)>) -> usize {
        let fields = fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect();
        self.alloc(Obj::Plain { class: class.to_string(), fields })
    }

    pub fn list(&mut self, elements: Vec<Value<usize>>) -> usize {
        self.alloc(Obj::List { class: "java.util.ArrayList".to_string(), elements })
    }

    pub fn int_array(&mut self, values: &[i32]) -> usize {
        let elements = values.iter().map(|v| Value::Int(*v)).collect();
        self.alloc(Obj::Array { class: "[I".to_string(), elements })
    }

    pub fn map(&mut self, entries: Vec<(&str, Value<usize>)>) -> usize {
        let entries = entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        self.alloc(Obj::Map { class: "java.util.HashMap".to_string(), entries })
    }

    pub fn broken(&mut self, class: &str) -> usize {
        self.alloc(Obj::Broken { class: class.to_string() })
    }

    pub fn set_field(&mut self, obj: usize, name: &str, value: Value<usize>) {
        if let Obj::Plain { fields, .. } = &mut self.objects[obj] {
            match fields.iter_mut().find(|(n, _)| n == name) {
                Some((_, slot)) => *slot = value,
                None => fields.push((name.to_string(), value)),
            }
        }
    }

    pub fn push_element(&mut self, list: usize, value: Value<usize>) {
        if let Obj::List { elements, .. } = &mut self.objects[list] {
            elements.push(value);
        }
    }

    pub fn set_size(&mut self, obj: usize, size: u64) {
        self.sizes[obj] = size;
    }

    fn get(&self, obj: usize) -> Result<&Obj, HeapError> {
        self.objects.get(obj).ok_or(HeapError::Call("lookup"))
    }

    fn thrown(class: &str) -> HeapError {
        HeapError::Exception(format!("java.lang.IllegalStateException: {class} is broken"))
    }
}

impl Heap for MemHeap {
    type Ref = usize;

    fn resolve(&self, obj: &usize) -> Result<Value<usize>, HeapError> {
        Ok(match self.get(*obj)? {
            Obj::Str(s) => Value::String(s.clone()),
            Obj::Boxed(v) => v.clone(),
            _ => Value::Object(*obj),
        })
    }

    fn class_name(&self, obj: &usize) -> Result<String, HeapError> {
        Ok(match self.get(*obj)? {
            Obj::Str(_) => "java.lang.String".to_string(),
            Obj::Boxed(Value::Int(_)) => "java.lang.Integer".to_string(),
            Obj::Boxed(Value::Long(_)) => "java.lang.Long".to_string(),
            Obj::Boxed(Value::Boolean(_)) => "java.lang.Boolean".to_string(),
            Obj::Boxed(_) => "java.lang.Double".to_string(),
            Obj::Plain { class, .. }
            | Obj::Array { class, .. }
            | Obj::List { class, .. }
            | Obj::Map { class, .. }
            | Obj::Broken { class } => class.clone(),
        })
    }

    fn identity_hash(&self, obj: &usize) -> Result<i32, HeapError> {
        Ok(0x1000 + *obj as i32)
    }

    fn same_object(&self, a: &usize, b: &usize) -> bool {
        a == b
    }

    fn object_size(&self, obj: &usize) -> Result<u64, HeapError> {
        self.sizes.get(*obj).copied().ok_or(HeapError::Call("GetObjectSize"))
    }

    fn shape(&self, obj: &usize) -> Result<Shape, HeapError> {
        Ok(match self.get(*obj)? {
            Obj::Array { elements, .. } => Shape::Array { length: elements.len() },
            Obj::List { elements, .. } => Shape::Collection { size: elements.len() },
            Obj::Map { entries, .. } => Shape::Map { size: entries.len() },
            Obj::Broken { class } => return Err(Self::thrown(class)),
            _ => Shape::Plain,
        })
    }

    fn elements(&self, obj: &usize, limit: usize) -> Result<Vec<Value<usize>>, HeapError> {
        match self.get(*obj)? {
            Obj::Array { elements, .. } | Obj::List { elements, .. } => Ok(elements.iter().take(limit).cloned().collect()),
            _ => Err(HeapError::NotIndexable(self.class_name(obj)?)),
        }
    }

    fn entries(&self, obj: &usize, limit: usize) -> Result<Vec<(String, Value<usize>)>, HeapError> {
        match self.get(*obj)? {
            Obj::Map { entries, .. } => Ok(entries.iter().take(limit).cloned().collect()),
            _ => Err(HeapError::NotIndexable(self.class_name(obj)?)),
        }
    }

    fn fields(&self, obj: &usize) -> Result<Vec<(String, Value<usize>)>, HeapError> {
        match self.get(*obj)? {
            Obj::Plain { fields, .. } => Ok(fields.clone()),
            Obj::Broken { class } => Err(Self::thrown(class)),
            _ => Ok(Vec::new()),
        }
    }

    fn display(&self, obj: &usize) -> Result<String, HeapError> {
        match self.get(*obj)? {
            Obj::Str(s) => Ok(s.clone()),
            Obj::Boxed(v) => jvmti_probe::heap::display_value(self, v),
            Obj::Broken { class } => Err(Self::thrown(class)),
            _ => Ok(format!("{}@{:x}", self.class_name(obj)?, self.identity_hash(obj)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Stands in for the VM: a set of loaded class names and a log of
/// retransformation requests.
#[derive(Default)]
pub struct FakeVm {
    loaded: Mutex<Vec<String>>,
    retransforms: Mutex<Vec<Vec<String>>>,
    fail_retransform: AtomicBool,
    during_retransform: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeVm {
    pub fn with_classes(classes: &[&str]) -> Self {
        let vm = FakeVm::default();
        for class in classes {
            vm.load(class);
        }
        vm
    }

    pub fn load(&self, class: &str) {
        self.loaded.lock().push(class.to_string());
    }

    pub fn retransforms(&self) -> Vec<Vec<String>> {
        self.retransforms.lock().clone()
    }

    pub fn fail_retransform(&self, fail: bool) {
        self.fail_retransform.store(fail, Ordering::SeqCst);
    }

    /// Runs `f` inside the next retransformation, where the VM would call
    /// the class file hook.
    pub fn during_next_retransform(&self, f: impl FnOnce() + Send + 'static) {
        *self.during_retransform.lock() = Some(Box::new(f));
    }
}

impl Instrumentation for FakeVm {
    type Class = String;

    fn find_classes(&self, name: &str) -> Vec<String> {
        let nested = format!("{name}$");
        let mut found: Vec<String> = self
            .loaded
            .lock()
            .iter()
            .filter(|c| *c == name || c.starts_with(&nested))
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.len(), a).cmp(&(b.len(), b)));
        found
    }

    fn retransform(&self, classes: &[String]) -> Result<(), ProbeError> {
        self.retransforms.lock().push(classes.to_vec());
        let during = self.during_retransform.lock().take();
        if let Some(f) = during {
            f();
        }
        if self.fail_retransform.load(Ordering::SeqCst) {
            return Err(ProbeError::Retransform { classes: classes.to_vec(), cause: "JVMTI_ERROR_INVALID_CLASS_FORMAT".to_string() });
        }
        Ok(())
    }
}

pub fn probe_with(config: &ProbeConfig, vm: FakeVm) -> (Probe<FakeVm>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let events: Arc<dyn EventSink> = sink.clone();
    (Probe::new(config, vm, events), sink)
}

pub fn probe(vm: FakeVm) -> (Probe<FakeVm>, Arc<RecordingSink>) {
    probe_with(&ProbeConfig::default(), vm)
}
