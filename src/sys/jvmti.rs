// jvmti-probe/src/sys/jvmti.rs
//
// JVMTI bindings used by the probe.
//
// The function table keeps the exact jvmti.h layout (156 slots, slot 1
// reserved). Entries the agent does not call are opaque padding.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use crate::sys::jni::{jboolean, jclass, jfieldID, jint, jlong, jmethodID, jobject, jthread, JNIEnv};
use std::os::raw::{c_char, c_uchar, c_void};

// --- Constants ---
pub const JVMTI_VERSION_1_2: jint = 0x30010200;

pub const JVMTI_ENABLE: jint = 1;
pub const JVMTI_DISABLE: jint = 0;

pub const JVMTI_EVENT_VM_INIT: u32 = 50;
pub const JVMTI_EVENT_VM_DEATH: u32 = 51;
pub const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: u32 = 54;

pub const JVMTI_PHASE_LIVE: jint = 4;

// --- Error Codes ---
//
// A transparent newtype rather than an enum: the VM may hand back any code
// and an out-of-range enum discriminant is undefined behaviour.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct jvmtiError(pub u32);

impl jvmtiError {
    pub const NONE: jvmtiError = jvmtiError(0);
    pub const INVALID_THREAD: jvmtiError = jvmtiError(10);
    pub const INVALID_OBJECT: jvmtiError = jvmtiError(20);
    pub const INVALID_CLASS: jvmtiError = jvmtiError(21);
    pub const CLASS_NOT_PREPARED: jvmtiError = jvmtiError(22);
    pub const INVALID_METHODID: jvmtiError = jvmtiError(23);
    pub const INVALID_FIELDID: jvmtiError = jvmtiError(25);
    pub const UNMODIFIABLE_CLASS: jvmtiError = jvmtiError(79);
    pub const INVALID_CLASS_FORMAT: jvmtiError = jvmtiError(60);
    pub const FAILS_VERIFICATION: jvmtiError = jvmtiError(62);
    pub const UNSUPPORTED_VERSION: jvmtiError = jvmtiError(68);
    pub const NOT_AVAILABLE: jvmtiError = jvmtiError(98);
    pub const MUST_POSSESS_CAPABILITY: jvmtiError = jvmtiError(99);
    pub const NULL_POINTER: jvmtiError = jvmtiError(100);
    pub const ABSENT_INFORMATION: jvmtiError = jvmtiError(101);
    pub const OUT_OF_MEMORY: jvmtiError = jvmtiError(110);
    pub const WRONG_PHASE: jvmtiError = jvmtiError(112);
    pub const INTERNAL: jvmtiError = jvmtiError(113);
    pub const UNATTACHED_THREAD: jvmtiError = jvmtiError(115);
    pub const INVALID_ENVIRONMENT: jvmtiError = jvmtiError(116);

    pub fn name(self) -> &'static str {
        match self {
            Self::NONE => "NONE",
            Self::INVALID_THREAD => "INVALID_THREAD",
            Self::INVALID_OBJECT => "INVALID_OBJECT",
            Self::INVALID_CLASS => "INVALID_CLASS",
            Self::CLASS_NOT_PREPARED => "CLASS_NOT_PREPARED",
            Self::INVALID_METHODID => "INVALID_METHODID",
            Self::INVALID_FIELDID => "INVALID_FIELDID",
            Self::UNMODIFIABLE_CLASS => "UNMODIFIABLE_CLASS",
            Self::INVALID_CLASS_FORMAT => "INVALID_CLASS_FORMAT",
            Self::FAILS_VERIFICATION => "FAILS_VERIFICATION",
            Self::UNSUPPORTED_VERSION => "UNSUPPORTED_VERSION",
            Self::NOT_AVAILABLE => "NOT_AVAILABLE",
            Self::MUST_POSSESS_CAPABILITY => "MUST_POSSESS_CAPABILITY",
            Self::NULL_POINTER => "NULL_POINTER",
            Self::ABSENT_INFORMATION => "ABSENT_INFORMATION",
            Self::OUT_OF_MEMORY => "OUT_OF_MEMORY",
            Self::WRONG_PHASE => "WRONG_PHASE",
            Self::INTERNAL => "INTERNAL",
            Self::UNATTACHED_THREAD => "UNATTACHED_THREAD",
            Self::INVALID_ENVIRONMENT => "INVALID_ENVIRONMENT",
            _ => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for jvmtiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JVMTI_ERROR_{} ({})", self.name(), self.0)
    }
}

pub type jlocation = jlong;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct jvmtiLineNumberEntry {
    pub start_location: jlocation,
    pub line_number: jint,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct jvmtiFrameInfo {
    pub method: jmethodID,
    pub location: jlocation,
}

impl Default for jvmtiFrameInfo {
    fn default() -> Self {
        Self { method: std::ptr::null_mut(), location: 0 }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct jvmtiThreadInfo {
    pub name: *mut c_char,
    pub priority: jint,
    pub is_daemon: jboolean,
    pub thread_group: jobject,
    pub context_class_loader: jobject,
}

impl Default for jvmtiThreadInfo {
    fn default() -> Self {
        Self {
            name: std::ptr::null_mut(),
            priority: 0,
            is_daemon: 0,
            thread_group: std::ptr::null_mut(),
            context_class_loader: std::ptr::null_mut(),
        }
    }
}

// --- Capabilities ---
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct jvmtiCapabilities {
    bits: [u32; 4],
}

impl jvmtiCapabilities {
    fn set_bit(&mut self, bit_offset: usize, value: bool) {
        let word_index = bit_offset / 32;
        let bit_index = bit_offset % 32;
        if value {
            self.bits[word_index] |= 1 << bit_index;
        } else {
            self.bits[word_index] &= !(1 << bit_index);
        }
    }

    fn get_bit(&self, bit_offset: usize) -> bool {
        (self.bits[bit_offset / 32] & (1 << (bit_offset % 32))) != 0
    }

    // [11]
    pub fn set_can_get_source_file_name(&mut self, v: bool) { self.set_bit(11, v); }
    pub fn can_get_source_file_name(&self) -> bool { self.get_bit(11) }

    // [12]
    pub fn set_can_get_line_numbers(&mut self, v: bool) { self.set_bit(12, v); }
    pub fn can_get_line_numbers(&self) -> bool { self.get_bit(12) }

    // [26]
    pub fn set_can_generate_all_class_hook_events(&mut self, v: bool) { self.set_bit(26, v); }
    pub fn can_generate_all_class_hook_events(&self) -> bool { self.get_bit(26) }

    // [37]
    pub fn set_can_retransform_classes(&mut self, v: bool) { self.set_bit(37, v); }
    pub fn can_retransform_classes(&self) -> bool { self.get_bit(37) }

    // [38]
    pub fn set_can_retransform_any_class(&mut self, v: bool) { self.set_bit(38, v); }
    pub fn can_retransform_any_class(&self) -> bool { self.get_bit(38) }
}

// --- Function Typedefs ---

pub type JvmtiSetEventNotificationModeFn = unsafe extern "system" fn(env: *mut jvmtiEnv, mode: jint, event_type: u32, event_thread: jthread) -> jvmtiError;
pub type JvmtiGetThreadInfoFn = unsafe extern "system" fn(env: *mut jvmtiEnv, thread: jthread, info_ptr: *mut jvmtiThreadInfo) -> jvmtiError;
pub type JvmtiGetCurrentThreadFn = unsafe extern "system" fn(env: *mut jvmtiEnv, thread_ptr: *mut jthread) -> jvmtiError;
pub type JvmtiIsModifiableClassFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, is_modifiable_class_ptr: *mut jboolean) -> jvmtiError;
pub type JvmtiAllocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, size: jlong, mem_ptr: *mut *mut c_uchar) -> jvmtiError;
pub type JvmtiDeallocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, mem: *mut c_uchar) -> jvmtiError;
pub type JvmtiGetClassSignatureFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, signature_ptr: *mut *mut c_char, generic_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiGetSourceFileNameFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, source_name_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiGetClassFieldsFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, field_count_ptr: *mut jint, fields_ptr: *mut *mut jfieldID) -> jvmtiError;
pub type JvmtiGetObjectHashCodeFn = unsafe extern "system" fn(env: *mut jvmtiEnv, object: jobject, hash_code_ptr: *mut jint) -> jvmtiError;
pub type JvmtiGetFieldNameFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, field: jfieldID, name_ptr: *mut *mut c_char, signature_ptr: *mut *mut c_char, generic_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiGetFieldModifiersFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, field: jfieldID, modifiers_ptr: *mut jint) -> jvmtiError;
pub type JvmtiGetMethodNameFn = unsafe extern "system" fn(env: *mut jvmtiEnv, method: jmethodID, name_ptr: *mut *mut c_char, signature_ptr: *mut *mut c_char, generic_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiGetMethodDeclaringClassFn = unsafe extern "system" fn(env: *mut jvmtiEnv, method: jmethodID, declaring_class_ptr: *mut jclass) -> jvmtiError;
pub type JvmtiGetLineNumberTableFn = unsafe extern "system" fn(env: *mut jvmtiEnv, method: jmethodID, entry_count_ptr: *mut jint, table_ptr: *mut *mut jvmtiLineNumberEntry) -> jvmtiError;
pub type JvmtiGetLoadedClassesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, class_count_ptr: *mut jint, classes_ptr: *mut *mut jclass) -> jvmtiError;
pub type JvmtiGetStackTraceFn = unsafe extern "system" fn(env: *mut jvmtiEnv, thread: jthread, start_depth: jint, max_frame_count: jint, frame_buffer: *mut jvmtiFrameInfo, count_ptr: *mut jint) -> jvmtiError;
pub type JvmtiSetEventCallbacksFn = unsafe extern "system" fn(env: *mut jvmtiEnv, callbacks: *const jvmtiEventCallbacks, size_of_callbacks: jint) -> jvmtiError;
pub type JvmtiGetErrorNameFn = unsafe extern "system" fn(env: *mut jvmtiEnv, error: jvmtiError, name_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiAddCapabilitiesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *const jvmtiCapabilities) -> jvmtiError;
pub type JvmtiRetransformClassesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, class_count: jint, classes: *const jclass) -> jvmtiError;
pub type JvmtiGetObjectSizeFn = unsafe extern "system" fn(env: *mut jvmtiEnv, object: jobject, size_ptr: *mut jlong) -> jvmtiError;

// --- Event Typedefs ---

pub type JvmtiVMInitFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
    thread: jthread,
);

pub type JvmtiVMDeathFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
);

pub type JvmtiClassFileLoadHookFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
    class_being_redefined: jclass,
    loader: jobject,
    name: *const c_char,
    protection_domain: jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
);

type Pad<const N: usize> = [*mut c_void; N];

#[repr(C)]
pub struct jvmtiInterface_1_ {
    /*   1: RESERVED */
    pub reserved1: *mut c_void,
    /*   2: Set Event Notification Mode */
    pub SetEventNotificationMode: Option<JvmtiSetEventNotificationModeFn>,
    /*   3-8 */
    _modules_and_thread_control: Pad<6>,
    /*   9: Get Thread Info */
    pub GetThreadInfo: Option<JvmtiGetThreadInfoFn>,
    /*  10-17 */
    _monitors_and_groups: Pad<8>,
    /*  18: Get Current Thread */
    pub GetCurrentThread: Option<JvmtiGetCurrentThreadFn>,
    /*  19-44 */
    _frames_locals_and_raw_monitors: Pad<26>,
    /*  45: Is Modifiable Class */
    pub IsModifiableClass: Option<JvmtiIsModifiableClassFn>,
    /*  46: Allocate */
    pub Allocate: Option<JvmtiAllocateFn>,
    /*  47: Deallocate */
    pub Deallocate: Option<JvmtiDeallocateFn>,
    /*  48: Get Class Signature */
    pub GetClassSignature: Option<JvmtiGetClassSignatureFn>,
    /*  49: Get Class Status */
    _class_status: Pad<1>,
    /*  50: Get Source File Name */
    pub GetSourceFileName: Option<JvmtiGetSourceFileNameFn>,
    /*  51-52: Get Class Modifiers, Get Class Methods */
    _class_modifiers_and_methods: Pad<2>,
    /*  53: Get Class Fields */
    pub GetClassFields: Option<JvmtiGetClassFieldsFn>,
    /*  54-57 */
    _class_kind: Pad<4>,
    /*  58: Get Object Hash Code */
    pub GetObjectHashCode: Option<JvmtiGetObjectHashCodeFn>,
    /*  59: Get Object Monitor Usage */
    _monitor_usage: Pad<1>,
    /*  60: Get Field Name */
    pub GetFieldName: Option<JvmtiGetFieldNameFn>,
    /*  61: Get Field Declaring Class */
    _field_declaring_class: Pad<1>,
    /*  62: Get Field Modifiers */
    pub GetFieldModifiers: Option<JvmtiGetFieldModifiersFn>,
    /*  63: Is Field Synthetic */
    _field_synthetic: Pad<1>,
    /*  64: Get Method Name */
    pub GetMethodName: Option<JvmtiGetMethodNameFn>,
    /*  65: Get Method Declaring Class */
    pub GetMethodDeclaringClass: Option<JvmtiGetMethodDeclaringClassFn>,
    /*  66-69 */
    _method_modifiers_and_sizes: Pad<4>,
    /*  70: Get Line Number Table */
    pub GetLineNumberTable: Option<JvmtiGetLineNumberTableFn>,
    /*  71-77 */
    _method_location_and_bytecodes: Pad<7>,
    /*  78: Get Loaded Classes */
    pub GetLoadedClasses: Option<JvmtiGetLoadedClassesFn>,
    /*  79-103 */
    _loaders_redefine_and_heap: Pad<25>,
    /* 104: Get Stack Trace */
    pub GetStackTrace: Option<JvmtiGetStackTraceFn>,
    /* 105-121 */
    _stacks_tags_and_jni_table: Pad<17>,
    /* 122: Set Event Callbacks */
    pub SetEventCallbacks: Option<JvmtiSetEventCallbacksFn>,
    /* 123-127 */
    _events_and_extensions: Pad<5>,
    /* 128: Get Error Name */
    pub GetErrorName: Option<JvmtiGetErrorNameFn>,
    /* 129-141 */
    _timers_and_properties: Pad<13>,
    /* 142: Add Capabilities */
    pub AddCapabilities: Option<JvmtiAddCapabilitiesFn>,
    /* 143-151 */
    _capabilities_and_loader_search: Pad<9>,
    /* 152: Retransform Classes */
    pub RetransformClasses: Option<JvmtiRetransformClassesFn>,
    /* 153: Get Owned Monitor Stack Depth Info */
    _owned_monitor_depth: Pad<1>,
    /* 154: Get Object Size */
    pub GetObjectSize: Option<JvmtiGetObjectSizeFn>,
    /* 155-156: Get Local Instance, Set Heap Sampling Interval */
    _tail: Pad<2>,
}

#[repr(C)]
pub struct jvmtiEnv {
    pub functions: *const jvmtiInterface_1_,
}

/// Leading part of the JVMTI callback table.
///
/// `SetEventCallbacks` is given the size of this struct and treats every
/// later callback as absent, so only the events up to `VMStart` are listed.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug)]
pub struct jvmtiEventCallbacks {
    pub VMInit: Option<JvmtiVMInitFn>,
    pub VMDeath: Option<JvmtiVMDeathFn>,
    pub ThreadStart: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread)>,
    pub ThreadEnd: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread)>,
    pub ClassFileLoadHook: Option<JvmtiClassFileLoadHookFn>,
    pub ClassLoad: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread, jclass)>,
    pub ClassPrepare: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread, jclass)>,
    pub VMStart: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv)>,
}
