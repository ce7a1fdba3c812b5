//! Native implementations of the hook methods.
//!
//! Each hook converts its JNI arguments, borrows the calling thread's
//! [`HitScratch`] and hands over to the [`Probe`]. Nothing unwinds into the
//! JVM: a panic is caught and logged, and a Java exception raised while
//! inspecting values is cleared before returning.

use super::{
    HookMethod, CLOSE_LOCAL_SPAN, CLOSE_LOCAL_SPAN_AND_THROW, IS_HIT, IS_INSTRUMENT_ENABLED, OPEN_LOCAL_SPAN, PUT_BREAKPOINT,
    PUT_FIELD, PUT_LOCAL_VARIABLE, PUT_LOG, PUT_METER, PUT_STATIC_FIELD,
};
use crate::context::Scope;
use crate::env::{JniEnv, Jvmti, LocalRef};
use crate::event::StackFrame;
use crate::heap::Heap;
use crate::jni_heap::{class_name_from_signature, JavaRef, JavaTypes, JniHeap};
use crate::probe::{HitScratch, Probe, ScratchCell};
use crate::runtime::JvmtiInstrumentation;
use crate::sys::{jni, jvmti};
use std::ffi::{c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

const MAX_STACK_DEPTH: jni::jint = 64;

/// Everything the hooks need, installed once the hook class is bound.
pub struct HookState {
    pub probe: Arc<Probe<JvmtiInstrumentation>>,
    pub jvmti: Jvmti,
    pub types: JavaTypes,
}

static HOOKS: OnceLock<HookState> = OnceLock::new();

thread_local! {
    static SCRATCH: ScratchCell<JavaRef> = ScratchCell::new();
}

/// Makes `state` visible to the hooks. Returns false if already installed.
pub fn install(state: HookState) -> bool {
    HOOKS.set(state).is_ok()
}

pub fn installed() -> Option<&'static HookState> {
    HOOKS.get()
}

/// Binds every hook method of `class` to its native implementation.
pub fn register(jni: &JniEnv, class: jni::jclass) -> Result<(), jni::jint> {
    let table: [(HookMethod, *mut c_void); 11] = [
        (IS_INSTRUMENT_ENABLED, is_instrument_enabled as *mut c_void),
        (IS_HIT, is_hit as *mut c_void),
        (PUT_LOCAL_VARIABLE, put_local_variable as *mut c_void),
        (PUT_FIELD, put_field as *mut c_void),
        (PUT_STATIC_FIELD, put_static_field as *mut c_void),
        (PUT_BREAKPOINT, put_breakpoint as *mut c_void),
        (PUT_LOG, put_log as *mut c_void),
        (PUT_METER, put_meter as *mut c_void),
        (OPEN_LOCAL_SPAN, open_local_span as *mut c_void),
        (CLOSE_LOCAL_SPAN, close_local_span as *mut c_void),
        (CLOSE_LOCAL_SPAN_AND_THROW, close_local_span_and_throw as *mut c_void),
    ];
    let names: Vec<(CString, CString)> = table
        .iter()
        .map(|(hook, _)| Ok((CString::new(hook.name)?, CString::new(hook.descriptor)?)))
        .collect::<Result<_, std::ffi::NulError>>()
        .map_err(|_| jni::JNI_ERR)?;
    let methods: Vec<jni::JNINativeMethod> = table
        .iter()
        .zip(&names)
        .map(|((_, fn_ptr), (name, signature))| jni::JNINativeMethod {
            name: name.as_ptr(),
            signature: signature.as_ptr(),
            fnPtr: *fn_ptr,
        })
        .collect();
    jni.register_natives(class, &methods)
}

/// Runs `f` with the installed state, catching panics. Returns `fallback`
/// when the hooks are not installed or `f` panicked.
fn run_hook<T>(env: *mut jni::JNIEnv, hook: &'static str, fallback: T, f: impl FnOnce(&HookState, &JniEnv) -> T) -> T {
    let Some(state) = HOOKS.get() else {
        return fallback;
    };
    // SAFETY: the VM passes the env of the calling thread to every native.
    let jni = unsafe { JniEnv::from_raw(env) };
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(state, &jni)));
    if jni.take_exception() {
        debug!(hook, "cleared exception raised inside hook");
    }
    match result {
        Ok(value) => value,
        Err(_) => {
            error!(hook, "hook panicked");
            fallback
        }
    }
}

/// Borrows this thread's scratch. `None` when a hook re-enters through Java
/// code the probe itself called (e.g. `toString()`).
fn with_scratch<T>(f: impl FnOnce(&mut HitScratch<JavaRef>) -> T) -> Option<T> {
    SCRATCH.try_with(|cell| cell.with(f)).ok().flatten()
}

fn string(jni: &JniEnv, s: jni::jstring) -> String {
    jni.get_string_utf(s).unwrap_or_default()
}

fn thread_name(jvmti: &Jvmti) -> String {
    jvmti.get_thread_name(ptr::null_mut()).unwrap_or_else(|_| "unknown".to_string())
}

fn stack_trace(jvmti: &Jvmti, jni: &JniEnv) -> Vec<StackFrame> {
    // Depth 0 is the native hook itself.
    match jvmti.get_stack_trace(ptr::null_mut(), 1, MAX_STACK_DEPTH) {
        Ok(frames) => frames.iter().filter_map(|frame| stack_frame(jvmti, jni, frame)).collect(),
        Err(err) => {
            debug!("GetStackTrace failed: {err}");
            Vec::new()
        }
    }
}

fn stack_frame(jvmti: &Jvmti, jni: &JniEnv, frame: &jvmti::jvmtiFrameInfo) -> Option<StackFrame> {
    let (method_name, _) = jvmti.get_method_name(frame.method).ok()?;
    let class = LocalRef::new(jni, jvmti.get_method_declaring_class(frame.method).ok()?);
    let class_name = class_name_from_signature(&jvmti.get_class_signature(class.get()).ok()?);
    let source_file = jvmti.get_source_file_name(class.get()).ok();
    let line = jvmti.get_line_number_table(frame.method).ok().and_then(|table| {
        table
            .iter()
            .filter(|entry| entry.start_location <= frame.location)
            .max_by_key(|entry| entry.start_location)
            .map(|entry| entry.line_number)
    });
    Some(StackFrame { class_name, method_name, source_file, line })
}

fn put_variable(env: *mut jni::JNIEnv, hook: &'static str, scope: Scope, id: jni::jstring, name: jni::jstring, value: jni::jobject, type_name: jni::jstring) {
    run_hook(env, hook, (), |_, jni| {
        let id = string(jni, id);
        let name = string(jni, name);
        let type_name = string(jni, type_name);
        // SAFETY: `value` is a hook argument on this thread.
        let value = unsafe { JavaRef::new(jni, value) };
        with_scratch(|scratch| scratch.put(&id, scope, &name, &type_name, value));
    })
}

unsafe extern "system" fn is_instrument_enabled(env: *mut jni::JNIEnv, _class: jni::jclass, id: jni::jstring) -> jni::jboolean {
    run_hook(env, "isInstrumentEnabled", jni::JNI_FALSE, |state, jni| {
        if state.probe.is_instrument_enabled(&string(jni, id)) {
            jni::JNI_TRUE
        } else {
            jni::JNI_FALSE
        }
    })
}

unsafe extern "system" fn is_hit(env: *mut jni::JNIEnv, _class: jni::jclass, id: jni::jstring) -> jni::jboolean {
    run_hook(env, "isHit", jni::JNI_FALSE, |state, jni| {
        let id = string(jni, id);
        let heap = JniHeap::new(jni, state.jvmti, &state.types);
        let decided = SCRATCH.try_with(|cell| cell.decide(&id, |scratch| state.probe.is_hit(scratch, &heap, &id)));
        match decided.ok().flatten() {
            Some(true) => jni::JNI_TRUE,
            _ => jni::JNI_FALSE,
        }
    })
}

unsafe extern "system" fn put_local_variable(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    id: jni::jstring,
    name: jni::jstring,
    value: jni::jobject,
    type_name: jni::jstring,
) {
    put_variable(env, "putLocalVariable", Scope::LocalVariable, id, name, value, type_name);
}

unsafe extern "system" fn put_field(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    id: jni::jstring,
    name: jni::jstring,
    value: jni::jobject,
    type_name: jni::jstring,
) {
    put_variable(env, "putField", Scope::InstanceField, id, name, value, type_name);
}

unsafe extern "system" fn put_static_field(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    id: jni::jstring,
    name: jni::jstring,
    value: jni::jobject,
    type_name: jni::jstring,
) {
    put_variable(env, "putStaticField", Scope::StaticField, id, name, value, type_name);
}

unsafe extern "system" fn put_breakpoint(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    id: jni::jstring,
    source: jni::jstring,
    line: jni::jint,
) {
    run_hook(env, "putBreakpoint", (), |state, jni| {
        let id = string(jni, id);
        let source = string(jni, source);
        let heap = JniHeap::new(jni, state.jvmti, &state.types);
        with_scratch(|scratch| {
            state.probe.put_breakpoint(
                scratch,
                &heap,
                &id,
                &source,
                line,
                || thread_name(&state.jvmti),
                || stack_trace(&state.jvmti, jni),
            )
        });
    })
}

unsafe extern "system" fn put_log(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    id: jni::jstring,
    format: jni::jstring,
    arguments: jni::jobjectArray,
) {
    run_hook(env, "putLog", (), |state, jni| {
        let id = string(jni, id);
        let format = string(jni, format);
        let count = if arguments.is_null() { 0 } else { jni.get_array_length(arguments) };
        let arguments: Vec<String> = (0..count)
            .map(|index| {
                let arg = LocalRef::new(jni, jni.get_object_array_element(arguments, index));
                string(jni, arg.get())
            })
            .collect();
        let heap = JniHeap::new(jni, state.jvmti, &state.types);
        with_scratch(|scratch| {
            state.probe.put_log(scratch, &heap, &id, &format, &arguments, || thread_name(&state.jvmti))
        });
    })
}

unsafe extern "system" fn put_meter(env: *mut jni::JNIEnv, _class: jni::jclass, id: jni::jstring) {
    run_hook(env, "putMeter", (), |state, jni| {
        let id = string(jni, id);
        let heap = JniHeap::new(jni, state.jvmti, &state.types);
        with_scratch(|scratch| state.probe.put_meter(scratch, &heap, &id));
    })
}

unsafe extern "system" fn open_local_span(env: *mut jni::JNIEnv, _class: jni::jclass, id: jni::jstring) {
    run_hook(env, "openLocalSpan", (), |state, jni| {
        let id = string(jni, id);
        let heap = JniHeap::new(jni, state.jvmti, &state.types);
        with_scratch(|scratch| state.probe.open_span(scratch, &heap, &id));
    })
}

unsafe extern "system" fn close_local_span(env: *mut jni::JNIEnv, _class: jni::jclass, id: jni::jstring) {
    run_hook(env, "closeLocalSpan", (), |state, jni| {
        let id = string(jni, id);
        with_scratch(|scratch| state.probe.close_span(scratch, &id, None, || thread_name(&state.jvmti)));
    })
}

/// Returns `throwable` so the injected handler can rethrow it.
unsafe extern "system" fn close_local_span_and_throw(
    env: *mut jni::JNIEnv,
    _class: jni::jclass,
    throwable: jni::jthrowable,
    id: jni::jstring,
) -> jni::jthrowable {
    run_hook(env, "closeLocalSpanAndThrowException", throwable, |state, jni| {
        let id = string(jni, id);
        let heap = JniHeap::new(jni, state.jvmti, &state.types);
        // SAFETY: `throwable` is a hook argument on this thread.
        let error = match unsafe { JavaRef::new(jni, throwable) } {
            Some(thrown) => heap.display(&thrown).or_else(|_| heap.class_name(&thrown)).ok(),
            None => None,
        };
        with_scratch(|scratch| {
            state.probe.close_span(scratch, &id, Some(error.unwrap_or_else(|| "null".to_string())), || {
                thread_name(&state.jvmti)
            })
        });
        throwable
    })
}
