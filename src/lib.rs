//! # jvmti-probe
//!
//! A live instrumentation agent for the JVM. Breakpoints, logs, meters and
//! spans are attached to a running application by rewriting the bytecode of
//! the target class and retransforming it through JVMTI; removing them
//! restores the original class.
//!
//! ## Loading
//!
//! ```bash
//! java -agentpath:./target/release/libjvmti_probe.so=config=/etc/probe.yml,log=debug MyApp
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        agent::ProbeAgent  (Agent trait, export_agent!)   │
//! ├───────────────────────────┬─────────────────────────────┤
//! │  probe::Probe             │  hooks::natives             │
//! │  commands, class rewrite, │  RegisterNatives'd hook     │
//! │  hit handling             │  class called by rewritten  │
//! │                           │  code                       │
//! ├───────────────────────────┴─────────────────────────────┤
//! │  instrument  (service, scheduler, throttle, commands)    │
//! │  transform   (injection)   metadata   condition          │
//! │  serialize / report / meter   event (sinks)              │
//! ├─────────────────────────────────────────────────────────┤
//! │  classfile (parse/write)   bytecode (assembler, frames)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  runtime / jni_heap  over  env::{Jvmti, JniEnv}  + sys   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above `runtime`/`jni_heap` is plain Rust and works against the
//! [`instrument::Instrumentation`] and [`heap::Heap`] traits, which is how
//! the tests drive it without a JVM.
//!
//! ## Embedding
//!
//! A transport hands JSON commands to [`probe::Probe::handle_command`]:
//!
//! ```rust,ignore
//! let result = probe.handle_command(r#"{"commandType":"ADD_LIVE_INSTRUMENT","instruments":[...]}"#)?;
//! ```

pub mod sys;
pub mod env;

// Implementation modules (use `env` module for the public API)
#[doc(hidden)]
pub mod jvmti_wrapper;
#[doc(hidden)]
pub mod jni_wrapper;

pub mod agent;
pub mod bytecode;
pub mod classfile;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod heap;
pub mod hooks;
pub mod instrument;
pub mod jni_heap;
pub mod logging;
pub mod metadata;
pub mod meter;
pub mod prelude;
pub mod probe;
pub mod report;
pub mod runtime;
pub mod serialize;
pub mod transform;

use std::os::raw::{c_char, c_uchar};
use std::sync::OnceLock;
pub use crate::sys::jni as jni;
use crate::sys::jvmti as jvmti;

/// JVMTI events a loaded agent reacts to.
///
/// Only the events the probe enables are routed; everything else stays
/// unset in the callback table.
///
/// # Thread Safety
///
/// The agent must be `Sync + Send` because JVMTI events can fire from any thread.
pub trait Agent: Sync + Send {
    /// Called when the agent is loaded into the JVM.
    ///
    /// Return `JNI_OK` (0) on success, or `JNI_ERR` (-1) to abort startup.
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint;

    /// Called when the agent is unloaded (JVM shutdown).
    fn on_unload(&self) {}

    /// Called when VM initialization is complete. JNI is fully usable.
    fn vm_init(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread) {}

    /// Called when the VM is about to terminate.
    fn vm_death(&self, _jni: *mut jni::JNIEnv) {}

    /// Called when class bytes are loaded or retransformed.
    ///
    /// Replacement bytes must be allocated with `Jvmti::allocate` and handed
    /// back through `new_class_data_len` / `new_class_data`.
    #[allow(clippy::too_many_arguments)]
    fn class_file_load_hook(&self, _jni: *mut jni::JNIEnv, _class_being_redefined: jni::jclass,
                            _loader: jni::jobject, _name: *const c_char,
                            _protection_domain: jni::jobject, _class_data_len: jni::jint,
                            _class_data: *const c_uchar,
                            _new_class_data_len: *mut jni::jint,
                            _new_class_data: *mut *mut c_uchar) {}
}

// This holds the agent instance so the static C callbacks can find it.
pub static GLOBAL_AGENT: OnceLock<Box<dyn Agent>> = OnceLock::new();

/// Helper to initialize the global agent (called by the macro)
#[doc(hidden)]
pub fn set_global_agent(agent: Box<dyn Agent>) -> Result<(), ()> {
    GLOBAL_AGENT.set(agent).map_err(|_| ())
}

unsafe extern "system" fn trampoline_vm_init(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, thread: jni::jthread) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.vm_init(jni, thread); }
}
unsafe extern "system" fn trampoline_vm_death(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.vm_death(jni); }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn trampoline_class_file_load_hook(
    _env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv,
    class_being_redefined: jni::jclass, loader: jni::jobject, name: *const c_char,
    protection_domain: jni::jobject, class_data_len: jni::jint, class_data: *const c_uchar,
    new_class_data_len: *mut jni::jint, new_class_data: *mut *mut c_uchar
) {
    if let Some(agent) = GLOBAL_AGENT.get() {
        agent.class_file_load_hook(jni, class_being_redefined, loader, name, protection_domain, class_data_len, class_data, new_class_data_len, new_class_data);
    }
}

/// Returns a `jvmtiEventCallbacks` struct routing `VMInit`, `VMDeath` and
/// `ClassFileLoadHook` to the global [`Agent`].
///
/// The events still have to be enabled with
/// [`env::Jvmti::set_event_notification_mode`].
pub fn get_default_callbacks() -> jvmti::jvmtiEventCallbacks {
    let mut callbacks = jvmti::jvmtiEventCallbacks::default();
    callbacks.VMInit = Some(trampoline_vm_init);
    callbacks.VMDeath = Some(trampoline_vm_death);
    callbacks.ClassFileLoadHook = Some(trampoline_class_file_load_hook);
    callbacks
}

/// Exports an agent type as a loadable JVMTI agent library.
///
/// Generates `Agent_OnLoad`, which creates the agent with `Default`, stores
/// it in [`GLOBAL_AGENT`] and calls [`Agent::on_load`] with the options
/// string, and `Agent_OnUnload`, which calls [`Agent::on_unload`].
#[macro_export]
macro_rules! export_agent {
    ($agent_type:ty) => {
        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnLoad(
            vm: *mut $crate::sys::jni::JavaVM,
            options: *mut std::ffi::c_char,
            _reserved: *mut std::ffi::c_void,
        ) -> $crate::sys::jni::jint {
            let agent = Box::new(<$agent_type>::default());
            if $crate::set_global_agent(agent).is_err() {
                return $crate::sys::jni::JNI_ERR;
            }

            let options_str = if options.is_null() {
                ""
            } else {
                std::ffi::CStr::from_ptr(options).to_str().unwrap_or("")
            };

            if let Some(global_agent) = $crate::GLOBAL_AGENT.get() {
                return global_agent.on_load(vm, options_str);
            }

            $crate::sys::jni::JNI_ERR
        }

        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnUnload(_vm: *mut $crate::sys::jni::JavaVM) {
            if let Some(agent) = $crate::GLOBAL_AGENT.get() {
                agent.on_unload();
            }
        }
    };
}

export_agent!(agent::ProbeAgent);
