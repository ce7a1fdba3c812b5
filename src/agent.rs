//! The loadable agent.
//!
//! ```text
//! java -agentpath:/path/libjvmti_probe.so=config=/etc/probe.yml,log=debug -jar app.jar
//! ```

use crate::config::ProbeConfig;
use crate::event::{AsyncSink, EventSink, JsonLinesSink, LogSink};
use crate::hooks::{self, natives};
use crate::instrument::Scheduler;
use crate::jni_heap::JavaTypes;
use crate::logging;
use crate::prelude::*;
use crate::probe::Probe;
use crate::runtime::{JavaVm, JvmtiInstrumentation};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::os::raw::{c_char, c_uchar};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

#[derive(Default)]
pub struct ProbeAgent {
    vm: OnceLock<JavaVm>,
    jvmti: OnceLock<Jvmti>,
    config: OnceLock<ProbeConfig>,
    probe: OnceLock<Arc<Probe<JvmtiInstrumentation>>>,
    scheduler: Mutex<Option<Scheduler>>,
    emitter: Mutex<Option<Arc<AsyncSink>>>,
}

fn capabilities() -> jvmti::jvmtiCapabilities {
    let mut caps = jvmti::jvmtiCapabilities::default();
    caps.set_can_retransform_classes(true);
    caps.set_can_retransform_any_class(true);
    caps.set_can_generate_all_class_hook_events(true);
    caps.set_can_get_line_numbers(true);
    caps.set_can_get_source_file_name(true);
    caps
}

fn event_sink(config: &ProbeConfig) -> Arc<dyn EventSink> {
    if let Some(path) = &config.events.file {
        match JsonLinesSink::open(path) {
            Ok(sink) => return Arc::new(sink),
            Err(err) => warn!("falling back to logging events: {err}"),
        }
    }
    Arc::new(LogSink)
}

impl ProbeAgent {
    fn setup(&self, jvmti: &Jvmti) -> Result<(), jvmti::jvmtiError> {
        jvmti.add_capabilities(&capabilities())?;
        jvmti.set_event_callbacks(get_default_callbacks())?;
        for event in [jvmti::JVMTI_EVENT_VM_INIT, jvmti::JVMTI_EVENT_VM_DEATH, jvmti::JVMTI_EVENT_CLASS_FILE_LOAD_HOOK] {
            jvmti.set_event_notification_mode(true, event, ptr::null_mut())?;
        }
        Ok(())
    }

    /// Defines and binds the hook class, then builds the probe.
    fn start(&self, env: &JniEnv) -> Result<Arc<Probe<JvmtiInstrumentation>>, String> {
        let (Some(vm), Some(jvmti), Some(config)) = (self.vm.get(), self.jvmti.get(), self.config.get()) else {
            return Err("agent was not loaded".to_string());
        };

        let bytes = hooks::hook_class_bytes(&config.hook_class).map_err(|e| e.to_string())?;
        let class = env.define_class(&config.hook_class, ptr::null_mut(), &bytes).ok_or_else(|| {
            env.take_exception();
            format!("failed to define {}", config.hook_class)
        })?;
        natives::register(env, class).map_err(|res| format!("RegisterNatives failed: {res}"))?;
        let types = JavaTypes::load(env).ok_or_else(|| {
            env.take_exception();
            "failed to resolve JDK classes".to_string()
        })?;

        let emitter = Arc::new(AsyncSink::new(event_sink(config), config.emitter.workers, config.emitter.capacity));
        *self.emitter.lock() = Some(Arc::clone(&emitter));

        let instrumentation = JvmtiInstrumentation::new(*vm, *jvmti);
        let probe = Arc::new(Probe::new(config, instrumentation, emitter));
        natives::install(natives::HookState { probe: Arc::clone(&probe), jvmti: *jvmti, types });

        let vm = *vm;
        match Scheduler::start(
            Arc::clone(probe.service()),
            config.scheduler.sweep_interval(),
            config.scheduler.retry_interval(),
            move || vm.attach_daemon("probe-scheduler"),
        ) {
            Ok(scheduler) => *self.scheduler.lock() = Some(scheduler),
            Err(err) => warn!("instrument scheduler not started: {err}"),
        }
        Ok(probe)
    }

    pub fn probe(&self) -> Option<&Arc<Probe<JvmtiInstrumentation>>> {
        self.probe.get()
    }
}

impl Agent for ProbeAgent {
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint {
        let config = match ProbeConfig::from_agent_options(options) {
            Ok(config) => config,
            Err(err) => {
                logging::init("info", Default::default());
                error!("invalid probe configuration: {err}");
                return jni::JNI_ERR;
            }
        };
        logging::init(&config.log_level, config.log_format);

        let jvmti = match Jvmti::new(vm) {
            Ok(jvmti) => jvmti,
            Err(res) => {
                error!(res, "JVMTI is not available");
                return jni::JNI_ERR;
            }
        };
        if let Err(err) = self.setup(&jvmti) {
            error!("JVMTI setup failed: {err}");
            return jni::JNI_ERR;
        }

        // SAFETY: `vm` is the pointer handed to Agent_OnLoad.
        let _ = self.vm.set(unsafe { JavaVm::from_raw(vm) });
        let _ = self.jvmti.set(jvmti);
        let _ = self.config.set(config);
        info!(version = env!("CARGO_PKG_VERSION"), "probe loaded");
        jni::JNI_OK
    }

    fn on_unload(&self) {
        debug!("probe unloaded");
    }

    fn vm_init(&self, jni: *mut jni::JNIEnv, _thread: jni::jthread) {
        // SAFETY: VMInit delivers the env of the current thread.
        let env = unsafe { JniEnv::from_raw(jni) };
        let probe = match self.start(&env) {
            Ok(probe) => probe,
            Err(err) => {
                error!("probe disabled: {err}");
                return;
            }
        };
        let probe = self.probe.get_or_init(|| probe);
        info!(hook_class = probe.transformer().hook_class(), "probe started");

        if let Some(result) = probe.apply_initial_instruments() {
            for failure in &result.failed {
                warn!(id = %failure.id, "initial instrument not applied: {}", failure.message);
            }
        }
    }

    fn vm_death(&self, _jni: *mut jni::JNIEnv) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
        if let Some(probe) = self.probe.get() {
            probe.shutdown();
        }
        if let Some(emitter) = self.emitter.lock().take() {
            emitter.shutdown();
        }
        info!("probe stopped");
    }

    fn class_file_load_hook(
        &self,
        _jni: *mut jni::JNIEnv,
        _class_being_redefined: jni::jclass,
        _loader: jni::jobject,
        name: *const c_char,
        _protection_domain: jni::jobject,
        class_data_len: jni::jint,
        class_data: *const c_uchar,
        new_class_data_len: *mut jni::jint,
        new_class_data: *mut *mut c_uchar,
    ) {
        let (Some(probe), Some(jvmti)) = (self.probe.get(), self.jvmti.get()) else {
            return;
        };
        if name.is_null() || class_data.is_null() || class_data_len <= 0 {
            return;
        }
        // SAFETY: the VM passes a NUL-terminated class name.
        let Ok(class_name) = (unsafe { CStr::from_ptr(name) }).to_str() else {
            return;
        };
        if class_name == probe.transformer().hook_class() {
            return;
        }
        // SAFETY: `class_data` holds `class_data_len` bytes for the duration of the callback.
        let bytes = unsafe { std::slice::from_raw_parts(class_data, class_data_len as usize) };

        let rewritten = panic::catch_unwind(AssertUnwindSafe(|| probe.transform_class(class_name, bytes)));
        let rewritten = match rewritten {
            Ok(Some(rewritten)) => rewritten,
            Ok(None) => return,
            Err(_) => {
                error!(class = class_name, "class transformation panicked");
                return;
            }
        };
        let Ok(len) = jni::jint::try_from(rewritten.len()) else {
            warn!(class = class_name, "rewritten class is too large");
            return;
        };
        match jvmti.allocate_copy(&rewritten) {
            Ok(mem) => {
                // SAFETY: both out-pointers are provided by the VM.
                unsafe {
                    *new_class_data_len = len;
                    *new_class_data = mem;
                }
                debug!(class = class_name, len, "class bytes replaced");
            }
            Err(err) => warn!(class = class_name, "failed to allocate class bytes: {err}"),
        }
    }
}
