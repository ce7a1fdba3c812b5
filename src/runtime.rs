//! [`Instrumentation`] backed by JVMTI, and JNI thread attachment for the
//! probe's own threads.

use crate::env::{JniEnv, Jvmti};
use crate::error::{ProbeError, Result};
use crate::instrument::Instrumentation;
use crate::sys::jni;
use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, warn};

/// The process-wide `JavaVM` pointer.
#[derive(Clone, Copy)]
pub struct JavaVm(*mut jni::JavaVM);

// The invocation interface may be used from any thread.
unsafe impl Send for JavaVm {}
unsafe impl Sync for JavaVm {}

impl JavaVm {
    /// # Safety
    ///
    /// `vm` must be the pointer the VM handed to the agent.
    pub unsafe fn from_raw(vm: *mut jni::JavaVM) -> Self {
        JavaVm(vm)
    }

    pub fn raw(&self) -> *mut jni::JavaVM {
        self.0
    }

    /// JNI environment of the current thread, if it is attached.
    pub fn current_env(&self) -> Option<JniEnv> {
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: GetEnv only writes `env`.
        let res = unsafe { ((**self.0).GetEnv)(self.0, &mut env, jni::JNI_VERSION_1_8) };
        if res != jni::JNI_OK || env.is_null() {
            return None;
        }
        // SAFETY: GetEnv returned the env of this thread.
        Some(unsafe { JniEnv::from_raw(env as *mut jni::JNIEnv) })
    }

    /// Attaches the current thread as a daemon. Already attached threads get
    /// a guard that leaves them attached.
    pub fn attach_daemon(&self, name: &str) -> Option<AttachGuard> {
        if self.current_env().is_some() {
            return Some(AttachGuard { vm: *self, detach: false });
        }
        let name = CString::new(name).ok()?;
        let mut args = jni::JavaVMAttachArgs {
            version: jni::JNI_VERSION_1_8,
            name: name.as_ptr() as *mut _,
            group: ptr::null_mut(),
        };
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: `args` and `name` outlive the call.
        let res = unsafe {
            ((**self.0).AttachCurrentThreadAsDaemon)(self.0, &mut env, &mut args as *mut _ as *mut c_void)
        };
        if res != jni::JNI_OK {
            warn!(res, "failed to attach {:?} to the JVM", name);
            return None;
        }
        debug!("attached {:?} to the JVM", name);
        Some(AttachGuard { vm: *self, detach: true })
    }
}

/// Detaches the thread on drop if [`JavaVm::attach_daemon`] attached it.
pub struct AttachGuard {
    vm: JavaVm,
    detach: bool,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if self.detach {
            // SAFETY: this thread was attached by `attach_daemon`.
            unsafe {
                ((**self.vm.0).DetachCurrentThread)(self.vm.0);
            }
        }
    }
}

/// A loaded class, held by a global reference.
pub struct LoadedClass {
    vm: JavaVm,
    class: jni::jclass,
    name: String,
}

unsafe impl Send for LoadedClass {}
unsafe impl Sync for LoadedClass {}

impl LoadedClass {
    pub fn raw(&self) -> jni::jclass {
        self.class
    }

    /// Dotted name, e.g. `com.example.Foo$Inner`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LoadedClass {
    fn drop(&mut self) {
        match self.vm.current_env() {
            Some(env) => env.delete_global_ref(self.class),
            None => debug!(class = %self.name, "dropping class reference on a detached thread"),
        }
    }
}

pub struct JvmtiInstrumentation {
    vm: JavaVm,
    jvmti: Jvmti,
}

impl JvmtiInstrumentation {
    pub fn new(vm: JavaVm, jvmti: Jvmti) -> Self {
        JvmtiInstrumentation { vm, jvmti }
    }
}

/// Whether the type signature `signature` names `internal` or one of its
/// nested classes.
pub fn signature_matches(signature: &str, internal: &str) -> bool {
    let Some(name) = signature.strip_prefix('L').and_then(|s| s.strip_suffix(';')) else {
        return false;
    };
    match name.strip_prefix(internal) {
        Some("") => true,
        Some(rest) => rest.starts_with('$'),
        None => false,
    }
}

impl Instrumentation for JvmtiInstrumentation {
    type Class = Arc<LoadedClass>;

    fn find_classes(&self, name: &str) -> Vec<Arc<LoadedClass>> {
        let Some(env) = self.vm.current_env() else {
            warn!(class = name, "cannot search classes from a detached thread");
            return Vec::new();
        };
        let classes = match self.jvmti.get_loaded_classes() {
            Ok(classes) => classes,
            Err(err) => {
                warn!(class = name, "GetLoadedClasses failed: {err}");
                return Vec::new();
            }
        };

        let internal = name.replace('.', "/");
        let mut found = Vec::new();
        for class in classes {
            if let Ok(signature) = self.jvmti.get_class_signature(class) {
                if signature_matches(&signature, &internal) {
                    let global = env.new_global_ref(class);
                    if !global.is_null() {
                        let dotted = signature[1..signature.len() - 1].replace('/', ".");
                        found.push(Arc::new(LoadedClass { vm: self.vm, class: global, name: dotted }));
                    }
                }
            }
            env.delete_local_ref(class);
        }
        // Outer class first, nested classes after it.
        found.sort_by(|a, b| (a.name.len(), &a.name).cmp(&(b.name.len(), &b.name)));
        found
    }

    fn retransform(&self, classes: &[Arc<LoadedClass>]) -> Result<()> {
        let modifiable: Vec<jni::jclass> = classes
            .iter()
            .filter(|class| match self.jvmti.is_modifiable_class(class.raw()) {
                Ok(true) => true,
                _ => {
                    debug!(class = class.name(), "class is not modifiable");
                    false
                }
            })
            .map(|class| class.raw())
            .collect();
        if modifiable.is_empty() {
            return Ok(());
        }
        self.jvmti.retransform_classes(&modifiable).map_err(|err| ProbeError::Retransform {
            classes: classes.iter().map(|class| class.name().to_string()).collect(),
            cause: err.to_string(),
        })
    }
}
