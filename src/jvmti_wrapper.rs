// jvmti-probe/src/jvmti_wrapper.rs
use crate::sys::jni;
use crate::sys::jvmti;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

/// A thin wrapper around the raw JVMTI environment pointer.
///
/// Every call returns the raw `jvmtiError` on failure. A function-table slot
/// the VM left empty is reported as `NOT_AVAILABLE` instead of panicking.
#[derive(Clone, Copy)]
pub struct Jvmti {
    env: *mut jvmti::jvmtiEnv,
}

// The environment pointer is valid process-wide once obtained; JVMTI
// functions are callable from any attached thread.
unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

macro_rules! jvmti_fn {
    ($env:expr, $name:ident) => {
        (*(*$env).functions).$name.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?
    };
}

impl Jvmti {
    /// Connects to the JVM and retrieves the JVMTI environment.
    pub fn new(vm: *mut jni::JavaVM) -> Result<Self, jni::jint> {
        let mut env_ptr: *mut std::ffi::c_void = ptr::null_mut();

        unsafe {
            let get_env_fn = (**vm).GetEnv;
            let res = get_env_fn(vm, &mut env_ptr, jvmti::JVMTI_VERSION_1_2);
            if res != jni::JNI_OK {
                return Err(res);
            }
        }

        Ok(Jvmti {
            env: env_ptr as *mut jvmti::jvmtiEnv,
        })
    }

    /// Create a Jvmti wrapper from a raw jvmtiEnv pointer
    ///
    /// # Safety
    /// The caller must ensure the pointer is valid for the duration of use.
    pub unsafe fn from_raw(env: *mut jvmti::jvmtiEnv) -> Self {
        Jvmti { env }
    }

    /// Get the raw jvmtiEnv pointer
    pub fn raw(&self) -> *mut jvmti::jvmtiEnv {
        self.env
    }

    // =========================================================================
    // Setup
    // =========================================================================

    pub fn add_capabilities(&self, new_caps: &jvmti::jvmtiCapabilities) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let add_caps_fn = jvmti_fn!(self.env, AddCapabilities);
            let err = add_caps_fn(self.env, new_caps);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn set_event_callbacks(&self, callbacks: jvmti::jvmtiEventCallbacks) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let set_callbacks_fn = jvmti_fn!(self.env, SetEventCallbacks);
            let size = std::mem::size_of::<jvmti::jvmtiEventCallbacks>() as jni::jint;
            let err = set_callbacks_fn(self.env, &callbacks, size);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn set_event_notification_mode(&self, enable: bool, event_type: u32, thread: jni::jthread) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let set_mode_fn = jvmti_fn!(self.env, SetEventNotificationMode);
            let mode = if enable { jvmti::JVMTI_ENABLE } else { jvmti::JVMTI_DISABLE };
            let err = set_mode_fn(self.env, mode, event_type, thread);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn allocate(&self, size: jni::jlong) -> Result<*mut u8, jvmti::jvmtiError> {
        let mut mem_ptr: *mut u8 = ptr::null_mut();
        unsafe {
            let allocate_fn = jvmti_fn!(self.env, Allocate);
            let err = allocate_fn(self.env, size, &mut mem_ptr);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
        }
        Ok(mem_ptr)
    }

    /// Copies `bytes` into a JVMTI-owned buffer, as required for
    /// `ClassFileLoadHook` replacement class data.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<*mut u8, jvmti::jvmtiError> {
        let mem = self.allocate(bytes.len() as jni::jlong)?;
        if mem.is_null() {
            return Err(jvmti::jvmtiError::OUT_OF_MEMORY);
        }
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len()) };
        Ok(mem)
    }

    pub fn deallocate(&self, mem: *mut u8) -> Result<(), jvmti::jvmtiError> {
        if mem.is_null() {
            return Ok(());
        }
        unsafe {
            let deallocate_fn = jvmti_fn!(self.env, Deallocate);
            let err = deallocate_fn(self.env, mem);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Copies a JVMTI-allocated C string and releases it.
    unsafe fn take_string(&self, p: *mut c_char) -> Result<String, jvmti::jvmtiError> {
        if p.is_null() {
            return Ok(String::new());
        }
        let s = CStr::from_ptr(p).to_string_lossy().into_owned();
        self.deallocate(p as *mut u8)?;
        Ok(s)
    }

    // =========================================================================
    // Threads and stacks
    // =========================================================================

    /// Name of `thread` (null means the current thread).
    pub fn get_thread_name(&self, thread: jni::jthread) -> Result<String, jvmti::jvmtiError> {
        let mut info = jvmti::jvmtiThreadInfo::default();
        unsafe {
            let get_thread_info_fn = jvmti_fn!(self.env, GetThreadInfo);
            let err = get_thread_info_fn(self.env, thread, &mut info);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
            self.take_string(info.name)
        }
    }

    pub fn get_stack_trace(&self, thread: jni::jthread, start_depth: jni::jint, max_frame_count: jni::jint) -> Result<Vec<jvmti::jvmtiFrameInfo>, jvmti::jvmtiError> {
        let mut frame_buffer = vec![jvmti::jvmtiFrameInfo::default(); max_frame_count.max(0) as usize];
        let mut count: jni::jint = 0;
        unsafe {
            let get_stack_fn = jvmti_fn!(self.env, GetStackTrace);
            let err = get_stack_fn(self.env, thread, start_depth, max_frame_count, frame_buffer.as_mut_ptr(), &mut count);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        frame_buffer.truncate(count.max(0) as usize);
        Ok(frame_buffer)
    }

    // =========================================================================
    // Classes
    // =========================================================================

    pub fn get_loaded_classes(&self) -> Result<Vec<jni::jclass>, jvmti::jvmtiError> {
        let mut class_count: jni::jint = 0;
        let mut classes_ptr: *mut jni::jclass = ptr::null_mut();

        unsafe {
            let get_loaded_classes_fn = jvmti_fn!(self.env, GetLoadedClasses);
            let err = get_loaded_classes_fn(self.env, &mut class_count, &mut classes_ptr);
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }

            let classes = std::slice::from_raw_parts(classes_ptr, class_count as usize).to_vec();
            self.deallocate(classes_ptr as *mut u8)?;
            Ok(classes)
        }
    }

    /// JVM type signature of `klass`, e.g. `Lcom/example/Foo;` or `[I`.
    pub fn get_class_signature(&self, klass: jni::jclass) -> Result<String, jvmti::jvmtiError> {
        let mut sig_ptr: *mut c_char = ptr::null_mut();
        unsafe {
            let get_class_sig_fn = jvmti_fn!(self.env, GetClassSignature);
            let err = get_class_sig_fn(self.env, klass, &mut sig_ptr, ptr::null_mut());
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
            self.take_string(sig_ptr)
        }
    }

    pub fn get_source_file_name(&self, klass: jni::jclass) -> Result<String, jvmti::jvmtiError> {
        let mut name_ptr: *mut c_char = ptr::null_mut();
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetSourceFileName);
            let err = get_fn(self.env, klass, &mut name_ptr);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
            self.take_string(name_ptr)
        }
    }

    pub fn is_modifiable_class(&self, klass: jni::jclass) -> Result<bool, jvmti::jvmtiError> {
        let mut res: jni::jboolean = 0;
        unsafe {
            let is_fn = jvmti_fn!(self.env, IsModifiableClass);
            let err = is_fn(self.env, klass, &mut res);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        Ok(res != 0)
    }

    pub fn retransform_classes(&self, classes: &[jni::jclass]) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let retransform_fn = jvmti_fn!(self.env, RetransformClasses);
            let err = retransform_fn(self.env, classes.len() as jni::jint, classes.as_ptr());
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        Ok(())
    }

    // =========================================================================
    // Fields
    // =========================================================================

    pub fn get_class_fields(&self, klass: jni::jclass) -> Result<Vec<jni::jfieldID>, jvmti::jvmtiError> {
        let mut field_count: jni::jint = 0;
        let mut fields_ptr: *mut jni::jfieldID = ptr::null_mut();
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetClassFields);
            let err = get_fn(self.env, klass, &mut field_count, &mut fields_ptr);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
            let fields = std::slice::from_raw_parts(fields_ptr, field_count as usize).to_vec();
            self.deallocate(fields_ptr as *mut u8)?;
            Ok(fields)
        }
    }

    /// Name and descriptor of a field.
    pub fn get_field_name(&self, klass: jni::jclass, field: jni::jfieldID) -> Result<(String, String), jvmti::jvmtiError> {
        let mut name_ptr: *mut c_char = ptr::null_mut();
        let mut sig_ptr: *mut c_char = ptr::null_mut();
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetFieldName);
            let err = get_fn(self.env, klass, field, &mut name_ptr, &mut sig_ptr, ptr::null_mut());
            if err != jvmti::jvmtiError::NONE { return Err(err); }
            let name = self.take_string(name_ptr)?;
            let sig = self.take_string(sig_ptr)?;
            Ok((name, sig))
        }
    }

    pub fn get_field_modifiers(&self, klass: jni::jclass, field: jni::jfieldID) -> Result<jni::jint, jvmti::jvmtiError> {
        let mut modifiers: jni::jint = 0;
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetFieldModifiers);
            let err = get_fn(self.env, klass, field, &mut modifiers);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        Ok(modifiers)
    }

    // =========================================================================
    // Methods
    // =========================================================================

    /// Name and descriptor of a method.
    pub fn get_method_name(&self, method: jni::jmethodID) -> Result<(String, String), jvmti::jvmtiError> {
        let mut name_ptr: *mut c_char = ptr::null_mut();
        let mut sig_ptr: *mut c_char = ptr::null_mut();

        unsafe {
            let get_method_name_fn = jvmti_fn!(self.env, GetMethodName);
            let err = get_method_name_fn(self.env, method, &mut name_ptr, &mut sig_ptr, ptr::null_mut());
            if err != jvmti::jvmtiError::NONE {
                return Err(err);
            }
            let name = self.take_string(name_ptr)?;
            let signature = self.take_string(sig_ptr)?;
            Ok((name, signature))
        }
    }

    pub fn get_method_declaring_class(&self, method: jni::jmethodID) -> Result<jni::jclass, jvmti::jvmtiError> {
        let mut klass: jni::jclass = ptr::null_mut();
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetMethodDeclaringClass);
            let err = get_fn(self.env, method, &mut klass);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        Ok(klass)
    }

    pub fn get_line_number_table(&self, method: jni::jmethodID) -> Result<Vec<jvmti::jvmtiLineNumberEntry>, jvmti::jvmtiError> {
        let mut entry_count: jni::jint = 0;
        let mut table_ptr: *mut jvmti::jvmtiLineNumberEntry = ptr::null_mut();
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetLineNumberTable);
            let err = get_fn(self.env, method, &mut entry_count, &mut table_ptr);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
            let table = std::slice::from_raw_parts(table_ptr, entry_count as usize).to_vec();
            self.deallocate(table_ptr as *mut u8)?;
            Ok(table)
        }
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub fn get_object_hash_code(&self, object: jni::jobject) -> Result<jni::jint, jvmti::jvmtiError> {
        let mut hash: jni::jint = 0;
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetObjectHashCode);
            let err = get_fn(self.env, object, &mut hash);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        Ok(hash)
    }

    pub fn get_object_size(&self, object: jni::jobject) -> Result<jni::jlong, jvmti::jvmtiError> {
        let mut size: jni::jlong = 0;
        unsafe {
            let get_fn = jvmti_fn!(self.env, GetObjectSize);
            let err = get_fn(self.env, object, &mut size);
            if err != jvmti::jvmtiError::NONE { return Err(err); }
        }
        Ok(size)
    }
}
