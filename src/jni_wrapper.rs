//! Wrapper around the JNI environment.
//!
//! Only the operations the probe needs: class definition and native
//! binding at startup, and the read-only object access used to capture and
//! serialize values from inside hook calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use jvmti_probe::jni_wrapper::JniEnv;
//!
//! fn vm_init(jni: *mut jni::JNIEnv) {
//!     let env = unsafe { JniEnv::from_raw(jni) };
//!     let string_class = env.find_class("java/lang/String");
//!     if env.exception_check() {
//!         env.exception_clear();
//!     }
//! }
//! ```

use crate::sys::jni;
use std::ffi::{CStr, CString};
use std::ptr;

/// Wrapper around a JNI environment pointer.
///
/// # Thread Safety
///
/// A `JniEnv` is tied to a specific thread and cannot be sent across threads.
/// Each JVM thread has its own JNI environment.
pub struct JniEnv {
    env: *mut jni::JNIEnv,
}

impl JniEnv {
    /// Creates a JniEnv wrapper from a raw pointer.
    ///
    /// # Safety
    ///
    /// The caller must ensure the pointer is valid and comes from the current thread.
    pub unsafe fn from_raw(env: *mut jni::JNIEnv) -> Self {
        JniEnv { env }
    }

    /// Returns the raw JNI environment pointer.
    pub fn raw(&self) -> *mut jni::JNIEnv {
        self.env
    }

    // =========================================================================
    // Class Operations
    // =========================================================================

    /// Defines a class from raw class-file bytes.
    ///
    /// A null `loader` defines the class in the bootstrap loader, making it
    /// visible to every application class.
    pub fn define_class(&self, name: &str, loader: jni::jobject, bytes: &[u8]) -> Option<jni::jclass> {
        let c_name = CString::new(name).ok()?;
        unsafe {
            let vtable = *self.env;
            let cls = ((*vtable).DefineClass)(
                self.env,
                c_name.as_ptr(),
                loader,
                bytes.as_ptr() as *const jni::jbyte,
                bytes.len() as jni::jsize,
            );
            if cls.is_null() { None } else { Some(cls) }
        }
    }

    /// Finds a class by its internal name (e.g. "java/lang/String").
    pub fn find_class(&self, name: &str) -> Option<jni::jclass> {
        let c_name = CString::new(name).ok()?;
        unsafe {
            let vtable = *self.env;
            let cls = ((*vtable).FindClass)(self.env, c_name.as_ptr());
            if cls.is_null() { None } else { Some(cls) }
        }
    }

    /// Gets the superclass of a class.
    pub fn get_superclass(&self, cls: jni::jclass) -> Option<jni::jclass> {
        unsafe {
            let vtable = *self.env;
            let super_cls = ((*vtable).GetSuperclass)(self.env, cls);
            if super_cls.is_null() { None } else { Some(super_cls) }
        }
    }

    /// Gets the class of an object.
    pub fn get_object_class(&self, obj: jni::jobject) -> jni::jclass {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetObjectClass)(self.env, obj)
        }
    }

    /// Checks if an object is an instance of a class.
    pub fn is_instance_of(&self, obj: jni::jobject, cls: jni::jclass) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).IsInstanceOf)(self.env, obj, cls) != 0
        }
    }

    pub fn is_same_object(&self, ref1: jni::jobject, ref2: jni::jobject) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).IsSameObject)(self.env, ref1, ref2) != 0
        }
    }

    // =========================================================================
    // Exception Handling
    // =========================================================================

    /// Checks if an exception is pending.
    pub fn exception_check(&self) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).ExceptionCheck)(self.env) != 0
        }
    }

    /// Clears any pending exception.
    pub fn exception_clear(&self) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).ExceptionClear)(self.env);
        }
    }

    /// Clears a pending exception and reports whether there was one.
    pub fn take_exception(&self) -> bool {
        if self.exception_check() {
            self.exception_clear();
            true
        } else {
            false
        }
    }

    // =========================================================================
    // String Operations
    // =========================================================================

    /// Gets a Rust string from a Java string.
    ///
    /// Returns `None` if the string is null.
    pub fn get_string_utf(&self, s: jni::jstring) -> Option<String> {
        if s.is_null() {
            return None;
        }
        unsafe {
            let vtable = *self.env;
            let chars = ((*vtable).GetStringUTFChars)(self.env, s, ptr::null_mut());
            if chars.is_null() {
                return None;
            }
            let bytes = CStr::from_ptr(chars).to_bytes();
            let result = crate::classfile::constant_pool::decode_modified_utf8(bytes);
            ((*vtable).ReleaseStringUTFChars)(self.env, s, chars);
            Some(result)
        }
    }

    // =========================================================================
    // Member lookup
    // =========================================================================

    /// Gets a method ID for an instance method.
    pub fn get_method_id(&self, cls: jni::jclass, name: &str, sig: &str) -> Option<jni::jmethodID> {
        let c_name = CString::new(name).ok()?;
        let c_sig = CString::new(sig).ok()?;
        unsafe {
            let vtable = *self.env;
            let mid = ((*vtable).GetMethodID)(self.env, cls, c_name.as_ptr(), c_sig.as_ptr());
            if mid.is_null() {
                // NoSuchMethodError is left pending by the VM
                self.take_exception();
                None
            } else {
                Some(mid)
            }
        }
    }

    /// Gets a field ID for an instance field.
    pub fn get_field_id(&self, cls: jni::jclass, name: &str, sig: &str) -> Option<jni::jfieldID> {
        let c_name = CString::new(name).ok()?;
        let c_sig = CString::new(sig).ok()?;
        unsafe {
            let vtable = *self.env;
            let fid = ((*vtable).GetFieldID)(self.env, cls, c_name.as_ptr(), c_sig.as_ptr());
            if fid.is_null() {
                self.take_exception();
                None
            } else {
                Some(fid)
            }
        }
    }

    // =========================================================================
    // References
    // =========================================================================

    pub fn new_global_ref(&self, obj: jni::jobject) -> jni::jobject {
        unsafe {
            let vtable = *self.env;
            ((*vtable).NewGlobalRef)(self.env, obj)
        }
    }

    pub fn delete_global_ref(&self, obj: jni::jobject) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).DeleteGlobalRef)(self.env, obj);
        }
    }

    pub fn delete_local_ref(&self, obj: jni::jobject) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).DeleteLocalRef)(self.env, obj);
        }
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    pub fn get_array_length(&self, array: jni::jarray) -> jni::jsize {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetArrayLength)(self.env, array)
        }
    }

    pub fn get_object_array_element(&self, array: jni::jobjectArray, index: jni::jsize) -> jni::jobject {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetObjectArrayElement)(self.env, array, index)
        }
    }

    // =========================================================================
    // Method Calls
    // =========================================================================

    pub fn call_object_method(&self, obj: jni::jobject, method_id: jni::jmethodID, args: &[jni::jvalue]) -> jni::jobject {
        unsafe {
            let vtable = *self.env;
            ((*vtable).CallObjectMethodA)(self.env, obj, method_id, args.as_ptr())
        }
    }

    pub fn call_boolean_method(&self, obj: jni::jobject, method_id: jni::jmethodID, args: &[jni::jvalue]) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).CallBooleanMethodA)(self.env, obj, method_id, args.as_ptr()) != 0
        }
    }

    pub fn call_int_method(&self, obj: jni::jobject, method_id: jni::jmethodID, args: &[jni::jvalue]) -> jni::jint {
        unsafe {
            let vtable = *self.env;
            ((*vtable).CallIntMethodA)(self.env, obj, method_id, args.as_ptr())
        }
    }

    // =========================================================================
    // Field Access
    // =========================================================================

    pub fn get_object_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jobject {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetObjectField)(self.env, obj, field_id)
        }
    }

    pub fn get_boolean_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetBooleanField)(self.env, obj, field_id) != 0
        }
    }

    pub fn get_byte_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jbyte {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetByteField)(self.env, obj, field_id)
        }
    }

    pub fn get_char_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jchar {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetCharField)(self.env, obj, field_id)
        }
    }

    pub fn get_short_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jshort {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetShortField)(self.env, obj, field_id)
        }
    }

    pub fn get_int_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jint {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetIntField)(self.env, obj, field_id)
        }
    }

    pub fn get_long_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jlong {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetLongField)(self.env, obj, field_id)
        }
    }

    pub fn get_float_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jfloat {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetFloatField)(self.env, obj, field_id)
        }
    }

    pub fn get_double_field(&self, obj: jni::jobject, field_id: jni::jfieldID) -> jni::jdouble {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetDoubleField)(self.env, obj, field_id)
        }
    }

    // =========================================================================
    // Primitive array regions
    // =========================================================================

    pub fn get_boolean_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jboolean]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetBooleanArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_byte_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jbyte]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetByteArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_char_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jchar]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetCharArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_short_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jshort]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetShortArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_int_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jint]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetIntArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_long_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jlong]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetLongArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_float_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jfloat]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetFloatArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    pub fn get_double_array_region(&self, array: jni::jarray, start: jni::jsize, buf: &mut [jni::jdouble]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetDoubleArrayRegion)(self.env, array, start, buf.len() as jni::jsize, buf.as_mut_ptr());
        }
    }

    // =========================================================================
    // Native Method Registration
    // =========================================================================

    /// Registers native methods for a class.
    pub fn register_natives(&self, cls: jni::jclass, methods: &[jni::JNINativeMethod]) -> Result<(), jni::jint> {
        unsafe {
            let vtable = *self.env;
            let result = ((*vtable).RegisterNatives)(self.env, cls, methods.as_ptr(), methods.len() as jni::jint);
            if result == 0 { Ok(()) } else { Err(result) }
        }
    }
}

/// A guard that automatically deletes a local reference when dropped.
pub struct LocalRef<'a> {
    env: &'a JniEnv,
    obj: jni::jobject,
}

impl<'a> LocalRef<'a> {
    pub fn new(env: &'a JniEnv, obj: jni::jobject) -> Self {
        LocalRef { env, obj }
    }

    pub fn get(&self) -> jni::jobject {
        self.obj
    }

    pub fn is_null(&self) -> bool {
        self.obj.is_null()
    }
}

impl<'a> Drop for LocalRef<'a> {
    fn drop(&mut self) {
        if !self.obj.is_null() {
            self.env.delete_local_ref(self.obj);
        }
    }
}

/// A guard that automatically deletes a global reference when dropped.
///
/// Captured hook arguments outlive the native call that received them, so
/// they are promoted to global references until the hit is decided.
pub struct GlobalRef {
    env_for_cleanup: *mut jni::JNIEnv,
    obj: jni::jobject,
}

impl GlobalRef {
    /// Creates a new GlobalRef from a local reference.
    ///
    /// # Safety
    ///
    /// The caller must ensure the env pointer remains valid for the lifetime
    /// of this GlobalRef. Hook captures are dropped on the thread that made
    /// them, before that thread returns to Java.
    pub unsafe fn new(env: &JniEnv, local_obj: jni::jobject) -> Self {
        let global = if local_obj.is_null() { ptr::null_mut() } else { env.new_global_ref(local_obj) };
        GlobalRef {
            env_for_cleanup: env.raw(),
            obj: global,
        }
    }

    pub fn get(&self) -> jni::jobject {
        self.obj
    }
}

impl Drop for GlobalRef {
    fn drop(&mut self) {
        if !self.obj.is_null() && !self.env_for_cleanup.is_null() {
            unsafe {
                let env = JniEnv::from_raw(self.env_for_cleanup);
                env.delete_global_ref(self.obj);
            }
        }
    }
}
