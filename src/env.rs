//! Environment wrappers for JVMTI and JNI.
//!
//! [`Jvmti`] covers what the probe asks of the VM: capabilities and event
//! setup, loaded-class lookup and retransformation, stack traces, and the
//! object/field introspection used by the serializer. [`JniEnv`] covers class
//! definition, native registration and read-only object access.
//!
//! # Reference Guards
//!
//! - [`LocalRef`]: deletes a local reference when dropped
//! - [`GlobalRef`]: deletes a global reference when dropped
//!
//! ```rust,ignore
//! use jvmti_probe::prelude::*;
//!
//! fn class_name(jni: &JniEnv, jvmti: &Jvmti, obj: jni::jobject) -> Option<String> {
//!     let class = LocalRef::new(jni, jni.get_object_class(obj));
//!     jvmti.get_class_signature(class.get()).ok()
//! }
//! ```

mod jvmti_impl {
    pub use crate::jvmti_wrapper::Jvmti;
}

mod jni_impl {
    pub use crate::jni_wrapper::{GlobalRef, JniEnv, LocalRef};
}

pub use jni_impl::{GlobalRef, JniEnv, LocalRef};
pub use jvmti_impl::Jvmti;
