//! Raw FFI bindings to the parts of JNI and JVMTI the probe uses.
//!
//! Function tables keep the exact C layout; entries the probe never calls
//! are padding.

pub mod jni;
pub mod jvmti;
