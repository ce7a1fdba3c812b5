//! Common imports for code that talks to the VM.
//!
//! Kept small: the environment wrappers, the agent plumbing and the raw
//! binding modules.

pub use crate::env::{GlobalRef, JniEnv, Jvmti, LocalRef};
pub use crate::export_agent;
pub use crate::get_default_callbacks;
pub use crate::sys::{jni, jvmti};
pub use crate::Agent;
