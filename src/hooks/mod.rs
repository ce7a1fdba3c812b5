//! The hook class rewritten methods call into.
//!
//! The class is generated at startup: every method is `public static
//! native`, and [`natives`] binds them to Rust with `RegisterNatives`.

pub mod natives;

use crate::classfile::{
    Attribute, AttributeBody, ClassFile, ClassFileError, ConstantPool, MemberInfo, ACC_FINAL, ACC_NATIVE, ACC_PUBLIC,
    ACC_STATIC, ACC_SUPER, ACC_SYNTHETIC,
};

pub const DEFAULT_HOOK_CLASS: &str = "jvmti/probe/LiveHooks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookMethod {
    pub name: &'static str,
    pub descriptor: &'static str,
}

impl HookMethod {
    const fn new(name: &'static str, descriptor: &'static str) -> Self {
        HookMethod { name, descriptor }
    }
}

pub const IS_INSTRUMENT_ENABLED: HookMethod = HookMethod::new("isInstrumentEnabled", "(Ljava/lang/String;)Z");
pub const IS_HIT: HookMethod = HookMethod::new("isHit", "(Ljava/lang/String;)Z");
pub const PUT_LOCAL_VARIABLE: HookMethod =
    HookMethod::new("putLocalVariable", "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Object;Ljava/lang/String;)V");
pub const PUT_FIELD: HookMethod =
    HookMethod::new("putField", "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Object;Ljava/lang/String;)V");
pub const PUT_STATIC_FIELD: HookMethod =
    HookMethod::new("putStaticField", "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Object;Ljava/lang/String;)V");
pub const PUT_BREAKPOINT: HookMethod = HookMethod::new("putBreakpoint", "(Ljava/lang/String;Ljava/lang/String;I)V");
pub const PUT_LOG: HookMethod =
    HookMethod::new("putLog", "(Ljava/lang/String;Ljava/lang/String;[Ljava/lang/String;)V");
pub const PUT_METER: HookMethod = HookMethod::new("putMeter", "(Ljava/lang/String;)V");
pub const OPEN_LOCAL_SPAN: HookMethod = HookMethod::new("openLocalSpan", "(Ljava/lang/String;)V");
pub const CLOSE_LOCAL_SPAN: HookMethod = HookMethod::new("closeLocalSpan", "(Ljava/lang/String;)V");
pub const CLOSE_LOCAL_SPAN_AND_THROW: HookMethod = HookMethod::new(
    "closeLocalSpanAndThrowException",
    "(Ljava/lang/Throwable;Ljava/lang/String;)Ljava/lang/Throwable;",
);

pub const HOOK_METHODS: [HookMethod; 11] = [
    IS_INSTRUMENT_ENABLED,
    IS_HIT,
    PUT_LOCAL_VARIABLE,
    PUT_FIELD,
    PUT_STATIC_FIELD,
    PUT_BREAKPOINT,
    PUT_LOG,
    PUT_METER,
    OPEN_LOCAL_SPAN,
    CLOSE_LOCAL_SPAN,
    CLOSE_LOCAL_SPAN_AND_THROW,
];

/// Java 8 class file declaring every hook as `public static native`.
pub fn hook_class_bytes(internal_name: &str) -> Result<Vec<u8>, ClassFileError> {
    let mut cp = ConstantPool::new();
    let this_class = cp.add_class(internal_name)?;
    let super_class = cp.add_class("java/lang/Object")?;

    let methods = HOOK_METHODS
        .iter()
        .map(|hook| {
            Ok(MemberInfo {
                access_flags: ACC_PUBLIC | ACC_STATIC | ACC_NATIVE,
                name_index: cp.add_utf8(hook.name)?,
                descriptor_index: cp.add_utf8(hook.descriptor)?,
                attributes: Vec::new(),
            })
        })
        .collect::<Result<Vec<_>, ClassFileError>>()?;

    let source_file = Attribute {
        name_index: cp.add_utf8("SourceFile")?,
        body: AttributeBody::SourceFile { sourcefile_index: cp.add_utf8("LiveHooks.java")? },
    };

    ClassFile {
        minor_version: 0,
        major_version: 52,
        constant_pool: cp,
        access_flags: ACC_PUBLIC | ACC_FINAL | ACC_SUPER | ACC_SYNTHETIC,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
        attributes: vec![source_file],
    }
    .to_bytes()
}

/// Methodref indices of every hook, added to a class being rewritten.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HookRefs {
    pub is_instrument_enabled: u16,
    pub is_hit: u16,
    pub put_local_variable: u16,
    pub put_field: u16,
    pub put_static_field: u16,
    pub put_breakpoint: u16,
    pub put_log: u16,
    pub put_meter: u16,
    pub open_local_span: u16,
    pub close_local_span: u16,
    pub close_local_span_and_throw: u16,
}

impl HookRefs {
    pub(crate) fn add(cp: &mut ConstantPool, hook_class: &str) -> Result<Self, ClassFileError> {
        let mut add = |hook: HookMethod| cp.add_methodref(hook_class, hook.name, hook.descriptor);
        Ok(HookRefs {
            is_instrument_enabled: add(IS_INSTRUMENT_ENABLED)?,
            is_hit: add(IS_HIT)?,
            put_local_variable: add(PUT_LOCAL_VARIABLE)?,
            put_field: add(PUT_FIELD)?,
            put_static_field: add(PUT_STATIC_FIELD)?,
            put_breakpoint: add(PUT_BREAKPOINT)?,
            put_log: add(PUT_LOG)?,
            put_meter: add(PUT_METER)?,
            open_local_span: add(OPEN_LOCAL_SPAN)?,
            close_local_span: add(CLOSE_LOCAL_SPAN)?,
            close_local_span_and_throw: add(CLOSE_LOCAL_SPAN_AND_THROW)?,
        })
    }
}
