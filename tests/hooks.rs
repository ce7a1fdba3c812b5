use jvmti_probe::classfile::{ClassFile, ACC_NATIVE, ACC_PUBLIC, ACC_STATIC};
use jvmti_probe::hooks::{hook_class_bytes, DEFAULT_HOOK_CLASS, HOOK_METHODS};
use jvmti_probe::jni_heap::class_name_from_signature;
use jvmti_probe::report::format_message;
use jvmti_probe::runtime::signature_matches;

#[test]
fn hook_class_declares_every_native() {
    let bytes = hook_class_bytes(DEFAULT_HOOK_CLASS).unwrap();
    let class = ClassFile::parse(&bytes).unwrap();
    assert_eq!(class.major_version, 52);
    assert_eq!(class.this_class_name().unwrap(), DEFAULT_HOOK_CLASS);
    assert_eq!(class.source_file(), Some("LiveHooks.java"));
    assert_eq!(class.methods.len(), HOOK_METHODS.len());

    let cp = &class.constant_pool;
    for (method, hook) in class.methods.iter().zip(HOOK_METHODS) {
        assert_eq!(method.name(cp).unwrap(), hook.name);
        assert_eq!(method.descriptor(cp).unwrap(), hook.descriptor);
        assert_eq!(method.access_flags, ACC_PUBLIC | ACC_STATIC | ACC_NATIVE);
        assert!(method.code().is_none());
    }

    let custom = ClassFile::parse(&hook_class_bytes("com/acme/Hooks").unwrap()).unwrap();
    assert_eq!(custom.dotted_name().unwrap(), "com.acme.Hooks");
}

#[test]
fn default_callbacks_route_three_events() {
    let callbacks = jvmti_probe::get_default_callbacks();
    assert!(callbacks.VMInit.is_some());
    assert!(callbacks.VMDeath.is_some());
    assert!(callbacks.ClassFileLoadHook.is_some());
    assert!(callbacks.ThreadStart.is_none());
    assert!(callbacks.ClassPrepare.is_none());
}

#[test]
fn loaded_class_signatures() {
    assert!(signature_matches("Lcom/example/Counter;", "com/example/Counter"));
    assert!(signature_matches("Lcom/example/Counter$Inner;", "com/example/Counter"));
    assert!(!signature_matches("Lcom/example/CounterFactory;", "com/example/Counter"));
    assert!(!signature_matches("[Lcom/example/Counter;", "com/example/Counter"));
    assert!(!signature_matches("I", "I"));

    assert_eq!(class_name_from_signature("Lcom/example/Counter$Inner;"), "com.example.Counter$Inner");
    assert_eq!(class_name_from_signature("[Ljava/lang/String;"), "[Ljava.lang.String;");
    assert_eq!(class_name_from_signature("[I"), "[I");
}

#[test]
fn log_format_placeholders() {
    let args = vec!["1".to_string(), "two".to_string()];
    assert_eq!(format_message("a={} b={}", &args), "a=1 b=two");
    assert_eq!(format_message("{}{}{}", &args), "1two{}");
    assert_eq!(format_message("no placeholders", &args), "no placeholders");
    assert_eq!(format_message("{ } {}", &[]), "{ } {}");
}
