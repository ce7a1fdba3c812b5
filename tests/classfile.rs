mod support;

use jvmti_probe::classfile::constant_pool::{decode_modified_utf8, encode_modified_utf8};
use jvmti_probe::classfile::descriptor::{java_method_signature, java_type_name, FieldType, MethodDescriptor};
use jvmti_probe::classfile::{ClassFile, ClassFileError, ConstantPool, CpInfo, StackMapFrame, ACC_STATIC};
use support::counter_class;

fn method<'a>(class: &'a ClassFile, name: &str) -> &'a jvmti_probe::classfile::MemberInfo {
    class
        .methods
        .iter()
        .find(|m| m.name(&class.constant_pool).expect("method name") == name)
        .expect("method present")
}

#[test]
fn parses_counter_class() {
    let bytes = counter_class(52);
    let class = ClassFile::parse(&bytes).expect("parse class file");

    assert_eq!(class.major_version, 52);
    assert_eq!(class.this_class_name().unwrap(), "com/example/Counter");
    assert_eq!(class.dotted_name().unwrap(), "com.example.Counter");
    assert_eq!(class.source_file(), Some("Counter.java"));
    assert!(class.requires_frames());
    assert_eq!(class.fields.len(), 3);
    assert_eq!(class.methods.len(), 4);

    let twice = method(&class, "twice");
    assert!(twice.is_static());
    assert_eq!(twice.access_flags & ACC_STATIC, ACC_STATIC);
    let code = twice.code().expect("code");
    assert_eq!(code.code, vec![0x1a, 0x05, 0x68, 0x3c, 0x1b, 0xac]);
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.line_at(3), Some(20));
    assert_eq!(code.line_at(4), Some(21));
    assert_eq!(code.local_variables().len(), 2);
    assert!(code.stack_map().is_none());
}

#[test]
fn decodes_stack_map_frames() {
    let class = ClassFile::parse(&counter_class(52)).expect("parse class file");
    let abs = method(&class, "abs").code().expect("code");
    assert_eq!(abs.stack_map(), Some(&[StackMapFrame::Same { offset_delta: 7 }][..]));

    let old = ClassFile::parse(&counter_class(49)).expect("parse class file");
    assert!(!old.requires_frames());
    assert!(method(&old, "abs").code().unwrap().stack_map().is_none());
}

#[test]
fn round_trips_byte_for_byte() {
    for version in [49, 52] {
        let bytes = counter_class(version);
        let class = ClassFile::parse(&bytes).expect("parse class file");
        assert_eq!(class.to_bytes().expect("write class file"), bytes, "version {version}");
    }
}

#[test]
fn rejects_malformed_input() {
    let mut bytes = counter_class(52);
    bytes[0] = 0xCB;
    assert!(matches!(ClassFile::parse(&bytes), Err(ClassFileError::InvalidMagic(0xCBFEBABE))));

    let bytes = counter_class(52);
    assert_eq!(ClassFile::parse(&bytes[..bytes.len() - 3]).unwrap_err(), ClassFileError::UnexpectedEof);

    let mut bytes = counter_class(52);
    bytes.extend_from_slice(&[0, 0]);
    assert_eq!(ClassFile::parse(&bytes).unwrap_err(), ClassFileError::TrailingBytes(2));
}

#[test]
fn constant_pool_reuses_entries() {
    let mut class = ClassFile::parse(&counter_class(52)).expect("parse class file");
    let cp = &mut class.constant_pool;
    let before = cp.count();

    assert_eq!(cp.add_utf8("Code").unwrap(), cp.find_utf8("Code").unwrap());
    assert_eq!(cp.add_class("java/lang/Object").unwrap(), class.super_class);
    assert_eq!(class.constant_pool.count(), before);

    let cp = &mut class.constant_pool;
    let hook = cp.add_methodref("jvmti/probe/LiveHooks", "isHit", "(Ljava/lang/String;)Z").unwrap();
    assert_eq!(cp.add_methodref("jvmti/probe/LiveHooks", "isHit", "(Ljava/lang/String;)Z").unwrap(), hook);
    let member = cp.member_ref(hook).unwrap();
    assert_eq!(member.class_name, "jvmti/probe/LiveHooks");
    assert_eq!(member.name, "isHit");
    assert_eq!(member.descriptor, "(Ljava/lang/String;)Z");

    let text = cp.add_string("bp-1").unwrap();
    assert!(matches!(cp.get(text), Ok(CpInfo::String { .. })));

    let rewritten = ClassFile::parse(&class.to_bytes().unwrap()).expect("reparse");
    assert_eq!(rewritten.constant_pool.count(), class.constant_pool.count());
}

#[test]
fn constant_pool_starts_empty() {
    let mut cp = ConstantPool::new();
    let first = cp.add_utf8("a").unwrap();
    assert_eq!(first, 1);
    assert_eq!(cp.add_integer(7).unwrap(), 2);
    assert!(cp.get(0).is_err());
}

#[test]
fn modified_utf8() {
    assert_eq!(encode_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
    assert_eq!(decode_modified_utf8(&[b'a', 0xC0, 0x80, b'b']), "a\0b");

    let emoji = "\u{1F600}";
    let encoded = encode_modified_utf8(emoji);
    assert_eq!(encoded.len(), 6);
    assert_eq!(decode_modified_utf8(&encoded), emoji);
}

#[test]
fn descriptors() {
    let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;)V").unwrap();
    assert_eq!(desc.params.len(), 3);
    assert_eq!(desc.param_slots(), 4);
    assert_eq!(desc.ret, None);
    assert_eq!(
        java_method_signature("com/example/Counter", "run", &desc),
        "com.example.Counter.run(int,long,java.lang.String[])"
    );

    assert_eq!(FieldType::parse("[[D").unwrap().java_name(), "double[][]");
    assert_eq!(FieldType::parse("Ljava/util/List;").unwrap().java_name(), "java.util.List");
    assert!(FieldType::parse("Ljava/util/List").is_err());
    assert!(FieldType::parse("II").is_err());
    assert_eq!(java_type_name("[Ljava/lang/String;"), "java.lang.String[]");
    assert_eq!(java_type_name("?"), "?");
}
