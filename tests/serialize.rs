mod support;

use jvmti_probe::heap::Value;
use jvmti_probe::serialize::{BreakpointVariableControl, CapOverride, Serializer, VariableControl};
use serde_json::json;
use std::collections::HashMap;
use support::MemHeap;

fn lengths(max: usize) -> CapOverride {
    CapOverride { max_collection_length: Some(max), ..CapOverride::default() }
}

#[test]
fn variable_envelope() {
    let mut heap = MemHeap::new();
    let name = heap.string("nightly");
    let job = heap.object(
        "com.example.Job",
        vec![("name", Value::Object(name)), ("retries", Value::Int(3)), ("owner", Value::Null)],
    );
    let count = heap.int(7);
    let control = VariableControl::default();
    let ser = Serializer::new(&heap, &control);

    assert_eq!(
        ser.serialize_variable("job", "com.example.Job", Some(&job)),
        json!({
            "@class": "com.example.Job",
            "@id": "1001",
            "job": {"@class": "com.example.Job", "@id": "1001", "name": "nightly", "retries": 3, "owner": null}
        })
    );
    assert_eq!(
        ser.serialize_variable("count", "int", Some(&count)),
        json!({"@class": "java.lang.Integer", "@id": "1002", "count": 7})
    );
    assert_eq!(
        ser.serialize_variable("items", "java.util.List", None),
        json!({"@class": "java.util.List", "@null": true, "items": null})
    );
}

#[test]
fn scalars() {
    let heap = MemHeap::new();
    let control = VariableControl::default();
    let ser = Serializer::new(&heap, &control);
    assert_eq!(ser.serialize("f", &Value::Float(0.1)), json!(0.1));
    assert_eq!(ser.serialize("d", &Value::Double(5.0)), json!(5.0));
    assert_eq!(ser.serialize("c", &Value::Char('x')), json!("x"));
    assert_eq!(ser.serialize("b", &Value::Boolean(true)), json!(true));
    assert_eq!(ser.serialize("n", &Value::Double(f64::NAN)), json!("NaN"));
    assert_eq!(ser.serialize("l", &Value::Long(i64::MAX)), json!(i64::MAX));
}

#[test]
fn cycles_become_references() {
    let mut heap = MemHeap::new();
    let head = heap.object("com.example.Node", vec![]);
    let tail = heap.object("com.example.Node", vec![("next", Value::Object(head))]);
    heap.set_field(head, "next", Value::Object(tail));
    let control = VariableControl::default();

    assert_eq!(
        Serializer::new(&heap, &control).serialize("head", &Value::Object(head)),
        json!({
            "@class": "com.example.Node",
            "@id": "1000",
            "next": {
                "@class": "com.example.Node",
                "@id": "1001",
                "next": {"@ref": "1000", "@class": "com.example.Node"}
            }
        })
    );
}

#[test]
fn collections_and_maps() {
    let mut heap = MemHeap::new();
    let text = heap.string("a");
    let list = heap.list(vec![Value::Object(text), Value::Int(2), Value::Null]);
    let map = heap.map(vec![("a", Value::Int(1)), ("b", Value::Null)]);
    let control = VariableControl::default();
    let ser = Serializer::new(&heap, &control);

    assert_eq!(ser.serialize("list", &Value::Object(list)), json!(["a", 2, null]));
    assert_eq!(
        ser.serialize("map", &Value::Object(map)),
        json!({"@id": "1002", "@class": "java.util.HashMap", "a": 1, "b": null})
    );
}

#[test]
fn caps_emit_skip_markers() {
    let mut heap = MemHeap::new();
    let inner = heap.object("com.example.Inner", vec![("v", Value::Int(1))]);
    let outer = heap.object("com.example.Outer", vec![("inner", Value::Object(inner))]);
    let blob = heap.object("com.example.Blob", vec![]);
    heap.set_size(blob, 2048);
    let numbers = heap.int_array(&[1, 2, 3, 4, 5]);

    let control = VariableControl {
        max_object_depth: 1,
        max_object_size: 1024,
        max_collection_length: 3,
        ..VariableControl::default()
    };
    let ser = Serializer::new(&heap, &control);

    assert_eq!(
        ser.serialize("outer", &Value::Object(outer)),
        json!({
            "@class": "com.example.Outer",
            "@id": "1001",
            "inner": {"@skip": "MAX_DEPTH_EXCEEDED", "@class": "com.example.Inner", "@size": 24, "@id": "1000"}
        })
    );
    assert_eq!(
        ser.serialize("blob", &Value::Object(blob)),
        json!({
            "@skip": "MAX_SIZE_EXCEEDED",
            "@class": "com.example.Blob",
            "@skip[size]": 2048,
            "@skip[max]": 1024,
            "@id": "1002"
        })
    );
    assert_eq!(
        ser.serialize("numbers", &Value::Object(numbers)),
        json!([1, 2, 3, {"@skip": "MAX_LENGTH_EXCEEDED", "@skip[size]": 5, "@skip[max]": 3}])
    );
}

#[test]
fn throwing_objects_are_marked() {
    let mut heap = MemHeap::new();
    let bad = heap.broken("com.example.Bad");
    let holder = heap.object("com.example.Holder", vec![("bad", Value::Object(bad)), ("ok", Value::Int(1))]);
    let control = VariableControl::default();
    let json = Serializer::new(&heap, &control).serialize("holder", &Value::Object(holder));

    assert_eq!(json["ok"], 1);
    assert_eq!(
        json["bad"],
        json!({
            "@skip": "EXCEPTION_OCCURRED",
            "@class": "com.example.Bad",
            "@size": 24,
            "@cause": "java.lang.IllegalStateException: com.example.Bad is broken",
            "@id": "1000"
        })
    );
}

#[test]
fn overrides_by_name_and_type() {
    let mut heap = MemHeap::new();
    let pair = heap.int_array(&[1, 2]);
    let skipped = json!([1, {"@skip": "MAX_LENGTH_EXCEEDED", "@skip[size]": 2, "@skip[max]": 1}]);

    let by_name = VariableControl { by_name: HashMap::from([("big".to_string(), lengths(1))]), ..VariableControl::default() };
    let ser = Serializer::new(&heap, &by_name);
    assert_eq!(ser.serialize("big", &Value::Object(pair)), skipped);
    assert_eq!(ser.serialize("other", &Value::Object(pair)), json!([1, 2]));

    // arrays are keyed by their source-level type name
    let by_type = VariableControl { by_type: HashMap::from([("int[]".to_string(), lengths(1))]), ..VariableControl::default() };
    assert_eq!(Serializer::new(&heap, &by_type).serialize("any", &Value::Object(pair)), skipped);
}

#[test]
fn breakpoint_overrides_win() {
    let mut heap = MemHeap::new();
    let leaf = heap.object("com.example.Leaf", vec![("v", Value::Int(1))]);
    let inner = heap.object("com.example.Inner", vec![("leaf", Value::Object(leaf))]);
    let outer = heap.object("com.example.Outer", vec![("inner", Value::Object(inner))]);
    let triple = heap.int_array(&[1, 2, 3]);

    let control = VariableControl { by_name: HashMap::from([("triple".to_string(), lengths(1))]), ..VariableControl::default() };
    let breakpoint: BreakpointVariableControl = serde_json::from_value(json!({
        "maxObjectDepth": 1,
        "variableNameConfig": {
            "deep": {"maxObjectDepth": 3},
            "triple": {"maxCollectionLength": 2}
        }
    }))
    .unwrap();
    let ser = Serializer::new(&heap, &control).with_breakpoint(Some(&breakpoint));

    let shallow = ser.serialize("shallow", &Value::Object(outer));
    assert_eq!(shallow["inner"]["@skip"], "MAX_DEPTH_EXCEEDED");
    let deep = ser.serialize("deep", &Value::Object(outer));
    assert_eq!(deep["inner"]["leaf"]["v"], 1);

    assert_eq!(
        ser.serialize("triple", &Value::Object(triple)),
        json!([1, 2, {"@skip": "MAX_LENGTH_EXCEEDED", "@skip[size]": 3, "@skip[max]": 2}])
    );
}

#[test]
fn cap_override_spellings() {
    let camel: CapOverride = serde_json::from_value(json!({"maxObjectDepth": 2, "maxCollectionLength": 10})).unwrap();
    let snake: CapOverride = serde_yaml::from_str("max_object_depth: 2\nmax_collection_length: 10\n").unwrap();
    assert_eq!(camel, snake);
    assert_eq!(camel.max_object_size, None);
    assert_eq!(serde_json::to_value(&camel).unwrap(), json!({"maxObjectDepth": 2, "maxCollectionLength": 10}));
}

#[test]
fn chain_expands_up_to_depth_cap() {
    let mut heap = MemHeap::new();
    let mut next = Value::Null;
    for v in (0..6).rev() {
        let node = heap.object("com.example.Node", vec![("v", Value::Int(v)), ("next", next)]);
        next = Value::Object(node);
    }
    let head = next;

    let roomy = VariableControl { max_object_depth: 8, ..VariableControl::default() };
    let full = Serializer::new(&heap, &roomy).serialize("head", &head);
    assert!(!full.to_string().contains("@skip"));
    let tail = &full["next"]["next"]["next"]["next"]["next"];
    assert_eq!(tail["v"], 5);
    assert_eq!(tail["next"], json!(null));

    let tight = VariableControl { max_object_depth: 3, ..VariableControl::default() };
    let cut = Serializer::new(&heap, &tight).serialize("head", &head);
    assert_eq!(cut["@id"], "1005");
    assert_eq!(cut["next"]["next"]["v"], 2);
    assert_eq!(
        cut["next"]["next"]["next"],
        json!({"@skip": "MAX_DEPTH_EXCEEDED", "@class": "com.example.Node", "@size": 24, "@id": "1002"})
    );
}

#[test]
fn self_containing_list_stops_at_depth_cap() {
    let mut heap = MemHeap::new();
    let list = heap.list(vec![Value::Int(1)]);
    heap.push_element(list, Value::Object(list));
    let control = VariableControl { max_object_depth: 3, ..VariableControl::default() };

    assert_eq!(
        Serializer::new(&heap, &control).serialize("list", &Value::Object(list)),
        json!([1, [1, [1, {"@skip": "MAX_DEPTH_EXCEEDED", "@class": "java.util.ArrayList", "@size": 24, "@id": "1000"}]]])
    );
}
