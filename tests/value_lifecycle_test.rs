mod common;

use jsbind_runtime_v8::{Arg, Error, Primitive, V8Value, ValueKind};

#[test]
fn test_close_releases_reference_once() {
    let runtime = common::runtime();
    let before = runtime.reference_count().unwrap();

    let object = runtime.create_object().unwrap();
    assert_eq!(runtime.reference_count().unwrap(), before + 1);

    object.close().unwrap();
    assert!(object.is_closed());
    assert_eq!(runtime.reference_count().unwrap(), before);

    assert!(matches!(object.close(), Err(Error::ValueAlreadyClosed)));
    assert_eq!(runtime.reference_count().unwrap(), before);
}

#[test]
fn test_operations_on_closed_handle_fail() {
    let runtime = common::runtime();
    let object = runtime.create_object().unwrap();
    object.close().unwrap();

    assert!(matches!(object.get("x"), Err(Error::ValueAlreadyClosed)));
    assert!(matches!(object.to_js_string(), Err(Error::ValueAlreadyClosed)));
    assert!(matches!(object.clone_handle(), Err(Error::ValueAlreadyClosed)));
}

#[test]
fn test_handles_are_inert_after_runtime_close() {
    let runtime = common::runtime();
    let object = runtime.create_object().unwrap();
    let number = runtime.create_value(7).unwrap();

    runtime.close().unwrap();

    assert!(matches!(object.get("x"), Err(Error::RuntimeAlreadyClosed)));
    assert!(matches!(
        number.to_primitive(),
        Err(Error::RuntimeAlreadyClosed)
    ));

    // Closing afterwards is a safe no-op, even twice
    object.close().unwrap();
    object.close().unwrap();
    number.close().unwrap();
}

#[test]
fn test_handles_outlive_dropped_runtime() {
    let runtime = common::runtime();
    let object = runtime.create_object().unwrap();
    drop(runtime);

    assert!(matches!(object.get("x"), Err(Error::RuntimeAlreadyClosed)));
    assert_eq!(object.runtime_id(), None);
    object.close().unwrap();
}

#[test]
fn test_clone_is_independent() {
    let runtime = common::runtime();
    let original = runtime.executor("({ answer: 42 })").execute().unwrap();
    let clone = original.clone_handle().unwrap();

    assert!(original.strict_equals(&clone).unwrap());
    let before = runtime.reference_count().unwrap();

    clone.close().unwrap();
    assert_eq!(runtime.reference_count().unwrap(), before - 1);

    let answer = original.get("answer").unwrap();
    assert_eq!(answer.to_primitive().unwrap(), Primitive::Integer(42));
}

#[test]
fn test_dropped_handles_are_released_on_next_call() {
    let runtime = common::runtime();
    let before = runtime.reference_count().unwrap();

    {
        let _a = runtime.create_object().unwrap();
        let _b = runtime.create_array().unwrap();
    }

    // The next call drains the deferred queue before it runs
    assert_eq!(runtime.reference_count().unwrap(), before);
}

#[test]
fn test_close_from_other_thread_while_locked_fails_fast() {
    let runtime = common::runtime();
    let object = runtime.create_object().unwrap();
    let before = runtime.reference_count().unwrap();

    let locker = runtime.locker().unwrap();
    std::thread::scope(|s| {
        s.spawn(|| {
            assert!(matches!(object.close(), Err(Error::LockConflict(_))));
        });
    });

    // The lock holder keeps using the handle
    assert!(!object.is_closed());
    object.set("alive", true).unwrap();
    assert!(object.has("alive").unwrap());
    assert_eq!(runtime.reference_count().unwrap(), before);

    drop(locker);
    object.close().unwrap();
    assert_eq!(runtime.reference_count().unwrap(), before - 1);
}

#[test]
fn test_equality_semantics() {
    let runtime = common::runtime();
    let one = runtime.create_value(1).unwrap();
    let text_one = runtime.create_value("1").unwrap();
    let nan_a = runtime.executor("NaN").execute().unwrap();
    let nan_b = runtime.executor("0 / 0").execute().unwrap();

    assert!(one.equals(&text_one).unwrap());
    assert!(!one.strict_equals(&text_one).unwrap());

    assert!(!nan_a.strict_equals(&nan_b).unwrap());
    assert!(nan_a.same_value(&nan_b).unwrap());

    let zero = runtime.executor("0").execute().unwrap();
    let negative_zero = runtime.executor("-0").execute().unwrap();
    assert!(zero.strict_equals(&negative_zero).unwrap());
    assert!(!zero.same_value(&negative_zero).unwrap());
}

#[test]
fn test_equality_across_runtimes_is_rejected() {
    let a = common::runtime();
    let b = common::runtime();
    let x = a.create_value(1).unwrap();
    let y = b.create_value(1).unwrap();

    assert!(matches!(x.equals(&y), Err(Error::RuntimeMismatch)));
    assert!(matches!(x.strict_equals(&y), Err(Error::RuntimeMismatch)));
    assert!(matches!(x.same_value(&y), Err(Error::RuntimeMismatch)));

    let object = a.create_object().unwrap();
    assert!(matches!(object.set("y", &y), Err(Error::RuntimeMismatch)));
}

#[test]
fn test_unregistered_placeholder() {
    let runtime = common::runtime();
    let placeholder = V8Value::default();

    assert!(!placeholder.is_registered());
    assert!(matches!(
        placeholder.to_primitive(),
        Err(Error::RuntimeNotRegistered)
    ));
    assert!(matches!(placeholder.close(), Err(Error::RuntimeNotRegistered)));

    runtime.register(&placeholder).unwrap();
    assert_eq!(placeholder.to_primitive().unwrap(), Primitive::Undefined);

    let other = common::runtime();
    assert!(matches!(
        other.register(&placeholder),
        Err(Error::RuntimeAlreadyRegistered)
    ));
    placeholder.close().unwrap();
}

#[test]
fn test_object_and_array_operations() {
    let runtime = common::runtime();
    let object = runtime.create_object().unwrap();

    object.set("name", "guest").unwrap();
    object.set("count", 3).unwrap();
    assert!(object.has("name").unwrap());
    assert_eq!(
        object.own_property_names().unwrap(),
        vec!["name".to_string(), "count".to_string()]
    );
    assert!(object.delete("count").unwrap());
    assert!(!object.has("count").unwrap());

    let array = runtime.executor("[10, 'b', null]").execute().unwrap();
    assert_eq!(array.kind(), ValueKind::Array);
    assert_eq!(array.length().unwrap(), 3);
    let first = array.get_index(0).unwrap();
    assert_eq!(first.to_primitive().unwrap(), Primitive::Integer(10));
    let past_end = array.get_index(9).unwrap();
    assert_eq!(past_end.kind(), ValueKind::Undefined);

    assert!(matches!(
        object.length(),
        Err(Error::TypeMismatch {
            expected: "array",
            ..
        })
    ));
}

#[test]
fn test_function_call_and_invoke() {
    let runtime = common::runtime();
    let add = runtime
        .executor("(function (a, b) { return a + b; })")
        .execute()
        .unwrap();
    assert_eq!(add.kind(), ValueKind::Function);

    let sum = add.call(None, &[Arg::from(2), Arg::from(3)]).unwrap();
    assert_eq!(sum.to_primitive().unwrap(), Primitive::Integer(5));

    let counter = runtime
        .executor("({ n: 1, bump(by) { this.n += by; return this.n; } })")
        .execute()
        .unwrap();
    let bumped = counter.invoke("bump", &[Arg::from(4)]).unwrap();
    assert_eq!(bumped.to_primitive().unwrap(), Primitive::Integer(5));

    let greeting = runtime.create_value("hi").unwrap();
    let joined = add.call(None, &[Arg::from(&greeting), "!".into()]).unwrap();
    assert_eq!(joined.to_js_string().unwrap(), "hi!");

    assert!(matches!(
        counter.invoke("missing", &[]),
        Err(Error::TypeMismatch {
            expected: "function",
            found: "undefined"
        })
    ));
}

#[test]
fn test_value_kinds() {
    let runtime = common::runtime();
    let cases = [
        ("undefined", ValueKind::Undefined),
        ("null", ValueKind::Null),
        ("true", ValueKind::Boolean),
        ("1", ValueKind::Integer),
        ("1.5", ValueKind::Double),
        ("10n", ValueKind::BigInt),
        ("'s'", ValueKind::String),
        ("Symbol('s')", ValueKind::Symbol),
        ("({})", ValueKind::Object),
        ("[]", ValueKind::Array),
        ("(() => 1)", ValueKind::Function),
        ("new TypeError('t')", ValueKind::Error),
        ("Promise.resolve(1)", ValueKind::Promise),
        ("new Map()", ValueKind::Map),
        ("new Set()", ValueKind::Set),
        ("new Date(0)", ValueKind::Date),
        ("/x/", ValueKind::RegExp),
        ("new ArrayBuffer(4)", ValueKind::ArrayBuffer),
        ("new Uint8Array(4)", ValueKind::TypedArray),
    ];

    for (code, kind) in cases {
        let value = runtime.executor(code).execute().unwrap();
        assert_eq!(value.kind(), kind, "{}", code);
        value.close().unwrap();
    }

    let big = runtime.executor("2n ** 40n").execute_primitive().unwrap();
    assert_eq!(big, Primitive::BigInt(1 << 40));
}

#[test]
fn test_bigint_outside_i64_is_rejected() {
    let runtime = common::runtime();

    assert!(matches!(
        runtime.executor("2n ** 64n + 5n").execute_primitive(),
        Err(Error::TypeMismatch {
            expected: "64-bit bigint",
            found: "bigint"
        })
    ));
    assert!(matches!(
        runtime.executor("-(2n ** 63n) - 1n").execute_primitive(),
        Err(Error::TypeMismatch { .. })
    ));

    let min = runtime.executor("-(2n ** 63n)").execute_primitive().unwrap();
    assert_eq!(min, Primitive::BigInt(i64::MIN));

    // The guest value itself is still reachable through a handle
    let huge = runtime.executor("2n ** 64n").execute().unwrap();
    assert_eq!(huge.kind(), ValueKind::BigInt);
    assert_eq!(huge.to_js_string().unwrap(), "18446744073709551616");
}

#[test]
fn test_error_accessors() {
    let runtime = common::runtime();
    let error = runtime
        .executor("new RangeError('out of range')")
        .execute()
        .unwrap();

    assert_eq!(error.error_message().unwrap(), "out of range");
    assert!(error.error_stack().unwrap().unwrap().contains("RangeError"));
}
