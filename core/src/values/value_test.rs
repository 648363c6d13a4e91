use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::errors::RuntimeError;
use crate::values::{MapKey, Value, ValueKind};

#[test]
fn test_default_is_undefined() {
    assert!(Value::default().is_undefined());
    assert_eq!(Value::default().kind(), ValueKind::Undefined);
}

#[test]
fn test_kind_names() {
    assert_eq!(Value::Int(1).kind().to_string(), "int");
    assert_eq!(Value::from("a").kind().to_string(), "string");
    assert_eq!(Value::list(vec![]).kind().to_string(), "list");
    assert_eq!(Value::map(vec![]).unwrap().kind().to_string(), "map");
}

#[test]
fn test_truthiness() {
    assert!(!Value::Undefined.is_truthy());
    assert!(!Value::Int(0).is_truthy());
    assert!(Value::Int(-1).is_truthy());
    assert!(!Value::Float(0.0).is_truthy());
    assert!(!Value::from("").is_truthy());
    assert!(Value::from("x").is_truthy());
    assert!(!Value::list(vec![]).is_truthy());
    assert!(Value::list(vec![Value::Undefined]).is_truthy());
}

#[test]
fn test_numeric_equality_across_int_and_float() {
    assert_eq!(Value::Int(2), Value::Float(2.0));
    assert_ne!(Value::Int(2), Value::Float(2.5));
    assert_ne!(Value::Int(1), Value::Bool(true));
}

#[test]
fn test_list_equality_is_structural() {
    let a = Value::list(vec![Value::Int(1), Value::from("two")]);
    let b = Value::list(vec![Value::Int(1), Value::from("two")]);
    let c = Value::list(vec![Value::Int(1)]);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_map_equality_ignores_insertion_order() {
    let a = Value::map(vec![(Value::from("x"), Value::Int(1)), (Value::from("y"), Value::Int(2))])
        .unwrap();
    let b = Value::map(vec![(Value::from("y"), Value::Int(2)), (Value::from("x"), Value::Int(1))])
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_lists_are_shared_between_clones() {
    let a = Value::list(vec![Value::Int(1)]);
    let b = a.clone();
    b.as_list().unwrap().write().push(Value::Int(2));
    assert_eq!(a.len(), Some(2));
}

#[test]
fn test_integral_float_keys_normalize_to_int() {
    assert_eq!(MapKey::try_from(&Value::Float(3.0)).unwrap(), MapKey::Int(3));
    assert_eq!(
        MapKey::try_from(&Value::Float(0.5)).unwrap(),
        MapKey::Float(0.5f64.to_bits())
    );
}

#[test]
fn test_unhashable_key() {
    let err = Value::map(vec![(Value::list(vec![]), Value::Int(1))]).unwrap_err();
    assert!(matches!(err, RuntimeError::Unhashable(ValueKind::List)));
}

#[test]
fn test_display_scalars() {
    assert_eq!(Value::Int(-100).to_string(), "-100");
    assert_eq!(Value::Float(3.0).to_string(), "3.0");
    assert_eq!(Value::Float(0.25).to_string(), "0.25");
    assert_eq!(Value::Float(f64::INFINITY).to_string(), "inf");
    assert_eq!(Value::Float(f64::NAN).to_string(), "nan");
    assert_eq!(Value::from("hi").to_string(), "hi");
    assert_eq!(Value::Undefined.to_string(), "undefined");
    assert_eq!(Value::bytes(Arc::<[u8]>::from(&b"a\"\x01"[..])).to_string(), "b\"a\\\"\\x01\"");
}

#[test]
fn test_display_containers_quote_strings() {
    let list = Value::list(vec![Value::Int(1), Value::from("a"), Value::Bool(true)]);
    assert_eq!(list.to_string(), "[1, \"a\", true]");

    let map = Value::map(vec![(Value::from("b"), Value::Int(2)), (Value::from("a"), Value::Int(1))])
        .unwrap();
    assert_eq!(map.to_string(), "{\"a\": 1, \"b\": 2}");
}

#[test]
fn test_debug_quotes_strings() {
    assert_eq!(format!("{:?}", Value::from("x")), "\"x\"");
    assert_eq!(format!("{:?}", Value::Int(7)), "7");
}

#[test]
fn test_children_of_map_are_sorted() {
    let map = Value::map(vec![(Value::Int(2), Value::from("b")), (Value::Int(1), Value::from("a"))])
        .unwrap();
    let labels: Vec<String> = map.children().into_iter().map(|(k, _)| k).collect();
    assert_eq!(labels, vec!["1".to_string(), "2".to_string()]);
    assert!(map.has_children());
    assert!(!Value::Int(1).has_children());
}
