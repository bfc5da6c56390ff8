//! Structural equality over semi-structured values.
//!
//! Values are `serde_json::Value`. Integer and floating representations of the
//! same number compare equal, mapping key order is irrelevant, and sequence
//! order is significant. Incomparable shapes are reported as a
//! [`CompareError`] instead of a plain `false`, so callers can tell drift apart
//! from a schema mismatch.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Failure to compare two values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompareError {
    #[error("cannot compare {desired} with {actual} at '{path}'")]
    Shape {
        /// JSON pointer to the offending location.
        path: String,
        desired: &'static str,
        actual: &'static str,
    },
}

/// Compares two values.
pub fn equal(desired: &Value, actual: &Value) -> Result<bool, CompareError> {
    compare(desired, actual, &mut String::new())
}

/// Compares two mappings.
pub fn equal_map(
    desired: &Map<String, Value>,
    actual: &Map<String, Value>,
) -> Result<bool, CompareError> {
    compare_map(desired, actual, &mut String::new())
}

/// Compares two sequences element-wise, in order.
pub fn equal_sequence(desired: &[Value], actual: &[Value]) -> Result<bool, CompareError> {
    compare_sequence(desired, actual, &mut String::new())
}

/// Compares only the key sets of two mappings.
///
/// Used for write-only payloads whose values the remote never echoes back.
pub fn keys_equal<'a, I>(desired: &Map<String, Value>, actual_keys: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let mut count = 0;
    for key in actual_keys {
        if !desired.contains_key(key) {
            return false;
        }
        count += 1;
    }
    count == desired.len()
}

fn compare(desired: &Value, actual: &Value, path: &mut String) -> Result<bool, CompareError> {
    match (desired, actual) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Bool(d), Value::Bool(a)) => Ok(d == a),
        (Value::String(d), Value::String(a)) => Ok(d == a),
        (Value::Number(d), Value::Number(a)) => Ok(numbers_equal(d, a)),
        (Value::Object(d), Value::Object(a)) => compare_map(d, a, path),
        (Value::Array(d), Value::Array(a)) => compare_sequence(d, a, path),
        // null against a scalar is a difference, not a shape problem
        (Value::Null, a) if !is_container(a) => Ok(false),
        (d, Value::Null) if !is_container(d) => Ok(false),
        (d, a) => Err(CompareError::Shape {
            path: if path.is_empty() { "/".to_string() } else { path.clone() },
            desired: kind_name(d),
            actual: kind_name(a),
        }),
    }
}

fn compare_map(
    desired: &Map<String, Value>,
    actual: &Map<String, Value>,
    path: &mut String,
) -> Result<bool, CompareError> {
    if desired.len() != actual.len() {
        return Ok(false);
    }

    let mut equal = true;
    for (key, d) in desired {
        let Some(a) = actual.get(key) else {
            return Ok(false);
        };

        let len = path.len();
        path.push('/');
        push_escaped(path, key);
        let result = compare(d, a, path);
        path.truncate(len);

        // keep walking so a shape error deeper in the tree is never masked
        equal &= result?;
    }
    Ok(equal)
}

fn compare_sequence(
    desired: &[Value],
    actual: &[Value],
    path: &mut String,
) -> Result<bool, CompareError> {
    if desired.len() != actual.len() {
        return Ok(false);
    }

    let mut equal = true;
    for (i, (d, a)) in desired.iter().zip(actual).enumerate() {
        let len = path.len();
        path.push('/');
        path.push_str(&i.to_string());
        let result = compare(d, a, path);
        path.truncate(len);

        equal &= result?;
    }
    Ok(equal)
}

fn numbers_equal(desired: &Number, actual: &Number) -> bool {
    match (as_integer(desired), as_integer(actual)) {
        (Some(d), Some(a)) => d == a,
        (Some(i), None) => float_matches_integer(actual, i),
        (None, Some(i)) => float_matches_integer(desired, i),
        (None, None) => desired.as_f64() == actual.as_f64(),
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

fn float_matches_integer(float: &Number, integer: i128) -> bool {
    let Some(f) = float.as_f64() else {
        return false;
    };
    if !f.is_finite() || f.fract() != 0.0 {
        return false;
    }
    // beyond 2^53 the float no longer pins down a single integer
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if f.abs() > EXACT {
        return false;
    }
    f as i128 == integer
}

fn is_container(v: &Value) -> bool {
    matches!(v, Value::Object(_) | Value::Array(_))
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn push_escaped(path: &mut String, key: &str) {
    for c in key.chars() {
        match c {
            '~' => path.push_str("~0"),
            '/' => path.push_str("~1"),
            c => path.push(c),
        }
    }
}

/// Accumulates per-field verdicts into one up-to-date decision.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drift {
    fields: Vec<&'static str>,
}

impl Drift {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `field` as drifted unless `up_to_date`.
    pub fn check(&mut self, field: &'static str, up_to_date: bool) -> &mut Self {
        if !up_to_date {
            self.fields.push(field);
        }
        self
    }

    /// Compares two plain values with `==`.
    pub fn field<T: PartialEq + ?Sized>(
        &mut self,
        field: &'static str,
        desired: &T,
        actual: &T,
    ) -> &mut Self {
        self.check(field, desired == actual)
    }

    /// Compares two semi-structured values with [`equal`].
    pub fn value(
        &mut self,
        field: &'static str,
        desired: &Value,
        actual: &Value,
    ) -> Result<&mut Self, CompareError> {
        let up_to_date = equal(desired, actual)?;
        Ok(self.check(field, up_to_date))
    }

    pub fn is_up_to_date(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<&'static str> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(1), json!(1), true)]
    #[case(json!(1), json!(1.0), true)]
    #[case(json!(1.0), json!(1), true)]
    #[case(json!(-3), json!(-3.0), true)]
    #[case(json!(1), json!(1.5), false)]
    #[case(json!(1.5), json!(1.5), true)]
    #[case(json!(u64::MAX), json!(u64::MAX), true)]
    #[case(json!(u64::MAX), json!(-1), false)]
    #[case(json!("a"), json!("a"), true)]
    #[case(json!("a"), json!("b"), false)]
    #[case(json!(true), json!(true), true)]
    #[case(json!(true), json!(false), false)]
    #[case(json!(null), json!(null), true)]
    #[case(json!(null), json!(0), false)]
    #[case(json!("x"), json!(null), false)]
    fn test_scalars(#[case] desired: Value, #[case] actual: Value, #[case] expected: bool) {
        assert_eq!(equal(&desired, &actual), Ok(expected));
    }

    #[rstest]
    #[case(json!("1"), json!(1))]
    #[case(json!(true), json!("true"))]
    #[case(json!({}), json!([]))]
    #[case(json!([]), json!(1))]
    #[case(json!(null), json!({}))]
    fn test_mismatched_kinds_are_shape_errors(#[case] desired: Value, #[case] actual: Value) {
        assert!(matches!(equal(&desired, &actual), Err(CompareError::Shape { .. })));
    }

    #[test]
    fn test_map_key_order_is_irrelevant() {
        let a = json!({"x": 1, "y": {"z": [1, 2]}});
        let b = json!({"y": {"z": [1.0, 2]}, "x": 1.0});
        assert_eq!(equal(&a, &b), Ok(true));
    }

    #[test]
    fn test_empty_maps_are_equal() {
        assert_eq!(equal_map(&Map::new(), &Map::new()), Ok(true));
    }

    #[test]
    fn test_map_key_sets_must_match() {
        assert_eq!(equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})), Ok(false));
        assert_eq!(equal(&json!({"a": 1}), &json!({"b": 1})), Ok(false));
    }

    #[test]
    fn test_sequences_are_order_sensitive() {
        assert_eq!(equal(&json!([1, 2]), &json!([2, 1])), Ok(false));
        assert_eq!(equal(&json!([1, 2]), &json!([1, 2, 3])), Ok(false));
        assert_eq!(equal_sequence(&[json!(1)], &[json!(1.0)]), Ok(true));
    }

    #[test]
    fn test_nested_shape_error_reports_path() {
        let desired = json!({"a": {"b/c": {"d": 1}}});
        let actual = json!({"a": {"b/c": [1]}});

        let err = equal(&desired, &actual).unwrap_err();
        assert_eq!(
            err,
            CompareError::Shape {
                path: "/a/b~1c".to_string(),
                desired: "mapping",
                actual: "sequence",
            }
        );
    }

    #[test]
    fn test_shape_error_not_masked_by_earlier_difference() {
        let desired = json!({"a": 1, "b": {"c": 1}});
        let actual = json!({"a": 2, "b": [1]});
        assert!(equal(&desired, &actual).is_err());
    }

    #[test]
    fn test_keys_equal() {
        let desired = json!({"password": "x", "token": "y"});
        let desired = desired.as_object().unwrap();

        assert!(keys_equal(desired, ["token", "password"]));
        assert!(!keys_equal(desired, ["token"]));
        assert!(!keys_equal(desired, ["token", "password", "extra"]));
        assert!(keys_equal(&Map::new(), std::iter::empty()));
    }

    #[test]
    fn test_drift_collects_fields() {
        let mut drift = Drift::new();
        drift.field("name", "a", "a").field("url", "x", "y");
        drift.value("json_data", &json!({"a": 1}), &json!({"a": 1.0})).unwrap();

        assert!(!drift.is_up_to_date());
        assert_eq!(drift.fields(), &["url"]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::from),
                any::<f64>()
                    .prop_filter("finite", |f| f.is_finite())
                    .prop_map(Value::from),
                "[a-z]{0,8}".prop_map(Value::String),
            ];
            leaf.prop_recursive(4, 32, 6, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn equal_is_reflexive(v in arb_value()) {
                prop_assert_eq!(equal(&v, &v), Ok(true));
            }

            #[test]
            fn integer_and_float_forms_are_equal(
                entries in prop::collection::btree_map("[a-z]{1,6}", -1_000_000i64..1_000_000, 0..8)
            ) {
                let ints: Map<String, Value> =
                    entries.iter().map(|(k, v)| (k.clone(), json!(*v))).collect();
                let floats: Map<String, Value> =
                    entries.iter().map(|(k, v)| (k.clone(), json!(*v as f64))).collect();
                prop_assert_eq!(equal_map(&ints, &floats), Ok(true));
            }

            #[test]
            fn mapping_against_sequence_is_shape_error(
                key in "[a-z]{1,6}",
                items in prop::collection::vec(any::<i64>(), 0..4),
            ) {
                let a = json!({ key.clone(): {"inner": 1} });
                let b = json!({ key: items });
                let is_shape_error = matches!(equal(&a, &b), Err(CompareError::Shape { .. }));
                prop_assert!(is_shape_error);
            }
        }
    }
}
