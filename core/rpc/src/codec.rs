// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Value codec: typed arguments and results to and from structured bodies.
//!
//! Bodies are `serde_json::Value`s. Sequences keep their element order;
//! mappings are string-keyed with unique keys and no order guarantee; sets
//! travel as sequences. Shape mismatches are [`DecodeError`]s, which the
//! dispatch layer converts to faults.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::contract::{ReturnShape, TypeShape};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("expected {expected} but found {found}")]
    Shape {
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Deserialize(#[from] serde_json::Error),
}

pub fn to_value<T: Serialize>(value: &T) -> Result<Value, DecodeError> {
    Ok(serde_json::to_value(value)?)
}

pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check a reply body against the return-shape classifier before
/// deserializing. Null results are legal for every shape.
pub(crate) fn check_reply_shape(
    shape: &ReturnShape,
    body: Option<&Value>,
) -> Result<(), DecodeError> {
    let expected = match shape {
        ReturnShape::Unit | ReturnShape::Service(_) => return Ok(()),
        ReturnShape::Single(element) => match element {
            TypeShape::Bool => "boolean",
            TypeShape::Integer | TypeShape::Float => "number",
            TypeShape::Str => "string",
            TypeShape::Structured => "object",
            _ => return Ok(()),
        },
        ReturnShape::List(_) | ReturnShape::Set(_) => "array",
        ReturnShape::Map(_) => "object",
    };

    match body {
        None => Ok(()),
        Some(Value::Null) => Ok(()),
        Some(value) if kind_of(value) == expected => Ok(()),
        Some(value) => Err(DecodeError::Shape {
            expected,
            found: kind_of(value),
        }),
    }
}

/// Named arguments of one invocation, decoded from the request body.
///
/// Extraction follows structured-value semantics: an absent argument reads
/// as null, so optional parameters decode through `Option<T>`.
pub struct Arguments {
    values: Map<String, Value>,
}

impl Arguments {
    pub(crate) fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self {
            values: Map::new(),
        }
    }

    /// Remove and decode the named argument.
    pub fn take<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, DecodeError> {
        let value = self.values.remove(name).unwrap_or(Value::Null);
        from_value(value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_typed_arguments() {
        let mut args = Arguments::new(
            json!({"a": 3, "b": "hi", "c": [1, 2]})
                .as_object()
                .unwrap()
                .clone(),
        );
        let a: i64 = args.take("a").unwrap();
        let b: String = args.take("b").unwrap();
        let c: Vec<i64> = args.take("c").unwrap();
        assert_eq!((a, b.as_str(), c), (3, "hi", vec![1, 2]));
    }

    #[test]
    fn test_absent_argument_reads_as_null() {
        let mut args = Arguments::empty();
        let missing: Option<String> = args.take("nope").unwrap();
        assert_eq!(missing, None);
        assert!(args.take::<String>("nope").is_err());
    }

    #[test]
    fn test_reply_shape_mismatch() {
        let err = check_reply_shape(
            &ReturnShape::List(TypeShape::Integer),
            Some(&json!(7)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Shape {
                expected: "array",
                found: "number"
            }
        ));
    }

    #[test]
    fn test_reply_shape_null_tolerated() {
        check_reply_shape(&ReturnShape::Single(TypeShape::Str), Some(&Value::Null)).unwrap();
        check_reply_shape(&ReturnShape::Map(TypeShape::Integer), None).unwrap();
    }

    #[test]
    fn test_list_order_preserved() {
        let values: Vec<i64> = from_value(json!([3, 1, 2])).unwrap();
        assert_eq!(values, vec![3, 1, 2]);
    }
}
