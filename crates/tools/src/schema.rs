// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Argument validation against the JSON-schema subset used by tool
//! descriptors: an object with typed properties, `required` lists and
//! `enum` restrictions. Validation failures always name the offending
//! field.

use serde_json::Value;

use quarry_types::{Error, Result};

pub fn validate(schema: &Value, args: &Value) -> Result<()> {
    let args_object = match args {
        Value::Object(map) => map,
        Value::Null => return validate_required_present(schema, &serde_json::Map::new()),
        _ => {
            return Err(Error::invalid_arguments(
                "arguments",
                "expected a JSON object",
            ))
        }
    };

    validate_required_present(schema, args_object)?;

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (field, value) in args_object {
        let Some(property) = properties.get(field) else {
            return Err(Error::invalid_arguments(field, "unknown field"));
        };
        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            check_type(field, expected, value)?;
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(Error::invalid_arguments(
                    field,
                    format!("must be one of {}", serde_json::Value::Array(allowed.clone())),
                ));
            }
        }
    }
    Ok(())
}

fn validate_required_present(
    schema: &Value,
    args: &serde_json::Map<String, Value>,
) -> Result<()> {
    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for field in required {
        let field = field.as_str().unwrap_or_default();
        if !args.contains_key(field) || args[field].is_null() {
            return Err(Error::invalid_arguments(field, "missing required field"));
        }
    }
    Ok(())
}

fn check_type(field: &str, expected: &str, value: &Value) -> Result<()> {
    let ok = match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        other => {
            return Err(Error::invalid_arguments(
                field,
                format!("descriptor declares unsupported type '{other}'"),
            ))
        }
    };
    if !ok {
        return Err(Error::invalid_arguments(
            field,
            format!("expected {expected}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "cf": {"type": "string"},
                "limit": {"type": "integer"},
                "reverse": {"type": "boolean"},
                "mode": {"type": "string", "enum": ["forward", "reverse"]},
            },
            "required": ["cf"],
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        validate(
            &schema(),
            &json!({"cf": "default", "limit": 10, "reverse": true}),
        )
        .unwrap();
    }

    #[test]
    fn missing_required_field_is_named() {
        let err = validate(&schema(), &json!({"limit": 3})).unwrap_err();
        assert!(err.to_string().contains("'cf'"));
    }

    #[test]
    fn wrong_types_are_named() {
        let err = validate(&schema(), &json!({"cf": "x", "limit": "ten"})).unwrap_err();
        assert!(err.to_string().contains("'limit'"));

        let err = validate(&schema(), &json!({"cf": 4})).unwrap_err();
        assert!(err.to_string().contains("'cf'"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = validate(&schema(), &json!({"cf": "x", "bogus": 1})).unwrap_err();
        assert!(err.to_string().contains("'bogus'"));
    }

    #[test]
    fn enums_restrict_values() {
        validate(&schema(), &json!({"cf": "x", "mode": "reverse"})).unwrap();
        let err = validate(&schema(), &json!({"cf": "x", "mode": "sideways"})).unwrap_err();
        assert!(err.to_string().contains("'mode'"));
    }

    #[test]
    fn null_arguments_check_required_only() {
        let err = validate(&schema(), &Value::Null).unwrap_err();
        assert_eq!(err.kind(), quarry_types::ErrorKind::InvalidArguments);

        let no_required = json!({"type": "object", "properties": {}});
        validate(&no_required, &Value::Null).unwrap();
    }
}
