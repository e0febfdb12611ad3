use serde_json::{Map, Value};

use crate::error::ProvisionError;

/// Applies a sparse overrides tree on top of a base tree, returning a new
/// tree. The base defines the only legal keys at every level: an override key
/// absent from the base fails instead of silently widening the payload
/// schema. Null override values keep the base value; nested objects merge
/// recursively; anything else replaces the base value.
pub fn merge_overrides(base: &Value, overrides: &Value) -> Result<Value, ProvisionError> {
    let base_map = as_object(base, "base")?;
    let override_map = as_object(overrides, "overrides")?;
    let merged = merge_maps(base_map, override_map)?;
    Ok(Value::Object(merged))
}

fn merge_maps(
    base: &Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Result<Map<String, Value>, ProvisionError> {
    let mut merged = base.clone();
    for (key, value) in overrides {
        let Some(current) = merged.get(key) else {
            let valid = base.keys().cloned().collect();
            return Err(ProvisionError::UnknownOverrideKey {
                key: key.clone(),
                valid,
            });
        };
        match (current, value) {
            (Value::Object(current_map), Value::Object(override_map)) => {
                let nested = merge_maps(current_map, override_map)?;
                merged.insert(key.clone(), Value::Object(nested));
            }
            (_, Value::Null) => {}
            (_, replacement) => {
                merged.insert(key.clone(), replacement.clone());
            }
        }
    }
    Ok(merged)
}

fn as_object<'a>(value: &'a Value, which: &str) -> Result<&'a Map<String, Value>, ProvisionError> {
    value.as_object().ok_or_else(|| {
        ProvisionError::Configuration(format!("{which} tree must be a JSON object"))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn base() -> Value {
        json!({
            "foo": [1, 2, 3],
            "bar": null,
            "baz": {"tic": 1.1, "tac": 2.2, "toe": 3.3},
        })
    }

    #[test]
    fn null_override_keeps_base() {
        let merged = merge_overrides(&base(), &json!({"foo": null})).unwrap();
        assert_eq!(merged, base());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = merge_overrides(&base(), &json!({"oof": "gah"})).unwrap_err();
        assert_matches!(err, ProvisionError::UnknownOverrideKey { ref key, ref valid }
            if key == "oof" && valid.contains(&"baz".to_string()));
    }

    #[test]
    fn unknown_nested_key_is_rejected() {
        let err = merge_overrides(&base(), &json!({"baz": {"tik": 9.9}})).unwrap_err();
        assert_matches!(err, ProvisionError::UnknownOverrideKey { ref key, .. } if key == "tik");
    }

    #[test]
    fn top_level_replacement() {
        let merged = merge_overrides(&base(), &json!({"foo": [4, 5, 6], "bar": false})).unwrap();
        assert_eq!(merged["foo"], json!([4, 5, 6]));
        assert_eq!(merged["bar"], json!(false));
        assert_eq!(merged["baz"], base()["baz"]);
    }

    #[test]
    fn nested_merge() {
        let merged =
            merge_overrides(&base(), &json!({"baz": {"tic": 7.7, "tac": {"some": "thing"}}}))
                .unwrap();
        assert_eq!(merged["baz"]["tic"], json!(7.7));
        assert_eq!(merged["baz"]["tac"], json!({"some": "thing"}));
        assert_eq!(merged["baz"]["toe"], json!(3.3));
    }

    #[test]
    fn base_is_not_mutated() {
        let original = base();
        let merged = merge_overrides(&original, &json!({"bar": "random"})).unwrap();
        assert_eq!(merged["bar"], json!("random"));
        assert_eq!(original, base());
    }

    #[test]
    fn non_object_inputs_are_rejected() {
        let err = merge_overrides(&json!([1, 2]), &json!({})).unwrap_err();
        assert_matches!(err, ProvisionError::Configuration(_));
        let err = merge_overrides(&base(), &json!("nope")).unwrap_err();
        assert_matches!(err, ProvisionError::Configuration(_));
    }
}
