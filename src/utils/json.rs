use serde_json::Value;

pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// Reads an optional, clearable text field from a PATCH body.
///
/// `None` means the field was omitted, `Some(None)` clears it (explicit
/// `null` or a blank string) and `Some(Some(v))` sets the trimmed value.
pub fn nullable_text(body: &Value, key: &str) -> Result<Option<Option<String>>, String> {
    match classify_nullable(body.get(key)).map_err(|err| format!("{key}: {err}"))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Ok(Some(None)),
        NullableValue::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(Some(None))
            } else {
                Ok(Some(Some(trimmed.to_string())))
            }
        }
    }
}

/// Reads a required text field that may be omitted but never cleared.
pub fn required_text(body: &Value, key: &str) -> Result<Option<String>, String> {
    match classify_nullable(body.get(key)).map_err(|err| format!("{key}: {err}"))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Err(format!("{key} cannot be null")),
        NullableValue::String(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(format!("{key} must not be empty"))
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nullable_text_distinguishes_omitted_and_cleared() {
        let body = json!({ "rank": null, "company": "  Alpha ", "notes": "" });
        assert_eq!(nullable_text(&body, "missing").unwrap(), None);
        assert_eq!(nullable_text(&body, "rank").unwrap(), Some(None));
        assert_eq!(nullable_text(&body, "notes").unwrap(), Some(None));
        assert_eq!(
            nullable_text(&body, "company").unwrap(),
            Some(Some("Alpha".to_string()))
        );
    }

    #[test]
    fn required_text_rejects_null_and_blank() {
        let body = json!({ "first_name": null, "last_name": " ", "email": 3 });
        assert!(required_text(&body, "first_name").is_err());
        assert!(required_text(&body, "last_name").is_err());
        assert!(required_text(&body, "email").is_err());
        assert_eq!(required_text(&body, "other").unwrap(), None);
    }
}
