//! Field-level validation
//!
//! Step 1 is the only step with rules that must pass before advancing. The
//! same [`FieldErrors`] shape carries validation messages returned by the
//! backing store.

use crate::models::fields::FieldValues;
use crate::schema::Step;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Messages keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn remove(&mut self, field: &str) {
        self.0.remove(field);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Parse a 400 response body
    ///
    /// Accepts `{ "field": ["msg", ...] }`, `{ "field": "msg" }` and
    /// `{ "detail": "msg" }`. Anything else becomes a single `non_field_errors`
    /// entry holding the raw body.
    pub fn from_response_body(body: &Value) -> Self {
        let mut errors = FieldErrors::new();
        match body {
            Value::Object(map) => {
                for (field, messages) in map {
                    match messages {
                        Value::Array(items) => {
                            for item in items {
                                errors.add(field.clone(), message_text(item));
                            }
                        }
                        other => errors.add(field.clone(), message_text(other)),
                    }
                }
            }
            Value::Null => {}
            other => errors.add("non_field_errors", message_text(other)),
        }
        errors
    }
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Synchronous pre-navigation rules for `step`
pub fn validate_step(step: Step, fields: &FieldValues) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if step != Step::One {
        return errors;
    }

    if fields.text("air_status").map(str::trim) == Some("off_air")
        && fields.non_blank("off_air_reason").is_none()
    {
        errors.add(
            "off_air_reason",
            "Reason for being OFF AIR is required when status is OFF AIR",
        );
    }

    if let Some(email) = fields.non_blank("contact_email") {
        if !is_valid_email(email) {
            errors.add("contact_email", "Invalid email format");
        }
    }

    errors
}

/// Loose address check: `local@domain.tld` with no whitespace
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_off_air_requires_reason() {
        let mut fields = FieldValues::new();
        fields.set("air_status", "off_air");
        let errors = validate_step(Step::One, &fields);
        assert!(errors.get("off_air_reason").is_some());

        fields.set("off_air_reason", "Transmitter fault");
        assert!(validate_step(Step::One, &fields).is_empty());
    }

    #[test]
    fn test_on_air_needs_no_reason() {
        let mut fields = FieldValues::new();
        fields.set("air_status", "on_air");
        assert!(validate_step(Step::One, &fields).is_empty());
    }

    #[test]
    fn test_email_format() {
        assert!(is_valid_email("ops@station.example.cm"));
        assert!(!is_valid_email("ops@station"));
        assert!(!is_valid_email("ops station@example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
        assert!(!is_valid_email("a@example..com"));

        let mut fields = FieldValues::new();
        fields.set("contact_email", "not-an-email");
        assert_eq!(
            validate_step(Step::One, &fields).get("contact_email"),
            Some(&["Invalid email format".to_string()][..])
        );
    }

    #[test]
    fn test_other_steps_have_no_sync_rules() {
        let mut fields = FieldValues::new();
        fields.set("contact_email", "bad");
        assert!(validate_step(Step::Two, &fields).is_empty());
    }

    #[test]
    fn test_parse_response_body() {
        let errors = FieldErrors::from_response_body(&json!({
            "contact_email": ["Enter a valid email address."],
            "detail": "Bad request",
        }));
        assert_eq!(
            errors.get("contact_email"),
            Some(&["Enter a valid email address.".to_string()][..])
        );
        assert_eq!(errors.get("detail"), Some(&["Bad request".to_string()][..]));
        assert_eq!(
            errors.to_string(),
            "contact_email: Enter a valid email address.; detail: Bad request"
        );
    }

    #[test]
    fn test_parse_non_object_body() {
        let errors = FieldErrors::from_response_body(&json!("nope"));
        assert_eq!(errors.get("non_field_errors"), Some(&["nope".to_string()][..]));
        assert!(FieldErrors::from_response_body(&Value::Null).is_empty());
    }
}
