//! Partial-update payload builders
//!
//! A step save carries exactly the fields of that step. Unset fields are
//! written out as explicit empty values so the backing store's "set to the
//! given value" update never mistakes a missing key for "leave untouched".

use crate::models::fields::{FieldValue, FieldValues};
use crate::models::records::Payload;
use crate::schema::{self, FieldKind, Step};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use sitrep_common::EntityId;

/// Identities produced by entity resolution for a step-1 save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub program: Option<EntityId>,
    pub broadcaster: Option<EntityId>,
}

/// How unset step fields are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsetFields {
    /// Send `""` / `false` (or the field's declared empty value)
    Explicit,
    /// Leave unset fields out; used when the step was never loaded from the
    /// store, so unknown stored values are not overwritten
    Omit,
}

/// Payload for saving `step`
///
/// `first_save` carries the default inspection date and is `Some` only when
/// the inspection does not exist yet.
pub fn build_step_payload(
    step: Step,
    fields: &FieldValues,
    references: &References,
    first_save: Option<NaiveDate>,
    unset: UnsetFields,
) -> Payload {
    let mut payload = Payload::new();

    for spec in schema::persisted_fields(step) {
        match fields.get(spec.name) {
            Some(value) => {
                payload.insert(spec.name.to_string(), coerce(spec.kind, value));
            }
            None if unset == UnsetFields::Explicit => {
                payload.insert(spec.name.to_string(), empty_value(spec.kind, spec.empty));
            }
            None => {}
        }
    }

    if step == Step::One {
        if let Some(id) = &references.program {
            payload.insert("program".to_string(), id.to_json());
        }
        if let Some(id) = &references.broadcaster {
            payload.insert("broadcaster".to_string(), id.to_json());
        }
    }

    if let Some(date) = first_save {
        payload.insert("status".to_string(), Value::from("draft"));
        payload.insert(
            "inspection_date".to_string(),
            Value::from(date.format("%Y-%m-%d").to_string()),
        );
    }

    payload
}

/// Payload for the step-4 completion action
pub fn build_completion_payload(fields: &FieldValues, completed_at: DateTime<Utc>) -> Payload {
    let mut payload = build_step_payload(
        Step::Four,
        fields,
        &References::default(),
        None,
        UnsetFields::Explicit,
    );
    payload.insert("status".to_string(), Value::from("completed"));
    payload.insert(
        "completed_at".to_string(),
        Value::from(completed_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    payload
}

fn coerce(kind: FieldKind, value: &FieldValue) -> Value {
    match (kind, value) {
        (FieldKind::Flag, FieldValue::Flag(b)) => Value::Bool(*b),
        (FieldKind::Flag, FieldValue::Text(s)) => Value::Bool(matches!(s.trim(), "true" | "1" | "yes")),
        (FieldKind::Text, FieldValue::Text(s)) => Value::String(s.clone()),
        (FieldKind::Text, FieldValue::Flag(b)) => Value::String(b.to_string()),
    }
}

fn empty_value(kind: FieldKind, empty: &str) -> Value {
    match kind {
        FieldKind::Flag => Value::Bool(false),
        FieldKind::Text => Value::String(empty.to_string()),
    }
}
