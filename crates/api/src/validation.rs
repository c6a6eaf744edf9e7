//! Request body validation against static field schemas.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// A constraint on one field of a JSON body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRule {
    /// The field must be present, non-null, and not an empty string.
    Required,
    /// A string with a minimum and optional maximum length in characters.
    String { min: usize, max: Option<usize> },
    /// A number no smaller than `min`.
    Number { min: f64 },
    /// One of a fixed set of strings.
    OneOf(&'static [&'static str]),
    /// An RFC 3339 timestamp or a `YYYY-MM-DD` date.
    Date,
}

/// Field names paired with their rules, checked in order.
pub type Schema = &'static [(&'static str, &'static [FieldRule])];

pub const PROJECT_SCHEMA: Schema = &[
    (
        "title",
        &[
            FieldRule::Required,
            FieldRule::String {
                min: 3,
                max: Some(1000),
            },
        ],
    ),
    ("description", &[FieldRule::String { min: 0, max: None }]),
    ("priority", &[FieldRule::OneOf(&["low", "medium", "high"])]),
    ("budget", &[FieldRule::Required, FieldRule::Number { min: 0.0 }]),
    ("culminationDate", &[FieldRule::Date]),
    (
        "userId",
        &[FieldRule::Required, FieldRule::String { min: 1, max: None }],
    ),
];

pub const PAYMENT_SCHEMA: Schema = &[
    (
        "projectId",
        &[FieldRule::Required, FieldRule::String { min: 1, max: None }],
    ),
    ("amount", &[FieldRule::Required, FieldRule::Number { min: 0.0 }]),
    (
        "userId",
        &[FieldRule::Required, FieldRule::String { min: 1, max: None }],
    ),
];

/// Every field optional; at least one must be present, checked by the handler.
pub const PROJECT_UPDATE_SCHEMA: Schema = &[
    (
        "title",
        &[FieldRule::String {
            min: 3,
            max: Some(1000),
        }],
    ),
    ("description", &[FieldRule::String { min: 0, max: None }]),
    ("priority", &[FieldRule::OneOf(&["low", "medium", "high"])]),
    ("budget", &[FieldRule::Number { min: 0.0 }]),
    ("culminationDate", &[FieldRule::Date]),
];

pub const PAYMENT_STATUS_SCHEMA: Schema = &[
    (
        "paymentStatus",
        &[
            FieldRule::Required,
            FieldRule::OneOf(&[
                "pending",
                "processing",
                "paid",
                "payment_failed",
                "refunded",
                "failed",
            ]),
        ],
    ),
    ("paymentId", &[FieldRule::String { min: 1, max: None }]),
];

pub const PAYMENT_AMOUNT_SCHEMA: Schema =
    &[("amount", &[FieldRule::Required, FieldRule::Number { min: 0.0 }])];

pub const REFUND_SCHEMA: Schema = &[(
    "reason",
    &[FieldRule::String {
        min: 0,
        max: Some(500),
    }],
)];

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn is_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn check(field: &str, rule: &FieldRule, value: &Value) -> Option<String> {
    match rule {
        FieldRule::Required => None,
        FieldRule::String { min, max } => {
            let Some(s) = value.as_str() else {
                return Some(format!("{field} must be a string"));
            };
            let len = s.chars().count();
            if len < *min {
                Some(format!("{field} must be at least {min} characters"))
            } else if let Some(max) = max
                && len > *max
            {
                Some(format!("{field} must be at most {max} characters"))
            } else {
                None
            }
        }
        FieldRule::Number { min } => match value.as_f64() {
            None => Some(format!("{field} must be a number")),
            Some(n) if n < *min => Some(format!("{field} must be at least {min}")),
            Some(_) => None,
        },
        FieldRule::OneOf(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => None,
            _ => Some(format!("{field} must be one of: {}", allowed.join(", "))),
        },
        FieldRule::Date => match value.as_str() {
            Some(s) if is_date(s) => None,
            _ => Some(format!("{field} must be a valid date")),
        },
    }
}

/// Checks `body` against `schema`, collecting one message per violation.
///
/// A missing optional field is not checked further; a missing required field
/// yields only the "is required" message.
pub fn validate(schema: Schema, body: &Value) -> Result<(), Vec<String>> {
    if !body.is_object() {
        return Err(vec!["request body must be a JSON object".to_string()]);
    }

    let mut errors = Vec::new();
    for (field, rules) in schema {
        let value = body.get(*field);
        if is_missing(value) {
            if rules.contains(&FieldRule::Required) {
                errors.push(format!("{field} is required"));
            }
            continue;
        }
        let Some(value) = value else { continue };
        errors.extend(rules.iter().filter_map(|rule| check(field, rule, value)));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_project() {
        let body = json!({
            "title": "Bridge repair",
            "budget": 1500,
            "priority": "high",
            "culminationDate": "2026-12-31",
            "userId": "42"
        });
        assert!(validate(PROJECT_SCHEMA, &body).is_ok());
    }

    #[test]
    fn test_required_fields() {
        let errors = validate(PROJECT_SCHEMA, &json!({ "title": "" })).unwrap_err();
        assert_eq!(
            errors,
            vec!["title is required", "budget is required", "userId is required"]
        );
    }

    #[test]
    fn test_rule_messages() {
        let body = json!({
            "title": "ab",
            "budget": -5,
            "priority": "urgent",
            "culminationDate": "someday",
            "userId": "1"
        });
        let errors = validate(PROJECT_SCHEMA, &body).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "title must be at least 3 characters",
                "priority must be one of: low, medium, high",
                "budget must be at least 0",
                "culminationDate must be a valid date",
            ]
        );
    }

    #[test]
    fn test_type_mismatches() {
        let body = json!({ "projectId": 7, "amount": "ten", "userId": "u" });
        let errors = validate(PAYMENT_SCHEMA, &body).unwrap_err();
        assert_eq!(
            errors,
            vec!["projectId must be a string", "amount must be a number"]
        );
    }

    #[test]
    fn test_rfc3339_dates_accepted() {
        let body = json!({
            "title": "Tower",
            "budget": 0,
            "culminationDate": "2026-10-15T12:00:00Z",
            "userId": "9"
        });
        assert!(validate(PROJECT_SCHEMA, &body).is_ok());
    }

    #[test]
    fn test_project_update_fields_are_optional() {
        assert!(validate(PROJECT_UPDATE_SCHEMA, &json!({})).is_ok());
        assert!(validate(PROJECT_UPDATE_SCHEMA, &json!({ "budget": 2500 })).is_ok());
        let errors = validate(PROJECT_UPDATE_SCHEMA, &json!({ "title": "ab", "budget": -1 }))
            .unwrap_err();
        assert_eq!(
            errors,
            vec!["title must be at least 3 characters", "budget must be at least 0"]
        );
    }

    #[test]
    fn test_payment_status_values() {
        assert!(validate(PAYMENT_STATUS_SCHEMA, &json!({ "paymentStatus": "paid" })).is_ok());
        assert!(validate(PAYMENT_STATUS_SCHEMA, &json!({ "paymentStatus": "lost" })).is_err());
        assert_eq!(
            validate(PAYMENT_STATUS_SCHEMA, &json!({})).unwrap_err(),
            vec!["paymentStatus is required"]
        );
    }

    #[test]
    fn test_non_object_body() {
        assert!(validate(PAYMENT_SCHEMA, &json!([1, 2])).is_err());
    }
}
