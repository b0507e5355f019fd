//! JSON-Schema validation (Draft-07 and later).
//!
//! Two callers: metadata validation after parsing, and parent→child chain
//! constraint checks. Outcomes are a three-state variant rather than a
//! boolean so callers can distinguish "validated OK", "validated failed",
//! and "not validated" (the schema itself would not compile).

use serde_json::Value;

/// Outcome of a schema validation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The instance satisfies the schema.
    Valid,
    /// The instance violates the schema; all issues reported at once.
    Invalid(Vec<String>),
    /// No verdict: the schema could not be compiled. Callers degrade this
    /// to a warning rather than a failure.
    Unavailable(String),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// Thin wrapper over the JSON-Schema engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates `instance` against `schema`, collecting every violation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use kiwi_artifacts::{SchemaValidator, ValidationOutcome};
    /// use serde_json::json;
    ///
    /// let validator = SchemaValidator::new();
    /// let schema = json!({
    ///     "type": "object",
    ///     "properties": {"name": {"type": "string"}},
    ///     "required": ["name"],
    /// });
    ///
    /// assert!(validator.validate(&json!({"name": "x"}), &schema).is_valid());
    ///
    /// match validator.validate(&json!({}), &schema) {
    ///     ValidationOutcome::Invalid(issues) => assert_eq!(issues.len(), 1),
    ///     other => panic!("expected Invalid, got {other:?}"),
    /// }
    /// ```
    pub fn validate(&self, instance: &Value, schema: &Value) -> ValidationOutcome {
        let validator = match jsonschema::validator_for(schema) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "schema failed to compile, skipping validation");
                return ValidationOutcome::Unavailable(e.to_string());
            }
        };

        let issues: Vec<String> = validator
            .iter_errors(instance)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();

        if issues.is_empty() {
            ValidationOutcome::Valid
        } else {
            ValidationOutcome::Invalid(issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_link_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_id": {"type": "string", "pattern": "^[a-z][a-z0-9_]*$"},
                "tool_type": {"const": "script"},
                "manifest": {
                    "type": "object",
                    "properties": {"entrypoint": {"type": "string"}},
                    "required": ["entrypoint"],
                },
            },
            "required": ["tool_id", "tool_type", "manifest"],
        })
    }

    #[test]
    fn test_valid_instance() {
        let validator = SchemaValidator::new();
        let instance = json!({
            "tool_id": "hello_node",
            "tool_type": "script",
            "manifest": {"entrypoint": "hello.js"},
        });
        assert_eq!(
            validator.validate(&instance, &tool_link_schema()),
            ValidationOutcome::Valid
        );
    }

    #[test]
    fn test_all_issues_reported_at_once() {
        let validator = SchemaValidator::new();
        let instance = json!({
            "tool_id": "BadName",
            "tool_type": "runtime",
            "manifest": {},
        });
        match validator.validate(&instance, &tool_link_schema()) {
            ValidationOutcome::Invalid(issues) => {
                assert!(issues.len() >= 3, "expected pattern, const, and required issues: {issues:?}");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_uncompilable_schema_is_unavailable() {
        let validator = SchemaValidator::new();
        let broken = json!({"type": "not-a-real-type"});
        assert!(matches!(
            validator.validate(&json!({}), &broken),
            ValidationOutcome::Unavailable(_)
        ));
    }

    #[test]
    fn test_issue_carries_instance_path() {
        let validator = SchemaValidator::new();
        let schema = json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}},
        });
        match validator.validate(&json!({"count": "three"}), &schema) {
            ValidationOutcome::Invalid(issues) => {
                assert!(issues[0].contains("/count"), "{issues:?}");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
