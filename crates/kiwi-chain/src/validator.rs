//! Parent→child chain validation.
//!
//! A non-primitive executor must declare which children it accepts via
//! `validation.child_schemas` in its manifest. Each entry carries a
//! `match` predicate (flat or dotted-key equality map) and a JSON Schema.
//! For every adjacent `(child, parent)` pair, the first matching schema is
//! applied to the child.

use crate::resolver::ChainLink;
use kiwi_artifacts::{SchemaValidator, ToolType, ValidationOutcome};
use serde_json::Value;

/// Result of validating a chain's parent/child constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub validated_pairs: usize,
}

impl ChainValidationReport {
    fn issue(&mut self, parent: &str, child: &str, message: impl Into<String>) {
        self.issues
            .push(format!("[{parent}→{child}] {}", message.into()));
        self.valid = false;
    }

    fn warning(&mut self, parent: &str, child: &str, message: impl Into<String>) {
        self.warnings
            .push(format!("[{parent}→{child}] {}", message.into()));
    }
}

/// Applies each parent's declared child constraints to the next link up.
#[derive(Debug, Default)]
pub struct ChainValidator {
    schemas: SchemaValidator,
}

impl ChainValidator {
    pub fn new() -> Self {
        Self {
            schemas: SchemaValidator::new(),
        }
    }

    /// Validates each adjacent pair of `chain` (ordered leaf → primitive).
    ///
    /// Primitives sit at the bottom and validate nothing. Every other
    /// parent must define `child_schemas`; a child no schema matches is a
    /// failure naming the available `match` predicates.
    pub fn validate_chain(&self, chain: &[ChainLink]) -> ChainValidationReport {
        let mut report = ChainValidationReport {
            valid: true,
            ..Default::default()
        };

        if chain.len() < 2 {
            return report;
        }

        for pair in chain.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            self.validate_pair(parent, child, &mut report);
            report.validated_pairs += 1;
        }

        report
    }

    fn validate_pair(
        &self,
        parent: &ChainLink,
        child: &ChainLink,
        report: &mut ChainValidationReport,
    ) {
        if parent.tool_type == ToolType::Primitive {
            return;
        }

        let child_schemas = parent
            .manifest
            .pointer("/validation/child_schemas")
            .and_then(Value::as_array);

        let Some(child_schemas) = child_schemas.filter(|s| !s.is_empty()) else {
            report.issue(
                &parent.tool_id,
                &child.tool_id,
                format!(
                    "Parent '{}' must define child_schemas to validate children",
                    parent.tool_id
                ),
            );
            return;
        };

        let child_value = child.as_value();

        for schema_def in child_schemas {
            let criteria = schema_def.get("match").and_then(Value::as_object);
            let matches = criteria.map_or(false, |c| {
                c.iter().all(|(key, want)| {
                    lookup_dotted(&child_value, key).map_or(false, |got| got == want)
                })
            });
            if !matches {
                continue;
            }

            let Some(schema) = schema_def.get("schema").filter(|s| !s.is_null()) else {
                report.warning(
                    &parent.tool_id,
                    &child.tool_id,
                    "Schema definition has no schema body",
                );
                return;
            };

            match self.schemas.validate(&child_value, schema) {
                ValidationOutcome::Valid => {}
                ValidationOutcome::Invalid(issues) => {
                    for issue in issues {
                        report.issue(&parent.tool_id, &child.tool_id, issue);
                    }
                }
                ValidationOutcome::Unavailable(reason) => {
                    report.warning(
                        &parent.tool_id,
                        &child.tool_id,
                        format!("validation skipped: {reason}"),
                    );
                }
            }
            return;
        }

        let available: Vec<&Value> = child_schemas
            .iter()
            .filter_map(|s| s.get("match"))
            .collect();
        report.issue(
            &parent.tool_id,
            &child.tool_id,
            format!(
                "No schema matches child type '{}'. Available matches: {:?}",
                child.tool_type, available
            ),
        );
    }
}

/// Resolves a flat or dotted key (`manifest.config.language`) against a
/// JSON value.
fn lookup_dotted<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}
