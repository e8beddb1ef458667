use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Canonical type a cleaned field is coerced into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Integer,
    Float,
    Text,
    Timestamp,
    Date,
}

/// Policy applied when a declared field is null or absent in a raw record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum NullPolicy {
    /// The record is rejected and routed to the dead-letter set.
    Reject,
    /// The field takes the configured default value.
    Default(serde_json::Value),
    /// The field takes the last cleaned value observed for the same entity.
    CarryForward,
}

impl Default for NullPolicy {
    fn default() -> Self {
        NullPolicy::Reject
    }
}

/// Declared shape of a single source field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldConfig {
    /// Field name as it appears in raw records.
    pub name: String,
    /// Canonical type the field is coerced into.
    pub field_type: FieldType,
    /// Whether a null value is acceptable without invoking the null policy.
    #[serde(default)]
    pub nullable: bool,
    /// Policy applied when the field is null or absent.
    #[serde(default)]
    pub null_policy: NullPolicy,
}

/// Declared schema of one source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemaConfig {
    /// Declared fields, in no particular order.
    pub fields: Vec<FieldConfig>,
}

impl SchemaConfig {
    /// Validates that the schema declares at least one field and has no
    /// duplicate field names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "schema.fields".to_string(),
                constraint: "must declare at least one field".to_string(),
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("schema.fields.{}", field.name),
                    constraint: "field name declared more than once".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Returns the declared field with the given name, if any.
    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|field| field.name == name)
    }
}
