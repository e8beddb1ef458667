use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, RetryConfig, SchemaConfig, ValidationError};

/// Declares a referential integrity check for one cleaned field.
///
/// The named field's value must exist in the identified reference set;
/// otherwise the record is rejected during cleaning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReferenceConfig {
    /// Cleaned field whose value is checked.
    pub field: String,
    /// Name of the reference set the value must appear in.
    pub reference_set: String,
}

/// Describes the dimension entity a source feeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EntityConfig {
    /// Ordered list of cleaned fields that identify the real-world entity.
    pub business_key: Vec<String>,
    /// Referential integrity checks applied during cleaning.
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
}

impl EntityConfig {
    /// Validates that a business key is declared.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.business_key.is_empty() {
            return Err(ValidationError::MissingField(
                "entity.business_key".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration of a single raw source feeding the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    /// Stable identifier of the source; keys raw rows and checkpoints.
    pub source_id: String,
    /// Declared schema raw records are validated and coerced against.
    pub schema: SchemaConfig,
    /// Dimension entity description for this source.
    pub entity: EntityConfig,
}

impl SourceConfig {
    /// Validates the source configuration, including that every business key
    /// field and reference field is declared in the schema.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_id.is_empty() {
            return Err(ValidationError::MissingField("source_id".to_string()));
        }

        self.schema.validate()?;
        self.entity.validate()?;

        for key_field in &self.entity.business_key {
            if self.schema.field(key_field).is_none() {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("entity.business_key.{key_field}"),
                    constraint: "must be declared in the source schema".to_string(),
                });
            }
        }

        for reference in &self.entity.references {
            if self.schema.field(&reference.field).is_none() {
                return Err(ValidationError::InvalidFieldValue {
                    field: format!("entity.references.{}", reference.field),
                    constraint: "must be declared in the source schema".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Top-level configuration of a medallion pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Human-readable pipeline name, used in logs and reports.
    pub pipeline_name: String,
    /// Sources processed by the pipeline, in run order.
    pub sources: Vec<SourceConfig>,
    /// Retry policy shared by all stages.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Batch sizing shared by all stages.
    #[serde(default)]
    pub batch: BatchConfig,
}

impl crate::Config for PipelineConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

impl PipelineConfig {
    /// Validates the whole pipeline configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pipeline_name.is_empty() {
            return Err(ValidationError::MissingField("pipeline_name".to_string()));
        }

        if self.sources.is_empty() {
            return Err(ValidationError::MissingField("sources".to_string()));
        }

        for source in &self.sources {
            source.validate()?;
        }

        self.retry.validate()?;
        self.batch.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{FieldConfig, FieldType, NullPolicy};

    fn test_source() -> SourceConfig {
        SourceConfig {
            source_id: "customers".to_string(),
            schema: SchemaConfig {
                fields: vec![FieldConfig {
                    name: "customer_id".to_string(),
                    field_type: FieldType::Text,
                    nullable: false,
                    null_policy: NullPolicy::Reject,
                }],
            },
            entity: EntityConfig {
                business_key: vec!["customer_id".to_string()],
                references: vec![],
            },
        }
    }

    #[test]
    fn accepts_valid_pipeline_config() {
        let config = PipelineConfig {
            pipeline_name: "customers".to_string(),
            sources: vec![test_source()],
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_business_key_outside_schema() {
        let mut source = test_source();
        source.entity.business_key = vec!["missing".to_string()];

        assert!(source.validate().is_err());
    }
}
