use std::collections::BTreeMap;

use medallion_config::shared::{
    EntityConfig, FieldConfig, FieldType, NullPolicy, ReferenceConfig, SchemaConfig, SourceConfig,
};

use crate::source::SourceRecord;
use crate::types::{BusinessKey, Offset};

/// Declares a required field of the given type with the reject null policy.
pub fn field(name: &str, field_type: FieldType) -> FieldConfig {
    FieldConfig {
        name: name.to_string(),
        field_type,
        nullable: false,
        null_policy: NullPolicy::Reject,
    }
}

/// Declares a nullable field of the given type.
pub fn nullable_field(name: &str, field_type: FieldType) -> FieldConfig {
    FieldConfig {
        nullable: true,
        ..field(name, field_type)
    }
}

/// Declares a required field with a custom null policy.
pub fn field_with_policy(name: &str, field_type: FieldType, null_policy: NullPolicy) -> FieldConfig {
    FieldConfig {
        null_policy,
        ..field(name, field_type)
    }
}

/// Builds a source configuration with a single-field business key.
pub fn source_config(source_id: &str, key_field: &str, fields: Vec<FieldConfig>) -> SourceConfig {
    SourceConfig {
        source_id: source_id.to_string(),
        schema: SchemaConfig { fields },
        entity: EntityConfig {
            business_key: vec![key_field.to_string()],
            references: vec![],
        },
    }
}

/// Adds a referential integrity check to a source configuration.
pub fn with_reference(mut source: SourceConfig, field: &str, reference_set: &str) -> SourceConfig {
    source.entity.references.push(ReferenceConfig {
        field: field.to_string(),
        reference_set: reference_set.to_string(),
    });
    source
}

/// A typical customers source: text id key, text name, integer tier.
pub fn customers_source() -> SourceConfig {
    source_config(
        "customers",
        "customer_id",
        vec![
            field("customer_id", FieldType::Text),
            field("name", FieldType::Text),
            field("tier", FieldType::Integer),
        ],
    )
}

/// Builds a source record at the given offset from a JSON object literal.
pub fn source_record(offset: u64, fields: serde_json::Value) -> SourceRecord {
    let serde_json::Value::Object(fields) = fields else {
        panic!("source record fields must be a JSON object, got {fields}");
    };

    SourceRecord {
        offset: Offset(offset),
        fields: fields.into_iter().collect::<BTreeMap<_, _>>(),
    }
}

/// Builds a single-part business key.
pub fn business_key(part: &str) -> BusinessKey {
    BusinessKey::new(vec![part.to_string()])
}
