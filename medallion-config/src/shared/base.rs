use thiserror::Error;

/// Errors reported when validating configuration contents.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing from the configuration.
    #[error("missing required configuration field `{0}`")]
    MissingField(String),

    /// A field value does not satisfy its constraint.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
