use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("filters have no 'insight' type")]
    MissingInsight,
    #[error("unsupported insight type: {0}")]
    UnsupportedInsight(String),
    #[error("invalid filter field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl ConversionError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsightError {
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),
}
