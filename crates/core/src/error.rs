use std::fmt;

use crate::validate::CatalogIssue;

/// Errors raised while loading a catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogError {
    /// The JSON did not match the catalog shape.
    Deserialize(String),
    /// The catalog deserialized but failed validation.
    Invalid(Vec<CatalogIssue>),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Deserialize(msg) => {
                write!(f, "catalog deserialization error: {}", msg)
            }
            CatalogError::Invalid(issues) => {
                write!(f, "catalog failed validation with {} issue(s)", issues.len())?;
                if let Some(first) = issues.first() {
                    write!(f, "; first: {}", first)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CatalogError {}
