//! Validated bookkeeping table name.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Table used to persist the applied version when no custom name is configured.
pub const DEFAULT_TABLE: &str = "schema_migrations";

/// Strongly-typed name of the bookkeeping table (optionally schema-qualified
/// like "ops.schema_migrations").
///
/// The name is interpolated into DDL and DML by every backend, so it is
/// restricted to plain identifiers: `[A-Za-z_][A-Za-z0-9_]*`, with at most one
/// `schema.` qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Validate and wrap a table name.
    pub fn parse(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let invalid = |reason: &str| CoreError::InvalidTableName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name cannot be empty"));
        }

        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > 2 {
            return Err(invalid("at most one schema qualifier is allowed"));
        }
        for part in &parts {
            if !is_identifier(part) {
                return Err(invalid(
                    "each part must match [A-Za-z_][A-Za-z0-9_]* (no quoting)",
                ));
            }
        }

        Ok(Self(name))
    }

    /// Return the underlying name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Schema qualifier, if the name has one.
    pub fn schema(&self) -> Option<&str> {
        self.0.split_once('.').map(|(schema, _)| schema)
    }

    /// Table part of the name without its schema qualifier.
    pub fn table(&self) -> &str {
        self.0
            .split_once('.')
            .map(|(_, table)| table)
            .unwrap_or(&self.0)
    }

    /// Consume the wrapper and return the inner `String`.
    pub fn into_inner(self) -> String {
        self.0
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Default for TableName {
    fn default() -> Self {
        Self(DEFAULT_TABLE.to_string())
    }
}

impl TryFrom<String> for TableName {
    type Error = CoreError;

    fn try_from(s: String) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for TableName {
    type Error = CoreError;

    fn try_from(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> Self {
        name.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for TableName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for TableName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for TableName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
