//! Naming types shared across Sunbeam components.

use crate::errors::JujuError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A validated Juju unit name of the form `application/number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitName {
    name: String,
    split: usize,
}

impl UnitName {
    /// Parse and validate a unit name.
    pub fn parse(name: &str) -> Result<Self, JujuError> {
        let invalid = || JujuError::InvalidUnitName(name.to_string());
        let (app, number) = name.split_once('/').ok_or_else(invalid)?;
        if app.is_empty() || !is_valid_application_name(app) {
            return Err(invalid());
        }
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            split: app.len(),
        })
    }

    /// Application part of the unit name.
    pub fn application(&self) -> &str {
        &self.name[..self.split]
    }

    /// Numeric part of the unit name.
    pub fn number(&self) -> u32 {
        // Validated as ASCII digits; overflow falls back to u32::MAX.
        self.name[self.split + 1..].parse().unwrap_or(u32::MAX)
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for UnitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for UnitName {
    type Err = JujuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UnitName {
    type Error = JujuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UnitName> for String {
    fn from(value: UnitName) -> Self {
        value.name
    }
}

/// Whether `name` is usable as a Juju application name.
///
/// Lowercase letters, digits and hyphens, starting with a letter, not ending
/// with a hyphen.
pub fn is_valid_application_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_lowercase()
                && *last != b'-'
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

/// Application a unit belongs to, matched on the `app/` prefix.
///
/// Returns `None` when `unit` has no slash.
pub fn application_of_unit(unit: &str) -> Option<&str> {
    unit.split_once('/').map(|(app, _)| app)
}

/// Whether `unit` belongs to `application`.
pub fn unit_belongs_to(unit: &str, application: &str) -> bool {
    application_of_unit(unit) == Some(application)
}

/// One side of a relation, written `application:endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub application: String,
    pub relation: String,
}

impl Endpoint {
    pub fn new(application: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            relation: relation.into(),
        }
    }

    /// Parse `application:endpoint`.
    pub fn parse(value: &str) -> Result<Self, JujuError> {
        match value.split_once(':') {
            Some((app, relation)) if is_valid_application_name(app) && !relation.is_empty() => {
                Ok(Self::new(app, relation))
            }
            _ => Err(JujuError::InvalidArgument(format!(
                "endpoint {value:?} should be of format application:endpoint"
            ))),
        }
    }
}

impl FromStr for Endpoint {
    type Err = JujuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.application, self.relation)
    }
}
