use serde::{Deserialize, Serialize};
use std::fmt;

/// One `(field, value)` component of a group key. `None` means the document
/// does not populate the field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupTerm {
    pub field: String,
    pub value: Option<String>,
}

impl GroupTerm {
    pub fn new(field: impl Into<String>, value: Option<String>) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    pub fn present(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Some(value.into()))
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, None)
    }
}

/// Ordered group identity, one term per configured group-by field.
///
/// Serializes as the `kibana.alert.suppression.terms` array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(pub Vec<GroupTerm>);

impl GroupKey {
    pub fn new(terms: Vec<GroupTerm>) -> Self {
        Self(terms)
    }

    pub fn terms(&self) -> &[GroupTerm] {
        &self.0
    }

    /// True when any group-by field is absent on the contributing document.
    pub fn has_missing(&self) -> bool {
        self.0.iter().any(|term| term.value.is_none())
    }

    /// Stable text form used when hashing identities and building store keys.
    /// Values are quoted so a literal `"null"` string never collides with a
    /// missing value.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|term| match &term.value {
                Some(value) => format!("{}={:?}", term.field, value),
                None => format!("{}=null", term.field),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
