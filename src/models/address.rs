use std::fmt;

use serde::{Deserialize, Serialize};

/// Reverse-geocoded address.
///
/// An empty string never stands in for a failed lookup; use `Unresolved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "address", rename_all = "snake_case")]
pub enum Address {
    Resolved(String),
    Unresolved,
}

impl Address {
    /// Build a resolved address from provider text; blank text is `Unresolved`
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Address::Unresolved
        } else {
            Address::Resolved(trimmed.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Address::Resolved(text) => Some(text),
            Address::Unresolved => None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Address::Resolved(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Resolved(text) => f.write_str(text),
            Address::Unresolved => f.write_str("<unresolved>"),
        }
    }
}
