//! Typed identifiers for states, intentions and templates.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a state definition (`REFUSED_CMA`, `DATE_EMPTY`).
    StateId
);

string_id!(
    /// Identifier of an intention (`ASK_CONVOCATION`).
    IntentionId
);

string_id!(
    /// Identifier of a template.
    TemplateId
);

impl StateId {
    /// Name of the sentinel returned when no state matches.
    pub const UNMATCHED: &'static str = "UNMATCHED";

    /// The sentinel state id.
    #[must_use]
    pub fn unmatched() -> Self {
        Self::new(Self::UNMATCHED)
    }

    /// Returns true for the sentinel.
    #[must_use]
    pub fn is_unmatched(&self) -> bool {
        self.0 == Self::UNMATCHED
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_ids_borrow_as_str() {
        let mut map = HashMap::new();
        map.insert(StateId::new("DATE_EMPTY"), 1);
        assert_eq!(map.get("DATE_EMPTY"), Some(&1));
    }

    #[test]
    fn test_unmatched_sentinel() {
        assert!(StateId::unmatched().is_unmatched());
        assert!(!StateId::new("DATE_EMPTY").is_unmatched());
    }

    #[test]
    fn test_transparent_serde() {
        let id: IntentionId = serde_yaml::from_str("ASK_CONVOCATION").unwrap();
        assert_eq!(id.as_str(), "ASK_CONVOCATION");
        assert_eq!(serde_json::to_string(&TemplateId::new("t")).unwrap(), "\"t\"");
    }
}
