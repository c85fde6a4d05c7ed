//! Strongly-typed identifiers for eoforge entities.
//!
//! Catalog datasets are keyed by UUIDs. Wrapping them keeps dataset ids from
//! being mixed up with queue message ids or other raw strings.
//!
//! # Example
//!
//! ```rust
//! use eoforge_core::id::DatasetId;
//!
//! let id: DatasetId = "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10".parse().unwrap();
//! assert_eq!(id.to_string(), "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a dataset registered in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(Uuid);

impl DatasetId {
    /// Generates a new random dataset ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a dataset ID from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DatasetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid dataset ID '{s}': {e}"),
            })
    }
}

impl From<Uuid> for DatasetId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let id = DatasetId::generate();
        let parsed: DatasetId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_garbage() {
        let err = "not-a-uuid".parse::<DatasetId>().unwrap_err();
        assert!(matches!(err, Error::InvalidId { .. }));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id: DatasetId = "00000000-0000-0000-0000-000000000001".parse().expect("parse");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000001\"");
    }

    #[test]
    fn orders_by_uuid() {
        let a: DatasetId = "00000000-0000-0000-0000-000000000001".parse().expect("parse");
        let b: DatasetId = "00000000-0000-0000-0000-000000000002".parse().expect("parse");
        assert!(a < b);
    }
}
