//! Value identifiers and their owning-side tag.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a gc-tracked value within one peer's table.
///
/// Numeric ids are allocated by the owner and participate in cooperative
/// garbage collection. String ids are reserved for user-exposed names and are
/// never collected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    /// Owner-allocated numeric id.
    Index(u64),
    /// Reserved name registered through `expose`.
    Name(String),
}

impl RawId {
    /// True for owner-allocated numeric ids (the gc-tracked kind).
    pub fn is_index(&self) -> bool {
        matches!(self, RawId::Index(_))
    }

    pub fn as_index(&self) -> Option<u64> {
        match self {
            RawId::Index(index) => Some(*index),
            RawId::Name(_) => None,
        }
    }
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Index(index) => write!(f, "#{}", index),
            RawId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

impl From<u64> for RawId {
    fn from(index: u64) -> Self {
        RawId::Index(index)
    }
}

impl From<&str> for RawId {
    fn from(name: &str) -> Self {
        RawId::Name(name.to_string())
    }
}

impl From<String> for RawId {
    fn from(name: String) -> Self {
        RawId::Name(name)
    }
}

/// Which peer owns the identified value, from the *sender's* perspective.
///
/// Every id is namespaced per peer: the same number on each side names two
/// different values. The receiver flips the tag so that `Local` always means
/// "owned by me".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn flipped(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

/// An id together with its owning side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedId {
    pub side: Side,
    pub id: RawId,
}

impl TaggedId {
    pub fn local(id: impl Into<RawId>) -> Self {
        TaggedId {
            side: Side::Local,
            id: id.into(),
        }
    }

    pub fn remote(id: impl Into<RawId>) -> Self {
        TaggedId {
            side: Side::Remote,
            id: id.into(),
        }
    }

    /// Re-tag for the other peer's perspective.
    pub fn flipped(self) -> Self {
        TaggedId {
            side: self.side.flipped(),
            id: self.id,
        }
    }
}

impl fmt::Display for TaggedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Side::Local => write!(f, "local:{}", self.id),
            Side::Remote => write!(f, "remote:{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_id_serializes_untagged() {
        let json = serde_json::to_value(RawId::Index(7)).unwrap();
        assert_eq!(json, serde_json::json!(7));

        let json = serde_json::to_value(RawId::from("api")).unwrap();
        assert_eq!(json, serde_json::json!("api"));
    }

    #[test]
    fn raw_id_deserializes_both_forms() {
        let id: RawId = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert_eq!(id, RawId::Index(42));

        let id: RawId = serde_json::from_value(serde_json::json!("api")).unwrap();
        assert_eq!(id, RawId::Name("api".to_string()));
    }

    #[test]
    fn side_round_trip() {
        let json = serde_json::to_string(&Side::Local).unwrap();
        assert_eq!(json, "\"local\"");
        let side: Side = serde_json::from_str("\"remote\"").unwrap();
        assert_eq!(side, Side::Remote);
    }

    #[test]
    fn side_flips() {
        assert_eq!(Side::Local.flipped(), Side::Remote);
        assert_eq!(Side::Remote.flipped(), Side::Local);
    }

    #[test]
    fn tagged_id_flips_side_only() {
        let id = TaggedId::local(3);
        let flipped = id.clone().flipped();
        assert_eq!(flipped.side, Side::Remote);
        assert_eq!(flipped.id, id.id);
    }

    #[test]
    fn tagged_id_wire_shape() {
        let json = serde_json::to_value(TaggedId::remote(9)).unwrap();
        assert_eq!(json, serde_json::json!({"side": "remote", "id": 9}));
    }

    #[test]
    fn display_forms() {
        assert_eq!(RawId::Index(5).to_string(), "#5");
        assert_eq!(RawId::from("api").to_string(), "\"api\"");
        assert_eq!(TaggedId::local(5).to_string(), "local:#5");
    }
}
