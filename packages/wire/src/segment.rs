//! Deferred access-path segments.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::description::ValueDescription;

/// One step of a deferred access path, applied left to right against the
/// path's root value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Segment {
    /// Property lookup.
    Get { key: ValueDescription },
    /// Property assignment. Only valid as the terminal segment.
    Set {
        key: ValueDescription,
        value: ValueDescription,
    },
    /// Function invocation; the receiver is the preceding `get` parent.
    Call { args: Vec<ValueDescription> },
    /// Constructor invocation.
    New { args: Vec<ValueDescription> },
}

impl Segment {
    pub fn is_set(&self) -> bool {
        matches!(self, Segment::Set { .. })
    }
}

/// Structural violation of the path well-formedness rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathShapeError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for PathShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed path at segment {}: {}", self.position, self.message)
    }
}

impl std::error::Error for PathShapeError {}

/// Check the well-formedness rules: `set` appears only as the terminal
/// segment.
pub fn validate_path(path: &[Segment]) -> Result<(), PathShapeError> {
    for (position, segment) in path.iter().enumerate() {
        if segment.is_set() && position + 1 != path.len() {
            return Err(PathShapeError {
                position,
                message: "'set' must be the terminal segment".to_string(),
            });
        }
    }
    Ok(())
}
