//! Structural patches: the unit of state synchronization.
//!
//! A [`Patch`] addresses a node in a JSON state tree by a list of object keys
//! and array indices. A batch of patches applies in order, so a later patch
//! may rely on the effect of an earlier one.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One step of a patch path.
///
/// Array indices travel as JSON numbers and object keys as strings, which is
/// what the backend produces and expects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}
impl PathSegment {
    /// The RFC 6901 reference token, escaped.
    fn pointer_token(&self) -> String {
        match self {
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(k) => k.replace('~', "~0").replace('/', "~1"),
        }
    }
}
impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}
impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}
impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}
impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => write!(f, "{:?}", k),
        }
    }
}

pub type Path = Vec<PathSegment>;

/// Build a [`Path`] from keys and indices: `path!["users", 7, "name"]`.
#[macro_export]
macro_rules! path {
    ($($segment:expr),* $(,)?) => {
        vec![$($crate::patch::PathSegment::from($segment)),*]
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(alias = "operation")]
    pub op: PatchOp,
    pub path: Path,
    /// Absent for `remove`. A present `null` is kept as `Some(Value::Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub value: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Patch {
    pub fn add(path: Path, value: Value) -> Self {
        Patch {
            op: PatchOp::Add,
            path,
            value: Some(value),
        }
    }
    pub fn replace(path: Path, value: Value) -> Self {
        Patch {
            op: PatchOp::Replace,
            path,
            value: Some(value),
        }
    }
    pub fn remove(path: Path) -> Self {
        Patch {
            op: PatchOp::Remove,
            path,
            value: None,
        }
    }

    /// The JSON pointer (RFC 6901) addressing the same node.
    pub fn pointer(&self) -> String {
        to_pointer(&self.path)
    }

    /// Convert to an RFC 6902 operation, as understood by `json_patch`.
    pub fn to_json_patch_operation(&self) -> Result<json_patch::PatchOperation, PatchError> {
        let pointer = self.pointer();
        let invalid = || PatchError::InvalidPath {
            path: pointer.clone(),
        };
        Ok(match self.op {
            PatchOp::Add => json_patch::PatchOperation::Add(json_patch::AddOperation {
                path: pointer.parse().map_err(|_| invalid())?,
                value: self.value.clone().ok_or_else(|| PatchError::MissingValue {
                    path: pointer.clone(),
                })?,
            }),
            PatchOp::Replace => json_patch::PatchOperation::Replace(json_patch::ReplaceOperation {
                path: pointer.parse().map_err(|_| invalid())?,
                value: self.value.clone().ok_or_else(|| PatchError::MissingValue {
                    path: pointer.clone(),
                })?,
            }),
            PatchOp::Remove => json_patch::PatchOperation::Remove(json_patch::RemoveOperation {
                path: pointer.parse().map_err(|_| invalid())?,
            }),
        })
    }
}

pub fn to_pointer(path: &[PathSegment]) -> String {
    let mut pointer = String::new();
    for segment in path {
        pointer.push('/');
        pointer.push_str(&segment.pointer_token());
    }
    pointer
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("invalid patch path {path:?}")]
    InvalidPath { path: String },
    #[error("patch at {path:?} needs a value")]
    MissingValue { path: String },
    #[error(transparent)]
    Rejected(#[from] json_patch::PatchError),
}

/// Convert a batch to an RFC 6902 patch document.
pub fn to_json_patch(patches: &[Patch]) -> Result<json_patch::Patch, PatchError> {
    patches
        .iter()
        .map(Patch::to_json_patch_operation)
        .collect::<Result<Vec<_>, _>>()
        .map(json_patch::Patch)
}

/// Apply a batch to `state`, producing the new snapshot.
///
/// The batch is all-or-nothing: when any patch fails, `state` is not
/// modified and the error names the offending operation.
pub fn apply_patches(state: &Value, patches: &[Patch]) -> Result<Value, PatchError> {
    let operations = to_json_patch(patches)?;
    let mut next = state.clone();
    json_patch::patch(&mut next, operations.0.as_slice())?;
    Ok(next)
}
