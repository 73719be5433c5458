use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A globally unique identifier.
/// The type parameter T is used to check that the id is only used for the type it was created for.
/// This is a compile-time check only, and only serves to help the programmer.
///
/// On the wire an `Id` is a plain string, so ids generated by the backend
/// (or by an older frontend) are accepted as-is.
#[derive(Debug)]
pub struct Id<T> {
    id: String,
    // nothing, just to accept the compile-type only T
    phantom: std::marker::PhantomData<T>,
}
impl<T> Id<T> {
    /// Generate a fresh random (v4 UUID) id.
    pub fn generate() -> Self {
        Self::from_string(uuid::Uuid::new_v4().to_string())
    }
    pub fn from_string(id: String) -> Self {
        Id {
            id,
            phantom: std::marker::PhantomData,
        }
    }
    pub fn as_str(&self) -> &str {
        &self.id
    }
    /// Erase the type (compile-time only)
    pub fn any(&self) -> Id<AnyType> {
        Id::from_string(self.id.clone())
    }
}
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Id::from_string(self.id.clone())
    }
}
impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for Id<T> {}
impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}
impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}
impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Id::from_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyType;

/// Identifies one UI session. Used as the echo-suppression tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionType;

/// Correlates a `method_call` with its `method_return`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallType;

pub type SessionId = Id<SessionType>;
pub type CallbackId = Id<CallType>;
