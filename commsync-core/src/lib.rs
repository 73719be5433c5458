//! The wire protocol shared by a commsync UI session and its backend.

pub mod ids;
pub mod patch;
pub mod wire;

pub use ids::{CallbackId, Id, SessionId};
pub use patch::{apply_patches, Patch, PatchError, PatchOp, Path, PathSegment};
pub use wire::{DecodeError, Envelope, Message, Metadata};
