//! Keeps a UI-side mirror of a backend's state in sync over a duplex channel.
//!
//! Local changes are made by [`Action`]s running one at a time against a
//! [`Draft`]; the resulting patches are committed to the [`Store`] and sent
//! to the backend. The backend sends snapshots, patches, reducer actions,
//! method calls and the application code itself. See [`Session`].

pub mod action;
pub mod draft;
pub mod error;
pub mod loader;
pub mod notice;
pub mod queue;
pub mod rpc;
pub mod session;
pub mod sourcemap;
pub mod store;
pub mod translate;
pub mod transport;

pub use action::{local_only, produce, produce_method, remote_method, Action, Method};
pub use draft::{diff, Draft, DraftError, Finished};
pub use error::{ApplicationError, LoadError, ProtocolError, RpcError, TransportError};
pub use loader::{AppBuilder, Application, CodeProvider, Registry};
pub use notice::{Notice, NoticeLevel};
pub use queue::{Completion, Outcome};
pub use rpc::{Reply, RpcClient};
pub use session::{Session, SessionOptions};
pub use store::{Reducer, Store, SubscriptionId, SET_STATE};
pub use transport::{memory_channel, Backend, MemoryTransport, ProcessTransport, Transport};

pub use commsync_core::{path, Envelope, Message, Metadata, Patch, PatchOp, SessionId};
