//! chathub-core: Local-first conversation state engine
//!
//! This crate owns conversations and projects, reconciles streamed model
//! replies into them, merges snapshots pushed by sync peers and persists the
//! whole state as a versioned snapshot.

pub mod backend;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod events;
pub mod merge;
pub mod model;
pub mod persist;
pub mod reconciler;
mod settings;
pub mod state;
pub mod store;
pub mod sync;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use backend::{Backend, ChatRequest, ChatResponse, ChunkSender, ModelInfo, StreamChunk};
pub use coordinator::{SendCoordinator, SendOutcome};
pub use error::{Error, Result};
pub use events::StoreEvent;
pub use merge::{MergeReport, merge_snapshot};
pub use model::{
    AppSettings, Attachment, Connection, Conversation, DEFAULT_TITLE, Message, MessageRole,
    MessageStatus, ModelParameters, Project, SyncConfig, View,
};
pub use persist::{Hydration, PersistenceManager, SnapshotFile};
pub use reconciler::{Completion, StreamReconciler};
pub use settings::ConnectionPatch;
pub use state::AppState;
pub use store::{ProjectPatch, Store};
pub use sync::{SyncPush, SyncSession, SyncTransport};
pub use transfer::{ExportBundle, ImportReport};
