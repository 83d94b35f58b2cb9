//! Sync core for notes attached to web pages.
//!
//! - [`note`]: the note entity and soft-delete retention
//! - [`crypto`]: AES-GCM codec with a lazily created per-user key
//! - [`key_storage`]: where that key is kept
//! - [`remote`]: whole-collection upload/download against the blob endpoint
//! - [`store`]: read-modify-write CRUD and the published update stream
//! - [`bridge`]: relay between UI surfaces and the background context

pub mod bridge;
pub mod config;
pub mod crypto;
pub mod key_storage;
pub mod logging;
pub mod note;
pub mod remote;
pub mod store;

pub use bridge::{
    BridgeBackend, BridgeError, BridgeHost, BridgeMessage, ChannelTransport, Listener, Transport,
};
pub use crypto::{Codec, CryptoError, EncryptedPayload, EncryptionKey};
pub use key_storage::{KeyStorage, MemoryKeyStorage, SqliteKeyStorage};
pub use note::{Note, NoteLike, ValidationError};
pub use remote::{RemoteError, RemoteStore};
pub use store::{BackendError, MemoryBackend, NoteBackend, NoteStore, NoteUpdates, StoreError};
