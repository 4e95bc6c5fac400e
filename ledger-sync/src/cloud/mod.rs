//! Remote object stores.
//!
//! Every provider implements the single [`RemoteStore`] trait: snapshot
//! objects (`list/upload/download/delete`) plus per-owner documents
//! (`put_document/get_document`). [`RemoteBackend`] plugs a remote into the
//! replicated document store.

pub mod backend;
pub mod folder;
pub mod http;
pub mod memory;
pub mod remote;

pub use backend::RemoteBackend;
pub use folder::FolderRemote;
pub use http::{HttpRemote, HttpRemoteConfig};
pub use memory::MemoryRemote;
pub use remote::{validate_object_name, RemoteStore};
