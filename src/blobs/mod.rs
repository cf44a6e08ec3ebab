//! File content storage.
//!
//! Blobs live inside revision folders, named by the path's name hash, and
//! are written plain or gzip-compressed depending on the repository.

mod storage;

pub use storage::{BlobStorage, HashedFile};
