//! Content-addressable blob store: a deduplicating, reference-counted memory tier over
//! a pluggable durable backend, with background garbage collection.

mod backend;
mod blob;
mod error;
mod index;
mod metrics;
mod store;

pub use backend::{FsBackend, NullBackend, StorageBackend};
pub use blob::Blob;
pub use error::{Error, ErrorKind, Result};
pub use index::BlobIndex;
pub use metrics::CasMetrics;
pub use store::{BlobReader, Cas, CasConfig};
