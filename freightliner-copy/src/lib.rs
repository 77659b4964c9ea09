//! The image replication pipeline: fetch a manifest, decide what's missing on the
//! destination, stream layers across with optional compression/encryption, and push
//! the manifest. Built on a `freightliner_registry::RegistryClient` and, optionally, a
//! local `freightliner_cas::Cas` used as a transfer-time staging area.

mod engine;
mod error;
mod options;
mod progress;
mod stream;
mod workerpool;

pub use engine::CopyEngine;
pub use error::{CopyError, ErrorKind, Result};
pub use options::{CopyOptions, CopyResult, CopyStats, LayerProcessor, ManifestProcessor, TransferOptimizer, TransferStrategy};
pub use progress::{CopyProgress, MetricsSink, NullReporter, ProgressReporter, Stage};
pub use stream::{compress, should_compress, BufferManager, EncryptionAdapter, Identity, LayerReader};
pub use workerpool::WorkerPool;
