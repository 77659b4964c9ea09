use std::fmt;

/// The terminal classification callers are expected to inspect. Kept distinct from the
/// wrapped message: `CopyResult.error`'s `Display` carries the deepest-wrapped
/// operation-specific message, but `kind()` is what a caller branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    Corruption,
    TransientNetwork,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Corruption => "corruption",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Each variant names the step that failed, wrapping the underlying error as its
/// source. Propagation up the call graph adds one short, operation-specific message
/// per layer; this is the outermost one a `CopyResult` ever carries.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("failed to get source image descriptor: {0}")]
    SourceDescriptor(#[source] freightliner_registry::Error),

    #[error("destination already exists")]
    AlreadyExists,

    #[error("failed to check destination image descriptor: {0}")]
    DestDescriptor(#[source] freightliner_registry::Error),

    #[error("failed to transfer layer {digest}: {source}")]
    LayerTransfer {
        digest: String,
        #[source]
        source: freightliner_registry::Error,
    },

    #[error("failed to stage blob in local store: {0}")]
    CasStore(#[source] freightliner_cas::Error),

    #[error("failed to push manifest: {0}")]
    PushManifest(#[source] freightliner_registry::Error),

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CopyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CopyError::SourceDescriptor(e) => registry_kind(e, ErrorKind::NotFound),
            CopyError::AlreadyExists => ErrorKind::AlreadyExists,
            CopyError::DestDescriptor(e) => registry_kind(e, ErrorKind::Internal),
            CopyError::LayerTransfer { source, .. } => registry_kind(source, ErrorKind::TransientNetwork),
            CopyError::CasStore(_) => ErrorKind::Internal,
            CopyError::PushManifest(e) => registry_kind(e, ErrorKind::TransientNetwork),
            CopyError::Cancelled { .. } => ErrorKind::Cancelled,
            CopyError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }
}

fn registry_kind(e: &freightliner_registry::Error, default: ErrorKind) -> ErrorKind {
    match e.kind() {
        freightliner_registry::ErrorKind::NotFound => ErrorKind::NotFound,
        freightliner_registry::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        freightliner_registry::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
        freightliner_registry::ErrorKind::Corruption => ErrorKind::Corruption,
        freightliner_registry::ErrorKind::TransientNetwork => ErrorKind::TransientNetwork,
        freightliner_registry::ErrorKind::Cancelled => ErrorKind::Cancelled,
        freightliner_registry::ErrorKind::Internal => default,
    }
}

pub type Result<T> = std::result::Result<T, CopyError>;
