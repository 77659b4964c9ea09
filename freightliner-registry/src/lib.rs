//! An OCI distribution protocol client: the capability set `{getDescriptor, headBlob,
//! pullBlob, pushBlob, pushManifest}` the copy engine consumes, plus the bearer-token
//! and rate-limit plumbing a real registry session needs.

mod auth;
mod client;
mod error;
mod reference;
mod types;

pub use auth::{Auth, AuthManager, AuthMap, BearerChallenge};
pub use client::{HttpRegistryClient, RegistryClient};
pub use error::{Error, ErrorKind, Result};
pub use reference::Reference;
pub use types::{detect_manifest_kind, Descriptor, ManifestDescriptor, ManifestKind};
