use crate::error::{Error, Result};

/// Identifies a manifest: either `repo:tag` or `repo@digest`, resolved against a
/// registry host. The host is carried separately rather than folded into `repository`
/// because callers (the copy engine, blob URL construction) need it on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    tag_or_digest: TagOrDigest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TagOrDigest {
    Tag(String),
    Digest(String),
}

impl Reference {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag_or_digest: TagOrDigest::Tag(tag.into()),
        }
    }

    pub fn with_digest(registry: impl Into<String>, repository: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag_or_digest: TagOrDigest::Digest(digest.into()),
        }
    }

    /// Parses `registry/repo:tag` or `registry/repo@digest`. The first path segment
    /// is taken as the registry host; everything up to the last `:`/`@` is the
    /// repository.
    pub fn parse(registry: &str, reference: &str) -> Result<Self> {
        if let Some((repo, digest)) = reference.rsplit_once('@') {
            if repo.is_empty() || digest.is_empty() {
                return Err(Error::InvalidInput(format!("malformed reference: {reference}")));
            }
            return Ok(Self::with_digest(registry, repo, digest));
        }
        if let Some((repo, tag)) = reference.rsplit_once(':') {
            if repo.is_empty() || tag.is_empty() {
                return Err(Error::InvalidInput(format!("malformed reference: {reference}")));
            }
            return Ok(Self::new(registry, repo, tag));
        }
        Ok(Self::new(registry, reference, "latest"))
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.tag_or_digest {
            TagOrDigest::Tag(t) => Some(t),
            TagOrDigest::Digest(_) => None,
        }
    }

    pub fn digest(&self) -> Option<&str> {
        match &self.tag_or_digest {
            TagOrDigest::Tag(_) => None,
            TagOrDigest::Digest(d) => Some(d),
        }
    }

    /// The path segment used in the `/v2/{repo}/manifests/{..}` URL.
    pub fn manifest_path_segment(&self) -> &str {
        match &self.tag_or_digest {
            TagOrDigest::Tag(t) => t,
            TagOrDigest::Digest(d) => d,
        }
    }

    /// `{registryHost}/{repository}/blobs/{digest}`, the external blob URL format used
    /// when the copy engine delegates a layer transfer to an external function.
    pub fn blob_url(&self, digest: &str) -> String {
        format!("{}/{}/blobs/{}", self.registry, self.repository, digest)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag_or_digest {
            TagOrDigest::Tag(t) => write!(f, "{}/{}:{}", self.registry, self.repository, t),
            TagOrDigest::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_reference() {
        let r = Reference::parse("registry.example.com", "library/alpine:3.19").unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tag(), Some("3.19"));
        assert_eq!(r.digest(), None);
    }

    #[test]
    fn parses_digest_reference() {
        let r = Reference::parse("registry.example.com", "library/alpine@sha256:deadbeef").unwrap();
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.digest(), Some("sha256:deadbeef"));
    }

    #[test]
    fn defaults_to_latest_tag() {
        let r = Reference::parse("registry.example.com", "library/alpine").unwrap();
        assert_eq!(r.tag(), Some("latest"));
    }

    #[test]
    fn blob_url_matches_external_format() {
        let r = Reference::new("registry.example.com", "library/alpine", "latest");
        assert_eq!(r.blob_url("sha256:abc"), "registry.example.com/library/alpine/blobs/sha256:abc");
    }
}
