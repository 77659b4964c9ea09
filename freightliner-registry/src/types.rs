use bytes::Bytes;

pub const OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_V2_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_V2_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    DockerSchema2,
    DockerSchema1,
    OciSchema1,
}

impl ManifestKind {
    pub fn media_type(&self) -> &'static str {
        match self {
            ManifestKind::DockerSchema2 => DOCKER_MANIFEST_V2_SCHEMA2,
            ManifestKind::DockerSchema1 => DOCKER_MANIFEST_V2_SCHEMA1,
            ManifestKind::OciSchema1 => OCI_IMAGE_MANIFEST_V1,
        }
    }
}

/// Detects manifest schema by substring presence in the raw bytes, mirroring what
/// registries actually key their content-type negotiation on: `schemaVersion` plus
/// `mediaType` means Docker Schema 2; `schemaVersion` alone means Docker Schema 1;
/// neither present means OCI Schema 1.
pub fn detect_manifest_kind(data: &[u8]) -> ManifestKind {
    let has_schema_version = contains(data, b"schemaVersion");
    let has_media_type = contains(data, b"mediaType");
    if has_schema_version && has_media_type {
        ManifestKind::DockerSchema2
    } else if has_schema_version {
        ManifestKind::DockerSchema1
    } else {
        ManifestKind::OciSchema1
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub digest: String,
    pub media_type: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ManifestDescriptor {
    pub descriptor: Descriptor,
    pub data: Bytes,
    pub config_digest: Option<String>,
    pub layers: Vec<Descriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_docker_schema2() {
        let data = br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json"}"#;
        assert_eq!(detect_manifest_kind(data), ManifestKind::DockerSchema2);
    }

    #[test]
    fn detects_docker_schema1() {
        let data = br#"{"schemaVersion":1,"name":"library/alpine"}"#;
        assert_eq!(detect_manifest_kind(data), ManifestKind::DockerSchema1);
    }

    #[test]
    fn detects_oci_schema1() {
        let data = br#"{"config":{},"layers":[]}"#;
        assert_eq!(detect_manifest_kind(data), ManifestKind::OciSchema1);
    }
}
