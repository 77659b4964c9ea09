use bytes::Bytes;

/// Fixed per-entry bookkeeping overhead folded into every logical size calculation, so an
/// empty tag list or a zero-length manifest still costs *something* against the memory
/// ceiling.
const ENTRY_OVERHEAD_BYTES: u64 = 64;

pub trait LogicalSize {
    /// Approximate memory footprint: payload + key + a small fixed overhead. This is a
    /// gauge the cache maintains itself, not anything read from the allocator.
    fn logical_size(&self, key_len: usize) -> u64;
}

#[derive(Debug, Clone)]
pub struct CachedManifest {
    pub data: Bytes,
    pub media_type: String,
    pub digest: String,
}

impl LogicalSize for CachedManifest {
    fn logical_size(&self, key_len: usize) -> u64 {
        key_len as u64 + self.data.len() as u64 + self.media_type.len() as u64 + self.digest.len() as u64 + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug, Clone)]
pub struct CachedBlob {
    pub exists: bool,
    pub size: u64,
    pub media_type: Option<String>,
    pub repo: String,
    pub registry_url: String,
    pub download_url: Option<String>,
}

impl LogicalSize for CachedBlob {
    fn logical_size(&self, key_len: usize) -> u64 {
        key_len as u64
            + self.media_type.as_ref().map(String::len).unwrap_or(0) as u64
            + self.repo.len() as u64
            + self.registry_url.len() as u64
            + self.download_url.as_ref().map(String::len).unwrap_or(0) as u64
            + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug, Clone)]
pub struct CachedTagList {
    pub tags: Vec<String>,
}

impl LogicalSize for CachedTagList {
    fn logical_size(&self, key_len: usize) -> u64 {
        let tags_len: u64 = self.tags.iter().map(|t| t.len() as u64).sum();
        key_len as u64 + tags_len + ENTRY_OVERHEAD_BYTES
    }
}
