use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::blob::Blob;

/// Digest-keyed storage plus two secondary indexes (by tag, by size). Every digest that
/// appears in a secondary index also appears in the primary map; removal updates all
/// three together so a stale secondary-index entry can never outlive its blob.
#[derive(Default)]
pub struct BlobIndex {
    digest_index: HashMap<String, Arc<Blob>>,
    tag_index: HashMap<String, HashSet<String>>,
    size_index: BTreeMap<u64, HashSet<String>>,
}

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, digest: &str) -> Option<Arc<Blob>> {
        self.digest_index.get(digest).cloned()
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.digest_index.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.digest_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digest_index.is_empty()
    }

    pub fn insert(&mut self, blob: Arc<Blob>) {
        let digest = blob.digest.clone();
        let size = blob.size;
        self.size_index.entry(size).or_default().insert(digest.clone());
        self.digest_index.insert(digest, blob);
    }

    /// Removes `digest` from the primary map and both secondary indexes.
    pub fn remove(&mut self, digest: &str) -> Option<Arc<Blob>> {
        let blob = self.digest_index.remove(digest)?;
        if let Some(set) = self.size_index.get_mut(&blob.size) {
            set.remove(digest);
            if set.is_empty() {
                self.size_index.remove(&blob.size);
            }
        }
        for tag in blob.tags() {
            if let Some(set) = self.tag_index.get_mut(&tag) {
                set.remove(digest);
                if set.is_empty() {
                    self.tag_index.remove(&tag);
                }
            }
        }
        Some(blob)
    }

    pub fn tag(&mut self, digest: &str, tag: &str) -> bool {
        if let Some(blob) = self.digest_index.get(digest) {
            blob.add_tag(tag);
            self.tag_index.entry(tag.to_string()).or_default().insert(digest.to_string());
            true
        } else {
            false
        }
    }

    /// Looks up blobs by tag. A digest present in the tag index but no longer in the
    /// primary map (should not happen, but lookups are lazy) is silently skipped.
    pub fn by_tag(&self, tag: &str) -> Vec<Arc<Blob>> {
        self.tag_index
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|d| self.digest_index.get(d).cloned())
            .collect()
    }

    pub fn by_size(&self, size: u64) -> Vec<Arc<Blob>> {
        self.size_index
            .get(&size)
            .into_iter()
            .flatten()
            .filter_map(|d| self.digest_index.get(d).cloned())
            .collect()
    }

    pub fn digests(&self) -> Vec<String> {
        self.digest_index.keys().cloned().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<Blob>> {
        self.digest_index.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn blob(digest: &str, data: &[u8]) -> Arc<Blob> {
        Arc::new(Blob::new(digest.to_string(), Bytes::copy_from_slice(data)))
    }

    #[test]
    fn insert_and_get() {
        let mut idx = BlobIndex::new();
        idx.insert(blob("sha256:a", b"hello"));
        assert!(idx.contains("sha256:a"));
        assert_eq!(idx.get("sha256:a").unwrap().size, 5);
    }

    #[test]
    fn remove_clears_all_indexes() {
        let mut idx = BlobIndex::new();
        idx.insert(blob("sha256:a", b"hello"));
        idx.tag("sha256:a", "latest");
        assert_eq!(idx.by_tag("latest").len(), 1);
        assert_eq!(idx.by_size(5).len(), 1);
        idx.remove("sha256:a");
        assert!(idx.by_tag("latest").is_empty());
        assert!(idx.by_size(5).is_empty());
        assert!(!idx.contains("sha256:a"));
    }

    #[test]
    fn by_size_groups_same_size_blobs() {
        let mut idx = BlobIndex::new();
        idx.insert(blob("sha256:a", b"hello"));
        idx.insert(blob("sha256:b", b"world"));
        assert_eq!(idx.by_size(5).len(), 2);
    }
}
