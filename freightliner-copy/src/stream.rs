use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

/// Below this size, gzip's framing overhead isn't worth paying.
const COMPRESSION_THRESHOLD: u64 = 1024;

pub fn should_compress(size: u64) -> bool {
    size > COMPRESSION_THRESHOLD
}

/// Wraps the source bytes in gzip framing. Content addressing always runs over the
/// uncompressed payload — the caller keeps the pre-compression digest and never hashes
/// this output.
pub fn compress(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// A reader-wrapping stage applied to the (possibly compressed) layer bytes before
/// push. Its absence is modeled as `Identity`, never a branch in the engine.
pub trait EncryptionAdapter: Send + Sync {
    fn wrap(&self, data: Bytes) -> Bytes;
}

pub struct Identity;

impl EncryptionAdapter for Identity {
    fn wrap(&self, data: Bytes) -> Bytes {
        data
    }
}

/// Fixed-size byte slabs handed out to layer readers and returned on close. Reuses
/// slabs across layers in one copy run instead of allocating a fresh buffer per layer.
pub struct BufferManager {
    slab_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferManager {
    pub fn new(slab_size: usize) -> Arc<Self> {
        Arc::new(Self { slab_size, free: Mutex::new(Vec::new()) })
    }

    pub fn acquire(&self) -> Vec<u8> {
        self.free.lock().pop().unwrap_or_else(|| vec![0u8; self.slab_size])
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        buf.resize(self.slab_size, 0);
        self.free.lock().push(buf);
    }
}

/// A closable reader over one layer's bytes. Holds a slab checked out from a
/// `BufferManager` for the duration of the read; `close` returns it and is idempotent.
pub struct LayerReader {
    cursor: Cursor<Bytes>,
    buffer: Option<Vec<u8>>,
    manager: Arc<BufferManager>,
}

impl LayerReader {
    pub fn new(manager: Arc<BufferManager>, data: Bytes) -> Self {
        let buffer = manager.acquire();
        Self { cursor: Cursor::new(data), buffer: Some(buffer), manager }
    }

    pub fn close(&mut self) {
        if let Some(buf) = self.buffer.take() {
            self.manager.release(buf);
        }
    }
}

impl Read for LayerReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Drop for LayerReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn compress_then_decompress_roundtrips() {
        let data = b"hello world, this is a layer payload that should compress fine";
        let compressed = compress(data).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn should_compress_threshold() {
        assert!(!should_compress(1024));
        assert!(should_compress(1025));
    }

    #[test]
    fn buffer_manager_reuses_released_slabs() {
        let mgr = BufferManager::new(16);
        let buf = mgr.acquire();
        assert_eq!(buf.len(), 16);
        mgr.release(buf);
        assert_eq!(mgr.free.lock().len(), 1);
        let _ = mgr.acquire();
        assert_eq!(mgr.free.lock().len(), 0);
    }

    #[test]
    fn layer_reader_double_close_is_noop() {
        let mgr = BufferManager::new(8);
        let mut reader = LayerReader::new(mgr.clone(), Bytes::from_static(b"abc"));
        reader.close();
        reader.close();
        assert_eq!(mgr.free.lock().len(), 1);
    }

    #[test]
    fn identity_adapter_passes_through() {
        let id = Identity;
        let data = Bytes::from_static(b"payload");
        assert_eq!(id.wrap(data.clone()), data);
    }
}
