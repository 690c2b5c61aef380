//! Sender-side chunk sources and receiver-side write sinks.
//!
//! Generalizes the whole-file-at-once chunking/writing pattern into a
//! range-addressed read and a seekable-or-in-memory write, so the engines
//! never have to materialize a whole file to send or receive it.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::codec::CHUNK_SIZE;
use crate::error::Result;

/// A source of file bytes addressable by byte range, used by the sender engine.
#[async_trait::async_trait]
pub trait ChunkSource: Send + Sync {
    /// Read up to `len` bytes starting at `offset`. May return fewer bytes
    /// only at end of file.
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Total size of the underlying file, in bytes.
    fn size(&self) -> u64;
}

/// A [`ChunkSource`] backed by an on-disk file, opened once and seeked per read.
pub struct FileChunkSource {
    file: tokio::sync::Mutex<tokio::fs::File>,
    size: u64,
}

impl FileChunkSource {
    /// Open `path` as a chunk source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let file = tokio::fs::File::open(path.into()).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
            size,
        })
    }
}

#[async_trait::async_trait]
impl ChunkSource for FileChunkSource {
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut total_read = 0;
        while total_read < len {
            let n = file.read(&mut buf[total_read..]).await?;
            if n == 0 {
                break;
            }
            total_read += n;
        }
        buf.truncate(total_read);
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Compute `total_chunks = ceil(size / CHUNK_SIZE)`, with a zero-byte file
/// producing zero chunks.
#[must_use]
pub fn total_chunks_for(size: u64) -> u32 {
    if size == 0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let chunks = size.div_ceil(CHUNK_SIZE as u64);
    u32::try_from(chunks).unwrap_or(u32::MAX)
}

/// The byte range `[start, end)` a given chunk index covers within the file.
#[must_use]
pub fn chunk_byte_range(index: u32, total_size: u64) -> (u64, usize) {
    let offset = u64::from(index) * CHUNK_SIZE as u64;
    #[allow(clippy::cast_possible_truncation)]
    let len = (total_size.saturating_sub(offset)).min(CHUNK_SIZE as u64) as usize;
    (offset, len)
}

/// A receiver-side destination for chunk data, addressable out of order.
#[async_trait::async_trait]
pub trait WriteSink: Send + Sync {
    /// Write `data` at chunk `index`'s byte offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::SinkWriteFailed`] on I/O failure.
    async fn write_chunk(&self, index: u32, data: &[u8]) -> Result<()>;

    /// Finish writing; flush and sync if backed by a file.
    async fn finalize(&self) -> Result<()>;
}

/// A seekable, on-disk [`WriteSink`] — the default when the destination
/// supports random-access writes.
pub struct FileWriteSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileWriteSink {
    /// Create (or truncate) `path`, pre-allocating it to `expected_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or sized.
    pub async fn create(path: impl Into<PathBuf>, expected_size: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        if expected_size > 0 {
            file.set_len(expected_size).await?;
        }
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait::async_trait]
impl WriteSink for FileWriteSink {
    async fn write_chunk(&self, index: u32, data: &[u8]) -> Result<()> {
        let offset = u64::from(index) * CHUNK_SIZE as u64;
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// An in-memory [`WriteSink`] fallback for destinations without random-access
/// file support; chunks are buffered by index and assembled on finalize.
#[derive(Default)]
pub struct InMemorySink {
    chunks: tokio::sync::Mutex<HashMap<u32, Vec<u8>>>,
}

impl InMemorySink {
    /// Create an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble every received chunk into one buffer, in ascending index
    /// order. Callers are responsible for confirming completeness first via
    /// [`crate::ranges::ReceivedRanges::is_complete`].
    pub async fn assemble(&self) -> Vec<u8> {
        let chunks = self.chunks.lock().await;
        let mut indices: Vec<&u32> = chunks.keys().collect();
        indices.sort_unstable();
        let mut out = Vec::new();
        for idx in indices {
            out.extend_from_slice(&chunks[idx]);
        }
        out
    }
}

#[async_trait::async_trait]
impl WriteSink for InMemorySink {
    async fn write_chunk(&self, index: u32, data: &[u8]) -> Result<()> {
        self.chunks.lock().await.insert(index, data.to_vec());
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(total_chunks_for(0), 0);
        assert_eq!(total_chunks_for(1), 1);
        assert_eq!(total_chunks_for(CHUNK_SIZE as u64), 1);
        assert_eq!(total_chunks_for(CHUNK_SIZE as u64 + 1), 2);
    }

    #[test]
    fn chunk_byte_range_covers_final_partial_chunk() {
        let size = CHUNK_SIZE as u64 + 10;
        assert_eq!(chunk_byte_range(0, size), (0, CHUNK_SIZE));
        assert_eq!(chunk_byte_range(1, size), (CHUNK_SIZE as u64, 10));
    }

    #[tokio::test]
    async fn file_chunk_source_reads_ranges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        tokio::fs::write(&path, b"abcdefghij").await.unwrap();
        let source = FileChunkSource::open(&path).await.unwrap();
        assert_eq!(source.size(), 10);
        assert_eq!(source.read_range(2, 4).await.unwrap(), b"cdef");
        assert_eq!(source.read_range(8, 10).await.unwrap(), b"ij");
    }

    #[tokio::test]
    async fn file_write_sink_accepts_out_of_order_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let sink = FileWriteSink::create(&path, (CHUNK_SIZE * 2) as u64)
            .await
            .unwrap();
        sink.write_chunk(1, &vec![2u8; CHUNK_SIZE]).await.unwrap();
        sink.write_chunk(0, &vec![1u8; CHUNK_SIZE]).await.unwrap();
        sink.finalize().await.unwrap();

        let content = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&content[..CHUNK_SIZE], &vec![1u8; CHUNK_SIZE][..]);
        assert_eq!(&content[CHUNK_SIZE..], &vec![2u8; CHUNK_SIZE][..]);
    }

    #[tokio::test]
    async fn in_memory_sink_assembles_in_order() {
        let sink = InMemorySink::new();
        sink.write_chunk(1, b"world").await.unwrap();
        sink.write_chunk(0, b"hello ").await.unwrap();
        assert_eq!(sink.assemble().await, b"hello world");
    }
}
