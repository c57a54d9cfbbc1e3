use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chunkyard_store::{HashAlgorithm, hash_bytes};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// One indexed piece of a local file, ready to upload.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Ordinal position, starting at 0.
    pub index: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// Hex digest of `data`.
    pub hash: String,
}

/// How a file is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLayout {
    /// Chunks of this many bytes, the last one possibly shorter.
    FixedSize(usize),
    /// This many chunks of near-equal size (fewer if the file is tiny).
    Parts(usize),
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self::FixedSize(DEFAULT_CHUNK_SIZE)
    }
}

impl ChunkLayout {
    /// Chunk size in bytes for a file of `file_size` bytes.
    pub fn chunk_size(self, file_size: u64) -> Result<u64, TransferError> {
        match self {
            Self::FixedSize(0) => Err(TransferError::InvalidLayout("chunk size is zero".into())),
            Self::Parts(0) => Err(TransferError::InvalidLayout("part count is zero".into())),
            Self::FixedSize(size) => Ok(size as u64),
            Self::Parts(parts) => Ok(file_size.div_ceil(parts as u64).max(1)),
        }
    }
}

/// Number of chunks a file of `file_size` bytes splits into.
///
/// An empty file is still one (empty) chunk, so it can be merged.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    let count = file_size.div_ceil(chunk_size.max(1)).max(1);
    u32::try_from(count).map_err(|_| TransferError::TooManyChunks(count))
}

/// Reads indexed, hashed chunks of a file.
///
/// Chunks are read by index, so a resumed upload only touches the ones the
/// store is missing.
pub struct ChunkReader {
    file: std::fs::File,
    algorithm: HashAlgorithm,
    chunk_size: u64,
    file_size: u64,
    chunk_count: u32,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub fn new(
        path: &Path,
        layout: ChunkLayout,
        algorithm: HashAlgorithm,
    ) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = layout.chunk_size(file_size)?;
        let chunk_count = chunk_count(file_size, chunk_size)?;
        Ok(Self {
            file,
            algorithm,
            chunk_size,
            file_size,
            chunk_count,
        })
    }

    /// Reads the chunk at `index`.
    pub fn read_chunk(&mut self, index: u32) -> Result<Chunk, TransferError> {
        if index >= self.chunk_count {
            return Err(TransferError::ChunkOutOfRange {
                index,
                count: self.chunk_count,
            });
        }

        let offset = u64::from(index) * self.chunk_size;
        let len = self.chunk_size.min(self.file_size - offset);
        let mut data = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data)?;

        let hash = hash_bytes(self.algorithm, &data);
        Ok(Chunk {
            index,
            offset,
            data,
            hash,
        })
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn read_all(reader: &mut ChunkReader) -> Vec<Chunk> {
        (0..reader.chunk_count())
            .map(|i| reader.read_chunk(i).unwrap())
            .collect()
    }

    #[test]
    fn fixed_size_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader =
            ChunkReader::new(&path, ChunkLayout::FixedSize(4), HashAlgorithm::Md5).unwrap();
        assert_eq!(reader.file_size(), 10);
        assert_eq!(reader.chunk_count(), 3);

        let chunks = read_all(&mut reader);
        assert_eq!((chunks[0].index, chunks[0].offset), (0, 0));
        assert_eq!(&chunks[0].data, b"AABB");
        assert_eq!(chunks[0].hash, hash_bytes(HashAlgorithm::Md5, b"AABB"));

        assert_eq!((chunks[1].index, chunks[1].offset), (1, 4));
        assert_eq!(&chunks[1].data, b"CCDD");

        assert_eq!((chunks[2].index, chunks[2].offset), (2, 8));
        assert_eq!(&chunks[2].data, b"EE");
    }

    #[test]
    fn parts_layout_splits_evenly() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", &[1u8; 100]);

        let mut reader =
            ChunkReader::new(&path, ChunkLayout::Parts(4), HashAlgorithm::Md5).unwrap();
        assert_eq!(reader.chunk_size(), 25);
        assert_eq!(reader.chunk_count(), 4);

        let sizes: Vec<usize> = read_all(&mut reader).iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, vec![25, 25, 25, 25]);
    }

    #[test]
    fn parts_layout_on_tiny_file_yields_fewer_chunks() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "tiny.bin", b"ab");
        let reader =
            ChunkReader::new(&path, ChunkLayout::Parts(8), HashAlgorithm::Md5).unwrap();
        assert_eq!(reader.chunk_count(), 2);
    }

    #[test]
    fn empty_file_is_one_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let mut reader =
            ChunkReader::new(&path, ChunkLayout::default(), HashAlgorithm::Md5).unwrap();
        assert_eq!(reader.chunk_count(), 1);
        let chunk = reader.read_chunk(0).unwrap();
        assert!(chunk.data.is_empty());
        assert_eq!(chunk.hash, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn read_chunk_for_resume() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader =
            ChunkReader::new(&path, ChunkLayout::FixedSize(4), HashAlgorithm::Md5).unwrap();
        let c = reader.read_chunk(2).unwrap();
        assert_eq!(&c.data, b"89");
        let c = reader.read_chunk(1).unwrap();
        assert_eq!(&c.data, b"4567");

        assert!(matches!(
            reader.read_chunk(3),
            Err(TransferError::ChunkOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn zero_layouts_are_rejected() {
        assert!(ChunkLayout::FixedSize(0).chunk_size(10).is_err());
        assert!(ChunkLayout::Parts(0).chunk_size(10).is_err());
    }

    #[test]
    fn chunk_count_overflow() {
        assert!(matches!(
            chunk_count(u64::MAX, 1),
            Err(TransferError::TooManyChunks(_))
        ));
    }

    #[test]
    fn chunks_concatenate_to_file() {
        let dir = TempDir::new().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let path = create_test_file(dir.path(), "fox.txt", original);

        let mut reader =
            ChunkReader::new(&path, ChunkLayout::FixedSize(10), HashAlgorithm::Sha256).unwrap();
        let mut joined = Vec::new();
        for chunk in read_all(&mut reader) {
            joined.extend(chunk.data);
        }
        assert_eq!(&joined, original);
    }
}
