//! Blob storage implementation.

use crate::error::{Result, StoreError};
use crate::types::Hash;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Read/write buffer size for streaming copies.
const BUFFER_SIZE: usize = 64 * 1024;

/// Result of hashing (and optionally storing) a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashedFile {
    /// SHA-256 of the uncompressed content.
    pub hash: Hash,
    /// Bytes written to the blob file, 0 if nothing was stored.
    pub written: u64,
}

/// Stores file content as blobs, optionally gzip-compressed.
///
/// The compression setting is fixed per repository: every blob of a store is
/// either plain or compressed.
#[derive(Clone, Debug)]
pub struct BlobStorage {
    compress: bool,
}

impl BlobStorage {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    /// Hash a file's content, streaming a copy into `save_to` if given.
    ///
    /// Blobs are never overwritten: an existing target is a hash conflict.
    pub fn hash_file(&self, source: &Path, save_to: Option<&Path>) -> Result<HashedFile> {
        if let Some(target) = save_to {
            if target.exists() {
                return Err(StoreError::BlobExists(target.display().to_string()));
            }
        }

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(source)?);
        let mut hasher = Sha256::new();
        let mut sink = match save_to {
            Some(target) => Some(self.writer(target)?),
            None => None,
        };

        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            if let Some(sink) = sink.as_mut() {
                sink.write_all(&buffer[..n])?;
            }
        }

        let written = match (sink, save_to) {
            (Some(sink), Some(target)) => {
                sink.finish()?;
                fs::metadata(target)?.len()
            }
            _ => 0,
        };

        Ok(HashedFile {
            hash: Hash(hasher.finalize().into()),
            written,
        })
    }

    /// Open a blob for reading, decompressing transparently.
    ///
    /// The file handle is released when the reader is dropped.
    pub fn open(&self, blob: &Path) -> Result<Box<dyn Read>> {
        let file = BufReader::with_capacity(BUFFER_SIZE, File::open(blob)?);
        if self.compress {
            Ok(Box::new(GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }

    /// Read a whole blob into memory.
    pub fn read(&self, blob: &Path) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.open(blob)?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Restore a blob's content into `target`, replacing it.
    pub fn restore(&self, blob: &Path, target: &Path) -> Result<u64> {
        let mut reader = self.open(blob)?;
        let mut writer = BufWriter::new(File::create(target)?);
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    }

    fn writer(&self, target: &Path) -> Result<BlobWriter> {
        let file = BufWriter::with_capacity(BUFFER_SIZE, File::create(target)?);
        Ok(if self.compress {
            BlobWriter::Compressed(GzEncoder::new(file, Compression::default()))
        } else {
            BlobWriter::Plain(file)
        })
    }
}

enum BlobWriter {
    Plain(BufWriter<File>),
    Compressed(GzEncoder<BufWriter<File>>),
}

impl BlobWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            BlobWriter::Plain(w) => w.write_all(data),
            BlobWriter::Compressed(w) => w.write_all(data),
        }
    }

    fn finish(self) -> io::Result<()> {
        let mut file = match self {
            BlobWriter::Plain(w) => w,
            BlobWriter::Compressed(w) => w.finish()?,
        };
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_without_storing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        fs::write(&source, b"Hello, world!").unwrap();

        let storage = BlobStorage::new(false);
        let hashed = storage.hash_file(&source, None).unwrap();
        assert_eq!(hashed.hash, Hash::from_bytes(b"Hello, world!"));
        assert_eq!(hashed.written, 0);
    }

    #[test]
    fn test_store_and_restore_plain() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let blob = dir.path().join("blob");
        let target = dir.path().join("restored.txt");
        fs::write(&source, b"plain content").unwrap();

        let storage = BlobStorage::new(false);
        let hashed = storage.hash_file(&source, Some(&blob)).unwrap();
        assert_eq!(hashed.written, 13);

        storage.restore(&blob, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"plain content");
    }

    #[test]
    fn test_compressed_roundtrip() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.txt");
        let blob = dir.path().join("blob");
        let content = "repetitive line\n".repeat(1000);
        fs::write(&source, &content).unwrap();

        let storage = BlobStorage::new(true);
        let hashed = storage.hash_file(&source, Some(&blob)).unwrap();
        assert_eq!(hashed.hash, Hash::from_bytes(content.as_bytes()));
        assert!(hashed.written < content.len() as u64);

        assert_eq!(storage.read(&blob).unwrap(), content.as_bytes());
    }

    #[test]
    fn test_existing_blob_is_conflict() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let blob = dir.path().join("blob");
        fs::write(&source, b"x").unwrap();
        fs::write(&blob, b"occupied").unwrap();

        let storage = BlobStorage::new(false);
        assert!(matches!(
            storage.hash_file(&source, Some(&blob)),
            Err(StoreError::BlobExists(_))
        ));
        assert_eq!(fs::read(&blob).unwrap(), b"occupied");
    }
}
