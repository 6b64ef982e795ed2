//! Payload sinks and sources.
//!
//! During disassembly every file body is drained through a [`PayloadSink`],
//! which reports the byte count and digest that end up in the File record.
//! During assembly bodies are fetched back through a [`PayloadSource`],
//! keyed by the full [`Entry`] so content-addressed layouts can use the
//! recorded digest.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::path::PathBuf;

use crate::entry::Entry;
use crate::hash::{new_hash, PayloadHash};

/// Buffer size for draining and copying payloads.
pub(crate) const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Receives file payloads during disassembly.
pub trait PayloadSink {
    /// Drain `reader` completely, returning the byte count and the digest of
    /// the drained stream under the configured hash.
    fn put(&mut self, name: &str, reader: &mut dyn Read) -> io::Result<(u64, Vec<u8>)>;
}

/// Provides file payloads during assembly.
pub trait PayloadSource {
    /// Open the payload stream for `entry`.
    fn get(&self, entry: &Entry) -> io::Result<Box<dyn Read + '_>>;
}

fn segment_name(entry: &Entry) -> io::Result<&str> {
    entry.name().ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, "segment payloads are stored inline")
    })
}

/// Drain `reader` through `hash` into `writer`, returning the byte count.
fn copy_with_hash(
    reader: &mut dyn Read,
    hash: &mut dyn PayloadHash,
    mut writer: impl Write,
    buffer: &mut [u8],
) -> io::Result<u64> {
    let mut total = 0u64;
    loop {
        let n = reader.read(buffer)?;
        if n == 0 {
            return Ok(total);
        }
        hash.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
}

/// A bit-bucket sink: payloads are dropped after checksumming.
///
/// Used when the payloads already live elsewhere (an extracted file tree, a
/// layer diff directory) and only the sizes and digests are needed.
pub struct DiscardSink {
    hash: Box<dyn PayloadHash>,
    buffer: Vec<u8>,
}

impl DiscardSink {
    /// A fresh sink using the configured hash.
    pub fn new() -> Self {
        Self {
            hash: new_hash(),
            buffer: vec![0u8; COPY_BUFFER_SIZE],
        }
    }
}

impl Default for DiscardSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadSink for DiscardSink {
    fn put(&mut self, _name: &str, reader: &mut dyn Read) -> io::Result<(u64, Vec<u8>)> {
        let size = copy_with_hash(reader, &mut *self.hash, io::sink(), &mut self.buffer)?;
        Ok((size, self.hash.finalize_reset()))
    }
}

/// A simple in-memory store keyed by name.
///
/// Memory-intensive by construction; best for tests and lightweight cases.
#[derive(Debug, Default)]
pub struct BufferStore {
    files: HashMap<String, Vec<u8>>,
}

impl BufferStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadSink for BufferStore {
    fn put(&mut self, name: &str, reader: &mut dyn Read) -> io::Result<(u64, Vec<u8>)> {
        let mut hash = new_hash();
        let mut content = Vec::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let size = copy_with_hash(reader, &mut *hash, &mut content, &mut buffer)?;
        self.files.insert(name.to_owned(), content);
        Ok((size, hash.finalize_reset()))
    }
}

impl PayloadSource for BufferStore {
    fn get(&self, entry: &Entry) -> io::Result<Box<dyn Read + '_>> {
        let name = segment_name(entry)?;
        match self.files.get(name) {
            Some(content) => Ok(Box::new(Cursor::new(content.as_slice()))),
            None => Err(io::Error::new(
                ErrorKind::NotFound,
                format!("no such payload: {name:?}"),
            )),
        }
    }
}

/// A source that opens payloads relative to a root directory, for the case
/// where an extracted file tree sits on disk.
#[derive(Debug)]
pub struct PathSource {
    root: PathBuf,
}

impl PathSource {
    /// Payloads are opened as `root/<name>`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PayloadSource for PathSource {
    fn get(&self, entry: &Entry) -> io::Result<Box<dyn Read + '_>> {
        let name = segment_name(entry)?;
        Ok(Box::new(File::open(self.root.join(name))?))
    }
}

/// A content-addressed store: payloads live under their hex-encoded digest,
/// deduplicating identical bodies.
#[derive(Debug)]
pub struct CasStore {
    root: PathBuf,
}

impl CasStore {
    /// Store payloads under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PayloadSink for CasStore {
    fn put(&mut self, _name: &str, reader: &mut dyn Read) -> io::Result<(u64, Vec<u8>)> {
        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        let mut hash = new_hash();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let size = copy_with_hash(reader, &mut *hash, tmp.as_file(), &mut buffer)?;
        let digest = hash.finalize_reset();

        let target = self.root.join(hex::encode(&digest));
        if target.exists() {
            // already stored; the temp copy is discarded on drop
        } else {
            tmp.persist(&target).map_err(|e| e.error)?;
        }
        Ok((size, digest))
    }
}

impl PayloadSource for CasStore {
    fn get(&self, entry: &Entry) -> io::Result<Box<dyn Read + '_>> {
        match entry {
            Entry::File(file) => {
                let path = self.root.join(hex::encode(&file.payload));
                Ok(Box::new(File::open(path)?))
            }
            Entry::Segment(..) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "segment payloads are stored inline",
            )),
        }
    }
}
