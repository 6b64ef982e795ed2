//! Tar reassembly.
//!
//! [`write_output`] replays a metadata record stream, interleaving verbatim
//! Segment bytes with file bodies fetched from a [`PayloadSource`] and
//! verifying each body's digest. [`OutputStream`] wraps the same loop in a
//! producer thread behind a `Read`, so a caller can consume the reassembled
//! archive lazily without buffering it whole.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Mutex;
use std::thread;

use crate::entry::Entry;
use crate::error::{Result, SeamError};
use crate::hash::new_hash;
use crate::packer::JsonUnpacker;
use crate::store::{PayloadSource, COPY_BUFFER_SIZE};

/// Process-wide pool of copy buffers, shared between concurrent runs. A
/// buffer is checked out once per assembly and returned on completion.
static COPY_BUFFERS: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

/// A pooled 32 KiB buffer; hands itself back on drop.
struct CopyBuffer(Vec<u8>);

impl CopyBuffer {
    fn take() -> Self {
        let buf = COPY_BUFFERS
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; COPY_BUFFER_SIZE]);
        CopyBuffer(buf)
    }
}

impl Drop for CopyBuffer {
    fn drop(&mut self) {
        COPY_BUFFERS
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(std::mem::take(&mut self.0));
    }
}

/// Replay `unpacker`'s records into `out`.
///
/// Segments are written verbatim. File records with `size == 0` are
/// no-ops. Other File records are opened through `source` and copied with
/// their digest recomputed; a digest mismatch fails with
/// [`SeamError::ChecksumMismatch`] naming the file. The assembly-side hash
/// factory must match the one used at disassembly time, or every file will
/// fail verification.
pub fn write_output<P>(
    source: &P,
    unpacker: &mut JsonUnpacker<impl Read>,
    out: &mut impl Write,
) -> Result<()>
where
    P: PayloadSource + ?Sized,
{
    // lazily initialized: segment-only streams never touch the pool
    let mut buffer = None;
    let mut hash = None;

    while let Some(entry) = unpacker.next()? {
        match &entry {
            Entry::Segment(seg) => out.write_all(&seg.payload)?,
            Entry::File(file) if file.size == 0 => {}
            Entry::File(file) => {
                let mut body = source.get(&entry).map_err(SeamError::Source)?;
                let buffer: &mut Vec<u8> = &mut buffer.get_or_insert_with(CopyBuffer::take).0;
                let hash = hash.get_or_insert_with(new_hash);

                let mut remaining = file.size;
                while remaining > 0 {
                    let want = remaining.min(buffer.len() as u64) as usize;
                    let n = body.read(&mut buffer[..want]).map_err(SeamError::Source)?;
                    if n == 0 {
                        return Err(SeamError::Source(io::Error::new(
                            ErrorKind::UnexpectedEof,
                            format!("payload for {:?} ended early", file.name),
                        )));
                    }
                    hash.update(&buffer[..n]);
                    out.write_all(&buffer[..n])?;
                    remaining -= n as u64;
                }

                if hash.finalize_reset() != file.payload {
                    return Err(SeamError::ChecksumMismatch {
                        name: file.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Chunks produced by the assembly thread, terminated by an error or by the
/// channel closing.
type Chunk = std::result::Result<Vec<u8>, SeamError>;

/// Forwards writes into the chunk channel. A failed send means the reader
/// hung up, which surfaces as a broken pipe and aborts the producer.
struct ChunkWriter {
    tx: SyncSender<Chunk>,
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::from(ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The reassembled archive as a lazy byte stream.
///
/// A producer thread runs [`write_output`] into a bounded channel; reads
/// pull chunks off the channel, suspending each side while the other is
/// behind. Producer errors surface on the next read. Dropping the stream
/// closes the channel, and the producer aborts on its next write.
pub struct OutputStream {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    offset: usize,
    done: bool,
}

impl OutputStream {
    /// Spawn the producer and return the read side.
    pub fn new<P, R>(source: P, mut unpacker: JsonUnpacker<R>) -> OutputStream
    where
        P: PayloadSource + Send + 'static,
        R: Read + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::sync_channel(4);

        thread::spawn(move || {
            let mut writer = ChunkWriter { tx: tx.clone() };
            if let Err(err) = write_output(&source, &mut unpacker, &mut writer) {
                // a send failure means the reader is gone and nobody is
                // listening for the error either
                let _ = tx.send(Err(err));
            }
        });

        OutputStream {
            rx,
            current: Vec::new(),
            offset: 0,
            done: false,
        }
    }
}

impl Read for OutputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.current.len() {
                let n = buf.len().min(self.current.len() - self.offset);
                buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }

            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Ok(Err(err)) => {
                    self.done = true;
                    return Err(io::Error::other(err));
                }
                // producer finished and dropped its sender
                Err(..) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::disasm::disassemble;
    use crate::hash::hash_bytes;
    use crate::store::PayloadSink;
    use crate::packer::JsonPacker;
    use crate::store::BufferStore;

    use super::*;

    fn append_file(builder: &mut tar::Builder<&mut Vec<u8>>, path: &str, content: &[u8]) {
        let mut header = tar::Header::new_ustar();
        header.set_mode(0o644);
        header.set_uid(1000);
        header.set_gid(1000);
        header.set_mtime(1234567890);
        header.set_size(content.len() as u64);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, path, content).unwrap();
    }

    fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut data = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut data);
            for (path, content) in files {
                append_file(&mut builder, path, content);
            }
            builder.finish().unwrap();
        }
        data
    }

    fn split(data: &[u8]) -> (Vec<u8>, BufferStore) {
        let mut packed = Vec::new();
        let mut store = BufferStore::new();
        let mut packer = JsonPacker::new(&mut packed);
        disassemble(Cursor::new(data), &mut packer, &mut store).unwrap();
        drop(packer);
        (packed, store)
    }

    #[test]
    fn test_round_trip_identity() {
        let original = build_archive(&[
            ("small.txt", b"Small file content"),
            ("large.bin", &[b'L'; 100 * 1024]),
            ("exact.bin", &[3u8; 1024]),
            ("empty", b""),
        ]);

        let (packed, store) = split(&original);

        let mut rebuilt = Vec::new();
        let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
        write_output(&store, &mut unpacker, &mut rebuilt).unwrap();

        assert_eq!(rebuilt, original, "reassembly must be byte-identical");
    }

    #[test]
    fn test_round_trip_through_output_stream() {
        let original = build_archive(&[("a", b"alpha"), ("b", &[7u8; 9000])]);
        let (packed, store) = split(&original);

        let unpacker = JsonUnpacker::new(Cursor::new(packed));
        let mut stream = OutputStream::new(store, unpacker);
        let mut rebuilt = Vec::new();
        stream.read_to_end(&mut rebuilt).unwrap();

        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_corrupted_payload_fails_with_name() {
        let original = build_archive(&[("good.txt", b"intact"), ("bad.txt", b"corrupt me")]);
        let (packed, mut store) = split(&original);

        // flip one byte of bad.txt's stored payload
        let mut tampered = b"corrupt me".to_vec();
        tampered[0] ^= 0x01;
        store.put("bad.txt", &mut &tampered[..]).unwrap();

        let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
        let result = write_output(&store, &mut unpacker, &mut Vec::new());
        match result {
            Err(SeamError::ChecksumMismatch { name }) => assert_eq!(name, "bad.txt"),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_size_records_are_noops() {
        // a metadata stream with only a size-0 file between segments
        let mut packed = Vec::new();
        let mut packer = JsonPacker::new(&mut packed);
        packer.add(&Entry::segment(vec![1u8; 16])).unwrap();
        packer.add(&Entry::file("empty", 0, Vec::new())).unwrap();
        packer.add(&Entry::segment(vec![2u8; 16])).unwrap();
        drop(packer);

        // the source would fail if it were consulted
        let store = BufferStore::new();
        let mut out = Vec::new();
        let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
        write_output(&store, &mut unpacker, &mut out).unwrap();

        let mut expected = vec![1u8; 16];
        expected.extend(vec![2u8; 16]);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_missing_payload_is_source_error() {
        let mut packed = Vec::new();
        let mut packer = JsonPacker::new(&mut packed);
        packer
            .add(&Entry::file("gone.txt", 4, hash_bytes(b"gone")))
            .unwrap();
        drop(packer);

        let store = BufferStore::new();
        let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
        let result = write_output(&store, &mut unpacker, &mut Vec::new());
        assert!(matches!(result, Err(SeamError::Source(..))));
    }

    #[test]
    fn test_error_surfaces_on_stream_read() {
        let mut packed = Vec::new();
        let mut packer = JsonPacker::new(&mut packed);
        packer
            .add(&Entry::file("gone.txt", 4, hash_bytes(b"gone")))
            .unwrap();
        drop(packer);

        let unpacker = JsonUnpacker::new(Cursor::new(packed));
        let mut stream = OutputStream::new(BufferStore::new(), unpacker);
        let mut out = Vec::new();
        assert!(stream.read_to_end(&mut out).is_err());
    }

    /// A source that reports when it is dropped, to observe producer
    /// shutdown from the outside.
    struct DropProbe {
        inner: BufferStore,
        dropped: Arc<AtomicBool>,
    }

    impl PayloadSource for DropProbe {
        fn get(&self, entry: &Entry) -> io::Result<Box<dyn Read + '_>> {
            self.inner.get(entry)
        }
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dropping_reader_cancels_producer() {
        // enough data that the producer cannot fit everything into the
        // channel and must block waiting for the reader
        let original = build_archive(&[("big.bin", &vec![0x42u8; 4 * 1024 * 1024])]);
        let (packed, store) = split(&original);

        let dropped = Arc::new(AtomicBool::new(false));
        let probe = DropProbe {
            inner: store,
            dropped: dropped.clone(),
        };

        let unpacker = JsonUnpacker::new(Cursor::new(packed));
        let mut stream = OutputStream::new(probe, unpacker);

        // consume a little, then hang up
        let mut first = [0u8; 1024];
        stream.read_exact(&mut first).unwrap();
        drop(stream);

        // the producer observes the broken pipe on its next send and exits,
        // dropping the source
        for _ in 0..500 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("producer did not shut down after the reader was dropped");
    }

    #[test]
    fn test_concurrent_assemblies_share_the_pool() {
        let original = build_archive(&[("f", &[1u8; 200 * 1024])]);
        let (packed, store) = split(&original);
        let packed = Arc::new(packed);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let packed = Arc::clone(&packed);
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut unpacker = JsonUnpacker::new(Cursor::new(packed.as_slice()));
                    let mut out = Vec::new();
                    write_output(store.as_ref(), &mut unpacker, &mut out).unwrap();
                    out.len()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), original.len());
        }
    }
}
