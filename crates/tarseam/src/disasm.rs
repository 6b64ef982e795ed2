//! Tar disassembly.
//!
//! [`disassemble`] walks a tar stream through a raw-accounting reader,
//! emitting the non-payload bytes as Segment records and routing each file
//! body into a [`PayloadSink`]. Every input byte ends up either inside a
//! Segment payload or counted by a File record, so the metadata stream plus
//! the sink contents reconstruct the archive exactly.

use std::io::{self, Read, Write};

use tar_frame::raw::RawReader;

use crate::entry::Entry;
use crate::error::{Result, SeamError};
use crate::packer::JsonPacker;
use crate::store::PayloadSink;

/// Archives sometimes carry padding past the end-of-archive marker, and a
/// hostile stream can carry gigabytes of it. It is forwarded into Segment
/// records in chunks of this size instead of being buffered whole.
const TRAILING_CHUNK_SIZE: usize = 1024 * 1024;

/// Counters reported by a completed disassembly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisasmStats {
    /// Total bytes consumed from the input.
    pub bytes_read: u64,
    /// Number of File records emitted.
    pub files: u64,
    /// Number of Segment records emitted.
    pub segments: u64,
}

/// Split a tar stream into metadata records and sink'd payloads.
///
/// Segment payload lengths plus File sizes sum to exactly the input length.
/// On any error the metadata stream may have been partially written and
/// must be discarded by the caller.
pub fn disassemble<R, W, S>(
    input: R,
    packer: &mut JsonPacker<W>,
    sink: &mut S,
) -> Result<DisasmStats>
where
    R: Read,
    W: Write,
    S: PayloadSink + ?Sized,
{
    let mut reader = RawReader::with_accounting(input);
    let mut stats = DisasmStats::default();

    loop {
        let member = reader.next()?;

        let raw = reader.raw_bytes();
        if !raw.is_empty() {
            stats.bytes_read += raw.len() as u64;
            stats.segments += 1;
            packer.add(&Entry::segment(raw))?;
        }

        let Some(member) = member else { break };

        let checksum = if member.size > 0 {
            let (size, checksum) = sink
                .put(&member.name, &mut reader)
                .map_err(SeamError::Sink)?;
            if size != member.size {
                return Err(SeamError::Sink(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "sink drained {size} of {} bytes for {:?}",
                        member.size, member.name
                    ),
                )));
            }
            checksum
        } else {
            Vec::new()
        };

        stats.bytes_read += member.size;
        stats.files += 1;
        log::trace!("file {:?} ({} bytes)", member.name, member.size);
        packer.add(&Entry::file(member.name, member.size, checksum))?;
    }

    // Forward whatever sits past the end-of-archive marker in bounded
    // chunks; a hostile stream must not be able to force a huge allocation.
    let mut inner = reader.into_inner();
    loop {
        let mut chunk = Vec::with_capacity(TRAILING_CHUNK_SIZE);
        let n = inner
            .by_ref()
            .take(TRAILING_CHUNK_SIZE as u64)
            .read_to_end(&mut chunk)?;
        if n == 0 {
            break;
        }
        stats.bytes_read += n as u64;
        stats.segments += 1;
        packer.add(&Entry::segment(chunk))?;
    }

    log::debug!(
        "disassembled {} bytes into {} segments and {} files",
        stats.bytes_read,
        stats.segments,
        stats.files
    );
    Ok(stats)
}
