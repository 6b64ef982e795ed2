//! NDJSON metadata codec.
//!
//! Records travel as newline-delimited JSON, one object per line, UTF-8, no
//! pretty-printing. Binary payloads are base64-encoded. `type` is 1 for
//! Segment and 2 for File; optional fields are omitted rather than null:
//!
//! ```text
//! {"type":1,"payload":"<base64>","position":1}
//! {"type":2,"name":"./hurr.txt","size":8,"payload":"<base64>","position":2}
//! ```
//!
//! The codec is oblivious to compression: callers may wrap the byte stream
//! in gzip (the CLI does), the codec neither knows nor cares.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entry::{clean_name, Entry, FileEntry, Segment};
use crate::error::{Result, SeamError};

const SEGMENT_TYPE: u8 = 1;
const FILE_TYPE: u8 = 2;

/// One metadata record as it appears on the wire, before validation.
#[derive(Debug, Serialize, Deserialize)]
struct RecordWire {
    /// Entry type discriminant: 1 for Segment, 2 for File.
    #[serde(rename = "type")]
    type_id: u8,
    /// File name (File records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    /// Base64-encoded segment bytes or file digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    /// Body size in bytes (File records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    /// Ordinal in the record stream.
    position: u64,
}

impl RecordWire {
    fn from_entry(entry: &Entry, position: u64) -> RecordWire {
        match entry {
            Entry::Segment(seg) => RecordWire {
                type_id: SEGMENT_TYPE,
                name: None,
                payload: Some(BASE64_STANDARD.encode(&seg.payload)),
                size: None,
                position,
            },
            Entry::File(file) => RecordWire {
                type_id: FILE_TYPE,
                name: Some(file.name.clone()),
                payload: if file.payload.is_empty() {
                    None
                } else {
                    Some(BASE64_STANDARD.encode(&file.payload))
                },
                size: Some(file.size),
                position,
            },
        }
    }

    fn into_entry(self) -> Result<Entry> {
        let payload = match self.payload {
            Some(b64) => BASE64_STANDARD
                .decode(&b64)
                .map_err(|e| SeamError::Codec(format!("bad base64 payload: {e}")))?,
            None => Vec::new(),
        };

        match self.type_id {
            SEGMENT_TYPE => Ok(Entry::Segment(Segment {
                payload,
                position: self.position,
            })),
            FILE_TYPE => Ok(Entry::File(FileEntry {
                name: self.name.unwrap_or_default(),
                size: self.size.unwrap_or(0),
                payload,
                position: self.position,
            })),
            other => Err(SeamError::Codec(format!("invalid entry type: {other}"))),
        }
    }
}

/// Serializes entries to the NDJSON stream, assigning positions.
///
/// The default packer rejects repeated File names (compared after lexical
/// path cleaning, so `./hurr.txt` collides with `hurr.txt`); Segment records
/// are never deduplicated. Use [`JsonPacker::allow_duplicates`] for archives
/// that legitimately repeat paths.
#[derive(Debug)]
pub struct JsonPacker<W: Write> {
    writer: W,
    position: u64,
    seen: Option<HashSet<String>>,
}

impl<W: Write> JsonPacker<W> {
    /// A strict packer that fails with [`SeamError::DuplicatePath`] on
    /// repeated File names.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            position: 0,
            seen: Some(HashSet::new()),
        }
    }

    /// A non-enforcing packer for archives that repeat paths.
    pub fn allow_duplicates(writer: W) -> Self {
        Self {
            writer,
            position: 0,
            seen: None,
        }
    }

    /// Serialize one record and return its position (1, 2, 3, ... in stream
    /// order).
    pub fn add(&mut self, entry: &Entry) -> Result<u64> {
        if let (Entry::File(file), Some(seen)) = (entry, &mut self.seen) {
            if !seen.insert(clean_name(&file.name)) {
                return Err(SeamError::DuplicatePath(file.name.clone()));
            }
        }

        self.position += 1;
        let wire = RecordWire::from_entry(entry, self.position);
        let line =
            serde_json::to_string(&wire).map_err(|e| SeamError::Codec(e.to_string()))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(self.position)
    }

    /// Consume the packer, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Streams entries back out of an NDJSON stream.
#[derive(Debug)]
pub struct JsonUnpacker<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> JsonUnpacker<R> {
    /// Read records from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// The next record, or `None` at end of stream.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Entry>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let wire: RecordWire = serde_json::from_str(&line)
            .map_err(|e| SeamError::Codec(format!("bad record: {e}")))?;
        wire.into_entry().map(Some)
    }
}
