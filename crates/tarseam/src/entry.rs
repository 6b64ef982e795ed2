//! The metadata record model.
//!
//! A disassembled archive is an ordered stream of [`Entry`] records. Segment
//! records carry verbatim non-payload bytes (headers, extension blocks,
//! padding, end-of-archive markers); File records describe one member body
//! by name, length, and digest, with the body itself stored out of band.
//!
//! Interleaving segments with file bodies in record order reproduces the
//! original archive exactly.

/// One record of the metadata stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A run of non-payload bytes, reproduced verbatim on assembly.
    Segment(Segment),
    /// One member body, stored out of band.
    File(FileEntry),
}

/// Verbatim archive bytes between file bodies.
///
/// Sizes are bounded by header runs and padding (kilobytes), not by file
/// contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The raw bytes, written unchanged into the reassembled archive.
    pub payload: Vec<u8>,
    /// Ordinal in the record stream, assigned by the packer.
    pub position: u64,
}

/// Descriptor of one archived member's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Archive path as decoded from the header chain. Used for diagnostics
    /// and as the sink/source key; the authoritative bytes live in the
    /// preceding segment.
    pub name: String,
    /// Exact body length in bytes, excluding block padding.
    pub size: u64,
    /// Digest of the body under the configured hash (empty for `size == 0`).
    pub payload: Vec<u8>,
    /// Ordinal in the record stream, assigned by the packer.
    pub position: u64,
}

impl Entry {
    /// A segment record awaiting a position from the packer.
    pub fn segment(payload: Vec<u8>) -> Entry {
        Entry::Segment(Segment {
            payload,
            position: 0,
        })
    }

    /// A file record awaiting a position from the packer.
    pub fn file(name: impl Into<String>, size: u64, payload: Vec<u8>) -> Entry {
        Entry::File(FileEntry {
            name: name.into(),
            size,
            payload,
            position: 0,
        })
    }

    /// The record's name; `None` for segments.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Entry::Segment(..) => None,
            Entry::File(file) => Some(&file.name),
        }
    }

    /// The record's stream position.
    #[must_use]
    pub fn position(&self) -> u64 {
        match self {
            Entry::Segment(seg) => seg.position,
            Entry::File(file) => file.position,
        }
    }
}

/// Lexically clean a path: collapse `//` and `.` elements and resolve `..`
/// against preceding elements where possible.
///
/// The strict packer compares *cleaned* file names, so `./hurr.txt` and
/// `hurr.txt` count as the same path.
pub(crate) fn clean_name(name: &str) -> String {
    let rooted = name.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for comp in name.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            comp => parts.push(comp),
        }
    }

    let mut cleaned = parts.join("/");
    if rooted {
        cleaned.insert(0, '/');
    }
    if cleaned.is_empty() {
        cleaned.push('.');
    }
    cleaned
}
