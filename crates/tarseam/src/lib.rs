//! Lossless tar splitting and byte-exact reassembly.
//!
//! tarseam splits a POSIX tar archive into two independently-stored
//! artifacts, an ordered metadata stream capturing every non-payload byte
//! plus per-file descriptors and the file payloads themselves, and later
//! reassembles them byte-for-byte identical to the original. Archives are
//! routinely content-addressed by their hash, so reassembly reproduces every
//! header field, padding byte, extension record, and trailing zero block
//! regardless of which tar dialect (ustar/PAX/GNU/sparse) wrote the archive.
//!
//! # Splitting
//!
//! ```no_run
//! use std::fs::File;
//! use tarseam::{disassemble, DiscardSink, JsonPacker};
//!
//! # fn main() -> tarseam::Result<()> {
//! let archive = File::open("layer.tar")?;
//! let metadata = File::create("layer.tar-split")?;
//!
//! let mut packer = JsonPacker::new(metadata);
//! let mut sink = DiscardSink::new();
//! let stats = disassemble(archive, &mut packer, &mut sink)?;
//! println!("{} files, {} segments", stats.files, stats.segments);
//! # Ok(())
//! # }
//! ```
//!
//! # Reassembling
//!
//! ```no_run
//! use std::fs::File;
//! use tarseam::{JsonUnpacker, OutputStream, PathSource};
//!
//! # fn main() -> std::io::Result<()> {
//! let metadata = File::open("layer.tar-split")?;
//! let unpacker = JsonUnpacker::new(metadata);
//! let source = PathSource::new("extracted/");
//!
//! let mut archive = OutputStream::new(source, unpacker);
//! std::io::copy(&mut archive, &mut File::create("layer.tar")?)?;
//! # Ok(())
//! # }
//! ```
//!
//! The metadata stream is newline-delimited JSON and may be gzip-wrapped by
//! the caller; payload digests default to CRC-64/ISO and the hash is
//! pluggable process-wide (see [`hash`]). Split-time and assemble-time hash
//! choices must agree.

pub mod assemble;
pub mod disasm;
pub mod entry;
pub mod error;
pub mod hash;
pub mod packer;
pub mod store;
pub mod util;

pub use assemble::{write_output, OutputStream};
pub use disasm::{disassemble, DisasmStats};
pub use entry::{Entry, FileEntry, Segment};
pub use error::{Result, SeamError};
pub use packer::{JsonPacker, JsonUnpacker};
pub use store::{BufferStore, CasStore, DiscardSink, PathSource, PayloadSink, PayloadSource};
