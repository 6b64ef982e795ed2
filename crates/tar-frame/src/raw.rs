//! Raw-accounting tar stream reader.
//!
//! [`RawReader`] walks a tar stream member by member while classifying every
//! consumed octet. With accounting enabled, all header blocks, extension
//! blocks (GNU long name/link, PAX, old-GNU sparse maps), end-of-archive
//! markers, and inter-member padding are captured in an internal buffer that
//! the caller drains with [`RawReader::raw_bytes`]. Body bytes are the one
//! thing that bypasses the buffer: they are streamed out through the
//! [`Read`] impl.
//!
//! The accounting contract is what makes byte-exact archive reconstruction
//! possible: everything the reader consumes is either handed to the caller
//! as body data or shows up in `raw_bytes()`, with no third bucket.
//!
//! A member's trailing block padding is consumed during the *next* call to
//! [`RawReader::next`], so it is attributed to the bytes preceding the next
//! header. The boundary between a body and the following raw run is exactly
//! the 512-aligned position where the next header begins.

use std::io::{self, ErrorKind, Read};

use crate::pax::{PaxExtensions, PAX_PATH, PAX_SIZE};
use crate::{EntryType, FrameError, Header, Result, BLOCK_SIZE};

/// Bounds on attacker-controlled allocations while framing.
///
/// Extension entries carry their payload in the body of a pseudo-member, so
/// a crafted archive can declare them arbitrarily large. These limits cap
/// what the reader is willing to buffer for a single member's header run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single extension entry body (GNU long name/link,
    /// PAX, PAX global). Default: 1 MiB.
    pub max_special_size: u64,

    /// Maximum number of consecutive extension entries before an actual
    /// member. Default: 16.
    pub max_pending_specials: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_special_size: 1024 * 1024,
            max_pending_specials: 16,
        }
    }
}

/// One archive member as seen by the framing layer.
///
/// This intentionally carries only what is needed to route the member's
/// bytes: the resolved name, the exact body length, and the type flag. All
/// other header fields travel untouched inside the raw byte run.
#[derive(Debug, Clone)]
pub struct Member {
    /// Member path, resolved through PAX `path` and GNU long-name
    /// extensions and the UStar prefix field, in that order of precedence.
    /// Decoded lossily; the exact bytes remain in the raw run.
    pub name: String,
    /// Exact body length in bytes, excluding block padding. PAX `size`
    /// overrides the header field.
    pub size: u64,
    /// The member's type flag.
    pub entry_type: EntryType,
}

/// Accumulated extension state for the member being assembled.
#[derive(Debug, Default)]
struct Pending {
    gnu_long_name: Option<Vec<u8>>,
    pax: Option<Vec<u8>>,
    count: usize,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.gnu_long_name.is_none() && self.pax.is_none()
    }
}

/// Streaming tar reader with optional raw-byte accounting.
#[derive(Debug)]
pub struct RawReader<R> {
    inner: R,
    limits: Limits,
    accounting: bool,
    raw: Vec<u8>,
    block: [u8; BLOCK_SIZE],
    body_remaining: u64,
    pad_remaining: u64,
    done: bool,
}

impl<R: Read> RawReader<R> {
    /// Create a reader with accounting disabled (plain streaming walk, no
    /// extra allocation).
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, false, Limits::default())
    }

    /// Create a reader that accounts for every non-body byte.
    pub fn with_accounting(inner: R) -> Self {
        Self::with_limits(inner, true, Limits::default())
    }

    /// Create a reader with explicit accounting mode and limits.
    pub fn with_limits(inner: R, accounting: bool, limits: Limits) -> Self {
        Self {
            inner,
            limits,
            accounting,
            raw: Vec::new(),
            block: [0u8; BLOCK_SIZE],
            body_remaining: 0,
            pad_remaining: 0,
            done: false,
        }
    }

    /// Drain the accounting buffer.
    ///
    /// Returns every non-body byte consumed since the previous call. Always
    /// empty when accounting is disabled.
    pub fn raw_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.raw)
    }

    /// Consume the reader, handing back the underlying source positioned
    /// after the last consumed byte. Used to stream trailing post-archive
    /// bytes without buffering them.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advance to the next member.
    ///
    /// Consumes any unread body of the current member, its block padding,
    /// and all header and extension blocks of the following member. Returns
    /// `None` at the end of the archive: two zero blocks, or a clean EOF at
    /// a block boundary.
    pub fn next(&mut self) -> Result<Option<Member>> {
        if self.done {
            return Ok(None);
        }

        self.finish_member()?;

        let mut pending = Pending::default();
        loop {
            if pending.count > self.limits.max_pending_specials {
                return Err(FrameError::TooManySpecials {
                    count: pending.count,
                    limit: self.limits.max_pending_specials,
                });
            }

            if !self.read_block()? {
                self.done = true;
                if !pending.is_empty() {
                    return Err(FrameError::OrphanedSpecial);
                }
                return Ok(None);
            }

            if self.block.iter().all(|&b| b == 0) {
                // End-of-archive marker: a second zero block must follow,
                // though a clean EOF right here is tolerated too.
                if self.read_block()? && !self.block.iter().all(|&b| b == 0) {
                    return Err(FrameError::Malformed("garbage after zero block"));
                }
                self.done = true;
                if !pending.is_empty() {
                    return Err(FrameError::OrphanedSpecial);
                }
                return Ok(None);
            }

            let header = Header::from_bytes_exact(&self.block);
            header.verify_checksum()?;

            let header_size = header.entry_size()?;
            let entry_type = header.entry_type();

            match entry_type {
                EntryType::GnuLongName => {
                    let mut data = self.read_special(header_size)?;
                    data.pop_if(|&mut b| b == 0);
                    pending.gnu_long_name = Some(data);
                    pending.count += 1;
                }
                EntryType::GnuLongLink => {
                    // Link targets never reach the framing layer's output;
                    // the raw bytes are all that matters.
                    self.read_special(header_size)?;
                    pending.count += 1;
                }
                EntryType::XHeader => {
                    pending.pax = Some(self.read_special(header_size)?);
                    pending.count += 1;
                }
                EntryType::XGlobalHeader => {
                    self.read_special(header_size)?;
                    pending.count += 1;
                }
                EntryType::Other(flag) if header.is_ustar() || header.is_gnu() => {
                    return Err(FrameError::UnknownType(flag));
                }
                _ => {
                    let member = self.begin_member(header_size, entry_type, pending)?;
                    return Ok(Some(member));
                }
            }
        }
    }

    /// Finish header processing for an actual member: resolve its name and
    /// size, consume old-GNU sparse map continuation blocks, and arm the
    /// body/padding counters.
    fn begin_member(
        &mut self,
        header_size: u64,
        entry_type: EntryType,
        pending: Pending,
    ) -> Result<Member> {
        let header = Header::from_bytes_exact(&self.block);

        let mut name_bytes: Vec<u8> = Vec::new();
        if let Some(prefix) = header.prefix() {
            if !prefix.is_empty() {
                name_bytes.extend_from_slice(prefix);
                name_bytes.push(b'/');
            }
        }
        name_bytes.extend_from_slice(header.path_bytes());

        if let Some(long_name) = pending.gnu_long_name {
            name_bytes = long_name;
        }

        let mut size = header_size;
        if let Some(ref pax) = pending.pax {
            for record in PaxExtensions::new(pax) {
                let record = record?;
                match record.key().map_err(crate::pax::PaxError::from)? {
                    PAX_PATH => name_bytes = record.value_bytes().to_vec(),
                    PAX_SIZE => {
                        if let Some(s) = record.value().ok().and_then(|v| v.parse().ok()) {
                            size = s;
                        }
                    }
                    _ => {}
                }
            }
        }

        // Old-GNU sparse members carry their sparse map in extra blocks
        // between the header and the body.
        let is_extended = entry_type == EntryType::GnuSparse && header.sparse_is_extended();
        if is_extended {
            loop {
                if !self.read_block()? {
                    return Err(FrameError::UnexpectedEof);
                }
                if self.block[504] == 0 {
                    break;
                }
            }
        }

        let padded = size
            .checked_next_multiple_of(BLOCK_SIZE as u64)
            .ok_or(FrameError::InvalidSize(size))?;
        self.body_remaining = size;
        self.pad_remaining = padded - size;

        Ok(Member {
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
            size,
            entry_type,
        })
    }

    /// Drain whatever is left of the current member: unread body bytes
    /// (not accounted) followed by the block padding (accounted, so it lands
    /// at the head of the next raw run).
    fn finish_member(&mut self) -> Result<()> {
        let mut scratch = [0u8; 8192];
        while self.body_remaining > 0 {
            let want = self.body_remaining.min(scratch.len() as u64) as usize;
            let n = retry_read(&mut self.inner, &mut scratch[..want])?;
            if n == 0 {
                return Err(FrameError::UnexpectedEof);
            }
            self.body_remaining -= n as u64;
        }

        while self.pad_remaining > 0 {
            let want = self.pad_remaining.min(scratch.len() as u64) as usize;
            let n = retry_read(&mut self.inner, &mut scratch[..want])?;
            if n == 0 {
                return Err(FrameError::UnexpectedEof);
            }
            if self.accounting {
                self.raw.extend_from_slice(&scratch[..n]);
            }
            self.pad_remaining -= n as u64;
        }

        Ok(())
    }

    /// Read one 512-byte block, accounting it. Returns false on a clean EOF
    /// at the block boundary.
    fn read_block(&mut self) -> Result<bool> {
        match read_exactish(&mut self.inner, &mut self.block) {
            Ok(true) => {
                if self.accounting {
                    self.raw.extend_from_slice(&self.block);
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(FrameError::UnexpectedEof),
            Err(e) => Err(e.into()),
        }
    }

    /// Read an extension entry's body plus its padding, accounting all of
    /// it, and return the body content.
    fn read_special(&mut self, size: u64) -> Result<Vec<u8>> {
        if size > self.limits.max_special_size {
            return Err(FrameError::SpecialTooLarge {
                size,
                limit: self.limits.max_special_size,
            });
        }
        let padded = size
            .checked_next_multiple_of(BLOCK_SIZE as u64)
            .ok_or(FrameError::InvalidSize(size))?;

        let mut data = vec![0u8; padded as usize];
        match read_exactish(&mut self.inner, &mut data) {
            Ok(true) => {}
            Ok(false) => return Err(FrameError::UnexpectedEof),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(FrameError::UnexpectedEof)
            }
            Err(e) => return Err(e.into()),
        }
        if self.accounting {
            self.raw.extend_from_slice(&data);
        }
        data.truncate(size as usize);
        Ok(data)
    }
}

impl<R: Read> Read for RawReader<R> {
    /// Stream the current member's body. EOF is per-member: after the body
    /// is exhausted, reads return 0 until [`RawReader::next`] is called.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.body_remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = self.body_remaining.min(buf.len() as u64) as usize;
        let n = retry_read(&mut self.inner, &mut buf[..want])?;
        if n == 0 {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        self.body_remaining -= n as u64;
        Ok(n)
    }
}

/// A single read that retries on EINTR.
fn retry_read(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Fill the buffer exactly, distinguishing a clean EOF (nothing read at all,
/// returns `Ok(false)`) from a truncated read (`ErrorKind::UnexpectedEof`).
fn read_exactish(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let buflen = buf.len();
    let mut todo: &mut [u8] = buf;

    while !todo.is_empty() {
        match reader.read(todo) {
            Ok(0) => {
                return match todo.len() {
                    s if s == buflen => Ok(false),
                    _ => Err(ErrorKind::UnexpectedEof.into()),
                };
            }
            Ok(n) => todo = &mut todo[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(true)
}
