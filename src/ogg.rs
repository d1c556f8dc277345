//! Streaming reader for Ogg container pages.
//!
//! Pages are read strictly forward, one at a time, from an exclusively owned
//! byte source. Segment bodies are handed to the caller one by one through a
//! reused buffer; the page checksum is verified only once every segment has
//! been consumed, so a corrupt page is reported after its payload was already
//! delivered.

use std::io::{ErrorKind, Read};

use crate::crc;

/// Fixed Ogg page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 27;
/// Largest supported lacing value. 255 marks a continuation segment, which
/// this reader does not implement.
pub const MAX_SEGMENT_LEN: usize = 254;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const CRC_OFFSET: usize = 22;
const SEGMENT_COUNT_OFFSET: usize = 26;

/// Errors raised while demultiplexing the container.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// End of stream in the middle of a page structure. A clean end of
    /// stream at a page boundary is not an error and is reported as
    /// `Ok(None)` by [`PageReader::next_page`].
    #[error("unexpected end of stream inside a page")]
    Truncated,

    /// The capture pattern was missing. The stream cannot be recovered
    /// without resynchronization, which this reader does not attempt.
    #[error("missing OggS capture pattern")]
    BadMagic,

    /// A lacing value of 255 (continuation segment) was encountered.
    #[error("255-byte lacing values are not supported")]
    UnsupportedSegmentSize,

    /// The computed page checksum does not match the declared one. Raised
    /// from [`PageSegments::finish`], after the page's segments were already
    /// delivered.
    #[error("page checksum mismatch: declared {declared:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { declared: u32, computed: u32 },

    /// The first logical packet was not a valid Speex header.
    #[error("malformed Speex header packet")]
    HeaderMalformed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parsed fields of a page header.
///
/// The granule position is carried through for logging only; nothing
/// downstream consumes it.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub version: u8,
    pub flags: u8,
    pub granule_position: u64,
    pub serial: u32,
    pub sequence: u32,
    pub declared_crc: u32,
    pub segment_count: u8,
}

/// Reads Ogg pages from a forward-only byte source.
pub struct PageReader<R> {
    source: R,
    segment_buf: Vec<u8>,
}

impl<R: Read> PageReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            segment_buf: vec![0u8; MAX_SEGMENT_LEN],
        }
    }

    /// Read the next page header and segment table.
    ///
    /// Returns `Ok(None)` on a clean end of stream (no bytes available at a
    /// page boundary). The returned [`PageSegments`] borrows the reader until
    /// the page is fully consumed.
    pub fn next_page(&mut self) -> Result<Option<PageSegments<'_, R>>, FramingError> {
        let mut header = [0u8; PAGE_HEADER_SIZE];
        if !read_full_or_eof(&mut self.source, &mut header)? {
            return Ok(None);
        }

        if &header[..4] != CAPTURE_PATTERN {
            return Err(FramingError::BadMagic);
        }

        let declared_crc = u32::from_le_bytes(header[CRC_OFFSET..CRC_OFFSET + 4].try_into().unwrap());
        // The checksum convention embeds a zeroed field, so clear it before
        // seeding the running value.
        header[CRC_OFFSET..CRC_OFFSET + 4].fill(0);

        let info = PageInfo {
            version: header[4],
            flags: header[5],
            granule_position: u64::from_le_bytes(header[6..14].try_into().unwrap()),
            serial: u32::from_le_bytes(header[14..18].try_into().unwrap()),
            sequence: u32::from_le_bytes(header[18..22].try_into().unwrap()),
            declared_crc,
            segment_count: header[SEGMENT_COUNT_OFFSET],
        };

        let mut running_crc = crc::checksum(0, &header);

        let mut lacing = [0u8; 255];
        let table = &mut lacing[..info.segment_count as usize];
        read_full(&mut self.source, table)?;
        running_crc = crc::checksum(running_crc, table);

        log::debug!(
            "page seq={} serial={:#x} granule={} segments={}",
            info.sequence,
            info.serial,
            info.granule_position,
            info.segment_count,
        );

        Ok(Some(PageSegments {
            source: &mut self.source,
            buf: &mut self.segment_buf,
            info,
            lacing,
            next: 0,
            crc: running_crc,
        }))
    }
}

/// One page in the middle of being consumed.
///
/// Segments are streamed through a reused buffer rather than collected,
/// so memory use stays bounded for large pages.
pub struct PageSegments<'a, R> {
    source: &'a mut R,
    buf: &'a mut Vec<u8>,
    info: PageInfo,
    lacing: [u8; 255],
    next: usize,
    crc: u32,
}

impl<R: Read> PageSegments<'_, R> {
    pub fn info(&self) -> &PageInfo {
        &self.info
    }

    /// Read the next segment body, or `Ok(None)` once the page is exhausted.
    ///
    /// The returned slice is valid until the next call.
    pub fn next_segment(&mut self) -> Result<Option<&[u8]>, FramingError> {
        if self.next == self.info.segment_count as usize {
            return Ok(None);
        }
        let len = self.lacing[self.next] as usize;
        if len > MAX_SEGMENT_LEN {
            return Err(FramingError::UnsupportedSegmentSize);
        }
        self.next += 1;
        read_full(self.source, &mut self.buf[..len])?;
        self.crc = crc::checksum(self.crc, &self.buf[..len]);
        Ok(Some(&self.buf[..len]))
    }

    /// Drain any remaining segments and verify the page checksum.
    pub fn finish(mut self) -> Result<PageInfo, FramingError> {
        while self.next_segment()?.is_some() {}
        if self.crc != self.info.declared_crc {
            return Err(FramingError::ChecksumMismatch {
                declared: self.info.declared_crc,
                computed: self.crc,
            });
        }
        Ok(self.info)
    }
}

/// Fill `buf` completely. A clean EOF before the first byte returns
/// `Ok(false)`; an EOF partway through is `Truncated`.
fn read_full_or_eof<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<bool, FramingError> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(FramingError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Fill `buf` completely; any EOF is mid-structure and therefore `Truncated`.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<(), FramingError> {
    match source.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(FramingError::Truncated),
        Err(e) => Err(e.into()),
    }
}
