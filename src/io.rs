//! Stream reader over a seekable byte source, with a runtime byte order,
//! a reusable scratch buffer and pooled buffers for sub-stream
//! materialization.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use once_cell::sync::Lazy;

use crate::error::Error;

/// The byte source [`crate::decode`] reads from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Runtime byte order, the analog of a `binary.ByteOrder` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub(crate) fn other(self) -> ByteOrder {
        match self {
            ByteOrder::Big => ByteOrder::Little,
            ByteOrder::Little => ByteOrder::Big,
        }
    }

    pub(crate) fn u16(self, b: &[u8]) -> u16 {
        match self {
            ByteOrder::Big => BigEndian::read_u16(b),
            ByteOrder::Little => LittleEndian::read_u16(b),
        }
    }

    pub(crate) fn u32(self, b: &[u8]) -> u32 {
        match self {
            ByteOrder::Big => BigEndian::read_u32(b),
            ByteOrder::Little => LittleEndian::read_u32(b),
        }
    }

    pub(crate) fn u64(self, b: &[u8]) -> u64 {
        match self {
            ByteOrder::Big => BigEndian::read_u64(b),
            ByteOrder::Little => LittleEndian::read_u64(b),
        }
    }
}

/// 10 MiB is plenty for image metadata.
pub(crate) const MAX_BUF_SIZE: u64 = 10 * 1024 * 1024;

static BUF_POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn pool_get(length: usize) -> Vec<u8> {
    let mut buf = BUF_POOL
        .lock()
        .map(|mut p| p.pop().unwrap_or_default())
        .unwrap_or_default();
    buf.clear();
    buf.resize(length, 0);
    buf
}

fn pool_put(mut buf: Vec<u8>) {
    buf.clear();
    if let Ok(mut p) = BUF_POOL.lock() {
        p.push(buf);
    }
}

/// A reader over a pooled owned buffer. The buffer returns to the pool on
/// drop, so every exit path releases it.
pub(crate) struct PooledReader {
    buf: Vec<u8>,
    pos: u64,
}

impl PooledReader {
    fn new(buf: Vec<u8>) -> PooledReader {
        PooledReader { buf, pos: 0 }
    }
}

impl Read for PooledReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let start = (self.pos as usize).min(self.buf.len());
        let n = (self.buf.len() - start).min(out.len());
        out[..n].copy_from_slice(&self.buf[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for PooledReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.buf.len() as i64 + d,
        };
        if new < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = new as u64;
        Ok(self.pos)
    }
}

impl Drop for PooledReader {
    fn drop(&mut self) {
        pool_put(std::mem::take(&mut self.buf));
    }
}

/// Wraps a seekable reader with binary read helpers.
///
/// A single clean end-of-file is tolerated: the first short read at EOF
/// sets [`SourceReader::is_eof`] and yields a zeroed value, so walkers can
/// check the flag at loop tops instead of after every read. A second clean
/// EOF terminates with the internal stop sentinel; a *partial* read
/// surfaces as an unexpected-EOF I/O error.
pub(crate) struct SourceReader<R> {
    r: R,
    pub(crate) byte_order: ByteOrder,
    buf: Vec<u8>,
    is_eof: bool,
    /// Origin of all intra-stream relative addresses (the TIFF header
    /// position for EXIF decoding).
    pub(crate) reader_offset: u64,
}

impl<R: Read + Seek> SourceReader<R> {
    pub(crate) fn new(r: R, byte_order: ByteOrder) -> SourceReader<R> {
        SourceReader {
            r,
            byte_order,
            buf: Vec::new(),
            is_eof: false,
            reader_offset: 0,
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.is_eof
    }

    /// Direct access to the underlying reader, for length-limited
    /// sub-reads (`Read::take`) and the custom XMP handler.
    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.r
    }

    pub(crate) fn pos(&mut self) -> Result<u64, Error> {
        Ok(self.r.stream_position()?)
    }

    pub(crate) fn seek(&mut self, pos: u64) -> Result<(), Error> {
        self.r.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub(crate) fn skip(&mut self, n: i64) -> Result<(), Error> {
        self.r.seek(SeekFrom::Current(n))?;
        Ok(())
    }

    /// Run `f`, then restore the position the stream had before the call.
    pub(crate) fn preserve_pos<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let saved = self.pos()?;
        let result = f(self);
        let restored = self.seek(saved);
        match result {
            Ok(v) => restored.map(|()| v),
            Err(e) => Err(e),
        }
    }

    /// Fill `out` completely, with the one-shot clean-EOF tolerance.
    pub(crate) fn read_full(&mut self, out: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < out.len() {
            match self.r.read(&mut out[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        if filled == out.len() {
            return Ok(());
        }
        if filled == 0 {
            // Clean EOF. Tolerate the first one so callers need not check
            // after every read; terminate on the second.
            if !self.is_eof {
                self.is_eof = true;
                out.fill(0);
                return Ok(());
            }
            return Err(Error::Stop);
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "unexpected end of stream",
        )))
    }

    fn read_into_scratch(&mut self, n: usize) -> Result<(), Error> {
        if self.buf.len() < n {
            self.buf.resize(n, 0);
        }
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.read_full(&mut buf[..n]);
        self.buf = buf;
        result
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, Error> {
        self.read_into_scratch(1)?;
        Ok(self.buf[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, Error> {
        self.read_into_scratch(2)?;
        Ok(self.byte_order.u16(&self.buf[..2]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, Error> {
        self.read_into_scratch(4)?;
        Ok(self.byte_order.u32(&self.buf[..4]))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(self.read_u32()? as i32)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, Error> {
        self.read_into_scratch(8)?;
        Ok(self.byte_order.u64(&self.buf[..8]))
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, Error> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Borrow `n` bytes from the scratch buffer. The slice is only valid
    /// until the next read.
    pub(crate) fn read_bytes_volatile(&mut self, n: usize) -> Result<&[u8], Error> {
        self.read_into_scratch(n)?;
        Ok(&self.buf[..n])
    }

    /// Read bytes until a null terminator, up to `max` bytes including the
    /// null. Returns the bytes before the null and the number of bytes
    /// consumed (including the null, when found).
    pub(crate) fn read_null_terminated(&mut self, max: usize) -> Result<(Vec<u8>, u64), Error> {
        let mut out = Vec::new();
        let mut n = 0u64;
        for _ in 0..max {
            let b = self.read_u8()?;
            n += 1;
            if b == 0 {
                return Ok((out, n));
            }
            out.push(b);
        }
        Ok((out, n))
    }

    /// Materialize the next `length` bytes into a pooled buffer and return
    /// a reader over it. `length` above 10 MiB is rejected.
    pub(crate) fn buffered_reader(&mut self, length: u64) -> Result<PooledReader, Error> {
        if length > MAX_BUF_SIZE {
            return Err(Error::invalid_format(format!(
                "length {length} exceeds max {MAX_BUF_SIZE}"
            )));
        }
        let mut buf = pool_get(length as usize);
        if length > 0 {
            if let Err(e) = self.read_full(&mut buf) {
                pool_put(buf);
                return Err(e);
            }
        }
        Ok(PooledReader::new(buf))
    }
}
