use std::io::{self, Read, Seek, SeekFrom};

/// Natural read granularity used to align seek offsets.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Blocking byte source the demuxer pulls transport packets from.
///
/// The demuxer never opens files or sockets itself; it only talks to this
/// trait. [`IoSource`] adapts anything that is `Read + Seek`.
pub trait PacketSource {
    /// Reads up to `buf.len()` bytes. Returns 0 only at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discards `n` bytes.
    fn skip(&mut self, n: u64) -> io::Result<()>;

    /// Moves to an absolute byte offset.
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Current absolute byte offset.
    fn tell(&self) -> u64;

    /// True once a read hit the end of the stream.
    fn eof(&self) -> bool;

    /// Total length, if known.
    fn size(&self) -> Option<u64> {
        None
    }

    fn chunk_size(&self) -> usize {
        DEFAULT_CHUNK_SIZE
    }

    /// Fills `buf` as far as the stream allows and returns the byte count.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// [`PacketSource`] over a `Read + Seek` value such as a `BufReader<File>`
/// or an in-memory `Cursor`.
#[derive(Debug)]
pub struct IoSource<R> {
    inner: R,
    pos: u64,
    size: Option<u64>,
    eof: bool,
    chunk_size: usize,
}

impl<R: Read + Seek> IoSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        let size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(pos))?;
        Ok(Self {
            inner,
            pos,
            size: Some(size),
            eof: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> PacketSource for IoSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.eof = true;
        }
        self.pos += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        self.pos += skipped;
        if skipped < n {
            self.eof = true;
        }
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = self.inner.seek(SeekFrom::Start(pos))?;
        self.eof = false;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
