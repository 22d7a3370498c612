//! Newline-delimited input, as read by the `hustle put` command.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads LF-terminated lines from a stream. A CR before the LF is dropped, so
/// CRLF input reads the same.
pub struct LineReader<T: AsyncRead + Unpin> {
    /// Data read in that doesn't yet end in a LF.
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no LF.
    scanned: usize,
    reader: T,
    eof: bool,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    /// Returns the next line without its terminator, or `None` once the
    /// stream is exhausted. An unterminated final line is still returned.
    ///
    /// Cancel-safe: the only await is a `read_buf` into the internal buffer.
    pub async fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(at) =
                self.buf[self.scanned..].iter().position(|&b| b == b'\n')
            {
                let line = self.buf.split_to(self.scanned + at + 1).freeze();
                self.scanned = 0;
                return Ok(Some(trim_terminator(line)));
            }
            self.scanned = self.buf.len();

            if self.eof {
                return Ok(self.take_remainder());
            }

            // Buffered lines have all been returned by now, so a read error
            // can surface straight away. Calling again retries the read.
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }

    fn take_remainder(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split().freeze();
        Some(trim_terminator(rest))
    }
}

fn trim_terminator(mut line: Bytes) -> Bytes {
    for end in [b'\n', b'\r'] {
        if line.last() == Some(&end) {
            line.truncate(line.len() - 1);
        }
    }
    line
}

impl<T: AsyncRead + Unpin> From<T> for LineReader<T> {
    fn from(value: T) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            reader: value,
            eof: false,
        }
    }
}
