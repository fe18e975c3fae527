use bytes::BytesMut;

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
}

/// A type for reading newline-delimited lines from a chunk stream.
///
/// Chunk boundaries are arbitrary, so bytes are buffered until a line
/// feed arrives. Decoding to UTF-8 happens per complete line, which
/// keeps multi-byte characters intact when they are split across
/// chunks.
pub struct Lines {
    buf: BytesMut,
    // Bytes at the front of `buf` already known to contain no line feed.
    scanned: usize,
    chunks: Chunks,
    eof: bool,
}

impl Lines {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            chunks,
            eof: false,
        }
    }

    /// Returns the next complete line without its terminator.
    ///
    /// When the underlying stream ends, a non-empty unterminated line is
    /// returned as the last line. Lines that are not valid UTF-8 are
    /// skipped.
    pub async fn next_line(&mut self) -> Result<Option<String>, Error> {
        loop {
            let raw = match self.take_line() {
                Some(raw) => raw,
                None if self.eof => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    self.scanned = 0;
                    strip_cr(self.buf.split())
                }
                None => {
                    match self
                        .chunks
                        .next_chunk()
                        .await
                        .map_err(Error::ChunksError)?
                    {
                        Some(bytes) => self.buf.extend_from_slice(&bytes),
                        None => self.eof = true,
                    }
                    continue;
                }
            };

            match String::from_utf8(raw.to_vec()) {
                Ok(line) => return Ok(Some(line)),
                Err(err) => warn!("skipping a line with invalid UTF-8: {err}"),
            }
        }
    }

    fn take_line(&mut self) -> Option<BytesMut> {
        let Some(offset) =
            self.buf[self.scanned..].iter().position(|b| *b == b'\n')
        else {
            self.scanned = self.buf.len();
            return None;
        };
        let eol_idx = self.scanned + offset;
        self.scanned = 0;

        let mut line = self.buf.split_to(eol_idx + 1);
        line.truncate(eol_idx);
        Some(strip_cr(line))
    }
}

#[inline]
fn strip_cr(mut line: BytesMut) -> BytesMut {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    line
}

/// Extracts the payload of a `data` field line.
///
/// Returns `None` for any other line, including blank lines, comments
/// and other field names.
#[inline]
pub fn data_field(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn lines_from(chunks: &[&'static [u8]]) -> Lines {
        let chunks = chunks.iter().copied().map(Bytes::from_static).collect();
        Lines::new(Chunks::from_vec_deque(chunks))
    }

    #[tokio::test]
    async fn test_normal_lines() {
        let mut lines = lines_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: hello");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: bye");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_lines() {
        let mut lines =
            lines_from(&[b"data:", b" hel", b"lo\r\n\nda", b"ta: bye\n"]);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: hello");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: bye");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_multibyte_char() {
        // "é" is encoded as 0xC3 0xA9.
        let mut lines = lines_from(&[b"data: caf\xC3", b"\xA9\n"]);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: café");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unterminated_last_line() {
        let mut lines = lines_from(&[b"data: one\ndata: two"]);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: one");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: two");
        assert_eq!(lines.next_line().await.unwrap(), None);
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_skipped() {
        let mut lines = lines_from(&[b"data: \xFF\xFE\n", b"data: ok\n"]);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: ok");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[test]
    fn test_data_field() {
        assert_eq!(data_field("data: [DONE]"), Some("[DONE]"));
        assert_eq!(data_field("data:{}"), Some("{}"));
        assert_eq!(data_field(": keep-alive"), None);
        assert_eq!(data_field("event: message"), None);
        assert_eq!(data_field(""), None);
    }
}
