//! Splits a byte stream of UTF-8 text into fixed-size character chunks.

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_SIZE: usize = 8 * 1024;

/// Yields successive chunks of exactly `chunk_chars` characters. The first
/// shorter chunk (possibly empty) is the last one.
pub struct ChunkReader<R> {
    reader: R,
    chunk_chars: usize,
    text: String,
    text_chars: usize,
    undecoded: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, chunk_chars: usize) -> Self {
        Self {
            reader,
            chunk_chars: chunk_chars.max(1),
            text: String::new(),
            text_chars: 0,
            undecoded: Vec::new(),
            eof: false,
        }
    }

    /// Whether `chunk` is the final chunk of the stream.
    pub fn is_terminal(&self, chunk: &str) -> bool {
        chunk.chars().count() < self.chunk_chars
    }

    /// Next chunk of text. Invalid UTF-8 is an `InvalidData` error.
    pub async fn next_chunk(&mut self) -> std::io::Result<String> {
        let mut buf = [0u8; READ_SIZE];
        while self.text_chars < self.chunk_chars && !self.eof {
            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                self.eof = true;
                if !self.undecoded.is_empty() {
                    return Err(invalid_utf8());
                }
                break;
            }
            self.undecoded.extend_from_slice(&buf[..n]);
            self.decode_pending()?;
        }

        let split = self
            .text
            .char_indices()
            .nth(self.chunk_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        let rest = self.text.split_off(split);
        let chunk = std::mem::replace(&mut self.text, rest);
        self.text_chars -= chunk.chars().count();
        Ok(chunk)
    }

    /// Move the valid prefix of `undecoded` into `text`, keeping an
    /// incomplete trailing sequence for the next read.
    fn decode_pending(&mut self) -> std::io::Result<()> {
        let valid = match std::str::from_utf8(&self.undecoded) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(invalid_utf8()),
        };
        let tail = self.undecoded.split_off(valid);
        let decoded = std::mem::replace(&mut self.undecoded, tail);
        // Validated above.
        let decoded = String::from_utf8(decoded).map_err(|_| invalid_utf8())?;
        self.text_chars += decoded.chars().count();
        self.text.push_str(&decoded);
        Ok(())
    }
}

fn invalid_utf8() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "file is not valid UTF-8")
}
