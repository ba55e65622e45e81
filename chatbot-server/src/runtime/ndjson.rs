//! Incremental decoder for newline-delimited JSON bodies.

use crate::error::{Error, Result};

/// Longest record accepted from the runtime. Ollama lines are a few hundred
/// bytes; anything near this is a runtime that stopped sending newlines.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a chunked byte stream into complete lines.
///
/// Network chunks do not line up with records, so bytes after the last
/// newline are held until the next chunk (or `finish`) completes them.
/// A line longer than the limit is a `Protocol` error.
#[derive(Debug)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    max_line: usize,
}

impl Default for NdjsonDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
        }
    }

    /// Feed a chunk and return every line it completes, without the newline.
    /// Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.check_len(line.len())?;
            if !is_blank(&line) {
                lines.push(line);
            }
        }

        self.check_len(self.buffer.len())?;
        Ok(lines)
    }

    /// Return the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        if is_blank(&rest) {
            None
        } else {
            Some(rest)
        }
    }

    fn check_len(&mut self, len: usize) -> Result<()> {
        if len > self.max_line {
            self.buffer.clear();
            return Err(Error::Protocol(format!(
                "runtime sent a line longer than {} bytes",
                self.max_line
            )));
        }
        Ok(())
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}
