//! Line framing for streamed response bodies
//!
//! Network chunks can end in the middle of a multi-byte character, so raw
//! bytes are buffered and only complete lines are decoded.

use super::traits::BackendError;

/// Byte buffer that hands out complete, trimmed, non-blank lines
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next newline-terminated line, if one is buffered
    pub(crate) fn next_line(&mut self) -> Option<Result<String, BackendError>> {
        loop {
            let pos = self.bytes.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            match decode(&line) {
                Ok(text) if text.is_empty() => {}
                other => return Some(other),
            }
        }
    }

    /// Unterminated tail left once the body has ended
    pub(crate) fn finish(&mut self) -> Option<Result<String, BackendError>> {
        let tail = std::mem::take(&mut self.bytes);
        match decode(&tail) {
            Ok(text) if text.is_empty() => None,
            other => Some(other),
        }
    }
}

fn decode(line: &[u8]) -> Result<String, BackendError> {
    std::str::from_utf8(line)
        .map(|text| text.trim().to_string())
        .map_err(|e| BackendError::InvalidResponse(format!("stream line is not valid UTF-8: {e}")))
}
