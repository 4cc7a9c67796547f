//! Byte-level framing for the envd process stream.
//!
//! Connect server-streams carry messages in 5-byte envelopes: one flags byte
//! and a big-endian `u32` length, followed by the payload. Flag `0x02` marks
//! the end-of-stream trailer. Output chunks do not align with lines, so
//! [`LineSplitter`] buffers partial lines per stream.

pub const FLAG_END_STREAM: u8 = 0x02;
const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Envelope {
    #[must_use]
    pub fn is_end_stream(&self) -> bool {
        self.flags & FLAG_END_STREAM != 0
    }
}

/// Frame `payload` in a single envelope.
#[must_use]
pub fn encode_envelope(flags: u8, payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(flags);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Default)]
pub struct EnvelopeDecoder {
    buf: Vec<u8>,
}

impl EnvelopeDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Envelope> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while self.buf.len() >= HEADER_LEN {
            let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
            if self.buf.len() < HEADER_LEN + len {
                break;
            }
            let flags = self.buf[0];
            let frame: Vec<u8> = self.buf.drain(..HEADER_LEN + len).collect();
            out.push(Envelope { flags, payload: frame[HEADER_LEN..].to_vec() });
        }
        out
    }

    /// Bytes left over from a truncated frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Splits a chunked byte stream into lines. Bytes are buffered until a
/// newline arrives, so a character split across chunks decodes intact.
/// `\r\n` endings are normalized.
#[derive(Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The trailing line that never got a newline, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        (!rest.is_empty()).then(|| String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
