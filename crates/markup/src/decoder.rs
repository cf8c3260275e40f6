//! Streaming UTF-8 decoding for byte input.
//!
//! A multi-byte sequence split between two chunks is carried over and
//! completed by the next chunk. Invalid sequences decode to U+FFFD so the
//! stream always makes progress.

use std::borrow::Cow;

#[derive(Clone, Debug, Default)]
pub struct ByteStreamDecoder {
    /// Incomplete trailing sequence of the previous chunk (at most 3 bytes).
    carry: Vec<u8>,
}

impl ByteStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }

    /// Decode `bytes`, appending complete characters to `out`.
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        if bytes.is_empty() {
            return;
        }
        let input: Cow<'_, [u8]> = if self.carry.is_empty() {
            Cow::Borrowed(bytes)
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(bytes);
            Cow::Owned(joined)
        };
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.carry.extend_from_slice(tail);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush a dangling incomplete sequence as U+FFFD.
    pub fn finish(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.carry));
            self.carry.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> (String, ByteStreamDecoder) {
        let mut decoder = ByteStreamDecoder::new();
        let mut out = String::new();
        for chunk in chunks {
            decoder.decode(chunk, &mut out);
        }
        (out, decoder)
    }

    #[test]
    fn multibyte_sequence_split_between_chunks() {
        let (out, decoder) = decode_all(&[&[0xF0, 0x9F], &[0x98, 0x80, b'!']]);
        assert_eq!(out, "\u{1F600}!");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn trailing_partial_sequence_waits_for_next_chunk() {
        let (out, decoder) = decode_all(&[&[0xE2], &[0x82, 0xAC, 0xE2]]);
        assert_eq!(out, "€");
        assert!(decoder.has_pending());
    }

    #[test]
    fn invalid_bytes_become_replacement_chars() {
        let (out, _) = decode_all(&[&[0xFF, b'a', 0xC3]]);
        assert_eq!(out, "\u{FFFD}a");
    }

    #[test]
    fn finish_flushes_incomplete_tail() {
        let (mut out, mut decoder) = decode_all(&[b"x", &[0xE2, 0x82]]);
        decoder.finish(&mut out);
        assert_eq!(out, "x\u{FFFD}");
        assert!(!decoder.has_pending());
    }
}
