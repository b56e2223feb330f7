//! Incremental UTF-8 decoding for byte streams
//!
//! Pipe and pty reads land on arbitrary byte boundaries, so a multibyte
//! character can be split across two reads. Decoding each read on its own
//! would mangle the split character into U+FFFD; the decoder instead carries
//! the trailing incomplete sequence into the next read.

/// Streaming UTF-8 decoder tolerant of read boundaries
///
/// Bytes that are invalid outright, rather than a truncated trailing
/// sequence, are replaced with U+FFFD the same way `from_utf8_lossy` does.
#[derive(Default)]
pub(crate) struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decode the next read, holding back a trailing incomplete sequence
    ///
    /// Returns an empty string when the read consists entirely of the start
    /// of a multibyte character.
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let keep = incomplete_suffix_len(&self.carry);
        let ready = self.carry.len() - keep;
        let text = String::from_utf8_lossy(&self.carry[..ready]).into_owned();
        self.carry.copy_within(ready.., 0);
        self.carry.truncate(keep);
        text
    }

    /// Flush whatever is still carried, for the end of the stream
    ///
    /// A sequence that is still incomplete at EOF is genuinely malformed and
    /// comes out as U+FFFD.
    pub(crate) fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        text
    }
}

/// Length of a trailing sequence that is valid so far but not yet complete
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    // The lead byte of an incomplete sequence sits at most 3 bytes from the
    // end (a 4-byte sequence missing only its last byte).
    let len = bytes.len();
    for i in (len.saturating_sub(3)..len).rev() {
        let seq_len = match bytes[i] {
            0x00..=0x7F => return 0,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            // Continuation or invalid byte, keep scanning for the lead.
            _ => continue,
        };
        return if i + seq_len > len { len - i } else { 0 };
    }
    0
}
