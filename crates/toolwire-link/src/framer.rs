//! Incremental extraction of JSON objects from an unframed byte stream.
//!
//! The piped-process transport reads stdout in arbitrary chunks; a single
//! message can be split anywhere, including inside a string or in the
//! middle of an escape sequence, and several messages can arrive in one
//! chunk. [`JsonFramer`] keeps the scanner state (brace depth, in-string,
//! escaped) between [`feed`](JsonFramer::feed) calls so scanning resumes
//! exactly where the previous chunk ended.
//!
//! Scanning is done on bytes. `{`, `}`, `"` and `\` are ASCII and never
//! occur inside a multi-byte UTF-8 sequence, so a chunk boundary inside a
//! multi-byte character is harmless. A finished frame that is not valid
//! UTF-8 is yielded as an error rather than repaired.

use crate::error::DecodeError;

/// Resumable scanner that turns appended chunks into complete JSON object texts.
#[derive(Debug, Default)]
pub struct JsonFramer {
    /// Unconsumed input.
    buffer: Vec<u8>,
    /// Next byte of `buffer` to scan.
    cursor: usize,
    /// Offset of the opening brace of the object being scanned.
    start: Option<usize>,
    /// Unescaped `{` minus unescaped `}` seen outside strings.
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of stream data.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(chunk.as_ref());
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the scanner is part-way through an object.
    pub fn is_mid_frame(&self) -> bool {
        self.start.is_some()
    }

    /// Drop all buffered data and scanner state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Extract the next complete object, if the buffer holds one.
    ///
    /// Bytes outside any object (newline delimiters, stray text) are
    /// skipped. The returned text runs from the opening brace through the
    /// matching closing brace and is removed from the buffer together with
    /// anything that preceded it. A frame that is not valid UTF-8 is still
    /// consumed, but comes back as [`DecodeError::InvalidUtf8`].
    pub fn next_frame(&mut self) -> Option<Result<String, DecodeError>> {
        while self.cursor < self.buffer.len() {
            let index = self.cursor;
            let byte = self.buffer[index];
            self.cursor += 1;

            if self.start.is_none() {
                if byte == b'{' {
                    self.start = Some(index);
                    self.depth = 1;
                }
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(self.take_frame(index + 1));
                    }
                }
                _ => {}
            }
        }

        self.compact();
        None
    }

    /// Iterate over every complete object currently buffered.
    ///
    /// The iterator ends when the buffer runs dry; feeding more data and
    /// calling `frames` again picks up where it stopped.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { framer: self }
    }

    fn take_frame(&mut self, end: usize) -> Result<String, DecodeError> {
        let start = self.start.take().unwrap_or(0);
        let bytes = self.buffer[start..end].to_vec();
        self.buffer.drain(..end);
        self.cursor = 0;
        String::from_utf8(bytes).map_err(DecodeError::from)
    }

    /// Discard bytes that can never be part of a frame.
    fn compact(&mut self) {
        match self.start {
            None => {
                if !self.buffer.is_empty() {
                    tracing::trace!(bytes = self.buffer.len(), "discarding bytes outside any frame");
                }
                self.buffer.clear();
                self.cursor = 0;
            }
            Some(start) if start > 0 => {
                self.buffer.drain(..start);
                self.cursor -= start;
                self.start = Some(0);
            }
            Some(_) => {}
        }
    }
}

/// Iterator over complete frames, returned by [`JsonFramer::frames`].
pub struct Frames<'a> {
    framer: &'a mut JsonFramer,
}

impl Iterator for Frames<'_> {
    type Item = Result<String, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut JsonFramer) -> Vec<String> {
        framer.frames().map(|frame| frame.unwrap()).collect()
    }

    #[test]
    fn test_single_object() {
        let mut framer = JsonFramer::new();
        framer.feed(r#"{"id":1,"result":{}}"#);
        assert_eq!(collect(&mut framer), vec![r#"{"id":1,"result":{}}"#]);
        assert_eq!(framer.buffered(), 0);
        assert!(!framer.is_mid_frame());
    }

    #[test]
    fn test_multiple_objects_in_one_chunk() {
        let mut framer = JsonFramer::new();
        framer.feed("{\"a\":1}\n{\"b\":2}\n{\"c\":");
        assert_eq!(collect(&mut framer), vec![r#"{"a":1}"#, r#"{"b":2}"#]);
        assert!(framer.is_mid_frame());

        framer.feed("3}\n");
        assert_eq!(collect(&mut framer), vec![r#"{"c":3}"#]);
    }

    #[test]
    fn test_braces_inside_strings() {
        let mut framer = JsonFramer::new();
        framer.feed(r#"{"id":3,"result":{"text":"a}b"}}"#);
        assert_eq!(collect(&mut framer), vec![r#"{"id":3,"result":{"text":"a}b"}}"#]);
    }

    #[test]
    fn test_escaped_quote_then_brace() {
        let mut framer = JsonFramer::new();
        let input = r#"{"id":4,"result":{"text":"a\"}"}}"#;
        framer.feed(input);
        assert_eq!(collect(&mut framer), vec![input]);
    }

    #[test]
    fn test_escaped_backslash_ends_string() {
        let mut framer = JsonFramer::new();
        let input = r#"{"path":"c:\\"}"#;
        framer.feed(input);
        assert_eq!(collect(&mut framer), vec![input]);
    }

    #[test]
    fn test_split_inside_escape_sequence() {
        let mut framer = JsonFramer::new();
        framer.feed(r#"{"t":"x\"#);
        assert!(collect(&mut framer).is_empty());
        framer.feed(r#""}"}"#);
        assert_eq!(collect(&mut framer), vec![r#"{"t":"x\"}"}"#]);
    }

    #[test]
    fn test_every_split_point_yields_same_frames() {
        let input = "{\"id\":1,\"result\":{\"text\":\"{\\\"}\"}}\n{\"id\":2,\"error\":{\"message\":\"é}\"}}";
        let mut whole = JsonFramer::new();
        whole.feed(input);
        let expected = collect(&mut whole);
        assert_eq!(expected.len(), 2);

        let bytes = input.as_bytes();
        for split in 0..=bytes.len() {
            let mut framer = JsonFramer::new();
            framer.feed(&bytes[..split]);
            let mut frames = collect(&mut framer);
            framer.feed(&bytes[split..]);
            frames.extend(collect(&mut framer));
            assert_eq!(frames, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = r#"{"id":7,"result":{"response":"ok {}"}}"#;
        let mut framer = JsonFramer::new();
        let mut frames = Vec::new();
        for byte in input.bytes() {
            framer.feed([byte]);
            frames.extend(collect(&mut framer));
        }
        assert_eq!(frames, vec![input]);
    }

    #[test]
    fn test_leading_noise_is_discarded() {
        let mut framer = JsonFramer::new();
        framer.feed("starting server...\n");
        assert!(collect(&mut framer).is_empty());
        assert_eq!(framer.buffered(), 0);

        framer.feed("ready } {\"id\":1,");
        assert!(collect(&mut framer).is_empty());
        assert_eq!(framer.buffered(), "{\"id\":1,".len());

        framer.feed("\"result\":null}");
        assert_eq!(collect(&mut framer), vec![r#"{"id":1,"result":null}"#]);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut framer = JsonFramer::new();
        framer.feed(r#"{"t":"open string"#);
        assert!(collect(&mut framer).is_empty());
        framer.clear();
        framer.feed(r#"{"ok":true}"#);
        assert_eq!(collect(&mut framer), vec![r#"{"ok":true}"#]);
    }

    #[test]
    fn test_invalid_utf8_frame_is_an_error() {
        let mut framer = JsonFramer::new();
        framer.feed(b"{\"t\":\"\xff\xfe\"}\n{\"ok\":true}");

        let frames: Vec<_> = framer.frames().collect();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(DecodeError::InvalidUtf8(_))));
        assert_eq!(frames[1].as_ref().unwrap(), r#"{"ok":true}"#);
        assert_eq!(framer.buffered(), 0);
    }
}
