//! Incremental decoder for streamed answer bodies.
//!
//! A backend answers with one top-level JSON array whose elements are answer
//! tuples. The body may arrive in any number of chunks, split anywhere,
//! including inside strings or numbers. [`AnswerStreamParser`] emits each
//! element as soon as its last byte arrives, keeping only the bytes of the
//! element currently being read.
//!
//! ```text
//! chunk: [["approved","1 1"  chunk: 0"],["proc   chunk: essed","1 10"]]
//!         ^ element opens           ^ emit #1                      ^ emit #2
//! ```
//!
//! A body that ends before `]` is not an error here; callers decide what a
//! short answer means.

mod error;

pub use error::{ParserError, ParserResult};

use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    BeforeArray,
    BeforeElement { after_comma: bool },
    InElement,
    AfterElement,
    Closed,
    Failed,
}

/// Scanner state carried between chunks.
#[derive(Debug)]
pub struct AnswerStreamParser {
    stage: Stage,
    /// Bytes of the element being read.
    buf: Vec<u8>,
    /// Open brackets/braces inside the current container element.
    depth: usize,
    in_string: bool,
    escape: bool,
    /// Whether the current element is an array or object (vs. a scalar).
    container: bool,
    offset: usize,
    emitted: usize,
}

impl Default for AnswerStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerStreamParser {
    pub fn new() -> Self {
        Self {
            stage: Stage::BeforeArray,
            buf: Vec::new(),
            depth: 0,
            in_string: false,
            escape: false,
            container: false,
            offset: 0,
            emitted: 0,
        }
    }

    /// Consume one chunk, calling `emit` for every element it completes.
    ///
    /// After the first error the parser is aborted: this call and every
    /// later one emit nothing more.
    pub fn feed(&mut self, chunk: &[u8], mut emit: impl FnMut(Value)) -> ParserResult<()> {
        if self.stage == Stage::Failed {
            return Ok(());
        }
        for &byte in chunk {
            if let Err(e) = self.step(byte, &mut emit) {
                debug!(offset = self.offset, emitted = self.emitted, error = %e, "Answer stream aborted");
                self.stage = Stage::Failed;
                self.buf.clear();
                return Err(e);
            }
            self.offset += 1;
        }
        Ok(())
    }

    /// Convenience wrapper around [`feed`](Self::feed) that collects elements.
    pub fn feed_collect(&mut self, chunk: &[u8]) -> ParserResult<Vec<Value>> {
        let mut elements = Vec::new();
        self.feed(chunk, |value| elements.push(value))?;
        Ok(elements)
    }

    /// Whether the closing `]` of the top-level array has been read.
    pub fn is_closed(&self) -> bool {
        self.stage == Stage::Closed
    }

    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }

    /// Number of elements emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn step(&mut self, byte: u8, emit: &mut impl FnMut(Value)) -> ParserResult<()> {
        match self.stage {
            Stage::BeforeArray => match byte {
                b'[' => self.stage = Stage::BeforeElement { after_comma: false },
                b if is_whitespace(b) => {}
                b => return Err(self.unexpected(b, "'['")),
            },
            Stage::BeforeElement { after_comma } => match byte {
                b if is_whitespace(b) => {}
                b']' if !after_comma => self.stage = Stage::Closed,
                b']' | b',' | b'}' => return Err(self.unexpected(byte, "an element")),
                b => self.begin_element(b),
            },
            Stage::InElement => self.continue_element(byte, emit)?,
            Stage::AfterElement => match byte {
                b',' => self.stage = Stage::BeforeElement { after_comma: true },
                b']' => self.stage = Stage::Closed,
                b if is_whitespace(b) => {}
                b => return Err(self.unexpected(b, "',' or ']'")),
            },
            Stage::Closed => {
                if !is_whitespace(byte) {
                    return Err(self.unexpected(byte, "end of answer"));
                }
            }
            Stage::Failed => {}
        }
        Ok(())
    }

    fn begin_element(&mut self, byte: u8) {
        self.buf.clear();
        self.buf.push(byte);
        self.stage = Stage::InElement;
        self.escape = false;
        match byte {
            b'[' | b'{' => {
                self.container = true;
                self.in_string = false;
                self.depth = 1;
            }
            b'"' => {
                self.container = false;
                self.in_string = true;
                self.depth = 0;
            }
            _ => {
                self.container = false;
                self.in_string = false;
                self.depth = 0;
            }
        }
    }

    fn continue_element(&mut self, byte: u8, emit: &mut impl FnMut(Value)) -> ParserResult<()> {
        if self.in_string {
            self.buf.push(byte);
            if self.escape {
                self.escape = false;
            } else if byte == b'\\' {
                self.escape = true;
            } else if byte == b'"' {
                self.in_string = false;
                if !self.container {
                    self.complete(emit)?;
                    self.stage = Stage::AfterElement;
                }
            }
            return Ok(());
        }

        if self.container {
            self.buf.push(byte);
            match byte {
                b'"' => self.in_string = true,
                b'[' | b'{' => self.depth += 1,
                b']' | b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.complete(emit)?;
                        self.stage = Stage::AfterElement;
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        // Scalars end at the first delimiter.
        match byte {
            b',' => {
                self.complete(emit)?;
                self.stage = Stage::BeforeElement { after_comma: true };
            }
            b']' => {
                self.complete(emit)?;
                self.stage = Stage::Closed;
            }
            b if is_whitespace(b) => {
                self.complete(emit)?;
                self.stage = Stage::AfterElement;
            }
            b => self.buf.push(b),
        }
        Ok(())
    }

    fn complete(&mut self, emit: &mut impl FnMut(Value)) -> ParserResult<()> {
        let value = serde_json::from_slice::<Value>(&self.buf).map_err(|e| {
            ParserError::MalformedAnswer {
                offset: self.offset,
                message: e.to_string(),
            }
        })?;
        self.buf.clear();
        self.emitted += 1;
        emit(value);
        Ok(())
    }

    fn unexpected(&self, byte: u8, expected: &str) -> ParserError {
        ParserError::MalformedAnswer {
            offset: self.offset,
            message: format!(
                "unexpected {} where {} was expected",
                describe(byte),
                expected
            ),
        }
    }
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\n' | b'\r' | b'\t')
}

fn describe(byte: u8) -> String {
    if byte.is_ascii_graphic() {
        format!("'{}'", byte as char)
    } else {
        format!("byte 0x{:02x}", byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BODY: &str = r#"[
        ["resend", "1 10:a 0", {"channels": ["users/1", "a \"quoted\" [name]"]}],
        ["approved","1 10:a 0"],
        ["error", "1 10:a 0", "Error: ü\\n at {x}"],
        {"nested": {"deep": [1, 2.5e3, -7, true, null]}},
        "plain string",
        12345,
        ["processed","1 10:a 0"]
    ]"#;

    fn parse_whole(body: &[u8]) -> Vec<Value> {
        AnswerStreamParser::new().feed_collect(body).unwrap()
    }

    fn parse_chunks(chunks: &[&[u8]]) -> ParserResult<Vec<Value>> {
        let mut parser = AnswerStreamParser::new();
        let mut out = Vec::new();
        for chunk in chunks {
            parser.feed(chunk, |value| out.push(value))?;
        }
        Ok(out)
    }

    #[test]
    fn test_whole_body() {
        let elements = parse_whole(BODY.as_bytes());
        assert_eq!(elements.len(), 7);
        assert_eq!(elements[1], json!(["approved", "1 10:a 0"]));
        assert_eq!(
            elements[0][2]["channels"][1],
            json!("a \"quoted\" [name]")
        );
        assert_eq!(elements[3]["nested"]["deep"][1], json!(2500.0));
        assert_eq!(elements[4], json!("plain string"));
        assert_eq!(elements[5], json!(12345));
    }

    #[test]
    fn test_every_two_way_split_matches_whole_body() {
        let body = BODY.as_bytes();
        let expected = parse_whole(body);
        for split in 0..=body.len() {
            let (a, b) = body.split_at(split);
            assert_eq!(parse_chunks(&[a, b]).unwrap(), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_every_three_way_split_matches_whole_body() {
        let body = br#"[["a","x\"y"],-12.5,{"k":["]"]},"s"]"#;
        let expected = parse_whole(body);
        for i in 0..=body.len() {
            for j in i..=body.len() {
                let chunks = [&body[..i], &body[i..j], &body[j..]];
                assert_eq!(parse_chunks(&chunks).unwrap(), expected, "split at {} {}", i, j);
            }
        }
    }

    #[test]
    fn test_single_byte_chunks() {
        let body = BODY.as_bytes();
        let chunks: Vec<&[u8]> = body.chunks(1).collect();
        assert_eq!(parse_chunks(&chunks).unwrap(), parse_whole(body));
    }

    #[test]
    fn test_elements_emitted_before_array_closes() {
        let mut parser = AnswerStreamParser::new();
        let first = parser.feed_collect(br#"[["approved","1"],["pro"#).unwrap();
        assert_eq!(first, vec![json!(["approved", "1"])]);
        assert!(!parser.is_closed());

        let second = parser.feed_collect(br#"cessed","1"]]"#).unwrap();
        assert_eq!(second, vec![json!(["processed", "1"])]);
        assert!(parser.is_closed());
        assert_eq!(parser.emitted(), 2);
    }

    #[test]
    fn test_empty_array_is_not_an_error() {
        let mut parser = AnswerStreamParser::new();
        assert!(parser.feed_collect(b" [ ] \n").unwrap().is_empty());
        assert!(parser.is_closed());
    }

    #[test]
    fn test_unclosed_array_is_not_an_error() {
        let mut parser = AnswerStreamParser::new();
        let elements = parser.feed_collect(br#"[["approved","1"], ["proc"#).unwrap();
        assert_eq!(elements.len(), 1);
        assert!(!parser.is_closed());
        assert!(!parser.is_failed());
    }

    #[test]
    fn test_body_not_starting_with_array_is_malformed() {
        let mut parser = AnswerStreamParser::new();
        let err = parser.feed_collect(br#"{"error":"x"}"#).unwrap_err();
        assert!(matches!(err, ParserError::MalformedAnswer { offset: 0, .. }));
        assert!(parser.is_failed());
    }

    #[test]
    fn test_malformed_element_keeps_earlier_elements_and_aborts() {
        let mut parser = AnswerStreamParser::new();
        let mut seen = Vec::new();
        let result = parser.feed(br#"[["approved","1"],[1,,2],["processed","1"]]"#, |v| {
            seen.push(v)
        });
        assert!(matches!(result, Err(ParserError::MalformedAnswer { .. })));
        assert_eq!(seen, vec![json!(["approved", "1"])]);

        assert!(parser.feed_collect(br#",["processed","1"]]"#).unwrap().is_empty());
    }

    #[test]
    fn test_bad_scalar_is_malformed() {
        assert!(parse_chunks(&[b"[tru", b"x]"]).is_err());
    }

    #[test]
    fn test_trailing_comma_is_malformed() {
        assert!(parse_chunks(&[br#"[["approved","1"],]"#]).is_err());
    }

    #[test]
    fn test_data_after_close_is_malformed() {
        assert!(parse_chunks(&[b"[]", b" x"]).is_err());
    }

    #[test]
    fn test_split_inside_multibyte_character() {
        let body = "[\"ü€\"]".as_bytes();
        for split in 0..=body.len() {
            let (a, b) = body.split_at(split);
            assert_eq!(parse_chunks(&[a, b]).unwrap(), vec![json!("ü€")]);
        }
    }
}
