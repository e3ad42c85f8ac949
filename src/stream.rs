//! Incremental decoder for the relay's live frame stream.
//!
//! The relay answers a streaming GET with an unbounded sequence of objects
//! shaped like `{"image": "<base64>", "sec": <int>, "usec": <int>}`, in
//! arbitrary field order, chunked at arbitrary byte boundaries, and never
//! terminated. `StreamDecoder` consumes those bytes as they arrive and
//! fires a frame callback for every decoded image payload without ever
//! materializing the whole response: only the token currently being lexed
//! is buffered.
//!
//! This is deliberately not a general JSON parser. It recognizes exactly
//! the flat-object grammar of the wire protocol, skips over nested
//! containers it does not understand, and treats an object as complete at
//! its closing brace. A malformed object costs only itself: the decoder
//! reports the syntax error, resets to `Idle`, and resynchronizes at the
//! next top-level `{`.
//!
//! Concurrency contract: `push` takes `&mut self`, so a decoder instance is
//! single-threaded by construction. The frame callback runs synchronously
//! on the pushing thread.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::DecodeError;

const KEY_IMAGE: &[u8] = b"image";
const KEY_SEC: &[u8] = b"sec";
const KEY_USEC: &[u8] = b"usec";

/// Field-level decoder state, reset to `Idle` whenever a terminal value is
/// consumed, the enclosing object closes, or the parser recovers from a
/// syntax error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    AwaitingImageValue,
    AwaitingAuxValue,
}

/// Frame delivery callback. `Some(bytes)` carries a decoded image payload;
/// `None` signals a payload whose base64 decode failed, so the consumer
/// hears about the error without the stream aborting.
pub type FrameCallback = Box<dyn FnMut(Option<&[u8]>) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the structural grammar allows next at the top level of the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expect {
    KeyOrEnd,
    Key,
    Colon,
    Value,
    CommaOrEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StrKind {
    Key,
    /// Accumulated value string (an image payload).
    Value,
    /// Consumed but not accumulated: value strings we do not need, and any
    /// string inside a nested container.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Escape {
    None,
    Start,
    Unicode { left: u8, acc: u16 },
}

enum Lexer {
    Structural,
    Str { kind: StrKind, escape: Escape },
    Number,
    Literal,
}

pub struct StreamDecoder {
    callback: FrameCallback,
    field: DecoderState,
    lexer: Lexer,
    stack: Vec<Container>,
    expect: Expect,
    /// Set after a syntax error: skip bytes until the next top-level `{`.
    resync: bool,
    /// Total bytes consumed, for diagnostics.
    offset: u64,
    /// Reusable buffer for the token currently being lexed.
    token: Vec<u8>,
}

impl StreamDecoder {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Option<&[u8]>) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            field: DecoderState::Idle,
            lexer: Lexer::Structural,
            stack: Vec::new(),
            expect: Expect::KeyOrEnd,
            resync: false,
            offset: 0,
            token: Vec::new(),
        }
    }

    /// Current field-level state. Mostly useful to observe error recovery.
    pub fn state(&self) -> DecoderState {
        self.field
    }

    /// Feed the next chunk of wire data.
    ///
    /// Frame callbacks fire synchronously from inside this call. On a
    /// structural syntax error the first diagnostic is returned, the
    /// offending object is discarded, and parsing continues with the rest
    /// of the chunk (and subsequent chunks) from the next top-level `{`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut first_err = None;
        let mut i = 0;
        while i < bytes.len() {
            match self.step(bytes[i]) {
                Ok(consumed) => {
                    if consumed {
                        i += 1;
                        self.offset += 1;
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                    self.recover();
                    i += 1;
                    self.offset += 1;
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Process one byte. Returns `Ok(false)` when the byte terminated a
    /// token and must be re-examined structurally.
    fn step(&mut self, b: u8) -> Result<bool, DecodeError> {
        if self.resync {
            if b == b'{' {
                self.resync = false;
                self.begin_object();
            }
            return Ok(true);
        }
        match self.lexer {
            Lexer::Structural => self.step_structural(b),
            Lexer::Str { kind, escape } => self.step_string(b, kind, escape),
            Lexer::Number => self.step_number(b),
            Lexer::Literal => self.step_literal(b),
        }
    }

    fn step_structural(&mut self, b: u8) -> Result<bool, DecodeError> {
        if matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
            return Ok(true);
        }
        if self.stack.is_empty() {
            return if b == b'{' {
                self.begin_object();
                Ok(true)
            } else {
                Err(self.syntax(format!(
                    "expected '{{' to begin an object, found {:?}",
                    b as char
                )))
            };
        }
        if self.stack.len() > 1 {
            return self.step_nested(b);
        }
        match self.expect {
            Expect::KeyOrEnd => match b {
                b'"' => {
                    self.start_string(StrKind::Key);
                    Ok(true)
                }
                b'}' => {
                    self.end_top_object();
                    Ok(true)
                }
                _ => Err(self.syntax(format!("expected a key or '}}', found {:?}", b as char))),
            },
            Expect::Key => match b {
                b'"' => {
                    self.start_string(StrKind::Key);
                    Ok(true)
                }
                _ => Err(self.syntax(format!("expected a key after ',', found {:?}", b as char))),
            },
            Expect::Colon => match b {
                b':' => {
                    self.expect = Expect::Value;
                    Ok(true)
                }
                _ => Err(self.syntax(format!("expected ':' after key, found {:?}", b as char))),
            },
            Expect::Value => match b {
                b'"' => {
                    let kind = if self.field == DecoderState::AwaitingImageValue {
                        StrKind::Value
                    } else {
                        StrKind::Skipped
                    };
                    self.start_string(kind);
                    Ok(true)
                }
                b'-' | b'0'..=b'9' => {
                    self.token.clear();
                    self.token.push(b);
                    self.lexer = Lexer::Number;
                    Ok(true)
                }
                b't' | b'f' | b'n' => {
                    self.token.clear();
                    self.token.push(b);
                    self.lexer = Lexer::Literal;
                    Ok(true)
                }
                b'{' => {
                    self.stack.push(Container::Object);
                    Ok(true)
                }
                b'[' => {
                    self.stack.push(Container::Array);
                    Ok(true)
                }
                _ => Err(self.syntax(format!("expected a value, found {:?}", b as char))),
            },
            Expect::CommaOrEnd => match b {
                b',' => {
                    self.expect = Expect::Key;
                    Ok(true)
                }
                b'}' => {
                    self.end_top_object();
                    Ok(true)
                }
                _ => Err(self.syntax(format!(
                    "expected ',' or '}}' after value, found {:?}",
                    b as char
                ))),
            },
        }
    }

    /// Inside a nested container: keep brace/bracket accounting honest
    /// (strings included, so braces inside them do not confuse the depth)
    /// but attach no meaning to the content.
    fn step_nested(&mut self, b: u8) -> Result<bool, DecodeError> {
        match b {
            b'"' => {
                self.start_string(StrKind::Skipped);
                Ok(true)
            }
            b'{' => {
                self.stack.push(Container::Object);
                Ok(true)
            }
            b'[' => {
                self.stack.push(Container::Array);
                Ok(true)
            }
            b'}' => self.close_nested(Container::Object),
            b']' => self.close_nested(Container::Array),
            _ => Ok(true),
        }
    }

    fn close_nested(&mut self, kind: Container) -> Result<bool, DecodeError> {
        if self.stack.last() != Some(&kind) {
            return Err(self.syntax("mismatched container close".to_string()));
        }
        self.stack.pop();
        if self.stack.len() == 1 {
            // The skipped value is finished; back to the flat grammar.
            self.field = DecoderState::Idle;
            self.expect = Expect::CommaOrEnd;
        }
        Ok(true)
    }

    fn step_string(&mut self, b: u8, kind: StrKind, escape: Escape) -> Result<bool, DecodeError> {
        match escape {
            Escape::Start => {
                let mapped = match b {
                    b'"' => Some(b'"'),
                    b'\\' => Some(b'\\'),
                    b'/' => Some(b'/'),
                    b'b' => Some(0x08),
                    b'f' => Some(0x0c),
                    b'n' => Some(b'\n'),
                    b'r' => Some(b'\r'),
                    b't' => Some(b'\t'),
                    b'u' => None,
                    _ => {
                        return Err(
                            self.syntax(format!("invalid escape '\\{}' in string", b as char))
                        )
                    }
                };
                match mapped {
                    Some(byte) => {
                        if kind != StrKind::Skipped {
                            self.token.push(byte);
                        }
                        self.lexer = Lexer::Str {
                            kind,
                            escape: Escape::None,
                        };
                    }
                    None => {
                        self.lexer = Lexer::Str {
                            kind,
                            escape: Escape::Unicode { left: 4, acc: 0 },
                        };
                    }
                }
                Ok(true)
            }
            Escape::Unicode { left, acc } => {
                let digit = match b {
                    b'0'..=b'9' => b - b'0',
                    b'a'..=b'f' => b - b'a' + 10,
                    b'A'..=b'F' => b - b'A' + 10,
                    _ => {
                        return Err(self.syntax("invalid hex digit in \\u escape".to_string()));
                    }
                };
                let acc = (acc << 4) | digit as u16;
                if left > 1 {
                    self.lexer = Lexer::Str {
                        kind,
                        escape: Escape::Unicode {
                            left: left - 1,
                            acc,
                        },
                    };
                    return Ok(true);
                }
                let ch = char::from_u32(acc as u32)
                    .ok_or_else(|| self.syntax("unsupported \\u escape".to_string()))?;
                if kind != StrKind::Skipped {
                    let mut utf8 = [0u8; 4];
                    self.token.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                }
                self.lexer = Lexer::Str {
                    kind,
                    escape: Escape::None,
                };
                Ok(true)
            }
            Escape::None => match b {
                b'\\' => {
                    self.lexer = Lexer::Str {
                        kind,
                        escape: Escape::Start,
                    };
                    Ok(true)
                }
                b'"' => {
                    self.lexer = Lexer::Structural;
                    self.finish_string(kind);
                    Ok(true)
                }
                0x00..=0x1f => {
                    Err(self.syntax("unescaped control character in string".to_string()))
                }
                _ => {
                    if kind != StrKind::Skipped {
                        self.token.push(b);
                    }
                    Ok(true)
                }
            },
        }
    }

    fn step_number(&mut self, b: u8) -> Result<bool, DecodeError> {
        if b.is_ascii_digit() {
            self.token.push(b);
            return Ok(true);
        }
        // The wire protocol carries plain signed integers only.
        let text = std::str::from_utf8(&self.token).unwrap_or("");
        let value: i64 = text
            .parse()
            .map_err(|_| self.syntax(format!("invalid integer token {:?}", text)))?;
        self.lexer = Lexer::Structural;
        self.finish_integer(value);
        Ok(false)
    }

    fn step_literal(&mut self, b: u8) -> Result<bool, DecodeError> {
        if b.is_ascii_alphabetic() {
            self.token.push(b);
            return Ok(true);
        }
        if !matches!(self.token.as_slice(), b"true" | b"false" | b"null") {
            let text = String::from_utf8_lossy(&self.token).into_owned();
            return Err(self.syntax(format!("invalid literal token {:?}", text)));
        }
        self.lexer = Lexer::Structural;
        self.field = DecoderState::Idle;
        self.expect = Expect::CommaOrEnd;
        Ok(false)
    }

    fn start_string(&mut self, kind: StrKind) {
        self.token.clear();
        self.lexer = Lexer::Str {
            kind,
            escape: Escape::None,
        };
    }

    fn finish_string(&mut self, kind: StrKind) {
        match kind {
            StrKind::Key => {
                self.field = match self.token.as_slice() {
                    KEY_IMAGE => DecoderState::AwaitingImageValue,
                    KEY_SEC | KEY_USEC => DecoderState::AwaitingAuxValue,
                    _ => DecoderState::Idle,
                };
                self.expect = Expect::Colon;
            }
            StrKind::Value => {
                match BASE64.decode(&self.token) {
                    Ok(image) => (self.callback)(Some(&image)),
                    Err(err) => {
                        log::warn!("image payload failed base64 decode: {err}");
                        (self.callback)(None);
                    }
                }
                self.field = DecoderState::Idle;
                self.expect = Expect::CommaOrEnd;
            }
            StrKind::Skipped => {
                if self.stack.len() == 1 {
                    self.field = DecoderState::Idle;
                    self.expect = Expect::CommaOrEnd;
                }
            }
        }
    }

    fn finish_integer(&mut self, value: i64) {
        if self.field == DecoderState::AwaitingAuxValue {
            log::debug!("stream timestamp field: {value}");
        }
        // The aux integer is an ordinary field, not an object terminator:
        // the object stays open until its closing brace.
        self.field = DecoderState::Idle;
        self.expect = Expect::CommaOrEnd;
    }

    fn begin_object(&mut self) {
        self.stack.push(Container::Object);
        self.expect = Expect::KeyOrEnd;
    }

    fn end_top_object(&mut self) {
        self.stack.pop();
        self.field = DecoderState::Idle;
    }

    fn syntax(&self, message: String) -> DecodeError {
        DecodeError::Syntax {
            offset: self.offset,
            message,
        }
    }

    /// Drop the malformed object and arm resynchronization at the next
    /// top-level `{`.
    fn recover(&mut self) {
        self.stack.clear();
        self.token.clear();
        self.field = DecoderState::Idle;
        self.lexer = Lexer::Structural;
        self.expect = Expect::KeyOrEnd;
        self.resync = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_decoder() -> (StreamDecoder, Arc<Mutex<Vec<Option<Vec<u8>>>>>) {
        let seen: Arc<Mutex<Vec<Option<Vec<u8>>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let decoder = StreamDecoder::new(move |payload| {
            sink.lock().unwrap().push(payload.map(<[u8]>::to_vec));
        });
        (decoder, seen)
    }

    fn object_with_image(payload: &[u8]) -> String {
        format!(
            r#"{{"image":"{}","sec":4,"usec":16}}"#,
            BASE64.encode(payload)
        )
    }

    #[test]
    fn decodes_an_image_object() {
        let (mut decoder, seen) = collecting_decoder();
        decoder
            .push(object_with_image(b"hello frame").as_bytes())
            .expect("well-formed object");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Some(b"hello frame".to_vec())]
        );
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn field_order_does_not_matter() {
        let (mut decoder, seen) = collecting_decoder();
        let object = format!(r#"{{"sec":1,"usec":2,"image":"{}"}}"#, BASE64.encode(b"xyz"));
        decoder.push(object.as_bytes()).expect("reordered object");
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(b"xyz".to_vec())]);
    }

    #[test]
    fn survives_single_byte_chunking() {
        let (mut decoder, seen) = collecting_decoder();
        for b in object_with_image(&[0u8, 1, 2, 255]).as_bytes() {
            decoder.push(std::slice::from_ref(b)).expect("byte-at-a-time");
        }
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(vec![0u8, 1, 2, 255])]);
    }

    #[test]
    fn decodes_consecutive_objects_in_one_chunk() {
        let (mut decoder, seen) = collecting_decoder();
        let wire = format!("{}{}", object_with_image(b"one"), object_with_image(b"two"));
        decoder.push(wire.as_bytes()).expect("two objects");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Some(b"one".to_vec()), Some(b"two".to_vec())]
        );
    }

    #[test]
    fn aux_integer_does_not_terminate_the_object() {
        // "sec" arriving before "image" must not cost us the image.
        let (mut decoder, seen) = collecting_decoder();
        let object = format!(
            r#"{{"sec":99,"image":"{}","usec":7}}"#,
            BASE64.encode(b"after-aux")
        );
        decoder.push(object.as_bytes()).expect("aux first");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Some(b"after-aux".to_vec())]
        );
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn malformed_object_is_sacrificed_but_stream_continues() {
        let (mut decoder, seen) = collecting_decoder();
        let err = decoder
            .push(br#"{"image" 12}"#)
            .expect_err("missing colon must be reported");
        match err {
            DecodeError::Syntax { message, .. } => assert!(!message.is_empty()),
        }
        assert_eq!(decoder.state(), DecoderState::Idle);

        decoder
            .push(object_with_image(b"good").as_bytes())
            .expect("stream must stay alive after a bad object");
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(b"good".to_vec())]);
    }

    #[test]
    fn resyncs_within_the_same_chunk() {
        let (mut decoder, seen) = collecting_decoder();
        let wire = format!(r#"{{"image":}}{}"#, object_with_image(b"second"));
        decoder.push(wire.as_bytes()).expect_err("first object is bad");
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(b"second".to_vec())]);
    }

    #[test]
    fn invalid_base64_reports_a_null_frame() {
        let (mut decoder, seen) = collecting_decoder();
        decoder
            .push(br#"{"image":"a","sec":0,"usec":0}"#)
            .expect("structurally fine");
        assert_eq!(seen.lock().unwrap().as_slice(), &[None]);
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn unknown_keys_and_nested_values_are_skipped() {
        let (mut decoder, seen) = collecting_decoder();
        let object = format!(
            r#"{{"meta":{{"depth":[1,2,{{"x":"}}"}}]}},"image":"{}","flag":true}}"#,
            BASE64.encode(b"nested")
        );
        decoder.push(object.as_bytes()).expect("nested skip");
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(b"nested".to_vec())]);
    }

    #[test]
    fn key_seen_mid_chunk_moves_the_state_machine() {
        let (mut decoder, seen) = collecting_decoder();
        decoder.push(br#"{"image":"#).expect("prefix");
        assert_eq!(decoder.state(), DecoderState::AwaitingImageValue);
        let rest = format!(r#""{}"}}"#, BASE64.encode(b"late"));
        decoder.push(rest.as_bytes()).expect("suffix");
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(b"late".to_vec())]);
    }

    #[test]
    fn empty_payload_round_trips() {
        let (mut decoder, seen) = collecting_decoder();
        decoder
            .push(br#"{"image":"","sec":0,"usec":0}"#)
            .expect("empty image");
        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(Vec::new())]);
    }
}
