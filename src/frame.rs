//! ESL frame parsing and classification
//!
//! A frame is a block of MIME-style headers terminated by a blank line,
//! followed by `Content-Length` bytes of body when that header is present.
//! [`FrameParser`] is an incremental state machine fed from the socket;
//! one [`FrameParser::parse`] call yields at most one complete frame.

use crate::{
    constants::*,
    error::{EslError, EslResult},
};
use bytes::{Buf, Bytes, BytesMut};
use indexmap::IndexMap;

/// Frame classification over the `Content-Type` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Server solicits authentication
    AuthRequest,
    /// Synchronous command reply (`Reply-Text: +OK ...` / `-ERR ...`)
    CommandReply,
    /// Synchronous API reply; body is the command's stdout
    ApiResponse,
    /// Event carried in the frame headers
    EventPlain,
    /// Event serialized as JSON in the body
    EventJson,
    /// Event serialized as XML in the body
    EventXml,
    /// Server is closing the socket
    DisconnectNotice,
    /// ACL refused the connection; body carries the reason
    RudeRejection,
    /// Anything else (log/data, future content types)
    Other(String),
}

impl ContentType {
    /// Classify a raw `Content-Type` header value.
    pub fn from_header(value: &str) -> Self {
        match value {
            CONTENT_TYPE_AUTH_REQUEST => ContentType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => ContentType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => ContentType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN => ContentType::EventPlain,
            CONTENT_TYPE_TEXT_EVENT_JSON => ContentType::EventJson,
            CONTENT_TYPE_TEXT_EVENT_XML => ContentType::EventXml,
            CONTENT_TYPE_DISCONNECT_NOTICE => ContentType::DisconnectNotice,
            CONTENT_TYPE_RUDE_REJECTION => ContentType::RudeRejection,
            other => ContentType::Other(other.to_string()),
        }
    }

    /// True for the three event encodings.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            ContentType::EventPlain | ContentType::EventJson | ContentType::EventXml
        )
    }
}

/// One complete frame off the wire.
///
/// Headers preserve insertion order and raw (still percent-encoded)
/// values; decoding happens at the accessor layer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame classification
    pub content_type: ContentType,
    /// Headers in wire order, values undecoded
    pub headers: IndexMap<String, String>,
    /// Body of exactly `Content-Length` bytes, when present
    pub body: Option<Bytes>,
}

impl Frame {
    /// Get a raw header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Body as UTF-8 text, lossy on invalid sequences.
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

enum ParseState {
    ReadHeaders,
    ReadBody {
        headers: IndexMap<String, String>,
        body_length: usize,
    },
}

/// Incremental ESL frame parser.
pub struct FrameParser {
    buffer: BytesMut,
    state: ParseState,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(SOCKET_BUF_SIZE),
            state: ParseState::ReadHeaders,
        }
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) -> EslResult<()> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_BUFFER_SIZE {
            tracing::error!(
                size = self.buffer.len(),
                limit = MAX_BUFFER_SIZE,
                "parse buffer overflow, protocol desync"
            );
            return Err(EslError::BufferOverflow {
                size: self.buffer.len(),
                limit: MAX_BUFFER_SIZE,
            });
        }
        Ok(())
    }

    /// True if the parser sits between frames with nothing buffered.
    ///
    /// EOF while this is false means the peer died mid-frame.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParseState::ReadHeaders) && self.buffer.is_empty()
    }

    /// Try to produce one frame from the buffered bytes.
    ///
    /// Returns `Ok(None)` until a full frame is available.
    pub fn parse(&mut self) -> EslResult<Option<Frame>> {
        loop {
            match &mut self.state {
                ParseState::ReadHeaders => {
                    let Some(end) = find_blank_line(&self.buffer) else {
                        return Ok(None);
                    };
                    let header_bytes = self.buffer.split_to(end.start);
                    self.buffer.advance(end.len);

                    let header_str = std::str::from_utf8(&header_bytes)?;
                    let headers = parse_header_block(header_str)?;

                    // A blank-line run with no headers (keepalive noise)
                    if headers.is_empty() {
                        continue;
                    }

                    let body_length = match headers.get(HEADER_CONTENT_LENGTH) {
                        Some(v) => {
                            let n: usize =
                                v.trim().parse().map_err(|_| EslError::InvalidHeader {
                                    header: format!("{}: {}", HEADER_CONTENT_LENGTH, v),
                                })?;
                            if n > MAX_MESSAGE_SIZE {
                                return Err(EslError::protocol(format!(
                                    "Content-Length {} exceeds limit {}",
                                    n, MAX_MESSAGE_SIZE
                                )));
                            }
                            n
                        }
                        None => 0,
                    };

                    if body_length == 0 {
                        return Ok(Some(build_frame(headers, None)));
                    }
                    self.state = ParseState::ReadBody {
                        headers,
                        body_length,
                    };
                }
                ParseState::ReadBody { body_length, .. } => {
                    if self.buffer.len() < *body_length {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(*body_length).freeze();
                    let ParseState::ReadBody { headers, .. } =
                        std::mem::replace(&mut self.state, ParseState::ReadHeaders)
                    else {
                        unreachable!()
                    };
                    return Ok(Some(build_frame(headers, Some(body))));
                }
            }
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn build_frame(headers: IndexMap<String, String>, body: Option<Bytes>) -> Frame {
    let content_type = headers
        .get(HEADER_CONTENT_TYPE)
        .map(|v| ContentType::from_header(v))
        .unwrap_or_else(|| ContentType::Other(String::new()));
    Frame {
        content_type,
        headers,
        body,
    }
}

struct BlankLine {
    /// Offset of the terminator in the buffer
    start: usize,
    /// Terminator length (`\n\n` = 2, `\r\n\r\n` = 4, mixed = 3)
    len: usize,
}

/// Find the header/body separator, tolerating `\r\n` line endings.
fn find_blank_line(buf: &[u8]) -> Option<BlankLine> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] != b'\n' {
            i += 1;
            continue;
        }
        // saw one newline; a second one (optionally preceded by \r) ends the block
        let mut j = i + 1;
        if j < buf.len() && buf[j] == b'\r' {
            j += 1;
        }
        if j < buf.len() && buf[j] == b'\n' {
            return Some(BlankLine {
                start: i,
                len: j + 1 - i,
            });
        }
        i += 1;
    }
    None
}

/// Parse `name: value` lines, preserving order and raw values.
fn parse_header_block(block: &str) -> EslResult<IndexMap<String, String>> {
    let mut headers = IndexMap::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.find(':') else {
            return Err(EslError::InvalidHeader {
                header: line.to_string(),
            });
        };
        let name = line[..colon].to_string();
        let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
        headers.insert(name, value.to_string());
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(data: &[u8]) -> Frame {
        let mut parser = FrameParser::new();
        parser.feed(data).unwrap();
        parser.parse().unwrap().expect("complete frame")
    }

    #[test]
    fn auth_request_frame() {
        let frame = parse_one(b"Content-Type: auth/request\n\n");
        assert_eq!(frame.content_type, ContentType::AuthRequest);
        assert!(frame.body.is_none());
    }

    #[test]
    fn command_reply_frame() {
        let frame = parse_one(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n");
        assert_eq!(frame.content_type, ContentType::CommandReply);
        assert_eq!(frame.header("Reply-Text"), Some("+OK accepted"));
    }

    #[test]
    fn api_response_with_body() {
        let frame = parse_one(b"Content-Type: api/response\nContent-Length: 10\n\nUP 0 years");
        assert_eq!(frame.content_type, ContentType::ApiResponse);
        assert_eq!(frame.body_text().as_deref(), Some("UP 0 years"));
    }

    #[test]
    fn crlf_terminated_headers() {
        let frame =
            parse_one(b"Content-Type: command/reply\r\nReply-Text: +OK\r\n\r\n");
        assert_eq!(frame.content_type, ContentType::CommandReply);
        assert_eq!(frame.header("Reply-Text"), Some("+OK"));
    }

    #[test]
    fn header_order_preserved() {
        let frame = parse_one(b"Content-Type: text/event-plain\nB: 2\nA: 1\nZ: 3\n\n");
        let names: Vec<&String> = frame.headers.keys().collect();
        assert_eq!(names, ["Content-Type", "B", "A", "Z"]);
    }

    #[test]
    fn incremental_feeding() {
        let mut parser = FrameParser::new();
        parser.feed(b"Content-Type: api/res").unwrap();
        assert!(parser.parse().unwrap().is_none());
        parser.feed(b"ponse\nContent-Length: 4\n\nbo").unwrap();
        assert!(parser.parse().unwrap().is_none());
        parser.feed(b"dy!").unwrap();
        let frame = parser.parse().unwrap().unwrap();
        assert_eq!(frame.body_text().as_deref(), Some("body"));
        // trailing byte belongs to the next frame
        assert!(!parser.is_idle());
    }

    #[test]
    fn short_body_not_emitted() {
        let mut parser = FrameParser::new();
        parser
            .feed(b"Content-Type: api/response\nContent-Length: 10\n\ntest")
            .unwrap();
        assert!(parser.parse().unwrap().is_none());
        assert!(!parser.is_idle());
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut parser = FrameParser::new();
        parser
            .feed(b"Content-Type: auth/request\n\nContent-Type: command/reply\nReply-Text: +OK\n\n")
            .unwrap();
        let first = parser.parse().unwrap().unwrap();
        let second = parser.parse().unwrap().unwrap();
        assert_eq!(first.content_type, ContentType::AuthRequest);
        assert_eq!(second.content_type, ContentType::CommandReply);
        assert!(parser.is_idle());
    }

    #[test]
    fn rude_rejection_classified() {
        let frame = parse_one(
            b"Content-Type: text/rude-rejection\nContent-Length: 24\n\nAccess Denied, go away.\n",
        );
        assert_eq!(frame.content_type, ContentType::RudeRejection);
        assert!(frame.body_text().unwrap().starts_with("Access Denied"));
    }

    #[test]
    fn header_without_colon_is_error() {
        let mut parser = FrameParser::new();
        parser.feed(b"garbage line\n\n").unwrap();
        assert!(matches!(
            parser.parse(),
            Err(EslError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn oversized_content_length_is_fatal() {
        let mut parser = FrameParser::new();
        parser
            .feed(b"Content-Type: api/response\nContent-Length: 999999999999\n\n")
            .unwrap();
        assert!(parser.parse().is_err());
    }

    #[test]
    fn raw_values_not_decoded_at_parse_time() {
        let frame = parse_one(b"Content-Type: text/event-plain\nEvent-Info: System%20Ready\n\n");
        assert_eq!(frame.header("Event-Info"), Some("System%20Ready"));
    }
}
