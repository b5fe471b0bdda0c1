//! STOMP 1.2 text frames carried over websocket messages.
//!
//! A websocket text message holds zero or more frames. A bare EOL between
//! frames is a heart-beat. Header values are escaped on every frame except
//! `CONNECT` and `CONNECTED`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";
/// Single EOL sent as an outgoing heart-beat.
pub const HEARTBEAT: &str = "\n";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("frame has no header terminator")]
    MissingHeaderTerminator,

    #[error("frame is not NUL terminated")]
    MissingNul,

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),

    #[error("invalid heart-beat header {0:?}")]
    InvalidHeartBeat(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. On repeats the first entry wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(login: &str, passcode: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", heart_beat.header_value())
            .header("login", login)
            .header("passcode", passcode)
    }

    pub fn send(destination: &str, body: &str) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "text/plain;charset=UTF-8")
            .header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serializes the frame including the trailing NUL.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// One unit read off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    HeartBeat,
    Frame(Frame),
}

/// Parses every heart-beat and frame contained in one websocket message.
pub fn parse_frames(text: &str) -> Result<Vec<Inbound>, FrameError> {
    let mut out = Vec::new();
    let mut rest = text;

    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        if trimmed.len() != rest.len() {
            out.push(Inbound::HeartBeat);
        }
        rest = trimmed;
        if rest.is_empty() {
            return Ok(out);
        }

        let (frame, remaining) = parse_frame(rest)?;
        out.push(Inbound::Frame(frame));
        rest = remaining;
    }
}

fn parse_frame(input: &str) -> Result<(Frame, &str), FrameError> {
    let (head, after_head) = split_head(input).ok_or(FrameError::MissingHeaderTerminator)?;
    let mut lines = head.lines();
    let command: Command = lines.next().unwrap_or_default().trim_end().parse()?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            if after_head.as_bytes().get(len) != Some(&0) {
                return Err(FrameError::MissingNul);
            }
            len
        }
        None => after_head.find('\0').ok_or(FrameError::MissingNul)?,
    };

    let frame = Frame {
        command,
        headers,
        body: after_head[..body_end].to_string(),
    };
    Ok((frame, &after_head[body_end + 1..]))
}

fn split_head(input: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in input.split_inclusive('\n') {
        if line == "\n" || line == "\r\n" {
            return Some((&input[..offset], &input[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals from the client's point of view. Zero disables a
/// direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// How often we send.
    pub outgoing: Duration,
    /// How often we expect to hear from the broker.
    pub incoming: Duration,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    pub fn header_value(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    /// Parses a `heart-beat` header value (`"sx,sy"` in milliseconds).
    pub fn parse(value: &str) -> Result<(u64, u64), FrameError> {
        let invalid = || FrameError::InvalidHeartBeat(value.to_string());
        let (first, second) = value.split_once(',').ok_or_else(invalid)?;
        let first = first.trim().parse().map_err(|_| invalid())?;
        let second = second.trim().parse().map_err(|_| invalid())?;
        Ok((first, second))
    }

    /// Effective intervals after reading the broker's `CONNECTED` header.
    ///
    /// Each direction runs at the slower of the two requested rates, and is
    /// disabled when either side asks for zero. A missing header disables
    /// both directions.
    pub fn negotiate(&self, server_header: Option<&str>) -> Result<HeartBeat, FrameError> {
        let Some(header) = server_header else {
            return Ok(HeartBeat::default());
        };
        let (server_out, server_in) = Self::parse(header)?;
        Ok(HeartBeat {
            outgoing: pick_interval(self.outgoing, server_in),
            incoming: pick_interval(self.incoming, server_out),
        })
    }
}

fn pick_interval(ours: Duration, theirs_ms: u64) -> Duration {
    if ours.is_zero() || theirs_ms == 0 {
        return Duration::ZERO;
    }
    ours.max(Duration::from_millis(theirs_ms))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn connect_frame_wire_format() {
        let frame = Frame::connect(
            "user",
            "pass:word",
            HeartBeat::new(Duration::from_millis(4000), Duration::from_millis(4000)),
        );
        assert_eq!(
            frame.to_text(),
            "CONNECT\naccept-version:1.2,1.1,1.0\nheart-beat:4000,4000\nlogin:user\npasscode:pass:word\n\n\0"
        );
    }

    #[test]
    fn send_frame_escapes_headers_and_sets_length() {
        let frame = Frame::send("/app/a:b", "héllo");
        let text = frame.to_text();
        assert!(text.starts_with("SEND\ndestination:/app/a\\cb\n"));
        assert!(text.contains("content-length:6\n"));
        assert!(text.ends_with("\n\nhéllo\0"));
    }

    #[test]
    fn parses_connected_with_heart_beat() {
        let parsed =
            parse_frames("CONNECTED\nversion:1.2\nheart-beat:0,10000\n\n\0").expect("parse");
        let [Inbound::Frame(frame)] = parsed.as_slice() else {
            panic!("expected one frame, got {parsed:?}");
        };
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
        assert_eq!(frame.get("heart-beat"), Some("0,10000"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn sent_frames_parse_back_unchanged() {
        let frame = Frame::send("/topic/x\ny", "body with \\ and : chars");
        let parsed = parse_frames(&frame.to_text()).expect("parse");
        assert_eq!(parsed, vec![Inbound::Frame(frame)]);
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let text = "MESSAGE\ndestination:/topic/a\ncontent-length:3\n\na\0b\0";
        let parsed = parse_frames(text).expect("parse");
        let [Inbound::Frame(frame)] = parsed.as_slice() else {
            panic!("expected one frame, got {parsed:?}");
        };
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn heart_beats_and_multiple_frames_in_one_message() {
        let text = "\n\r\nRECEIPT\nreceipt-id:1\n\n\0\nERROR\nmessage:bad login\n\nnope\0";
        let parsed = parse_frames(text).expect("parse");
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0], Inbound::HeartBeat);
        assert!(matches!(&parsed[1], Inbound::Frame(f) if f.command == Command::Receipt));
        assert_eq!(parsed[2], Inbound::HeartBeat);
        match &parsed[3] {
            Inbound::Frame(frame) => {
                assert_eq!(frame.command, Command::Error);
                assert_eq!(frame.get("message"), Some("bad login"));
                assert_eq!(frame.body, "nope");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn first_repeated_header_wins() {
        let parsed = parse_frames("MESSAGE\nfoo:1\nfoo:2\n\n\0").expect("parse");
        let [Inbound::Frame(frame)] = parsed.as_slice() else {
            panic!("expected one frame");
        };
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            parse_frames("BOGUS\n\n\0"),
            Err(FrameError::UnknownCommand("BOGUS".to_string()))
        );
        assert_eq!(
            parse_frames("MESSAGE\nfoo:1\n"),
            Err(FrameError::MissingHeaderTerminator)
        );
        assert_eq!(parse_frames("MESSAGE\n\nbody"), Err(FrameError::MissingNul));
        assert_eq!(
            parse_frames("MESSAGE\nfoo:a\\tb\n\n\0"),
            Err(FrameError::InvalidEscape("a\\tb".to_string()))
        );
        assert_eq!(
            parse_frames("MESSAGE\ncontent-length:9\n\nabc\0"),
            Err(FrameError::MissingNul)
        );
    }

    #[test]
    fn heart_beat_negotiation() {
        let ours = HeartBeat::new(Duration::from_millis(4000), Duration::from_millis(4000));

        let both = ours.negotiate(Some("10000,1000")).expect("negotiate");
        assert_eq!(both.outgoing, Duration::from_millis(4000));
        assert_eq!(both.incoming, Duration::from_millis(10000));

        let server_silent = ours.negotiate(Some("0,5000")).expect("negotiate");
        assert_eq!(server_silent.outgoing, Duration::from_millis(5000));
        assert_eq!(server_silent.incoming, Duration::ZERO);

        assert_eq!(ours.negotiate(None).expect("negotiate"), HeartBeat::default());
        assert!(ours.negotiate(Some("soon")).is_err());
    }
}
