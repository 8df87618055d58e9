//! STOMP 1.2 frame codec.
//!
//! Text frames as they travel over the WebSocket:
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body^@
//! ```
//!
//! `^@` is the NUL octet. A bare EOL between frames is a heart-beat. One
//! WebSocket message may carry several frames and heart-beats back to back.
//!
//! Header names and values are escaped (`\\`, `\n`, `\r`, `\c`) in every
//! frame except CONNECT and CONNECTED, which stay raw for 1.0 compatibility.

use std::fmt;
use std::str::FromStr;

use super::StompError;

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (1.2 alias of CONNECT).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription request.
    Subscribe,
    /// Client subscription release.
    Unsubscribe,
    /// Client acknowledgement.
    Ack,
    /// Client negative acknowledgement.
    Nack,
    /// Transaction start.
    Begin,
    /// Transaction commit.
    Commit,
    /// Transaction abort.
    Abort,
    /// Client graceful shutdown.
    Disconnect,
    /// Server delivery on a subscription.
    Message,
    /// Server receipt.
    Receipt,
    /// Server error report.
    Error,
}

impl Command {
    /// Wire representation of this command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Whether header escaping applies to frames with this command.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first wins on lookup.
    pub headers: Vec<(String, String)>,
    /// Frame body (JSON text for this application).
    pub body: String,
}

/// Item decoded from one WebSocket text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A bare EOL keep-alive.
    HeartBeat,
    /// A complete frame.
    Frame(Frame),
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value. Per STOMP 1.2 the first occurrence wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode into wire text, including the trailing NUL.
    ///
    /// A `content-length` header is added for non-empty bodies unless the
    /// caller already supplied one.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

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

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Everything decoded from one WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded {
    /// Heart-beats and frames up to the first malformed frame, in wire order.
    pub items: Vec<Inbound>,
    /// Set when decoding stopped early.
    pub malformed: Option<Malformed>,
}

/// The point where decoding of a message gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    /// What was wrong with the frame.
    pub error: StompError,
    /// Undecoded remainder of the message, starting at the bad frame.
    pub rest: String,
}

impl Decoded {
    /// All items, or the error if any part of the message was malformed.
    pub fn into_result(self) -> Result<Vec<Inbound>, StompError> {
        match self.malformed {
            Some(malformed) => Err(malformed.error),
            None => Ok(self.items),
        }
    }
}

/// Decode every heart-beat and frame contained in one WebSocket message.
///
/// Frames are independent: a malformed frame stops decoding there, but the
/// items before it are still returned. Without a reliable terminator the
/// remainder cannot be resynchronized, so it is handed back undecoded.
pub fn decode(text: &str) -> Decoded {
    let mut decoded = Decoded::default();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("\r\n") {
            decoded.items.push(Inbound::HeartBeat);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('\n') {
            decoded.items.push(Inbound::HeartBeat);
            rest = tail;
        } else {
            match decode_one(rest) {
                Ok((frame, tail)) => {
                    decoded.items.push(Inbound::Frame(frame));
                    rest = tail;
                }
                Err(error) => {
                    decoded.malformed = Some(Malformed {
                        error,
                        rest: rest.to_string(),
                    });
                    break;
                }
            }
        }
    }

    decoded
}

/// Decode a single frame from the front of `input`, returning the remainder.
fn decode_one(input: &str) -> Result<(Frame, &str), StompError> {
    let mut pos = 0;

    let command_line = next_line(input, &mut pos)?;
    let command: Command = command_line.parse()?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let line = next_line(input, &mut pos)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());

    let body_and_rest = &input[pos..];
    let (body, rest) = match content_length {
        Some(len) => {
            let body = body_and_rest
                .get(..len)
                .ok_or(StompError::ContentLength(len))?;
            let after = &body_and_rest[len..];
            let rest = after
                .strip_prefix('\0')
                .ok_or(StompError::ContentLength(len))?;
            (body, rest)
        }
        None => {
            let nul = body_and_rest.find('\0').ok_or(StompError::Incomplete)?;
            (&body_and_rest[..nul], &body_and_rest[nul + 1..])
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        rest,
    ))
}

/// Read one EOL-terminated line starting at `pos`, tolerating `\r\n`.
fn next_line<'a>(input: &'a str, pos: &mut usize) -> Result<&'a str, StompError> {
    let rest = &input[*pos..];
    let end = rest.find('\n').ok_or(StompError::Incomplete)?;
    *pos += end + 1;
    let line = &rest[..end];
    Ok(line.strip_suffix('\r').unwrap_or(line))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(StompError::InvalidEscape(format!("\\{other}"))),
            None => return Err(StompError::InvalidEscape("\\".to_string())),
        }
    }
    Ok(out)
}
