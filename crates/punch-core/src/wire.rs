//! Punch wire format — the text datagrams exchanged with the broker and
//! between peers.
//!
//! One message per UDP datagram, no framing, no length prefix. Arguments
//! are separated by a single ASCII space and the first token selects the
//! command. Every datagram must fit in `MAX_DATAGRAM` bytes.
//!
//! | Direction | Form                          |
//! |-----------|-------------------------------|
//! | request   | `REG <name> <claimed-endpoint>` |
//! | request   | `GET <name>`                  |
//! | response  | `OK <endpoint>`               |
//! | response  | `NF`                          |
//! | response  | `NG`                          |
//!
//! The origin of a request is transport metadata and never part of the
//! payload. The claimed endpoint in `REG` is decoded but the broker records
//! the observed source address instead.

use std::fmt;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Receive buffer size. Longer datagrams are truncated by the OS.
pub const MAX_DATAGRAM: usize = 4096;

/// Default UDP port for the broker and for peers.
pub const DEFAULT_PORT: u16 = 65432;

/// Delay between a successful registration and the partner lookup.
pub const SETTLE_DELAY_SECS: u64 = 10;

/// Interval between keepalive datagrams sent to the partner.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 5;

/// Per-attempt timeout for a broker round trip.
pub const RPC_TIMEOUT_MS: u64 = 3000;

/// Attempts per broker round trip before the call fails.
pub const RPC_ATTEMPTS: u32 = 3;

pub const CMD_REGISTER: &str = "REG";
pub const CMD_LOOKUP: &str = "GET";
pub const RESP_OK: &str = "OK";
pub const RESP_NOT_FOUND: &str = "NF";
pub const RESP_NO_GOOD: &str = "NG";

// ── Requests ──────────────────────────────────────────────────────────────────

/// A request sent by a peer to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `REG <name> <claimed>`: register `name` at the sender's address.
    Register { name: String, claimed: String },
    /// `GET <name>`: look up the last registered endpoint for `name`.
    Lookup { name: String },
    /// Any other leading token. Answered with `NG`.
    Unknown { command: String },
}

impl Request {
    /// Decode a request datagram.
    ///
    /// Unknown commands decode successfully as `Request::Unknown`; a known
    /// command with missing arguments is a `WireError`.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let text = datagram_text(datagram)?;
        let mut parts = text.split(' ');
        let command = parts.next().unwrap_or_default();

        match command {
            CMD_REGISTER => Ok(Request::Register {
                name: required(parts.next(), CMD_REGISTER, "name")?,
                claimed: required(parts.next(), CMD_REGISTER, "claimed endpoint")?,
            }),
            CMD_LOOKUP => Ok(Request::Lookup {
                name: required(parts.next(), CMD_LOOKUP, "name")?,
            }),
            other => Ok(Request::Unknown {
                command: other.to_string(),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Register { name, claimed } => write!(f, "{CMD_REGISTER} {name} {claimed}"),
            Request::Lookup { name } => write!(f, "{CMD_LOOKUP} {name}"),
            Request::Unknown { command } => f.write_str(command),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// A broker response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK <endpoint>`: the endpoint text as recorded by the broker.
    Ok(String),
    /// `NF`: lookup miss.
    NotFound,
    /// `NG`: unrecognized or malformed request.
    NoGood,
}

impl Response {
    /// Decode a response datagram. Tolerates a trailing space after
    /// `NF` / `NG`, which older brokers emit.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let text = datagram_text(datagram)?;
        let mut parts = text.split(' ');

        match parts.next().unwrap_or_default() {
            RESP_OK => Ok(Response::Ok(required(parts.next(), RESP_OK, "endpoint")?)),
            RESP_NOT_FOUND => Ok(Response::NotFound),
            RESP_NO_GOOD => Ok(Response::NoGood),
            other => Err(WireError::UnexpectedPrefix(other.to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(endpoint) => write!(f, "{RESP_OK} {endpoint}"),
            Response::NotFound => f.write_str(RESP_NOT_FOUND),
            Response::NoGood => f.write_str(RESP_NO_GOOD),
        }
    }
}

// ── Keepalive ─────────────────────────────────────────────────────────────────

/// Peer-to-peer keepalive payload: `<name> <seq>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    pub name: String,
    pub seq: u64,
}

impl Keepalive {
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let text = datagram_text(datagram)?;
        let (name, seq) = text.rsplit_once(' ').ok_or_else(|| WireError::MissingArgument {
            command: "keepalive".to_string(),
            argument: "sequence",
        })?;
        validate_name(name)?;
        let seq = seq
            .parse()
            .map_err(|_| WireError::BadSequence(seq.to_string()))?;
        Ok(Keepalive {
            name: name.to_string(),
            seq,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Keepalive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.seq)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// A name must be non-empty and free of whitespace, otherwise it would
/// split into several arguments on the wire.
pub fn validate_name(name: &str) -> Result<(), WireError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(WireError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// UTF-8 text of a datagram with one trailing line ending removed.
fn datagram_text(datagram: &[u8]) -> Result<&str, WireError> {
    let text = std::str::from_utf8(datagram).map_err(|_| WireError::NotUtf8)?;
    let text = text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text);
    if text.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(text)
}

fn required(token: Option<&str>, command: &str, argument: &'static str) -> Result<String, WireError> {
    match token {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(WireError::MissingArgument {
            command: command.to_string(),
            argument,
        }),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("empty datagram")]
    Empty,

    #[error("{command} is missing its {argument} argument")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },

    #[error("unexpected response prefix {0:?}")]
    UnexpectedPrefix(String),

    #[error("invalid peer name {0:?}")]
    InvalidName(String),

    #[error("invalid keepalive sequence {0:?}")]
    BadSequence(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
