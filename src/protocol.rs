//! Fixed-width frames exchanged between clients and the server.
//!
//! - registration frame: sent once on the server's registration channel, `1` followed by the
//!   request, response and notification channel paths, each NUL padded to 40 bytes, plus a
//!   trailing NUL.
//! - request frame: 42 bytes on the client's request channel, an opcode digit followed by a
//!   NUL padded key.
//! - response frame: `XY\0` on the client's response channel, `X` is the opcode being answered
//!   and `Y` is `0` on success and `1` on failure.
//! - notification: `(key,value)` or `(key,DELETED)` on the client's notification channel.
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::{KvsError, Result};

/// maximum length of a key, a value or a channel path inside a frame
pub const MAX_STRING_SIZE: usize = 40;

/// size in bytes of a registration (connect) frame
pub const REGISTRATION_FRAME_SIZE: usize = 2 + 3 * MAX_STRING_SIZE;

/// size in bytes of a request frame
pub const REQUEST_FRAME_SIZE: usize = 2 + MAX_STRING_SIZE;

/// size in bytes of a response frame
pub const RESPONSE_FRAME_SIZE: usize = 3;

/// the value sent to subscribers of a key that was deleted
pub const DELETED: &str = "DELETED";

/// The operation codes of the wire protocol
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    /// register a new client connection
    Connect,
    /// end the client connection
    Disconnect,
    /// subscribe to changes of a key
    Subscribe,
    /// cancel a subscription
    Unsubscribe,
}

impl OpCode {
    /// the ASCII digit identifying this opcode on the wire
    pub fn as_byte(self) -> u8 {
        match self {
            OpCode::Connect => b'1',
            OpCode::Disconnect => b'2',
            OpCode::Subscribe => b'3',
            OpCode::Unsubscribe => b'4',
        }
    }

    /// converts an ASCII digit back into an opcode
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        match byte {
            b'1' => Some(OpCode::Connect),
            b'2' => Some(OpCode::Disconnect),
            b'3' => Some(OpCode::Subscribe),
            b'4' => Some(OpCode::Unsubscribe),
            _ => None,
        }
    }
}

/// The three channel paths a client registers with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    /// the channel the client writes its requests into
    pub request: PathBuf,
    /// the channel the server writes responses into
    pub response: PathBuf,
    /// the channel the server writes key change notifications into
    pub notification: PathBuf,
}

impl ChannelPaths {
    /// builds the conventional channel paths `req<id>`, `resp<id>` and `notif<id>` inside `dir`
    pub fn for_client(dir: &Path, client_id: &str) -> Self {
        ChannelPaths {
            request: dir.join(format!("req{}", client_id)),
            response: dir.join(format!("resp{}", client_id)),
            notification: dir.join(format!("notif{}", client_id)),
        }
    }

    /// encodes a registration frame for these paths
    ///
    /// # Errors
    /// returns [`KvsError::Frame`] if a path is longer than [`MAX_STRING_SIZE`] bytes
    pub fn encode(&self) -> Result<[u8; REGISTRATION_FRAME_SIZE]> {
        let mut frame = [0u8; REGISTRATION_FRAME_SIZE];
        frame[0] = OpCode::Connect.as_byte();
        for (i, path) in [&self.request, &self.response, &self.notification].iter().enumerate() {
            let start = 1 + i * MAX_STRING_SIZE;
            put_field(&mut frame[start..start + MAX_STRING_SIZE], path.as_os_str().as_bytes())?;
        }
        Ok(frame)
    }

    /// decodes a registration frame. Returns `None` for partial frames, frames with a wrong
    /// opcode and frames carrying an empty path.
    pub fn decode(frame: &[u8]) -> Option<ChannelPaths> {
        if frame.len() != REGISTRATION_FRAME_SIZE || frame[0] != OpCode::Connect.as_byte() {
            return None;
        }
        let field = |i: usize| {
            let start = 1 + i * MAX_STRING_SIZE;
            take_field(&frame[start..start + MAX_STRING_SIZE]).map(PathBuf::from)
        };
        Some(ChannelPaths {
            request: field(0)?,
            response: field(1)?,
            notification: field(2)?,
        })
    }
}

/// A request read from a client's request channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// end the connection
    Disconnect,
    /// subscribe the connection to `key`
    Subscribe(String),
    /// remove the connection's subscription of `key`
    Unsubscribe(String),
}

impl Request {
    /// the opcode of this request
    pub fn op(&self) -> OpCode {
        match self {
            Request::Disconnect => OpCode::Disconnect,
            Request::Subscribe(_) => OpCode::Subscribe,
            Request::Unsubscribe(_) => OpCode::Unsubscribe,
        }
    }

    /// encodes this request into a full size request frame
    pub fn encode(&self) -> Result<[u8; REQUEST_FRAME_SIZE]> {
        let mut frame = [0u8; REQUEST_FRAME_SIZE];
        frame[0] = self.op().as_byte();
        match self {
            Request::Disconnect => {}
            Request::Subscribe(key) | Request::Unsubscribe(key) => {
                put_field(&mut frame[1..1 + MAX_STRING_SIZE], key.as_bytes())?
            }
        }
        Ok(frame)
    }

    /// decodes the bytes of one read from a request channel.
    ///
    /// A disconnect only needs its opcode; subscribe and unsubscribe need a full frame with a
    /// non-empty key. Anything else (unknown opcodes, undersized reads) yields `None`.
    pub fn decode(frame: &[u8]) -> Option<Request> {
        match OpCode::from_byte(*frame.first()?)? {
            OpCode::Disconnect => Some(Request::Disconnect),
            OpCode::Subscribe if frame.len() >= REQUEST_FRAME_SIZE => {
                take_field(&frame[1..1 + MAX_STRING_SIZE]).map(Request::Subscribe)
            }
            OpCode::Unsubscribe if frame.len() >= REQUEST_FRAME_SIZE => {
                take_field(&frame[1..1 + MAX_STRING_SIZE]).map(Request::Unsubscribe)
            }
            _ => None,
        }
    }
}

/// The answer to a connect, disconnect, subscribe or unsubscribe request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Response {
    /// the operation being answered
    pub op: OpCode,
    /// whether the operation succeeded
    pub ok: bool,
}

impl Response {
    /// a successful response to `op`
    pub fn success(op: OpCode) -> Self {
        Response { op, ok: true }
    }

    /// a failed response to `op`
    pub fn failure(op: OpCode) -> Self {
        Response { op, ok: false }
    }

    /// encodes this response as `XY\0`
    pub fn encode(&self) -> [u8; RESPONSE_FRAME_SIZE] {
        [self.op.as_byte(), if self.ok { b'0' } else { b'1' }, 0]
    }

    /// decodes a response frame, the trailing NUL is optional
    pub fn decode(frame: &[u8]) -> Option<Response> {
        if frame.len() < 2 {
            return None;
        }
        let op = OpCode::from_byte(frame[0])?;
        match frame[1] {
            b'0' => Some(Response::success(op)),
            b'1' => Some(Response::failure(op)),
            _ => None,
        }
    }
}

/// formats the notification sent to subscribers of `key`. `None` means the key was deleted.
pub fn notification(key: &str, value: Option<&str>) -> String {
    format!("({},{})", key, value.unwrap_or(DELETED))
}

fn put_field(field: &mut [u8], value: &[u8]) -> Result<()> {
    if value.len() > field.len() {
        return Err(KvsError::Frame(format!(
            "{:?} is longer than {} bytes",
            String::from_utf8_lossy(value),
            field.len()
        )));
    }
    field[..value.len()].copy_from_slice(value);
    Ok(())
}

fn take_field(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if end == 0 {
        return None;
    }
    std::str::from_utf8(&field[..end]).ok().map(String::from)
}
