//! Wire format of the relay.
//!
//! Everything is newline-terminated text, which keeps the relay usable from
//! netcat-style tools. Clients send directives prefixed with
//! [`COMMAND_PREFIX`] or plain chat lines; the server answers with the
//! welcome banner, relayed chat lines, and the name collision reply.

use bytes::{BufMut, Bytes, BytesMut};

use crate::transport::ConnectionId;

pub const COMMAND_PREFIX: u8 = b'\\';

pub const DEFAULT_PORT: u16 = 50001;

pub const DEFAULT_GREETING: &str = "Hello, Welcome in this chat";

/// Sent to a client whose rename collides with another live client.
pub const NAME_TAKEN_REPLY: &str = "Username already exists\n";

/// Three-line welcome banner: a border of `=`, the greeting padded by one
/// space on each side, and the border again.
pub fn banner(greeting: &str) -> String {
    let padded = format!(" {greeting} ");
    let border = "=".repeat(padded.chars().count());
    format!("{border}\n{padded}\n{border}\n")
}

/// Formats a relayed chat line as `"<sender>> <text>\n"`. `text` is copied
/// byte for byte.
pub fn chat_line(sender: &str, text: &[u8]) -> Bytes {
    let mut line = BytesMut::with_capacity(sender.len() + text.len() + 3);
    line.put_slice(sender.as_bytes());
    line.put_slice(b"> ");
    line.put_slice(text);
    line.put_u8(b'\n');
    line.freeze()
}

pub fn default_name(id: ConnectionId) -> String {
    format!("user{id}")
}
