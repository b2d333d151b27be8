//! Interpretation of client lines.
//!
//! A line starting with [`COMMAND_PREFIX`] is a directive; anything else is
//! chat for the sender's channel and is relayed as raw bytes. Parsing splits
//! the verb off at the first whitespace, so verbs of any length work the same
//! way. Directive arguments are read as UTF-8, lossily.

use std::borrow::Cow;

use bytes::Bytes;
use tracing::debug;

use crate::{
    protocol::{self, COMMAND_PREFIX, NAME_TAKEN_REPLY},
    registry::{ClientKey, Registry, RegistryError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    SetUsername(Cow<'a, str>),
    Join(Cow<'a, str>),
    Exit,
    Unknown(Cow<'a, str>),
    Chat(&'a [u8]),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a [u8]) -> Self {
        let Some(directive) = line.strip_prefix(&[COMMAND_PREFIX]) else {
            return Command::Chat(line);
        };

        let (verb, argument) = match directive.iter().position(u8::is_ascii_whitespace) {
            Some(at) => (&directive[..at], &directive[at + 1..]),
            None => (directive, &[][..]),
        };
        let argument = String::from_utf8_lossy(argument.trim_ascii());

        match verb {
            b"setusername" => Command::SetUsername(argument),
            b"join" => Command::Join(argument),
            b"exit" => Command::Exit,
            other => Command::Unknown(String::from_utf8_lossy(other)),
        }
    }
}

/// What became of the sender after its line was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stayed,
    Departed,
}

/// Applies one line from `sender` to the registry.
pub fn execute(registry: &mut Registry, sender: ClientKey, line: &[u8]) -> Outcome {
    match Command::parse(line) {
        Command::SetUsername(name) => {
            set_username(registry, sender, &name);
            Outcome::Stayed
        }
        Command::Join(channel) => {
            join(registry, sender, &channel);
            Outcome::Stayed
        }
        Command::Exit => {
            if let Some(name) = registry.remove(sender) {
                debug!(%name, "client left with exit");
            }
            Outcome::Departed
        }
        Command::Unknown(verb) => {
            debug!(%verb, "ignoring unknown command");
            Outcome::Stayed
        }
        Command::Chat(text) => {
            relay_chat(registry, sender, text);
            Outcome::Stayed
        }
    }
}

fn set_username(registry: &mut Registry, sender: ClientKey, name: &str) {
    if name.is_empty() {
        debug!("ignoring setusername without a name");
        return;
    }

    match registry.rename(sender, name) {
        Ok(()) => {}
        Err(RegistryError::NameTaken) => {
            let Some(client) = registry.client(sender) else {
                return;
            };
            if let Err(err) = client.send(Bytes::from_static(NAME_TAKEN_REPLY.as_bytes())) {
                debug!(error = %err, "failed to deliver name collision reply");
            }
        }
        Err(err) => debug!(error = %err, "rename failed"),
    }
}

fn join(registry: &mut Registry, sender: ClientKey, channel: &str) {
    if channel.is_empty() {
        debug!("ignoring join without a channel");
        return;
    }

    match registry.join(sender, channel) {
        Ok(_) => debug!(channel, "client joined channel"),
        Err(err) => debug!(error = %err, "join failed"),
    }
}

/// Sends `text` to every other member of the sender's channel.
///
/// Delivery is best effort: a recipient whose queue is gone is skipped and the
/// rest still get the line. A sender outside any channel is not told that
/// nobody heard it.
fn relay_chat(registry: &Registry, sender: ClientKey, text: &[u8]) {
    let Some(client) = registry.client(sender) else {
        return;
    };
    let Some(channel) = client.channel() else {
        debug!(name = client.name(), "dropping chat from client outside any channel");
        return;
    };

    let line = protocol::chat_line(client.name(), text);
    for (key, member) in registry.channel_members(channel) {
        if key == sender {
            continue;
        }
        if let Err(err) = member.send(line.clone()) {
            debug!(recipient = member.name(), error = %err, "chat delivery failed");
        }
    }
}
