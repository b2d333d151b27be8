//! Line-oriented chat relay with named channels.
//!
//! One server process accepts many TCP clients, gives each a unique display
//! name, and relays plain-text lines between members of the same channel.
//! Each module covers one concern:
//!
//! - [`transport`] wraps tokio sockets: a retrying listener plus reader and
//!   writer tasks per connection.
//! - [`registry`] owns every live client and keeps the roster, the name
//!   directory, channel membership, and the slot table in step.
//! - [`reactor`] is the single event loop that mutates the registry.
//! - [`command`] turns one client line into a registry operation or a chat
//!   fan-out.
//! - [`protocol`] holds the wire literals: banner, prefix, replies.
//! - [`config`] and [`cli`] describe how the server is started; [`client`] is
//!   a small terminal client.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod protocol;
pub mod reactor;
pub mod registry;
pub mod transport;
