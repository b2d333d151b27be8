//! Process-wide client state owned by the reactor.
//!
//! [`Registry`] keeps four views of the same set of clients consistent:
//!
//! - the roster, a linked list in connection order;
//! - the identity directory, display name → client;
//! - the channel directory, each channel with its own member list;
//! - the slot table, one dense readiness slot per client.
//!
//! Clients live in a generational [`arena`] and are referred to by
//! [`ClientKey`] everywhere outside the slot table, because slot indices move
//! when another client disconnects.

pub mod arena;
pub mod channels;
pub mod list;
pub mod slots;

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    protocol,
    transport::{Connection, ConnectionId, Inbound, ReadEvent, TransportError},
};
use arena::Arena;
use channels::ChannelDirectory;
use list::{Chain, Link, Linked, List};
use slots::SlotTable;

pub use arena::Key as ClientKey;
pub use channels::{Channel, ChannelId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("name is held by another client")]
    NameTaken,
    #[error("no live client for {0:?}")]
    UnknownClient(ClientKey),
}

#[derive(Debug)]
pub struct Client {
    connection: Connection,
    name: String,
    slot: usize,
    channel: Option<ChannelId>,
    roster: Link,
    membership: Link,
}

impl Client {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.connection.write(bytes)
    }
}

impl Linked for Client {
    fn link(&self, chain: Chain) -> &Link {
        match chain {
            Chain::Roster => &self.roster,
            Chain::Membership => &self.membership,
        }
    }

    fn link_mut(&mut self, chain: Chain) -> &mut Link {
        match chain {
            Chain::Roster => &mut self.roster,
            Chain::Membership => &mut self.membership,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    clients: Arena<Client>,
    names: HashMap<String, ClientKey>,
    connections: HashMap<ConnectionId, ClientKey>,
    channels: ChannelDirectory,
    roster: List,
    slots: SlotTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly accepted connection under its default name
    /// (`user<id>`, suffixed with `_2`, `_3`, ... if someone already took it).
    pub fn register(&mut self, connection: Connection) -> ClientKey {
        let id = connection.id();
        let name = self.unique_default_name(id);

        let key = self.clients.insert(Client {
            connection,
            name: name.clone(),
            slot: 0,
            channel: None,
            roster: Link::default(),
            membership: Link::default(),
        });
        let slot = self.slots.allocate(key);
        if let Some(client) = self.clients.get_mut(key) {
            client.slot = slot;
        }

        self.names.insert(name, key);
        self.connections.insert(id, key);
        self.roster.push_back(&mut self.clients, Chain::Roster, key);
        key
    }

    fn unique_default_name(&self, id: ConnectionId) -> String {
        let base = protocol::default_name(id);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.names.contains_key(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        candidate
    }

    /// Moves `key` to `new_name` in the identity directory.
    ///
    /// Fails without touching anything when another live client holds the
    /// name. Renaming to one's current name succeeds and changes nothing.
    pub fn rename(&mut self, key: ClientKey, new_name: &str) -> Result<(), RegistryError> {
        let client = self
            .clients
            .get_mut(key)
            .ok_or(RegistryError::UnknownClient(key))?;

        match self.names.get(new_name) {
            Some(&holder) if holder == key => return Ok(()),
            Some(_) => return Err(RegistryError::NameTaken),
            None => {}
        }

        let old = std::mem::replace(&mut client.name, new_name.to_string());
        self.names.remove(&old);
        self.names.insert(new_name.to_string(), key);
        debug!(from = %old, to = new_name, "client renamed");
        Ok(())
    }

    /// Puts `key` into `channel_name`, creating the channel on first use.
    ///
    /// A client belongs to one channel at a time, so joining leaves the
    /// previous channel. Re-joining the current channel is a no-op.
    pub fn join(&mut self, key: ClientKey, channel_name: &str) -> Result<ChannelId, RegistryError> {
        let current = self
            .clients
            .get(key)
            .ok_or(RegistryError::UnknownClient(key))?
            .channel;
        let target = self.channels.get_or_create(channel_name);
        if current == Some(target) {
            return Ok(target);
        }

        if let Some(previous) = current {
            self.leave_channel(key, previous);
        }
        if let Some(channel) = self.channels.get_mut(target) {
            channel
                .members
                .push_back(&mut self.clients, Chain::Membership, key);
        }
        if let Some(client) = self.clients.get_mut(key) {
            client.channel = Some(target);
        }
        Ok(target)
    }

    fn leave_channel(&mut self, key: ClientKey, channel: ChannelId) {
        if let Some(channel) = self.channels.get_mut(channel) {
            channel
                .members
                .unlink(&mut self.clients, Chain::Membership, key);
        }
        if let Some(client) = self.clients.get_mut(key) {
            client.channel = None;
        }
    }

    /// Drops `key` from every index, compacts its slot, and only then closes
    /// its connection. Returns the name it held.
    pub fn remove(&mut self, key: ClientKey) -> Option<String> {
        let client = self.clients.get(key)?;
        let id = client.connection.id();
        let slot = client.slot;
        let channel = client.channel;
        self.names.remove(&client.name);
        self.connections.remove(&id);

        if let Some(channel) = channel {
            self.leave_channel(key, channel);
        }
        self.roster.unlink(&mut self.clients, Chain::Roster, key);

        if let Some(moved) = self.slots.release(slot) {
            if let Some(displaced) = self.clients.get_mut(moved) {
                trace!(connection = %displaced.id(), from = self.slots.live() + 1, to = slot, "slot reassigned");
                displaced.slot = slot;
            }
        }

        let client = self.clients.remove(key)?;
        client.connection.close();
        Some(client.name)
    }

    /// Removes every client, e.g. on shutdown. Returns how many were removed.
    pub fn drain(&mut self) -> usize {
        let mut removed = 0;
        while let Some(key) = self.roster.front() {
            if self.remove(key).is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    /// Queues a transport event on the slot of the client owning its
    /// connection. Returns false when that client is already gone.
    pub fn mark_ready(&mut self, inbound: Inbound) -> bool {
        let Some(key) = self.lookup_by_connection(inbound.connection) else {
            trace!(connection = %inbound.connection, "event for departed connection");
            return false;
        };
        let Some(client) = self.clients.get(key) else {
            return false;
        };
        self.slots.push_ready(client.slot, inbound.event);
        true
    }

    /// Takes the events queued for `key` in this cycle.
    pub fn take_ready(&mut self, key: ClientKey) -> VecDeque<ReadEvent> {
        match self.clients.get(key) {
            Some(client) => self.slots.take_ready(client.slot),
            None => VecDeque::new(),
        }
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<ClientKey> {
        self.names.get(name).copied()
    }

    pub fn lookup_by_connection(&self, id: ConnectionId) -> Option<ClientKey> {
        self.connections.get(&id).copied()
    }

    pub fn client(&self, key: ClientKey) -> Option<&Client> {
        self.clients.get(key)
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    pub fn live_slots(&self) -> usize {
        self.slots.live()
    }

    pub fn roster(&self) -> list::Iter<'_, Client> {
        self.roster.iter(&self.clients, Chain::Roster)
    }

    pub fn roster_front(&self) -> Option<ClientKey> {
        self.roster.front()
    }

    pub fn roster_next(&self, key: ClientKey) -> Option<ClientKey> {
        self.roster.next_of(&self.clients, Chain::Roster, key)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channel_by_name(&self, name: &str) -> Option<ChannelId> {
        self.channels.lookup(name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_members(&self, id: ChannelId) -> impl Iterator<Item = (ClientKey, &Client)> {
        self.channels
            .get(id)
            .into_iter()
            .flat_map(move |channel| channel.members.iter(&self.clients, Chain::Membership))
    }
}
