//! Channel directory: name lookup plus each channel's ordered member list.
//!
//! Channels are created on first join and live for the rest of the process,
//! so a [`ChannelId`] stays valid once handed out.

use std::collections::HashMap;

use super::list::List;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

#[derive(Debug)]
pub struct Channel {
    name: String,
    pub(super) members: List,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
    by_name: HashMap<String, ChannelId>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<ChannelId> {
        self.by_name.get(name).copied()
    }

    pub fn get_or_create(&mut self, name: &str) -> ChannelId {
        if let Some(id) = self.lookup(name) {
            return id;
        }

        let id = ChannelId(self.channels.len());
        self.channels.push(Channel {
            name: name.to_string(),
            members: List::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.0)
    }

    pub(super) fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels
            .iter()
            .enumerate()
            .map(|(index, channel)| (ChannelId(index), channel))
    }
}
