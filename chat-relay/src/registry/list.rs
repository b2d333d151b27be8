//! Doubly linked lists threaded through arena records.
//!
//! A record can sit on several lists at once (the roster and one channel's
//! membership), so each record carries one [`Link`] per [`Chain`]. Neighbours
//! are arena keys, never references; [`List::unlink`] is the single place
//! where head, tail, sole-element and interior removal are handled.

use super::arena::{Arena, Key};

/// Which of a record's links a list threads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Roster,
    Membership,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    prev: Option<Key>,
    next: Option<Key>,
}

/// Implemented by arena records that can be linked into lists.
pub trait Linked {
    fn link(&self, chain: Chain) -> &Link;
    fn link_mut(&mut self, chain: Chain) -> &mut Link;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct List {
    head: Option<Key>,
    tail: Option<Key>,
    len: usize,
}

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn front(&self) -> Option<Key> {
        self.head
    }

    #[cfg(test)]
    pub fn back(&self) -> Option<Key> {
        self.tail
    }

    /// Appends `key`; the record must not already be on a list of this chain.
    pub fn push_back<T: Linked>(&mut self, arena: &mut Arena<T>, chain: Chain, key: Key) {
        let prev = self.tail;
        match arena.get_mut(key) {
            Some(record) => {
                *record.link_mut(chain) = Link { prev, next: None };
            }
            None => return,
        }

        match prev.and_then(|tail| arena.get_mut(tail)) {
            Some(tail) => tail.link_mut(chain).next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
    }

    /// Detaches `key` in O(1). Keys that are not on this list are ignored.
    pub fn unlink<T: Linked>(&mut self, arena: &mut Arena<T>, chain: Chain, key: Key) {
        let Some(record) = arena.get_mut(key) else {
            return;
        };
        let Link { prev, next } = *record.link(chain);
        if prev.is_none() && self.head != Some(key) {
            return;
        }
        *record.link_mut(chain) = Link::default();

        match prev.and_then(|prev| arena.get_mut(prev)) {
            Some(prev) => prev.link_mut(chain).next = next,
            None => self.head = next,
        }
        match next.and_then(|next| arena.get_mut(next)) {
            Some(next) => next.link_mut(chain).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// The element after `key`, or `None` at the tail.
    pub fn next_of<T: Linked>(&self, arena: &Arena<T>, chain: Chain, key: Key) -> Option<Key> {
        arena.get(key).and_then(|record| record.link(chain).next)
    }

    pub fn iter<'a, T: Linked>(&self, arena: &'a Arena<T>, chain: Chain) -> Iter<'a, T> {
        Iter {
            arena,
            chain,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a, T> {
    arena: &'a Arena<T>,
    chain: Chain,
    cursor: Option<Key>,
}

impl<'a, T: Linked> Iterator for Iter<'a, T> {
    type Item = (Key, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let record = self.arena.get(key)?;
        self.cursor = record.link(self.chain).next;
        Some((key, record))
    }
}
