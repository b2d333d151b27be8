//! Generational arena holding registry records behind stable keys.
//!
//! Removing a value leaves a tombstone whose generation is bumped before the
//! slot is reused, so a key that outlived its value resolves to nothing
//! instead of to whichever record took its place.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    index: usize,
    generation: u32,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}v{})", self.index, self.generation)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant {
        generation: u32,
        next_free: Option<usize>,
    },
}

pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free_head {
            if let Some(&Entry::Vacant {
                generation,
                next_free,
            }) = self.entries.get(index)
            {
                self.entries[index] = Entry::Occupied { generation, value };
                self.free_head = next_free;
                return Key { index, generation };
            }
        }

        let index = self.entries.len();
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        Key {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Takes the value out, leaving a tombstone for the next insert to reuse.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let entry = self.entries.get_mut(key.index)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        let tombstone = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Entry::Occupied { value, .. } = std::mem::replace(entry, tombstone) else {
            return None;
        };
        self.free_head = Some(key.index);
        self.len -= 1;
        Some(value)
    }
}
