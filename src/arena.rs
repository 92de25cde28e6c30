// src/arena.rs
//
// Slot storage with generation-checked handles.
//
// Modules and ports refer to each other through these handles instead of
// pointers. A handle outlives the slot it names only as a stale value that
// every lookup rejects.

use std::fmt;
use std::marker::PhantomData;

/// Handle into an [`Arena`]. The type parameter only tags what it points at.
pub struct Index<T> {
    slot: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Index<T> {
    #[inline]
    pub fn slot(self) -> usize {
        self.slot as usize
    }
}

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Index<T> {}

impl<T> PartialEq for Index<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Index<T> {}

impl<T> std::hash::Hash for Index<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Index<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Index<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.slot, self.generation).cmp(&(other.slot, other.generation))
    }
}

impl<T> fmt::Debug for Index<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
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
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Index<T> {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.entries[slot as usize];
            entry.value = Some(value);
            return Index {
                slot,
                generation: entry.generation,
                _marker: PhantomData,
            };
        }
        let slot = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        Index {
            slot,
            generation: 0,
            _marker: PhantomData,
        }
    }

    /// Free a slot. Outstanding handles to it become stale.
    pub fn remove(&mut self, index: Index<T>) -> Option<T> {
        let entry = self.entries.get_mut(index.slot())?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn get(&self, index: Index<T>) -> Option<&T> {
        self.entries
            .get(index.slot())
            .filter(|e| e.generation == index.generation)
            .and_then(|e| e.value.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, index: Index<T>) -> Option<&mut T> {
        self.entries
            .get_mut(index.slot())
            .filter(|e| e.generation == index.generation)
            .and_then(|e| e.value.as_mut())
    }

    #[inline]
    pub fn contains(&self, index: Index<T>) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every value; all handles issued so far become stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            if entry.value.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
            }
            self.free.push(slot as u32);
        }
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index<T>, &T)> {
        self.entries.iter().enumerate().filter_map(|(slot, e)| {
            e.value.as_ref().map(|v| {
                (
                    Index {
                        slot: slot as u32,
                        generation: e.generation,
                        _marker: PhantomData,
                    },
                    v,
                )
            })
        })
    }
}
