/// Index into a [`Slab`], valid only for the value it was returned for.
///
/// A key carries the generation of its slot. Once the value is removed the
/// slot's generation moves on, so an old key can never reach a newer value
/// stored in the same place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Packs the key into a single `u64`, suitable for `epoll_event.u64`.
    pub(crate) fn to_u64(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`to_u64`](Self::to_u64).
    pub(crate) fn from_u64(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// An arena with stable, generation-checked indices.
///
/// Values are stored in a contiguous vector and addressed by [`Key`].
/// Removed slots are recycled by later insertions.
///
/// # Examples
///
/// ```rust,ignore
/// let mut slab = Slab::new();
/// let key = slab.insert(42);
/// assert_eq!(slab.remove(key), Some(42));
/// assert_eq!(slab.remove(key), None);
/// ```
pub(crate) struct Slab<T> {
    /// Storage, including vacant slots.
    slots: Vec<Slot<T>>,
    /// Stack of vacant slot indices.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value and returns its key.
    ///
    /// A vacant slot is reused if available, otherwise the slab grows.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);

            return Key {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Removes the value behind `key`.
    ///
    /// Returns `None` if the key is stale or was never issued.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;

        Some(value)
    }

    /// Returns a shared reference to the value behind `key`.
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Returns a mutable reference to the value behind `key`.
    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Number of stored values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the slab holds no value.
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over the stored values together with their keys.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Key {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_key_is_rejected() {
        let mut slab = Slab::new();
        let first = slab.insert("first");
        assert_eq!(slab.remove(first), Some("first"));

        let second = slab.insert("second");
        assert_eq!(slab.get(first), None, "Stale key must not reach the new value");
        assert_eq!(slab.get(second), Some(&"second"));
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn test_iter_skips_vacant_slots() {
        let mut slab = Slab::new();
        let first = slab.insert('a');
        let second = slab.insert('b');
        let third = slab.insert('c');
        slab.remove(second);

        let live: Vec<_> = slab.iter().collect();
        assert_eq!(live, vec![(first, &'a'), (third, &'c')]);
    }

    #[test]
    fn test_key_survives_u64_packing() {
        let mut slab = Slab::new();
        for i in 0..5 {
            let key = slab.insert(i);
            slab.remove(key);
        }
        let key = slab.insert(99);
        assert_eq!(Key::from_u64(key.to_u64()), key);
    }
}
