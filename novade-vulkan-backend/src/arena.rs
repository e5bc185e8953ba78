//! Generation-checked slot storage.
//!
//! Callers hold [`ImageHandle`]s instead of references. Removing an entry
//! bumps its slot's generation, so a handle that outlived its entry is
//! detected instead of silently aliasing whatever reuses the slot.

/// Opaque reference to an image owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> Slot<T> {
    fn get_mut(&mut self, handle: ImageHandle) -> &mut T {
        match &mut self.value {
            Some(value) if self.generation == handle.generation => value,
            _ => panic!("stale image handle {handle:?}"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free: Vec::new() }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> ImageHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ImageHandle { index, generation: slot.generation };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| panic!("image arena is full"));
        self.slots.push(Slot { generation: 0, value: Some(value) });
        ImageHandle { index, generation: 0 }
    }

    pub fn contains(&self, handle: ImageHandle) -> bool {
        self.try_get(handle).is_some()
    }

    pub fn try_get(&self, handle: ImageHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// # Panics
    ///
    /// If `handle` does not refer to a live entry.
    pub fn get(&self, handle: ImageHandle) -> &T {
        self.try_get(handle)
            .unwrap_or_else(|| panic!("stale image handle {handle:?}"))
    }

    /// # Panics
    ///
    /// If `handle` does not refer to a live entry.
    pub fn get_mut(&mut self, handle: ImageHandle) -> &mut T {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) => slot.get_mut(handle),
            None => panic!("stale image handle {handle:?}"),
        }
    }

    /// Mutable access to two distinct entries at once.
    ///
    /// # Panics
    ///
    /// If the handles refer to the same slot or either one is stale.
    pub fn pair_mut(&mut self, a: ImageHandle, b: ImageHandle) -> (&mut T, &mut T) {
        assert_ne!(a.index, b.index, "an image cannot be both source and destination");
        let (low, high) = if a.index < b.index { (a, b) } else { (b, a) };
        if high.index as usize >= self.slots.len() {
            panic!("stale image handle {high:?}");
        }

        let (head, tail) = self.slots.split_at_mut(high.index as usize);
        let low_value = head[low.index as usize].get_mut(low);
        let high_value = tail[0].get_mut(high);
        if a.index < b.index {
            (low_value, high_value)
        } else {
            (high_value, low_value)
        }
    }

    /// # Panics
    ///
    /// If `handle` does not refer to a live entry.
    pub fn remove(&mut self, handle: ImageHandle) -> T {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation);
        let Some((slot, value)) = slot.and_then(|slot| slot.value.take().map(|value| (slot, value)))
        else {
            panic!("stale image handle {handle:?}");
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        value
    }

    /// Removes every live entry.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                values.push(value);
            }
        }
        values
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_handles_become_stale() {
        let mut arena = Arena::new();
        let first = arena.insert("first");
        assert_eq!(arena.remove(first), "first");
        assert!(!arena.contains(first));

        let second = arena.insert("second");
        assert_ne!(first, second, "reused slot must carry a new generation");
        assert_eq!(*arena.get(second), "second");
        assert!(arena.try_get(first).is_none());
    }

    #[test]
    #[should_panic(expected = "stale image handle")]
    fn using_a_released_handle_panics() {
        let mut arena = Arena::new();
        let handle = arena.insert(1);
        arena.remove(handle);
        arena.get(handle);
    }

    #[test]
    #[should_panic(expected = "stale image handle")]
    fn releasing_twice_panics() {
        let mut arena = Arena::new();
        let handle = arena.insert(1);
        arena.remove(handle);
        arena.remove(handle);
    }

    #[test]
    fn pair_mut_returns_entries_in_argument_order() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        {
            let (x, y) = arena.pair_mut(b, a);
            assert_eq!((*x, *y), (2, 1));
            *x += 10;
            *y += 20;
        }
        assert_eq!(*arena.get(a), 21);
        assert_eq!(*arena.get(b), 12);
    }

    #[test]
    #[should_panic(expected = "both source and destination")]
    fn pair_mut_rejects_aliasing() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.pair_mut(a, a);
    }

    #[test]
    fn drain_empties_the_arena() {
        let mut arena = Arena::new();
        let handles: Vec<_> = (0..3).map(|i| arena.insert(i)).collect();
        arena.remove(handles[1]);
        let mut drained = arena.drain();
        drained.sort();
        assert_eq!(drained, vec![0, 2]);
        assert!(arena.is_empty());
        assert!(handles.iter().all(|&h| !arena.contains(h)));
    }
}
