//! Ownership-indexed multiset with O(1) amortized insert and removal.
//!
//! Each owner holds an unordered list of ids; a reverse map records every
//! id's owner and its position in that list. Removal overwrites the
//! vacated slot with the list's last element and shrinks the list, fixing
//! up the moved element's recorded position.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct IndexedBag<O, I>
where
    O: Eq + Hash + Clone,
    I: Eq + Hash + Copy,
{
    items: HashMap<O, Vec<I>>,
    positions: HashMap<I, (O, usize)>,
}

impl<O, I> Default for IndexedBag<O, I>
where
    O: Eq + Hash + Clone,
    I: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            positions: HashMap::new(),
        }
    }
}

impl<O, I> IndexedBag<O, I>
where
    O: Eq + Hash + Clone,
    I: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id` to `owner`'s list. The id must not already be held.
    pub fn insert(&mut self, owner: O, id: I) {
        debug_assert!(!self.positions.contains_key(&id));
        let list = self.items.entry(owner.clone()).or_default();
        self.positions.insert(id, (owner, list.len()));
        list.push(id);
    }

    /// Swap-removes `id`, returning its former owner.
    pub fn remove(&mut self, id: I) -> Option<O> {
        let (owner, pos) = self.positions.remove(&id)?;
        let list = self.items.get_mut(&owner).expect("owner list exists");
        list.swap_remove(pos);
        if let Some(&moved) = list.get(pos) {
            self.positions
                .get_mut(&moved)
                .expect("moved id is indexed")
                .1 = pos;
        }
        if list.is_empty() {
            self.items.remove(&owner);
        }
        Some(owner)
    }

    pub fn owner_of(&self, id: I) -> Option<&O> {
        self.positions.get(&id).map(|(owner, _)| owner)
    }

    pub fn contains(&self, id: I) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn items_of(&self, owner: &O) -> &[I] {
        self.items.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Every recorded position matches the id's true array index, and
    /// the two maps describe the same id set.
    pub fn is_consistent(&self) -> bool {
        let listed: usize = self.items.values().map(Vec::len).sum();
        if listed != self.positions.len() {
            return false;
        }
        self.items.iter().all(|(owner, list)| {
            list.iter().enumerate().all(|(index, id)| {
                self.positions
                    .get(id)
                    .map(|(recorded_owner, recorded_index)| {
                        recorded_owner == owner && *recorded_index == index
                    })
                    .unwrap_or(false)
            })
        })
    }
}
