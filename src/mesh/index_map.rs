use serde::{Deserialize, Serialize};

/// Old-to-new location index map produced by a re-mesh.
///
/// Every old index is either mapped to its new index or marked deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMap {
    map: Vec<Option<usize>>,
}

impl IndexMap {
    /// The identity map over `0..len`.
    pub fn identity(len: usize) -> Self {
        Self { map: (0..len).map(Some).collect() }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Grows the map so that `old` is covered; new entries map to themselves.
    fn cover(&mut self, old: usize) {
        while self.map.len() <= old {
            let next = self.map.len();
            self.map.push(Some(next));
        }
    }

    pub fn set_new_index(&mut self, old: usize, new: usize) {
        self.cover(old);
        self.map[old] = Some(new);
    }

    pub fn set_deleted(&mut self, old: usize) {
        self.cover(old);
        self.map[old] = None;
    }

    pub fn contains(&self, old: usize) -> bool {
        old < self.map.len()
    }

    pub fn is_deleted(&self, old: usize) -> bool {
        matches!(self.map.get(old), Some(None))
    }

    /// The new index of a surviving location; `None` if deleted or never covered.
    pub fn new_index(&self, old: usize) -> Option<usize> {
        self.map.get(old).copied().flatten()
    }

    pub fn is_identity(&self) -> bool {
        self.map.iter().enumerate().all(|(i, m)| *m == Some(i))
    }

    /// Old indices that were deleted, ascending.
    pub fn deleted_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.map.iter().enumerate().filter_map(|(i, m)| m.is_none().then_some(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_until_edited() {
        let mut map = IndexMap::identity(4);
        assert!(map.is_identity());
        map.set_deleted(1);
        map.set_new_index(2, 1);
        map.set_new_index(3, 2);
        assert!(!map.is_identity());
        assert!(map.is_deleted(1));
        assert_eq!(map.new_index(3), Some(2));
        assert_eq!(map.new_index(7), None);
        assert!(!map.is_deleted(7));
        assert_eq!(map.deleted_indices().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn editing_beyond_the_end_grows_the_map() {
        let mut map = IndexMap::identity(0);
        map.set_deleted(2);
        assert_eq!(map.len(), 3);
        assert_eq!(map.new_index(1), Some(1));
    }
}
