//! Disjoint Set Union over batch positions.
//!
//! Events in a batch are addressed by their index, so the forest is two flat
//! vectors instead of hash maps. Uses path halving and union by rank.

#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
    set_count: usize,
}

impl DisjointSet {
    /// Create `len` singleton sets
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
            set_count: len,
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Number of disjoint sets currently tracked
    pub fn set_count(&self) -> usize {
        self.set_count
    }

    /// Find the root of `index`, halving the path on the way up
    #[inline]
    pub fn find(&mut self, index: usize) -> usize {
        let mut current = index;
        while self.parent[current] != current {
            let grandparent = self.parent[self.parent[current]];
            self.parent[current] = grandparent;
            current = grandparent;
        }
        current
    }

    /// Merge the sets holding `a` and `b`. Returns false if they were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }

        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_a] = root_b;
                self.rank[root_b] = self.rank[root_b].saturating_add(1);
            }
        }
        self.set_count -= 1;
        true
    }

    pub fn same_set(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// Members of every set, each sorted ascending, sets ordered by smallest member
    pub fn sets(&mut self) -> Vec<Vec<usize>> {
        let mut slot_of_root = vec![usize::MAX; self.len()];
        let mut sets: Vec<Vec<usize>> = Vec::with_capacity(self.set_count);
        for index in 0..self.len() {
            let root = self.find(index);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = sets.len();
                sets.push(Vec::new());
            }
            sets[slot_of_root[root]].push(index);
        }
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singletons() {
        let mut dsu = DisjointSet::new(3);
        assert_eq!(dsu.set_count(), 3);
        assert!(!dsu.same_set(0, 1));
        assert_eq!(dsu.sets(), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_union_is_transitive() {
        let mut dsu = DisjointSet::new(5);
        assert!(dsu.union(0, 2));
        assert!(dsu.union(2, 4));
        assert!(!dsu.union(4, 0));
        assert!(dsu.same_set(0, 4));
        assert_eq!(dsu.set_count(), 3);
        assert_eq!(dsu.sets(), vec![vec![0, 2, 4], vec![1], vec![3]]);
    }

    #[test]
    fn test_long_chain_compresses() {
        let mut dsu = DisjointSet::new(1000);
        for i in 1..1000 {
            dsu.union(i - 1, i);
        }
        assert_eq!(dsu.set_count(), 1);
        let root = dsu.find(999);
        assert_eq!(dsu.find(0), root);
    }

    #[test]
    fn test_empty() {
        let mut dsu = DisjointSet::new(0);
        assert!(dsu.is_empty());
        assert!(dsu.sets().is_empty());
    }
}
