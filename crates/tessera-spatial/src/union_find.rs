//! Disjoint-set forest with path compression and union by rank.

use std::collections::HashMap;

/// Disjoint sets over the indices `0..len`.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    /// Create `len` singleton sets.
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether there are no elements.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of the set containing `x`.
    ///
    /// Out-of-range indices are their own representative.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while let Some(&parent) = self.parent.get(root) {
            if parent == root {
                break;
            }
            root = parent;
        }

        let mut current = x;
        while current != root {
            let Some(slot) = self.parent.get_mut(current) else {
                break;
            };
            let next = *slot;
            *slot = root;
            current = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`. Returns `false` if they were
    /// already joined (or either index is out of range).
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        let (Some(&rank_a), Some(&rank_b)) = (self.rank.get(ra), self.rank.get(rb)) else {
            return false;
        };

        let (child, root) = if rank_a < rank_b { (ra, rb) } else { (rb, ra) };
        if let Some(slot) = self.parent.get_mut(child) {
            *slot = root;
        }
        if rank_a == rank_b {
            if let Some(rank) = self.rank.get_mut(root) {
                *rank = rank.saturating_add(1);
            }
        }
        true
    }

    /// Whether `a` and `b` are in the same set.
    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// All sets, each sorted ascending, ordered by their smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..self.len() {
            let root = self.find(i);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len().saturating_sub(1)
            });
            if let Some(group) = groups.get_mut(slot) {
                group.push(i);
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_find() {
        let mut uf = UnionFind::new(5);
        assert!(uf.union(0, 1));
        assert!(uf.union(3, 4));
        assert!(!uf.union(1, 0));
        assert!(uf.connected(0, 1));
        assert!(!uf.connected(1, 3));

        assert!(uf.union(1, 4));
        assert!(uf.connected(0, 3));
    }

    #[test]
    fn groups_are_ordered_by_smallest_member() {
        let mut uf = UnionFind::new(6);
        uf.union(5, 2);
        uf.union(4, 1);
        uf.union(1, 0);
        assert_eq!(uf.groups(), vec![vec![0, 1, 4], vec![2, 5], vec![3]]);
    }

    #[test]
    fn out_of_range_is_harmless() {
        let mut uf = UnionFind::new(2);
        assert_eq!(uf.find(9), 9);
        assert!(!uf.union(0, 9));
        assert_eq!(uf.groups().len(), 2);
    }
}
