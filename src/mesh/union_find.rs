//! Disjoint-set forest used for vertex clustering and fan detection.

/// Union-find over `0..n` with path halving and union by rank.
#[derive(Debug, Clone)]
pub(crate) struct UnionFind {
    /// Parent pointers (index of parent, or self if root).
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    /// Create a new union-find with n singleton sets.
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Find the root of the set containing `x`.
    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets containing `x` and `y`. Returns false if already joined.
    pub(crate) fn union(&mut self, x: usize, y: usize) -> bool {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return false;
        }
        match self.rank[root_x].cmp(&self.rank[root_y]) {
            std::cmp::Ordering::Less => self.parent[root_x] = root_y,
            std::cmp::Ordering::Greater => self.parent[root_y] = root_x,
            std::cmp::Ordering::Equal => {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
        true
    }

    /// Dense labels `0..k` for the sets, numbered by smallest member.
    pub(crate) fn labels(&mut self) -> (Vec<usize>, usize) {
        let n = self.parent.len();
        let mut root_label = vec![usize::MAX; n];
        let mut labels = vec![0; n];
        let mut count = 0;
        for x in 0..n {
            let r = self.find(x);
            if root_label[r] == usize::MAX {
                root_label[r] = count;
                count += 1;
            }
            labels[x] = root_label[r];
        }
        (labels, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_labels() {
        let mut uf = UnionFind::new(6);
        assert!(uf.union(4, 1));
        assert!(uf.union(1, 3));
        assert!(!uf.union(3, 4));
        let (labels, count) = uf.labels();
        assert_eq!(count, 4);
        assert_eq!(labels, vec![0, 1, 2, 1, 1, 3]);
    }
}
