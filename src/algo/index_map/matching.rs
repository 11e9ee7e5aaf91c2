//! Maximum matching on general graphs.
//!
//! Extraction pairs triangles into quads, which is a matching problem on the
//! dual graph of the surface. The dual graph is not bipartite, so augmenting
//! paths are searched with Edmonds' blossom shrinking: a breadth-first
//! search that contracts every odd cycle it closes into its base vertex.
//!
//! Searches only reset the vertices they touched, so repairing a nearly
//! perfect matching costs time proportional to the regions searched rather
//! than the graph.

use std::collections::VecDeque;

/// Marker for an unmatched vertex or a missing tree parent.
pub(crate) const UNMATCHED: usize = usize::MAX;

/// Augmenting-path search over an adjacency list.
#[derive(Debug)]
pub(crate) struct Blossom<'a> {
    adj: &'a [Vec<usize>],
    mate: Vec<usize>,
    parent: Vec<usize>,
    base: Vec<usize>,
    /// Even vertices of the current search tree.
    even: Vec<bool>,
    in_blossom: Vec<bool>,
    /// Stamp of the last ancestor walk that passed through a vertex.
    seen: Vec<usize>,
    stamp: usize,
    touched: Vec<usize>,
    is_touched: Vec<bool>,
    queue: VecDeque<usize>,
}

impl<'a> Blossom<'a> {
    /// Start from the matching `mate`, which must be symmetric.
    pub(crate) fn new(adj: &'a [Vec<usize>], mate: Vec<usize>) -> Self {
        let n = adj.len();
        debug_assert_eq!(mate.len(), n);
        Self {
            adj,
            mate,
            parent: vec![UNMATCHED; n],
            base: (0..n).collect(),
            even: vec![false; n],
            in_blossom: vec![false; n],
            seen: vec![0; n],
            stamp: 0,
            touched: Vec::new(),
            is_touched: vec![false; n],
            queue: VecDeque::new(),
        }
    }

    /// Mate of `v`, or [`UNMATCHED`].
    #[inline]
    pub(crate) fn mate(&self, v: usize) -> usize {
        self.mate[v]
    }

    /// The matching.
    pub(crate) fn into_mates(self) -> Vec<usize> {
        self.mate
    }

    /// Search an augmenting path from the free vertex `root` through
    /// vertices below `limit` and flip it. Returns whether the matching grew.
    pub(crate) fn augment_from(&mut self, root: usize, limit: usize) -> bool {
        if self.mate[root] != UNMATCHED {
            return false;
        }
        let end = self.search(root, limit);
        if let Some(mut v) = end {
            while v != UNMATCHED {
                let pv = self.parent[v];
                let next = self.mate[pv];
                self.mate[v] = pv;
                self.mate[pv] = v;
                v = next;
            }
        }
        self.reset();
        end.is_some()
    }

    fn touch(&mut self, v: usize) {
        if !self.is_touched[v] {
            self.is_touched[v] = true;
            self.touched.push(v);
        }
    }

    fn reset(&mut self) {
        for v in self.touched.drain(..) {
            self.parent[v] = UNMATCHED;
            self.base[v] = v;
            self.even[v] = false;
            self.in_blossom[v] = false;
            self.is_touched[v] = false;
        }
        self.queue.clear();
    }

    fn push_even(&mut self, v: usize) {
        self.touch(v);
        self.even[v] = true;
        self.queue.push_back(v);
    }

    /// Breadth-first search of the alternating tree rooted at `root`.
    /// Returns the free vertex that ends an augmenting path.
    fn search(&mut self, root: usize, limit: usize) -> Option<usize> {
        let adj = self.adj;
        self.push_even(root);
        while let Some(v) = self.queue.pop_front() {
            for &to in &adj[v] {
                if to >= limit || self.base[v] == self.base[to] || self.mate[v] == to {
                    continue;
                }
                let outer = to == root
                    || (self.mate[to] != UNMATCHED && self.parent[self.mate[to]] != UNMATCHED);
                if outer {
                    let lca = self.common_base(v, to);
                    for &u in &self.touched {
                        self.in_blossom[u] = false;
                    }
                    self.mark_path(v, lca, to);
                    self.mark_path(to, lca, v);
                    for i in 0..self.touched.len() {
                        let u = self.touched[i];
                        if self.in_blossom[self.base[u]] {
                            self.base[u] = lca;
                            if !self.even[u] {
                                self.even[u] = true;
                                self.queue.push_back(u);
                            }
                        }
                    }
                } else if self.parent[to] == UNMATCHED {
                    self.touch(to);
                    self.parent[to] = v;
                    let mate = self.mate[to];
                    if mate == UNMATCHED {
                        return Some(to);
                    }
                    self.push_even(mate);
                }
            }
        }
        None
    }

    /// Lowest common ancestor base of `a` and `b` in the search tree.
    fn common_base(&mut self, mut a: usize, mut b: usize) -> usize {
        self.stamp += 1;
        loop {
            a = self.base[a];
            self.seen[a] = self.stamp;
            if self.mate[a] == UNMATCHED {
                break;
            }
            a = self.parent[self.mate[a]];
        }
        loop {
            b = self.base[b];
            if self.seen[b] == self.stamp {
                return b;
            }
            b = self.parent[self.mate[b]];
        }
    }

    /// Flag the blossom path from `v` down to `lca`, rerouting parents so the
    /// cycle can be walked from either side.
    fn mark_path(&mut self, mut v: usize, lca: usize, mut child: usize) {
        while self.base[v] != lca {
            let mate = self.mate[v];
            self.in_blossom[self.base[v]] = true;
            self.in_blossom[self.base[mate]] = true;
            self.parent[v] = child;
            child = mate;
            v = self.parent[mate];
        }
    }
}
