//! Min-heap of workers keyed by assigned container count.
//!
//! Placement scans the heap's backing array front to back and takes the
//! first worker that accepts a container. The root is always a least-loaded
//! worker, but later slots are only partially ordered, so under constraints
//! the chosen worker is not necessarily the least loaded valid one. This
//! reproduces existing placements exactly in tie cases.

/// Binary min-heap over worker indices.
#[derive(Debug, Clone)]
pub(crate) struct LoadHeap {
    /// Worker indices in heap order.
    order: Vec<usize>,
    /// Load per worker index.
    loads: Vec<usize>,
}

impl LoadHeap {
    /// Build a heap from per-worker loads. Worker `i` has load `loads[i]`.
    pub(crate) fn new(loads: Vec<usize>) -> Self {
        let mut heap = Self {
            order: (0..loads.len()).collect(),
            loads,
        };
        let n = heap.order.len();
        for i in (0..n / 2).rev() {
            heap.down(i);
        }
        heap
    }

    /// Worker indices in backing-array order.
    pub(crate) fn order(&self) -> &[usize] {
        &self.order
    }

    /// Load of worker `worker`.
    #[cfg(test)]
    pub(crate) fn load(&self, worker: usize) -> usize {
        self.loads[worker]
    }

    /// Add one container to the worker at heap position `pos`.
    pub(crate) fn increment(&mut self, pos: usize) {
        let worker = self.order[pos];
        self.loads[worker] += 1;
        self.fix(pos);
    }

    fn fix(&mut self, pos: usize) {
        if !self.down(pos) {
            self.up(pos);
        }
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.loads[self.order[i]] < self.loads[self.order[j]]
    }

    /// Sift down from `start`. Returns true if the element moved.
    fn down(&mut self, start: usize) -> bool {
        let n = self.order.len();
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.order.swap(i, child);
            i = child;
        }
        i > start
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.order.swap(parent, j);
            j = parent;
        }
    }
}
