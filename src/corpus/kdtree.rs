//! Static k-d tree over fixed-length feature vectors.
//!
//! The tree is an implicit balanced layout: `order` is a permutation of the
//! point indices where each subrange `[lo, hi)` stores its splitting point at
//! `(lo + hi) / 2`, left subtree before it and right subtree after it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Clone, Debug)]
pub struct KdTree {
    points: Vec<Vec<f32>>,
    order: Vec<usize>,
    /// Split axis for the node stored at each slot of `order`.
    axes: Vec<usize>,
    dims: usize,
}

/// A query result: point index and Euclidean distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    dist_sq: f32,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then(self.index.cmp(&other.index))
    }
}

impl KdTree {
    /// Build over `points`; all points must share the same dimension.
    pub fn build(points: Vec<Vec<f32>>) -> Self {
        let dims = points.first().map_or(0, Vec::len);
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut axes = vec![0; points.len()];
        if dims > 0 {
            split(&points, &mut order, &mut axes, 0, dims);
        }
        Self {
            points,
            order,
            axes,
            dims,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn point(&self, index: usize) -> Option<&[f32]> {
        self.points.get(index).map(Vec::as_slice)
    }

    /// The `k` nearest points to `query`, closest first. `k` is clamped to the tree size.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let k = k.min(self.points.len());
        if k == 0 {
            return Vec::new();
        }

        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.search(query, k, 0, self.order.len(), &mut heap);

        heap.into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                index: c.index,
                distance: c.dist_sq.sqrt(),
            })
            .collect()
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        lo: usize,
        hi: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = (lo + hi) / 2;
        let index = self.order[mid];
        let point = &self.points[index];

        let candidate = Candidate {
            dist_sq: squared_distance(query, point),
            index,
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }

        let axis = self.axes[mid];
        let diff = query.get(axis).copied().unwrap_or(0.0) - point[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search(query, k, near.0, near.1, heap);

        let must_visit_far = heap.len() < k || heap.peek().is_some_and(|w| diff * diff <= w.dist_sq);
        if must_visit_far {
            self.search(query, k, far.0, far.1, heap);
        }
    }
}

fn split(points: &[Vec<f32>], order: &mut [usize], axes: &mut [usize], offset: usize, dims: usize) {
    if order.is_empty() {
        return;
    }
    let axis = widest_axis(points, order, dims);
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));
    axes[offset + mid] = axis;

    let (left, rest) = order.split_at_mut(mid);
    split(points, left, axes, offset, dims);
    split(points, &mut rest[1..], axes, offset + mid + 1, dims);
}

fn widest_axis(points: &[Vec<f32>], order: &[usize], dims: usize) -> usize {
    (0..dims)
        .map(|axis| {
            let (lo, hi) = order.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &i| {
                (lo.min(points[i][axis]), hi.max(points[i][axis]))
            });
            (axis, hi - lo)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(axis, _)| axis)
}

pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
