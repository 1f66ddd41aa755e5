pub mod kdtree;

use kdtree::{KdTree, Neighbor};

use crate::audio::features::FeatureVector;

/// Normalized corpus vectors with the source time offset of each analysis hop.
///
/// Built wholesale from one source buffer; a new source means a new index.
#[derive(Clone, Debug)]
pub struct CorpusIndex {
    offsets: Vec<f64>,
    tree: KdTree,
}

impl CorpusIndex {
    pub fn new(offsets: Vec<f64>, features: Vec<FeatureVector>) -> Self {
        debug_assert_eq!(offsets.len(), features.len());
        Self {
            offsets,
            tree: KdTree::build(features),
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.tree.dims()
    }

    /// Time offset in seconds of the hop stored at `index`.
    pub fn offset(&self, index: usize) -> Option<f64> {
        self.offsets.get(index).copied()
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn feature(&self, index: usize) -> Option<&[f32]> {
        self.tree.point(index)
    }

    /// `k` nearest hops to `feature`, closest first; `k` is clamped to the corpus size.
    pub fn nearest(&self, feature: &[f32], k: usize) -> Vec<Neighbor> {
        self.tree.nearest(feature, k)
    }
}
