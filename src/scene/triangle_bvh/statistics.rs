use std::fmt::Display;

use crate::util::Stats;

use super::{CompressedNodeLink, NodeLink, TriangleBvh};

/// Shape of a built hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct BvhStatistics {
    /// Number of nodes on the path from the root to each leaf, leaf included.
    pub depth: Stats,
    /// Number of non-empty children of each inner node.
    pub inner_node_fill: Stats,
    /// Number of triangles in each leaf.
    pub leaf_fill: Stats,
}

impl TriangleBvh {
    pub fn statistics(&self) -> BvhStatistics {
        let mut leaf_fill = Stats::default();
        self.leaf_fill_recursive(self.root, &mut leaf_fill);

        BvhStatistics {
            depth: self.depth_statistics_recursive(self.root),
            inner_node_fill: self
                .inner_nodes
                .iter()
                .map(|node| node.occupied.count_ones() as usize)
                .collect(),
            leaf_fill,
        }
    }

    pub(super) fn log_statistics(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let statistics = self.statistics();
        tracing::debug!(
            inner_nodes = self.inner_nodes.len(),
            triangle_packs = self.triangle_packs.len(),
            heap_size = self.heap_size(),
            "built bvh: {statistics}"
        );
    }

    fn depth_statistics_recursive(&self, link: CompressedNodeLink) -> Stats {
        match link.decode() {
            NodeLink::Null => Stats::default(),
            NodeLink::Leaf { .. } => Stats::new_single(1),
            NodeLink::Inner { index } => {
                let mut ret = self.inner_nodes[index]
                    .child_links
                    .iter()
                    .map(|child| self.depth_statistics_recursive(*child))
                    .fold(Stats::default(), |a, b| a.merge(&b));

                ret.min += 1;
                ret.max += 1;
                ret.avg += 1.0;

                ret
            }
        }
    }

    fn leaf_fill_recursive(&self, link: CompressedNodeLink, stats: &mut Stats) {
        match link.decode() {
            NodeLink::Null => {}
            NodeLink::Leaf { indices } => stats.add_sample(
                indices
                    .iter()
                    .map(|pack| self.triangle_packs[pack].valid.count_ones() as usize)
                    .sum(),
            ),
            NodeLink::Inner { index } => {
                for child in self.inner_nodes[index].child_links {
                    self.leaf_fill_recursive(child, stats);
                }
            }
        }
    }
}

impl Display for BvhStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "depth {}; inner node child count {}; leaf fill {}",
            self.depth, self.inner_node_fill, self.leaf_fill
        )
    }
}

#[cfg(test)]
mod test {
    use super::super::{LEAF_NODE_MAX_TRIANGLES, test::grid_scene};
    use super::*;
    use crate::{arena::Arena, scene::SceneGeometry};
    use assert2::assert;

    #[test]
    fn grid_statistics() {
        let scene = grid_scene(8);
        let bvh = TriangleBvh::build(&scene);
        let statistics = bvh.statistics();

        // Every triangle sits in exactly one leaf
        let leaf_total = statistics.leaf_fill.avg * statistics.leaf_fill.count as f32;
        assert!((leaf_total - scene.triangle_count() as f32).abs() < 0.5);
        assert!(statistics.leaf_fill.max <= LEAF_NODE_MAX_TRIANGLES);
        assert!(statistics.leaf_fill.min >= 1);
        assert!(statistics.depth.min >= 2);
        assert!(statistics.depth.count == statistics.leaf_fill.count);
        assert!(statistics.inner_node_fill.max <= 8);
    }

    #[test]
    fn single_leaf() {
        let scene = grid_scene(1);
        let bvh = TriangleBvh::build(&scene);
        let statistics = bvh.statistics();
        assert!(statistics.depth == Stats::new_single(1));
        assert!(statistics.leaf_fill == Stats::new_single(4));
        assert!(statistics.inner_node_fill.count == 0);
    }

    #[test]
    fn empty() {
        let bvh = TriangleBvh::build(&SceneGeometry::new(&Arena::new()));
        let statistics = bvh.statistics();
        assert!(statistics.depth.count == 0);
        assert!(statistics.leaf_fill.count == 0);
        assert!(format!("{statistics}").contains("0 samples"));
    }
}
