use std::array;

use index_vec::IndexVec;
use ordered_float::OrderedFloat;

use crate::{
    geometry::{Triangle, WorldBox, WorldBox8, WorldPoint, WorldPoint8},
    scene::SceneGeometry,
};

use super::{
    CompressedNodeLink, INNER_NODE_CHILDREN, InnerNode, LEAF_NODE_MAX_TRIANGLES,
    LEAF_NODE_PACKET_SIZE, TriangleBvh, TrianglePack, TriangleRef,
};

/// Triangle of the scene while it is being sorted into the tree.
#[derive(Clone, Debug)]
struct BuildTriangle {
    triangle: Triangle<WorldPoint>,
    centroid: WorldPoint,
    reference: TriangleRef,
}

impl TriangleBvh {
    /// Builds the structure over every triangle of the scene.
    /// The result only depends on the scene contents and their order of ingestion.
    #[tracing::instrument(level = "debug", skip_all, fields(triangles = scene.triangle_count()))]
    pub fn build(scene: &SceneGeometry) -> TriangleBvh {
        let mut triangles: Vec<BuildTriangle> = scene
            .triangles()
            .map(|(geometry, triangle, points)| BuildTriangle {
                centroid: points.centroid(),
                triangle: points,
                reference: TriangleRef { geometry, triangle },
            })
            .collect();

        let bounding_box = WorldBox::from_points(vertices_iter(&triangles))
            .map_or_else(WorldBox::degenerate, |b| b.padded());

        let mut bvh = TriangleBvh {
            bounding_box,
            root: CompressedNodeLink::NULL,

            inner_nodes: IndexVec::new(),
            triangle_packs: IndexVec::new(),
            triangle_refs: IndexVec::new(),
        };

        bvh.root = bvh.build_recursive(&mut triangles);
        bvh.log_statistics();

        bvh
    }

    fn build_recursive(&mut self, triangles: &mut [BuildTriangle]) -> CompressedNodeLink {
        if triangles.is_empty() {
            CompressedNodeLink::NULL
        } else if triangles.len() <= LEAF_NODE_MAX_TRIANGLES {
            self.build_leaf(triangles)
        } else {
            self.build_inner_node(triangles)
        }
    }

    fn build_inner_node(&mut self, triangles: &mut [BuildTriangle]) -> CompressedNodeLink {
        let split_indices = split_triangles(triangles);

        // Create placeholder node that will be overwriten later
        let node_index = self.inner_nodes.push(InnerNode {
            child_bounds: WorldBox8::splat(&WorldBox::degenerate()),
            child_links: [CompressedNodeLink::NULL; INNER_NODE_CHILDREN],
            occupied: 0,
        });

        let child_boxes: [Option<WorldBox>; INNER_NODE_CHILDREN] = array::from_fn(|i| {
            let triangles = &triangles[split_indices[i]..split_indices[i + 1]];
            WorldBox::from_points(vertices_iter(triangles)).map(|b| b.padded())
        });
        let occupied = child_boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_some())
            .fold(0u64, |acc, (i, _)| acc | (1 << i));

        // Insert the children
        let child_links = array::from_fn(|i| {
            let triangles = &mut triangles[split_indices[i]..split_indices[i + 1]];
            self.build_recursive(triangles)
        });

        // Replace the placeholder with an actual inner node
        self.inner_nodes[node_index] = InnerNode {
            child_bounds: WorldBox8::gather(&child_boxes),
            child_links,
            occupied,
        };

        CompressedNodeLink::new_inner(node_index)
    }

    fn build_leaf(&mut self, triangles: &[BuildTriangle]) -> CompressedNodeLink {
        assert!(!triangles.is_empty());
        let packet_count = triangles.len().div_ceil(LEAF_NODE_PACKET_SIZE);
        let link = CompressedNodeLink::new_leaf(self.triangle_packs.next_idx(), packet_count as u32);

        for chunk in triangles.chunks(LEAF_NODE_PACKET_SIZE) {
            let geometry: Vec<Triangle<WorldPoint>> =
                chunk.iter().map(|t| t.triangle.clone()).collect();
            self.triangle_packs.push(TrianglePack {
                triangles: Triangle::<WorldPoint8>::gather(&geometry),
                valid: (1u64 << chunk.len()) - 1,
            });
            self.triangle_refs.extend(
                (0..LEAF_NODE_PACKET_SIZE).map(|lane| chunk.get(lane).map(|t| t.reference)),
            );
        }

        link
    }
}

/// Iterates over vertices of the triangles
fn vertices_iter(triangles: &[BuildTriangle]) -> impl Iterator<Item = &WorldPoint> {
    triangles.iter().flat_map(|t| t.triangle.iter())
}

/// Reorder the triangles and return an array of indices in the triangle array, where the
/// output bins should be split. Array is one larger than INNER_NODE_CHILDREN, first item is always 0,
/// last item is always triangles.len().
///
/// Three rounds of median splits, every range is split along the widest extent of its centroids.
fn split_triangles(triangles: &mut [BuildTriangle]) -> [usize; INNER_NODE_CHILDREN + 1] {
    let mut split_indices = [0; INNER_NODE_CHILDREN + 1];
    split_indices[INNER_NODE_CHILDREN] = triangles.len();

    let mut step = INNER_NODE_CHILDREN;
    while step > 1 {
        for first in (0..INNER_NODE_CHILDREN).step_by(step) {
            let begin = split_indices[first];
            let end = split_indices[first + step];
            let range = &mut triangles[begin..end];

            sort_along_widest_axis(range);
            split_indices[first + step / 2] = begin + range.len() / 2;
        }
        step /= 2;
    }

    split_indices
}

/// Stable sort, so that equal centroids keep their order of ingestion.
fn sort_along_widest_axis(triangles: &mut [BuildTriangle]) {
    let Some(bounds) = WorldBox::from_points(triangles.iter().map(|t| &t.centroid)) else {
        return;
    };
    let axis = bounds.size().imax();
    triangles.sort_by_cached_key(|t| OrderedFloat(t.centroid[axis]));
}
