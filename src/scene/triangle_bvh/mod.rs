mod building;
mod packet_intersection;
mod ray_bvh_intersection;
mod statistics;

use std::mem;

use index_vec::IndexVec;

use crate::geometry::{
    BarycentricCoordinates, FloatType, LANES, Triangle, WorldBox, WorldBox8, WorldPoint8,
};

use super::GeometryIdx;

pub use packet_intersection::PacketStackCache;
pub use ray_bvh_intersection::StackCache;
pub use statistics::BvhStatistics;

const INNER_NODE_CHILDREN: usize = LANES;
const LEAF_NODE_PACKET_SIZE: usize = LANES;
const LEAF_NODE_MAX_PACKETS: usize = 2;
const LEAF_NODE_MAX_TRIANGLES: usize = LEAF_NODE_PACKET_SIZE * LEAF_NODE_MAX_PACKETS;

/// Immutable 8-wide bounding volume hierarchy over the triangles of a frozen scene.
#[derive(Clone, Debug)]
pub struct TriangleBvh {
    bounding_box: WorldBox,
    root: CompressedNodeLink,

    inner_nodes: IndexVec<InnerNodeIdx, InnerNode>,
    triangle_packs: IndexVec<TrianglePackIdx, TrianglePack>,

    /// Origin of every triangle slot, indexed by pack * LEAF_NODE_PACKET_SIZE + lane.
    /// None for padding lanes.
    triangle_refs: IndexVec<TriangleIdx, Option<TriangleRef>>,
}

#[derive(Clone, Debug)]
struct InnerNode {
    /// Padded bounds of the children, lanes of unused children are degenerate boxes.
    child_bounds: WorldBox8,
    child_links: [CompressedNodeLink; INNER_NODE_CHILDREN],
    /// Bit mask of lanes holding a child.
    occupied: u64,
}

#[derive(Clone, Debug)]
struct TrianglePack {
    triangles: Triangle<WorldPoint8>,
    /// Bit mask of lanes holding a real triangle, the rest is padding.
    valid: u64,
}

/// Identifies the scene triangle stored in a slot of the structure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TriangleRef {
    pub geometry: GeometryIdx,
    /// Index of the triangle within its geometry.
    pub triangle: u32,
}

/// Closest intersection found for one ray.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BvhHit {
    pub t: FloatType,
    pub uv: BarycentricCoordinates<FloatType>,
    pub triangle: TriangleRef,
}

/// Best hit while traversing, identified by slot so that ties can be resolved by storage order.
#[derive(Copy, Clone, Debug)]
struct LeafHitRecord {
    t: FloatType,
    slot: TriangleIdx,
    uv: BarycentricCoordinates<FloatType>,
}

impl LeafHitRecord {
    fn new(t_max: FloatType) -> LeafHitRecord {
        LeafHitRecord {
            t: t_max,
            slot: TriangleIdx::default(),
            uv: BarycentricCoordinates::default(),
        }
    }

    /// Closer hits win, equal distances go to the lower slot.
    fn is_improved_by(&self, t: FloatType, slot: TriangleIdx) -> bool {
        t < self.t || (t == self.t && slot < self.slot)
    }

    fn is_hit(&self) -> bool {
        self.slot != TriangleIdx::default()
    }
}

impl TriangleBvh {
    pub fn bounding_box(&self) -> &WorldBox {
        &self.bounding_box
    }

    /// Number of real triangles stored, without padding.
    pub fn triangle_count(&self) -> usize {
        self.triangle_packs
            .iter()
            .map(|pack| pack.valid.count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// Heap memory owned by the structure.
    pub fn heap_size(&self) -> usize {
        self.inner_nodes.raw.capacity() * mem::size_of::<InnerNode>()
            + self.triangle_packs.raw.capacity() * mem::size_of::<TrianglePack>()
            + self.triangle_refs.raw.capacity() * mem::size_of::<Option<TriangleRef>>()
    }

    fn resolve(&self, best: &LeafHitRecord) -> Option<BvhHit> {
        if !best.is_hit() {
            return None;
        }
        Some(BvhHit {
            t: best.t,
            uv: best.uv,
            triangle: self.triangle_refs[best.slot]?,
        })
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
struct CompressedNodeLink(u32);

#[derive(Clone, Debug, PartialEq, Eq)]
enum NodeLink {
    Null,
    Inner { index: InnerNodeIdx },
    Leaf { indices: TrianglePackIdxRange },
}

impl CompressedNodeLink {
    const COUNT_BITS: u32 = 3;
    const COUNT_MASK: u32 = (1 << Self::COUNT_BITS) - 1;
    const NULL_VALUE: u32 = (u32::MAX >> Self::COUNT_BITS) << Self::COUNT_BITS;

    pub const MAX_INDEX: u32 = (u32::MAX >> Self::COUNT_BITS) - 1;
    pub const MIN_COUNT: u32 = 1;
    pub const MAX_COUNT: u32 = (1 << Self::COUNT_BITS) - 1;

    pub const NULL: Self = Self(Self::NULL_VALUE);

    /// Create a new leaf link, panics if size or count are out of range
    fn new_leaf(index: TrianglePackIdx, count: u32) -> Self {
        assert!(count >= Self::MIN_COUNT);
        assert!(count <= Self::MAX_COUNT);
        Self((index.raw() << Self::COUNT_BITS) | count)
    }

    /// Create a new inner node link, panics if size is out of range
    fn new_inner(index: InnerNodeIdx) -> Self {
        Self(index.raw() << Self::COUNT_BITS)
    }

    fn decode(&self) -> NodeLink {
        if self.is_null() {
            NodeLink::Null
        } else {
            let count = self.0 & Self::COUNT_MASK;
            let index = self.0 >> Self::COUNT_BITS;

            if count == 0 {
                NodeLink::Inner {
                    index: InnerNodeIdx::from_raw_unchecked(index),
                }
            } else {
                NodeLink::Leaf {
                    indices: TrianglePackIdxRange::new(
                        TrianglePackIdx::from_raw_unchecked(index),
                        count,
                    ),
                }
            }
        }
    }

    fn is_null(&self) -> bool {
        self.0 == Self::NULL_VALUE
    }
}

impl Default for CompressedNodeLink {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Debug for CompressedNodeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLink")
            .field("0", &self.0)
            .field("<decoded>", &self.decode())
            .finish()
    }
}

index_vec::define_index_type! {
    struct InnerNodeIdx = u32;
    MAX_INDEX = CompressedNodeLink::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    struct TrianglePackIdx = u32;
    MAX_INDEX = CompressedNodeLink::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    struct TriangleIdx = usize;
    MAX_INDEX = usize::MAX - 1;
    DEFAULT = TriangleIdx::from_raw_unchecked(usize::MAX);
}

impl TrianglePackIdx {
    fn to_triangle_idx(self, lane: usize) -> TriangleIdx {
        ((self.raw() as usize) * LEAF_NODE_PACKET_SIZE + lane).into()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TrianglePackIdxRange {
    pub first: TrianglePackIdx,
    pub last: TrianglePackIdx,
}

impl TrianglePackIdxRange {
    pub fn new(first: TrianglePackIdx, count: u32) -> TrianglePackIdxRange {
        TrianglePackIdxRange {
            first,
            last: first + (count as usize),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = TrianglePackIdx> {
        (u32::from(self.first)..u32::from(self.last)).map(TrianglePackIdx::from)
    }
}
