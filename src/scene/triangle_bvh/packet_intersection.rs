use std::array;

use arrayvec::ArrayVec;
use assert2::debug_assert;
use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{
    BvhHit, CompressedNodeLink, INNER_NODE_CHILDREN, InnerNode, LeafHitRecord, NodeLink,
    TriangleBvh, TrianglePackIdxRange,
};
use crate::{
    geometry::{
        FloatType, LANES, RayIntersectionExt as _, RayPacket, SimdFloatType, Triangle, WorldBox8,
        WorldPoint8,
    },
    util::{
        bit_iter,
        simba::{fast_max, fast_min, lane_bits},
    },
};

/// Traversal stack for ray packets.
/// Every entry carries the lanes that still need the node and their entry distances.
#[derive(Clone, Debug, Default)]
pub struct PacketStackCache {
    stack: Vec<(CompressedNodeLink, u64, SimdFloatType)>,
}

impl TriangleBvh {
    /// Finds the closest intersection for every active lane of the packet.
    ///
    /// Lanes are traversed together, the nodes are split per lane and the lanes are
    /// tested against one splatted box or triangle at a time. This performs exactly
    /// the same per lane arithmetic as [`TriangleBvh::intersect`], results are bit identical.
    pub fn intersect_packet(
        &self,
        packet: &RayPacket,
        stack: &mut PacketStackCache,
    ) -> [Option<BvhHit>; LANES] {
        if packet.active == 0 || self.root.is_null() {
            return array::from_fn(|_| None);
        }

        let mut best: [LeafHitRecord; LANES] =
            array::from_fn(|i| LeafHitRecord::new(packet.t_max.extract(i)));
        let mut best_t = packet.t_max;

        debug_assert!(stack.stack.is_empty());
        stack.stack.push((self.root, packet.active, packet.t_min));

        while let Some((link, lanes, node_t1)) = stack.stack.pop() {
            // Lanes that found a hit closer than the node's entry point can skip it
            let lanes = lanes & lane_bits(node_t1.simd_le(best_t));
            if lanes == 0 {
                continue;
            }

            match link.decode() {
                NodeLink::Null => continue,
                NodeLink::Inner { index } => {
                    let node = &self.inner_nodes[index];
                    let mut children = node.intersect_packet(packet, lanes, best_t);
                    children.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
                    stack.stack.extend(
                        children
                            .into_iter()
                            .map(|(_, link, lanes, t1)| (link, lanes, t1)),
                    );
                }
                NodeLink::Leaf { indices } => {
                    self.intersect_triangles_packet(indices, packet, lanes, &mut best, &mut best_t);
                }
            }
        }

        array::from_fn(|i| {
            if packet.active & (1 << i) != 0 {
                self.resolve(&best[i])
            } else {
                None
            }
        })
    }

    fn intersect_triangles_packet(
        &self,
        triangle_indices: TrianglePackIdxRange,
        packet: &RayPacket,
        lanes: u64,
        best: &mut [LeafHitRecord; LANES],
        best_t: &mut SimdFloatType,
    ) {
        for pack_index in triangle_indices.iter() {
            let pack = &self.triangle_packs[pack_index];

            for triangle_lane in bit_iter(pack.valid) {
                let triangle = Triangle::<WorldPoint8>::splat(&pack.triangles.extract(triangle_lane));
                let (mask, t, uv) = triangle.intersect_lanes(&packet.origin, &packet.direction);
                let mask = mask & t.simd_ge(packet.t_min) & t.simd_le(*best_t);
                let mask = lane_bits(mask) & lanes;

                let slot = pack_index.to_triangle_idx(triangle_lane);
                for ray_lane in bit_iter(mask) {
                    let t = t.extract(ray_lane);
                    let lane_best = &mut best[ray_lane];
                    if lane_best.is_improved_by(t, slot) {
                        lane_best.t = t;
                        lane_best.slot = slot;
                        lane_best.uv = uv.lane(ray_lane);
                        best_t.replace(ray_lane, t);
                    }
                }
            }
        }
    }
}

impl InnerNode {
    /// Intersect every child of this node with the packet lanes in `lanes`.
    /// Returns nearest entry distance over the lanes, link to the child,
    /// lanes that hit the child within [t_min, max_t] and their entry distances.
    fn intersect_packet(
        &self,
        packet: &RayPacket,
        lanes: u64,
        max_t: SimdFloatType,
    ) -> ArrayVec<(FloatType, CompressedNodeLink, u64, SimdFloatType), INNER_NODE_CHILDREN> {
        bit_iter(self.occupied)
            .filter_map(|i| {
                let child_box = WorldBox8::splat(&self.child_bounds.extract(i));
                let (t1, t2) = child_box.intersect_packet(packet);
                let t1 = fast_max(t1, packet.t_min);
                let t2 = fast_min(t2, max_t);
                let child_lanes = lanes & lane_bits(t1.simd_le(t2));

                (child_lanes != 0).then(|| {
                    let nearest = bit_iter(child_lanes)
                        .map(|lane| t1.extract(lane))
                        .fold(FloatType::INFINITY, FloatType::min);
                    (nearest, self.child_links[i], child_lanes, t1)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::Ray,
        scene::triangle_bvh::{
            StackCache,
            test::{grid_rays, grid_scene},
        },
    };
    use assert2::assert;

    fn assert_bit_identical(packet: Option<BvhHit>, single: Option<BvhHit>) {
        assert!(packet.is_some() == single.is_some());
        if let (Some(a), Some(b)) = (packet, single) {
            assert!(a.t.to_bits() == b.t.to_bits());
            assert!(a.uv.u.to_bits() == b.uv.u.to_bits());
            assert!(a.uv.v.to_bits() == b.uv.v.to_bits());
            assert!(a.triangle == b.triangle);
        }
    }

    #[test]
    fn packets_match_single_rays() {
        let scene = grid_scene(10);
        let bvh = TriangleBvh::build(&scene);
        let rays: Vec<Ray> = grid_rays(10, 203).iter().map(Ray::from).collect();

        let mut stack = StackCache::default();
        let mut packet_stack = PacketStackCache::default();
        let mut hit_count = 0;

        for chunk in rays.chunks(LANES) {
            let packet = RayPacket::new(chunk);
            let packet_hits = bvh.intersect_packet(&packet, &mut packet_stack);

            for (i, ray) in chunk.iter().enumerate() {
                let single = bvh.intersect(ray, &mut stack);
                hit_count += single.is_some() as usize;
                assert_bit_identical(packet_hits[i], single);
            }
            for missing in packet_hits.iter().skip(chunk.len()) {
                assert!(missing.is_none());
            }
        }

        assert!(hit_count > 100);
    }

    #[test]
    fn inactive_lanes_report_nothing() {
        let scene = grid_scene(3);
        let bvh = TriangleBvh::build(&scene);
        let mut rays: Vec<Ray> = grid_rays(3, 4).iter().map(Ray::from).collect();
        rays[1].t_min = 50.0;
        rays[1].t_max = 1.0;

        let hits = bvh.intersect_packet(&RayPacket::new(&rays), &mut PacketStackCache::default());
        assert!(hits[1].is_none());
        assert!(hits[0].is_some());
    }

    #[test]
    fn empty_packet() {
        let scene = grid_scene(3);
        let bvh = TriangleBvh::build(&scene);
        let hits = bvh.intersect_packet(&RayPacket::new(&[]), &mut PacketStackCache::default());
        assert!(hits.iter().all(Option::is_none));
    }
}
