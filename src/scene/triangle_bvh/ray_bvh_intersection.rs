use arrayvec::ArrayVec;
use assert2::debug_assert;
use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{
    BvhHit, CompressedNodeLink, INNER_NODE_CHILDREN, InnerNode, LeafHitRecord, NodeLink,
    TriangleBvh, TrianglePackIdxRange,
};
use crate::{
    geometry::{
        FloatType, Ray, RayIntersectionExt as _, SimdFloatType, WorldPoint8, WorldVector8,
    },
    util::{
        bit_iter,
        simba::{fast_max, fast_min, lane_bits},
    },
};

/// Traversal stack kept between rays to avoid reallocation.
#[derive(Clone, Debug, Default)]
#[repr(transparent)]
pub struct StackCache {
    stack: Vec<(CompressedNodeLink, FloatType)>,
}

impl TriangleBvh {
    /// Finds the closest intersection of a single ray with distance in [t_min, t_max].
    pub fn intersect(&self, ray: &Ray, stack: &mut StackCache) -> Option<BvhHit> {
        if ray.is_empty() || self.root.is_null() {
            return None;
        }

        let origin = ray.origin.map(SimdFloatType::splat);
        let direction = ray.direction.map(SimdFloatType::splat);

        let mut best = LeafHitRecord::new(ray.t_max);

        debug_assert!(stack.stack.is_empty());
        stack.stack.push((self.root, ray.t_min));

        while let Some((link, node_t1)) = stack.stack.pop() {
            if node_t1 > best.t {
                // If the node's minimum intersection distance is further away than the best
                // hit found so far, the node can't do any good any more and we can skip it.
                continue;
            }

            match link.decode() {
                NodeLink::Null => continue,
                NodeLink::Inner { index } => {
                    let node = &self.inner_nodes[index];
                    let mut children = node.intersect(ray, best.t);
                    // Nearest child ends up on top of the stack
                    children.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
                    stack
                        .stack
                        .extend(children.into_iter().map(|(t1, link)| (link, t1)));
                }
                NodeLink::Leaf { indices } => {
                    self.intersect_triangles(indices, &origin, &direction, ray.t_min, &mut best);
                }
            }
        }

        self.resolve(&best)
    }

    /// Tests a single ray (splatted to all lanes) against the triangles of a leaf, updating `best`.
    fn intersect_triangles(
        &self,
        triangle_indices: TrianglePackIdxRange,
        origin: &WorldPoint8,
        direction: &WorldVector8,
        t_min: FloatType,
        best: &mut LeafHitRecord,
    ) {
        let t_min = SimdFloatType::splat(t_min);

        for pack_index in triangle_indices.iter() {
            let pack = &self.triangle_packs[pack_index];
            let (mask, t, uv) = pack.triangles.intersect_lanes(origin, direction);

            let mask = mask & t.simd_ge(t_min) & t.simd_le(SimdFloatType::splat(best.t));
            let mask = lane_bits(mask) & pack.valid;

            for i in bit_iter(mask) {
                let t = t.extract(i);
                let slot = pack_index.to_triangle_idx(i);
                if best.is_improved_by(t, slot) {
                    best.t = t;
                    best.slot = slot;
                    best.uv = uv.lane(i);
                }
            }
        }
    }
}

impl InnerNode {
    /// Intersect the children of this node with a ray.
    /// Returns entry distance and link of every child hit within [ray.t_min, max_t].
    fn intersect(
        &self,
        ray: &Ray,
        max_t: FloatType,
    ) -> ArrayVec<(FloatType, CompressedNodeLink), INNER_NODE_CHILDREN> {
        let (t1, t2) = self.child_bounds.intersect(ray);
        let t1 = fast_max(t1, SimdFloatType::splat(ray.t_min));
        let t2 = fast_min(t2, SimdFloatType::splat(max_t));
        let mask = lane_bits(t1.simd_le(t2)) & self.occupied;

        bit_iter(mask)
            .map(|i| (t1.extract(i), self.child_links[i]))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        arena::Arena,
        geometry::{WorldPoint, WorldVector},
        scene::{GeometryFragment, GeometryIdx, Scene, SceneGeometry, test::stacked_triangles},
    };
    use assert2::{assert, let_assert};
    use test_case::test_case;

    fn stacked(second_z: f32) -> TriangleBvh {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        stacked_triangles(&mut scene, second_z);
        TriangleBvh::build(&scene.freeze())
    }

    fn down_ray(t_min: f32, t_max: f32) -> Ray {
        Ray::new(
            WorldPoint::new(0.2, 0.2, 1.0),
            WorldVector::new(0.0, 0.0, -1.0),
            t_min,
            t_max,
        )
    }

    #[test]
    fn single_triangle_scenario() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        scene
            .append_geometry(
                &GeometryFragment::builder()
                    .object_key(0)
                    .submesh_key(0)
                    .positions(&positions)
                    .indices(&[0, 1, 2])
                    .build(),
            )
            .expect("valid geometry");
        let bvh = TriangleBvh::build(&scene.freeze());

        let_assert!(Some(hit) = bvh.intersect(&down_ray(0.0, 10.0), &mut StackCache::default()));
        assert!(hit.t == 1.0);
        assert!((hit.uv.u + hit.uv.v + hit.uv.w() - 1.0).abs() < 1e-5);
        assert!(hit.triangle.geometry == GeometryIdx::from_raw(0));
        assert!(hit.triangle.triangle == 0);
    }

    #[test]
    fn closest_of_two_wins() {
        let bvh = stacked(0.5);
        let mut stack = StackCache::default();

        let_assert!(Some(hit) = bvh.intersect(&down_ray(0.0, 10.0), &mut stack));
        assert!(hit.triangle.geometry == GeometryIdx::from_raw(1));
        assert!((hit.t - 0.5).abs() < 1e-6);

        // Starting below the upper triangle
        let_assert!(Some(hit) = bvh.intersect(&down_ray(0.6, 10.0), &mut stack));
        assert!(hit.triangle.geometry == GeometryIdx::from_raw(0));
        assert!(hit.t == 1.0);
    }

    #[test]
    fn ray_pointing_away_misses() {
        let bvh = stacked(0.5);
        let ray = Ray::new(
            WorldPoint::new(0.2, 0.2, 1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
            10.0,
        );
        assert!(bvh.intersect(&ray, &mut StackCache::default()).is_none());
    }

    #[test_case(1.0 - 1e-5, false ; "t_max just before")]
    #[test_case(1.0, true ; "t_max exactly")]
    #[test_case(1.0 + 1e-5, true ; "t_max just past")]
    fn t_max_is_inclusive(t_max: f32, expect_hit: bool) {
        let bvh = stacked(-1.0);
        let hit = bvh.intersect(&down_ray(0.0, t_max), &mut StackCache::default());
        assert!(hit.is_some() == expect_hit);
    }

    #[test_case(1.0 - 1e-5, true ; "t_min just before")]
    #[test_case(1.0, true ; "t_min exactly")]
    #[test_case(1.0 + 1e-5, false ; "t_min just past")]
    fn t_min_is_inclusive(t_min: f32, expect_hit: bool) {
        let bvh = stacked(-1.0);
        let hit = bvh.intersect(&down_ray(t_min, 10.0), &mut StackCache::default());
        // Past the first triangle the second one at z = -1 is hit instead
        let first = hit.filter(|hit| hit.triangle.geometry == GeometryIdx::from_raw(0));
        assert!(first.is_some() == expect_hit);
    }

    #[test]
    fn empty_interval_never_hits() {
        let bvh = stacked(0.5);
        assert!(bvh.intersect(&down_ray(5.0, 1.0), &mut StackCache::default()).is_none());
        assert!(
            bvh.intersect(&down_ray(f32::NAN, 10.0), &mut StackCache::default())
                .is_none()
        );
    }

    #[test]
    fn coplanar_duplicates_resolve_to_first_stored() {
        // Both geometries are identical, ties go to the first one ingested
        let bvh = stacked(0.0);
        let_assert!(Some(hit) = bvh.intersect(&down_ray(0.0, 10.0), &mut StackCache::default()));
        assert!(hit.triangle.geometry == GeometryIdx::from_raw(0));
    }

    #[test]
    fn empty_scene_misses() {
        let bvh = TriangleBvh::build(&SceneGeometry::new(&Arena::new()));
        assert!(bvh.intersect(&down_ray(0.0, 10.0), &mut StackCache::default()).is_none());
    }

    #[test]
    fn degenerate_triangles_are_kept_but_never_hit() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        let positions = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 2.0, 2.0, 0.0];
        scene
            .append_geometry(
                &GeometryFragment::builder()
                    .object_key(0)
                    .submesh_key(0)
                    .positions(&positions)
                    .indices(&[0, 1, 2])
                    .build(),
            )
            .expect("valid geometry");
        let bvh = TriangleBvh::build(&scene.freeze());
        assert!(bvh.triangle_count() == 1);

        let ray = Ray::new(
            WorldPoint::new(1.0, 1.0, 1.0),
            WorldVector::new(0.0, 0.0, -1.0),
            0.0,
            10.0,
        );
        assert!(bvh.intersect(&ray, &mut StackCache::default()).is_none());
    }

    /// Against a brute force search over every triangle of a larger scene
    #[test]
    fn matches_brute_force() {
        let scene = super::super::test::grid_scene(12);
        let bvh = TriangleBvh::build(&scene);
        let mut stack = StackCache::default();

        for record in super::super::test::grid_rays(12, 300) {
            let ray = Ray::from(&record);
            let expected = brute_force(&scene, &ray);
            let actual = bvh.intersect(&ray, &mut stack).map(|hit| hit.t);
            assert!(actual == expected, "{ray:?}");
        }
    }

    fn brute_force(scene: &SceneGeometry, ray: &Ray) -> Option<f32> {
        let origin = ray.origin.map(SimdFloatType::splat);
        let direction = ray.direction.map(SimdFloatType::splat);
        scene
            .triangles()
            .filter_map(|(_, _, triangle)| {
                let pack = crate::geometry::Triangle::<WorldPoint8>::splat(&triangle);
                let (mask, t, _) = pack.intersect_lanes(&origin, &direction);
                let t = t.extract(0);
                (lane_bits(mask) != 0 && t >= ray.t_min && t <= ray.t_max).then_some(t)
            })
            .min_by(f32::total_cmp)
    }
}
