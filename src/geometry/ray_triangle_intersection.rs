use crate::util::simba::fma_dot;

use num_traits::{one, zero};
use simba::simd::SimdPartialOrd as _;

use super::{
    BarycentricCoordinates, SimdFloatType, SimdMaskType, Triangle, WorldPoint8, WorldVector8,
};

impl Triangle<WorldPoint8> {
    /// Calculates intersection of each lane's ray with the same lane of the (two sided) triangle pack.
    /// Returns mask of valid intersections, distance along ray, and barycentric uv coordinates.
    /// The distance interval of the ray is not checked here.
    ///
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm#Rust_implementation
    pub fn intersect_lanes(
        &self,
        origin: &WorldPoint8,
        direction: &WorldVector8,
    ) -> (
        SimdMaskType,
        SimdFloatType,
        BarycentricCoordinates<SimdFloatType>,
    ) {
        let zero: SimdFloatType = zero();
        let one: SimdFloatType = one();

        let e1 = self[1] - self[0];
        let e2 = self[2] - self[0];

        let ray_cross_e2 = direction.cross(&e2);
        let det = fma_dot(&e1, &ray_cross_e2);

        let inv_det = one / det; // May be infinite
        let s = origin - self[0];
        let u = inv_det * fma_dot(&s, &ray_cross_e2);

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * fma_dot(direction, &s_cross_e1);
        let t = inv_det * fma_dot(&e2, &s_cross_e1);

        // Comparisons with NaN are false, this also rejects parallel rays and degenerate triangles
        let mask = det.simd_ne(zero)
            & u.simd_ge(zero)
            & v.simd_ge(zero)
            & (u + v).simd_le(one)
            & t.simd_eq(t);
        (mask, t, BarycentricCoordinates { u, v })
    }
}
