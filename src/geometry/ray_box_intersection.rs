use simba::simd::SimdValue;

use crate::{
    geometry::{Ray, RayPacket, WorldBox8, WorldPoint8, WorldVector8},
    util::simba::{SimbaWorkarounds as _, fast_max, fast_min},
};

use super::SimdFloatType;

pub trait RayIntersectionExt {
    type DistanceType;
    /// Calculate first and last ray intersection with the box
    fn intersect(&self, ray: &Ray) -> (Self::DistanceType, Self::DistanceType);

    /// Calculate first and last intersection of every ray in the packet with the box
    fn intersect_packet(&self, packet: &RayPacket) -> (Self::DistanceType, Self::DistanceType);
}

impl RayIntersectionExt for WorldBox8 {
    type DistanceType = SimdFloatType;

    /// Calculates intersection of a single ray with the box pack.
    /// Returns minimum and maximum distance along the ray, ray intersects is min <= max.
    fn intersect(&self, ray: &Ray) -> (SimdFloatType, SimdFloatType) {
        let ray_origin = ray.origin.map(SimdFloatType::splat);
        let ray_inv_direction = ray.inv_direction.map(SimdFloatType::splat);

        slab_distances(self, &ray_origin, &ray_inv_direction)
    }

    /// Calculates intersection of each lane's ray with the same lane of the box pack,
    /// usually a splatted single box.
    fn intersect_packet(&self, packet: &RayPacket) -> (SimdFloatType, SimdFloatType) {
        slab_distances(self, &packet.origin, &packet.inv_direction)
    }
}

/// Lanewise slab test.
/// Both execution policies go through this function, which keeps their results bit identical.
fn slab_distances(
    boxes: &WorldBox8,
    ray_origin: &WorldPoint8,
    ray_inv_direction: &WorldVector8,
) -> (SimdFloatType, SimdFloatType) {
    // Componentwise distances along the ray to the box's min and max corners
    // The multiplication is NAN if the ray is starting inside the slab bounding plane
    // and is parallel to it. In this case we blend to +-infinity, so that the range becomes infinite
    let to_box_min = (boxes.min - ray_origin)
        .component_mul(ray_inv_direction)
        .map(|x| SimdFloatType::neg_infinity().select(x.is_nan(), x));
    let to_box_max = (boxes.max - ray_origin)
        .component_mul(ray_inv_direction)
        .map(|x| SimdFloatType::infinity().select(x.is_nan(), x));

    // Correctly ordered (min_t <= max_t)
    let componentwise_min_t = to_box_min.zip_map(&to_box_max, fast_min);
    let componentwise_max_t = to_box_min.zip_map(&to_box_max, fast_max);

    let min_t = fast_max(
        componentwise_min_t.x,
        fast_max(componentwise_min_t.y, componentwise_min_t.z),
    );
    let max_t = fast_min(
        componentwise_max_t.x,
        fast_min(componentwise_max_t.y, componentwise_max_t.z),
    );

    (min_t, max_t)
}
