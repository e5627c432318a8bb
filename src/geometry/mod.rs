mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

use std::array;

use nalgebra::{Point2, Point3, Vector3};
use simba::simd::{WideBoolF32x8, WideF32x8};

pub use aabb::AABB;
pub use ray_box_intersection::RayIntersectionExt;
pub use triangle::{BarycentricCoordinates, Triangle};

use crate::layout::RayRecord;

pub type FloatType = f32;
pub type SimdFloatType = WideF32x8;
pub type SimdMaskType = WideBoolF32x8;

/// Number of lanes in every SIMD type of the engine.
pub const LANES: usize = 8;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type WorldPoint8 = Point3<SimdFloatType>;
pub type WorldVector8 = Vector3<SimdFloatType>;
pub type WorldBox8 = AABB<WorldPoint8>;
pub type TexturePoint = Point2<FloatType>;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Direction of the ray. Not normalized, distances along the ray are measured
    /// in multiples of its length.
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,

    pub t_min: FloatType,
    pub t_max: FloatType,
}

impl Ray {
    pub fn new(
        origin: WorldPoint,
        direction: WorldVector,
        t_min: FloatType,
        t_max: FloatType,
    ) -> Ray {
        let inv_direction = direction.map(|x| if x == 0.0 { f32::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
            t_min,
            t_max,
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }

    /// True if the [t_min, t_max] interval contains no distance (this includes NaN bounds).
    pub fn is_empty(&self) -> bool {
        !(self.t_min <= self.t_max)
    }
}

impl From<&RayRecord> for Ray {
    fn from(record: &RayRecord) -> Self {
        Ray::new(
            record.origin.into(),
            record.direction.into(),
            record.t_min,
            record.t_max,
        )
    }
}

/// Up to eight rays transposed into SIMD lanes, traversed together.
#[derive(Clone, Debug)]
pub struct RayPacket {
    pub origin: WorldPoint8,
    pub direction: WorldVector8,
    pub inv_direction: WorldVector8,
    pub t_min: SimdFloatType,
    pub t_max: SimdFloatType,

    /// Bit mask of lanes holding a ray with nonempty distance interval.
    pub active: u64,
}

impl RayPacket {
    /// Packs the rays into lanes, panics if there are more than LANES of them.
    /// Lanes past the end of the slice are filled with a copy of the first ray and stay inactive.
    pub fn new(rays: &[Ray]) -> RayPacket {
        assert!(rays.len() <= LANES);

        let fallback = rays.first().copied().unwrap_or_else(|| {
            Ray::new(WorldPoint::origin(), WorldVector::zeros(), 1.0, 0.0)
        });
        let lanes: [Ray; LANES] = array::from_fn(|i| rays.get(i).copied().unwrap_or(fallback));

        let active = rays
            .iter()
            .enumerate()
            .filter(|(_, ray)| !ray.is_empty())
            .fold(0u64, |acc, (i, _)| acc | (1 << i));

        RayPacket {
            origin: gather_point(|i| lanes[i].origin),
            direction: gather_vector(|i| lanes[i].direction),
            inv_direction: gather_vector(|i| lanes[i].inv_direction),
            t_min: gather_float(|i| lanes[i].t_min),
            t_max: gather_float(|i| lanes[i].t_max),
            active,
        }
    }
}

/// Builds a SIMD value from a per-lane function.
pub fn gather_float(f: impl Fn(usize) -> FloatType) -> SimdFloatType {
    SimdFloatType::from(array::from_fn::<_, LANES, _>(f))
}

pub fn gather_vector(f: impl Fn(usize) -> WorldVector) -> WorldVector8 {
    WorldVector8::new(
        gather_float(|i| f(i).x),
        gather_float(|i| f(i).y),
        gather_float(|i| f(i).z),
    )
}

pub fn gather_point(f: impl Fn(usize) -> WorldPoint) -> WorldPoint8 {
    WorldPoint8::from(gather_vector(|i| f(i).coords))
}
