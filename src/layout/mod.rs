//! Fixed binary layouts of ray and intersection records exchanged with callers.
//!
//! The structured records are the preferred encoding, they can be cast from and to
//! raw memory with `bytemuck`. The [`flat`] module keeps the older encoding of
//! plain `f32` / `i32` word arrays.

pub mod flat;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::geometry::{BarycentricCoordinates, FloatType, WorldPoint, WorldVector};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RayRecord {
    pub origin: [f32; 3],
    /// Not normalized, hit distances are measured in multiples of its length.
    pub direction: [f32; 3],
    pub t_min: f32,
    pub t_max: f32,
}

impl RayRecord {
    pub fn new(origin: WorldPoint, direction: WorldVector, t_min: f32, t_max: f32) -> RayRecord {
        RayRecord {
            origin: origin.into(),
            direction: direction.into(),
            t_min,
            t_max,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct IntersectionRecord {
    /// 1 for a hit, 0 for a miss. All other fields are zero on a miss.
    pub validity: i32,
    pub t: f32,
    /// Dense index of the geometry fragment, in order of ingestion.
    pub geometry_index: u32,
    pub submesh_key: u32,
    /// Index of the triangle within its geometry fragment.
    pub triangle_index: u32,
    /// Weight of the second vertex.
    pub u: f32,
    /// Weight of the third vertex.
    pub v: f32,
    /// Weight of the first vertex.
    pub w: f32,
}

impl IntersectionRecord {
    pub const MISS: IntersectionRecord = IntersectionRecord {
        validity: 0,
        t: 0.0,
        geometry_index: 0,
        submesh_key: 0,
        triangle_index: 0,
        u: 0.0,
        v: 0.0,
        w: 0.0,
    };

    pub fn hit(
        t: FloatType,
        geometry_index: u32,
        submesh_key: u32,
        triangle_index: u32,
        uv: BarycentricCoordinates<FloatType>,
    ) -> IntersectionRecord {
        IntersectionRecord {
            validity: 1,
            t,
            geometry_index,
            submesh_key,
            triangle_index,
            u: uv.u,
            v: uv.v,
            w: uv.w(),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.validity != 0
    }

    pub fn barycentrics(&self) -> BarycentricCoordinates<FloatType> {
        BarycentricCoordinates {
            u: self.u,
            v: self.v,
        }
    }
}

/// Number of 32-bit words of one record in the flat encoding.
pub const RECORD_WORDS: usize = 8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("Buffer of {len} words is not a whole number of {stride}-word records")]
    RaggedBatch { len: usize, stride: usize },

    #[error("Buffer can't be reinterpreted as records: {0:?}")]
    SliceCast(bytemuck::PodCastError),
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;
    use std::mem::{align_of, size_of};

    #[test]
    fn record_sizes() {
        assert!(size_of::<RayRecord>() == RECORD_WORDS * 4);
        assert!(size_of::<IntersectionRecord>() == RECORD_WORDS * 4);
        assert!(align_of::<RayRecord>() == 4);
        assert!(align_of::<IntersectionRecord>() == 4);
    }

    #[test]
    fn miss_is_all_zero() {
        assert!(IntersectionRecord::MISS == IntersectionRecord::zeroed());
        assert!(!IntersectionRecord::MISS.is_hit());
    }

    #[test]
    fn hit_weights_sum_to_one() {
        let record = IntersectionRecord::hit(
            2.5,
            3,
            7,
            11,
            BarycentricCoordinates { u: 0.25, v: 0.5 },
        );
        assert!(record.is_hit());
        assert!(record.w == 0.25);
        assert!(record.barycentrics() == BarycentricCoordinates { u: 0.25, v: 0.5 });
    }
}
