use std::{
    f32::consts::{PI, TAU},
    num::NonZeroU32,
};

use bon::bon;

use crate::{
    geometry::{FloatType, WorldPoint, WorldVector},
    layout::RayRecord,
};

/// Fan of rays leaving a point in all directions on a regular (theta, phi) grid.
#[derive(Copy, Clone, Debug)]
pub struct SphericalProbe {
    center: WorldPoint,
    resolution: NonZeroU32,
    t_min: FloatType,
    range: FloatType,
}

#[bon]
impl SphericalProbe {
    #[builder]
    pub fn new(
        center: WorldPoint,
        resolution: NonZeroU32,
        #[builder(default = 1e-4)] t_min: FloatType,
        // Becomes t_max of every ray
        #[builder(default = 10.0)]
        range: FloatType,
    ) -> Self {
        SphericalProbe {
            center,
            resolution,
            t_min,
            range,
        }
    }

    pub fn center(&self) -> WorldPoint {
        self.center
    }

    pub fn ray_count(&self) -> usize {
        let resolution = self.resolution.get() as usize;
        resolution * resolution
    }

    /// Ray number `theta_index * resolution + phi_index`.
    pub fn ray(&self, index: usize) -> RayRecord {
        let resolution = self.resolution.get() as usize;
        let step = (resolution - 1).max(1) as FloatType;
        let theta = (index / resolution) as FloatType / step * TAU;
        let phi = (index % resolution) as FloatType / step * PI;

        let direction = WorldVector::new(
            theta.sin() * phi.sin(),
            theta.cos(),
            theta.sin() * phi.cos(),
        );
        RayRecord::new(self.center, direction, self.t_min, self.range)
    }

    pub fn rays(&self) -> impl ExactSizeIterator<Item = RayRecord> + '_ {
        (0..self.ray_count()).map(|i| self.ray(i))
    }
}
