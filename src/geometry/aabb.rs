use std::ops::Sub;

use nalgebra::{DefaultAllocator, DimName, OPoint, Scalar, allocator::Allocator};
use simba::simd::SimdValue as _;

use super::{FloatType, SimdFloatType, WorldBox, WorldBox8, WorldPoint, gather_point};

#[derive(Clone, Debug, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> AABB<Point2> {
        AABB {
            min: f(&self.min),
            max: f(&self.max),
        }
    }
}

impl<T: Scalar, D: DimName> AABB<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
{
    pub fn map_coords<T2: Scalar, F: FnMut(T) -> T2>(&self, mut f: F) -> AABB<OPoint<T2, D>> {
        self.map(|x| x.map(&mut f))
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<Point> From<[Point; 2]> for AABB<Point> {
    fn from(value: [Point; 2]) -> Self {
        let [min, max] = value;
        AABB { min, max }
    }
}

impl WorldBox {
    /// Smallest box containing all the points, None if the iterator is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a WorldPoint>) -> Option<WorldBox> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(WorldBox::new(*first, *first), |acc, p| {
            WorldBox::new(acc.min.inf(p), acc.max.sup(p))
        }))
    }

    /// Zero sized box at the origin.
    pub fn degenerate() -> WorldBox {
        WorldBox::new(WorldPoint::origin(), WorldPoint::origin())
    }

    pub fn union(&self, other: &WorldBox) -> WorldBox {
        WorldBox::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Grows the box in every direction by a margin relative to its extent, so that points
    /// on its faces stay inside after rounding errors of the slab test.
    pub fn padded(&self) -> WorldBox {
        const RELATIVE_MARGIN: FloatType = 1e-5;
        const ABSOLUTE_MARGIN: FloatType = 1e-6;

        let extent = self.size().amax().max(self.min.coords.amax()).max(self.max.coords.amax());
        let margin = extent * RELATIVE_MARGIN + ABSOLUTE_MARGIN;
        WorldBox::new(self.min.map(|x| x - margin), self.max.map(|x| x + margin))
    }

    pub fn contains(&self, p: &WorldPoint) -> bool {
        (0..3).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }
}

impl WorldBox8 {
    pub fn splat(b: &WorldBox) -> WorldBox8 {
        b.map_coords(SimdFloatType::splat)
    }

    /// Packs up to eight boxes into lanes, lanes with None get a zero sized box at origin.
    /// Callers must mask such lanes out themselves.
    pub fn gather(boxes: &[Option<WorldBox>]) -> WorldBox8 {
        let lane = |i: usize| {
            boxes
                .get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(WorldBox::degenerate)
        };
        WorldBox8::new(
            gather_point(|i| lane(i).min),
            gather_point(|i| lane(i).max),
        )
    }

    pub fn extract(&self, i: usize) -> WorldBox {
        self.map_coords(|x| x.extract(i))
    }
}
