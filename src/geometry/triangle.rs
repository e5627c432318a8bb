use std::ops::{Add, Index, IndexMut, Mul, Sub};

use nalgebra::{DefaultAllocator, DimName, OPoint, OVector, Scalar, allocator::Allocator};
use num_traits::One;
use simba::simd::SimdValue;

use super::{FloatType, SimdFloatType, WorldPoint, WorldPoint8, WorldVector, gather_point};

#[derive(Clone, Debug, PartialEq)]
pub struct Triangle<Point>([Point; 3]);

impl<Point> Triangle<Point> {
    pub fn new(a: Point, b: Point, c: Point) -> Triangle<Point> {
        Triangle([a, b, c])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.0.iter()
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> Triangle<Point2> {
        Triangle([f(&self[0]), f(&self[1]), f(&self[2])])
    }
}

impl<Point> Index<usize> for Triangle<Point> {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<Point> IndexMut<usize> for Triangle<Point> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl<T: Scalar, D: DimName> Triangle<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
    for<'a> &'a OPoint<T, D>: Sub<Output = OVector<T, D>>,
{
    /// Returns edge vectors, coming from self[0]
    pub fn edges(&self) -> [OVector<T, D>; 2] {
        [&self.0[1] - &self.0[0], &self.0[2] - &self.0[0]]
    }
}

impl Triangle<WorldPoint> {
    pub fn centroid(&self) -> WorldPoint {
        WorldPoint::from((self[0].coords + self[1].coords + self[2].coords) / 3.0)
    }

    /// Returns a normal vector of the triangle, not normalized.
    pub fn normal(&self) -> WorldVector {
        let [e1, e2] = self.edges();
        e1.cross(&e2)
    }
}

impl Triangle<WorldPoint8> {
    pub fn splat(triangle: &Triangle<WorldPoint>) -> Self {
        triangle.map(|p| p.map(SimdFloatType::splat))
    }

    /// Transposes up to eight triangles into lanes.
    /// Missing lanes repeat the first vertex of the first triangle, making them degenerate.
    pub fn gather(triangles: &[Triangle<WorldPoint>]) -> Self {
        assert!(!triangles.is_empty());
        let pad = triangles[0][0];
        let vertex = |i: usize, corner: usize| triangles.get(i).map_or(pad, |t| t[corner]);

        Triangle([
            gather_point(|i| vertex(i, 0)),
            gather_point(|i| vertex(i, 1)),
            gather_point(|i| vertex(i, 2)),
        ])
    }

    pub fn extract(&self, i: usize) -> Triangle<WorldPoint> {
        self.map(|p| p.map(|x| x.extract(i)))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BarycentricCoordinates<T> {
    /// Weight of the second vertex
    pub u: T,
    /// Weight of the third vertex
    pub v: T,
}

impl<T: One + Copy + Sub<Output = T>> BarycentricCoordinates<T> {
    /// Weight of the first vertex
    pub fn w(&self) -> T {
        T::one() - self.u - self.v
    }
}

impl BarycentricCoordinates<SimdFloatType> {
    pub fn lane(&self, i: usize) -> BarycentricCoordinates<FloatType> {
        BarycentricCoordinates {
            u: self.u.extract(i),
            v: self.v.extract(i),
        }
    }
}

impl BarycentricCoordinates<FloatType> {
    pub fn interpolate<T2>(&self, a: T2, b: T2, c: T2) -> T2
    where
        T2: Mul<FloatType, Output = T2> + Add<Output = T2>,
    {
        a * self.w() + b * self.u + c * self.v
    }

    pub fn interpolate_triangle<T2>(&self, triangle: &Triangle<T2>) -> T2
    where
        T2: Mul<FloatType, Output = T2> + Add<Output = T2> + Clone,
    {
        self.interpolate(triangle[0].clone(), triangle[1].clone(), triangle[2].clone())
    }
}
