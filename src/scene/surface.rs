use crate::{
    geometry::{TexturePoint, WorldPoint, WorldVector},
    layout::IntersectionRecord,
};

use super::{GeometryIdx, SceneGeometry};

/// Surface attributes reconstructed at an intersection.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfacePoint {
    pub position: WorldPoint,
    /// Unit normal of the triangle plane, oriented by the vertex winding.
    pub geometric_normal: WorldVector,
    /// Interpolated vertex normal, the geometric normal if the fragment had no normals.
    pub shading_normal: WorldVector,
    pub texture_coords: Option<TexturePoint>,
}

impl SceneGeometry {
    /// Returns None for misses and for records that don't refer to a triangle of this scene.
    pub fn surface_point(&self, record: &IntersectionRecord) -> Option<SurfacePoint> {
        if !record.is_hit() {
            return None;
        }

        let geometry = self.geometry(GeometryIdx::from_raw(record.geometry_index))?;
        if geometry.submesh_key != record.submesh_key {
            return None;
        }

        let triangle_index = record.triangle_index as usize;
        let indices = geometry.triangles.get(triangle_index)?;
        let triangle = indices.map(|i| geometry.positions[*i as usize]);
        let uv = record.barycentrics();

        let position = WorldPoint::from(uv.interpolate_triangle(&triangle.map(|p| p.coords)));
        let geometric_normal = triangle.normal().try_normalize(0.0)?;

        let shading_normal = geometry
            .normals
            .as_ref()
            .and_then(|normals| {
                uv.interpolate_triangle(&indices.map(|i| normals[*i as usize]))
                    .try_normalize(0.0)
            })
            .unwrap_or(geometric_normal);

        let texture_coords = geometry.uvs.as_ref().map(|uvs| {
            TexturePoint::from(uv.interpolate_triangle(&indices.map(|i| uvs[*i as usize].coords)))
        });

        Some(SurfacePoint {
            position,
            geometric_normal,
            shading_normal,
            texture_coords,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        arena::Arena,
        geometry::BarycentricCoordinates,
        scene::{GeometryFragment, Scene},
    };
    use assert2::{assert, let_assert};

    fn textured_triangle() -> Scene {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        let positions = [0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0, 0.0];
        let normals = [0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        scene
            .append_geometry(
                &GeometryFragment::builder()
                    .object_key(5)
                    .submesh_key(6)
                    .positions(&positions)
                    .indices(&[0, 1, 2])
                    .normals(&normals)
                    .uvs(&uvs)
                    .build(),
            )
            .expect("valid geometry");
        scene
    }

    #[test]
    fn attributes_are_interpolated() {
        let scene = textured_triangle();
        let record = IntersectionRecord::hit(1.0, 0, 6, 0, BarycentricCoordinates { u: 0.5, v: 0.25 });

        let_assert!(Some(point) = scene.geometry().surface_point(&record));
        assert!((point.position - WorldPoint::new(1.0, 0.5, 0.0)).norm() < 1e-6);
        assert!((point.geometric_normal - WorldVector::z()).norm() < 1e-6);

        let expected_normal = WorldVector::new(0.5, 0.25, 1.0).normalize();
        assert!((point.shading_normal - expected_normal).norm() < 1e-6);

        let_assert!(Some(tex) = point.texture_coords);
        assert!((tex - TexturePoint::new(0.5, 0.25)).norm() < 1e-6);
    }

    #[test]
    fn missing_normals_fall_back_to_geometric() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        let positions = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0];
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

        let record = IntersectionRecord::hit(1.0, 0, 0, 0, BarycentricCoordinates { u: 0.2, v: 0.2 });
        let_assert!(Some(point) = scene.geometry().surface_point(&record));
        assert!((point.geometric_normal - -WorldVector::z()).norm() < 1e-6);
        assert!(point.shading_normal == point.geometric_normal);
        assert!(point.texture_coords.is_none());
    }

    #[test]
    fn foreign_records_are_rejected() {
        let scene = textured_triangle();
        let uv = BarycentricCoordinates { u: 0.1, v: 0.1 };

        assert!(scene.geometry().surface_point(&IntersectionRecord::MISS).is_none());
        let wrong_geometry = IntersectionRecord::hit(1.0, 1, 6, 0, uv);
        assert!(scene.geometry().surface_point(&wrong_geometry).is_none());
        let wrong_submesh = IntersectionRecord::hit(1.0, 0, 7, 0, uv);
        assert!(scene.geometry().surface_point(&wrong_submesh).is_none());
        let wrong_triangle = IntersectionRecord::hit(1.0, 0, 6, 1, uv);
        assert!(scene.geometry().surface_point(&wrong_triangle).is_none());
    }
}
