mod fragment;
mod obj;
mod surface;
pub mod triangle_bvh;

use std::{mem, sync::Arc};

use index_vec::IndexVec;
use thiserror::Error;

use crate::{
    arena::{Arena, ArenaCharge},
    geometry::{TexturePoint, Triangle, WorldPoint, WorldVector},
};

pub use fragment::{APPEND_CONTRACT_VERSION, GeometryError, GeometryErrorKind, GeometryFragment};
pub use obj::ObjLoadError;
pub use surface::SurfacePoint;

index_vec::define_index_type! {
    /// Dense index of a geometry fragment within its scene, in order of ingestion.
    pub struct GeometryIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SceneError {
    #[error("Scene is frozen, no more geometry can be appended")]
    Frozen,

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Owned, world space copy of one ingested fragment.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub object_key: u32,
    pub submesh_key: u32,
    pub debug_label: Option<String>,

    positions: Vec<WorldPoint>,
    triangles: Vec<Triangle<u32>>,
    normals: Option<Vec<WorldVector>>,
    uvs: Option<Vec<TexturePoint>>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    /// World space vertices of a triangle, None if out of range.
    pub fn triangle(&self, index: usize) -> Option<Triangle<WorldPoint>> {
        let indices = self.triangles.get(index)?;
        Some(indices.map(|i| self.positions[*i as usize]))
    }

    fn heap_size(&self) -> usize {
        self.positions.capacity() * mem::size_of::<WorldPoint>()
            + self.triangles.capacity() * mem::size_of::<Triangle<u32>>()
            + self
                .normals
                .as_ref()
                .map_or(0, |n| n.capacity() * mem::size_of::<WorldVector>())
            + self
                .uvs
                .as_ref()
                .map_or(0, |t| t.capacity() * mem::size_of::<TexturePoint>())
            + self.debug_label.as_ref().map_or(0, String::capacity)
    }
}

/// Concatenation of every ingested fragment.
///
/// Holds the arena charge for its own footprint, released when the last owner drops it.
#[derive(Debug)]
pub struct SceneGeometry {
    geometries: IndexVec<GeometryIdx, Geometry>,
    triangle_count: usize,
    vertex_count: usize,
    fragment_bytes: usize,
    charge: ArenaCharge,
}

impl SceneGeometry {
    pub fn new(arena: &Arena) -> SceneGeometry {
        SceneGeometry {
            geometries: IndexVec::new(),
            triangle_count: 0,
            vertex_count: 0,
            fragment_bytes: 0,
            charge: arena.charge(0),
        }
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn geometry(&self, index: GeometryIdx) -> Option<&Geometry> {
        self.geometries.get(index)
    }

    pub fn geometries(&self) -> impl Iterator<Item = (GeometryIdx, &Geometry)> {
        self.geometries.iter_enumerated()
    }

    /// Every triangle of the scene in world space, in order of ingestion.
    pub fn triangles(&self) -> impl Iterator<Item = (GeometryIdx, u32, Triangle<WorldPoint>)> + '_ {
        self.geometries
            .iter_enumerated()
            .flat_map(|(geometry_index, geometry)| {
                geometry.triangles.iter().enumerate().map(move |(i, t)| {
                    (
                        geometry_index,
                        i as u32,
                        t.map(|v| geometry.positions[*v as usize]),
                    )
                })
            })
    }

    /// Bytes charged to the arena for this geometry.
    pub fn heap_size(&self) -> usize {
        self.charge.bytes()
    }

    fn push(&mut self, geometry: Geometry) -> GeometryIdx {
        self.triangle_count += geometry.triangle_count();
        self.vertex_count += geometry.vertex_count();
        self.fragment_bytes += geometry.heap_size();
        let index = self.geometries.push(geometry);
        self.charge.resize(
            self.geometries.raw.capacity() * mem::size_of::<Geometry>() + self.fragment_bytes,
        );
        index
    }
}

#[derive(Debug)]
enum SceneState {
    Open(SceneGeometry),
    Frozen(Arc<SceneGeometry>),
}

/// Geometry accumulated for one acceleration structure build.
///
/// The scene is open for appends until a query engine is set up with it,
/// after that it is frozen and its geometry is shared read only.
#[derive(Debug)]
pub struct Scene {
    arena: Arena,
    state: SceneState,
}

impl Scene {
    pub fn new(arena: &Arena) -> Scene {
        Scene {
            arena: arena.clone(),
            state: SceneState::Open(SceneGeometry::new(arena)),
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Copies the fragment into the scene and returns its geometry index.
    /// Nothing is stored if the fragment is invalid.
    #[tracing::instrument(
        level = "trace",
        skip_all,
        fields(object_key = fragment.object_key, submesh_key = fragment.submesh_key)
    )]
    pub fn append_geometry(
        &mut self,
        fragment: &GeometryFragment,
    ) -> Result<GeometryIdx, SceneError> {
        let SceneState::Open(geometry) = &mut self.state else {
            return Err(SceneError::Frozen);
        };

        let baked = fragment.bake()?;
        tracing::trace!(
            vertices = baked.vertex_count(),
            triangles = baked.triangle_count(),
            "appending geometry"
        );
        Ok(geometry.push(baked))
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.state, SceneState::Frozen(_))
    }

    pub fn geometry(&self) -> &SceneGeometry {
        match &self.state {
            SceneState::Open(geometry) => geometry,
            SceneState::Frozen(geometry) => geometry,
        }
    }

    pub fn geometry_count(&self) -> usize {
        self.geometry().geometry_count()
    }

    pub fn triangle_count(&self) -> usize {
        self.geometry().triangle_count()
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry().vertex_count()
    }

    /// Stops accepting appends and returns the shared geometry.
    /// Freezing an already frozen scene returns the same geometry again.
    pub fn freeze(&mut self) -> Arc<SceneGeometry> {
        let geometry = match &mut self.state {
            SceneState::Frozen(geometry) => return Arc::clone(geometry),
            SceneState::Open(geometry) => {
                Arc::new(mem::replace(geometry, SceneGeometry::new(&self.arena)))
            }
        };
        tracing::debug!(
            geometries = geometry.geometry_count(),
            triangles = geometry.triangle_count(),
            "scene frozen"
        );
        self.state = SceneState::Frozen(Arc::clone(&geometry));
        geometry
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use assert2::{assert, let_assert};

    /// Two unit triangles facing +z, the first at z = 0, the second at z = `second_z`.
    pub fn stacked_triangles(scene: &mut Scene, second_z: f32) {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let indices = [0, 1, 2];
        scene
            .append_geometry(
                &GeometryFragment::builder()
                    .object_key(1)
                    .submesh_key(10)
                    .positions(&positions)
                    .indices(&indices)
                    .build(),
            )
            .expect("valid geometry");

        let positions = [
            0.0, 0.0, second_z, 1.0, 0.0, second_z, 0.0, 1.0, second_z,
        ];
        scene
            .append_geometry(
                &GeometryFragment::builder()
                    .object_key(2)
                    .submesh_key(20)
                    .positions(&positions)
                    .indices(&indices)
                    .debug_label("upper")
                    .build(),
            )
            .expect("valid geometry");
    }

    #[test]
    fn append_assigns_dense_indices() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        stacked_triangles(&mut scene, 0.5);

        assert!(scene.geometry_count() == 2);
        assert!(scene.triangle_count() == 2);
        assert!(scene.vertex_count() == 6);

        let_assert!(Some(second) = scene.geometry().geometry(GeometryIdx::from_raw(1)));
        assert!(second.object_key == 2);
        assert!(second.submesh_key == 20);
        assert!(second.debug_label.as_deref() == Some("upper"));

        let triangles: Vec<_> = scene.geometry().triangles().collect();
        assert!(triangles.len() == 2);
        assert!(triangles[1].0 == GeometryIdx::from_raw(1));
        assert!(triangles[1].2[0] == WorldPoint::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn invalid_fragment_is_not_stored() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        let positions = [0.0; 9];
        let result = scene.append_geometry(
            &GeometryFragment::builder()
                .object_key(7)
                .submesh_key(3)
                .positions(&positions)
                .indices(&[0, 1, 3])
                .build(),
        );

        let_assert!(Err(SceneError::Geometry(error)) = result);
        assert!(error.object_key == 7);
        assert!(error.submesh_key == 3);
        assert!(scene.geometry_count() == 0);
        assert!(scene.triangle_count() == 0);
    }

    #[test]
    fn frozen_scene_rejects_appends() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        stacked_triangles(&mut scene, 1.0);

        let frozen = scene.freeze();
        assert!(scene.is_frozen());
        assert!(frozen.triangle_count() == 2);
        assert!(Arc::ptr_eq(&frozen, &scene.freeze()));

        let positions = [0.0; 9];
        let result = scene.append_geometry(
            &GeometryFragment::builder()
                .object_key(3)
                .submesh_key(0)
                .positions(&positions)
                .indices(&[0, 1, 2])
                .build(),
        );
        assert!(result == Err(SceneError::Frozen));
        assert!(scene.geometry_count() == 2);
    }

    #[test]
    fn memory_is_charged_to_arena() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        assert!(arena.live_objects() == 1);

        stacked_triangles(&mut scene, 1.0);
        assert!(arena.allocated_bytes() > 0);

        drop(scene);
        assert!(arena.allocated_bytes() == 0);
        assert!(arena.live_objects() == 0);
    }

    #[test]
    fn many_appends_keep_exact_accounting() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        for i in 0..500 {
            scene
                .append_geometry(
                    &GeometryFragment::builder()
                        .object_key(i)
                        .submesh_key(0)
                        .positions(&positions)
                        .indices(&[0, 1, 2])
                        .debug_label("single")
                        .build(),
                )
                .expect("valid geometry");
        }

        let geometry = scene.geometry();
        let recounted = geometry.geometries.raw.capacity() * mem::size_of::<Geometry>()
            + geometry.geometries.iter().map(Geometry::heap_size).sum::<usize>();
        assert!(geometry.heap_size() == recounted);
        assert!(arena.allocated_bytes() == recounted);
        assert!(arena.live_objects() == 1);
    }

    #[test]
    fn frozen_geometry_outlives_scene_in_accounting() {
        let arena = Arena::new();
        let mut scene = Scene::new(&arena);
        stacked_triangles(&mut scene, 1.0);
        let before = arena.allocated_bytes();

        let shared = scene.freeze();
        assert!(arena.allocated_bytes() == before);
        assert!(arena.live_objects() == 1);

        drop(scene);
        assert!(arena.allocated_bytes() == before);
        assert!(shared.heap_size() == before);

        drop(shared);
        assert!(arena.allocated_bytes() == 0);
        assert!(arena.live_objects() == 0);
    }
}
