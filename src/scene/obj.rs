use std::{fs, path::Path};

use indexmap::IndexSet;
use thiserror::Error;

use super::{GeometryFragment, GeometryIdx, Scene, SceneError};

#[derive(Debug, Error)]
pub enum ObjLoadError {
    #[error("Failed to read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    Parse(#[from] wavefront_obj::ParseError),

    #[error(transparent)]
    Geometry(#[from] SceneError),
}

/// Flat arrays of one OBJ geometry group, ready to be appended.
#[derive(Debug, Default)]
struct ObjFragment {
    positions: Vec<f32>,
    indices: Vec<i32>,
    normals: Vec<f32>,
    uvs: Vec<f32>,
    has_normals: bool,
    has_uvs: bool,
}

type VtnIndex = (usize, Option<usize>, Option<usize>);

impl ObjFragment {
    fn from_shapes(object: &wavefront_obj::obj::Object, shapes: &[wavefront_obj::obj::Shape]) -> Self {
        let mut vertices: IndexSet<VtnIndex> = IndexSet::new();
        let mut indices = Vec::new();
        let mut skipped = 0usize;

        for shape in shapes {
            let wavefront_obj::obj::Primitive::Triangle(a, b, c) = &shape.primitive else {
                skipped += 1;
                continue;
            };
            for corner in [*a, *b, *c] {
                let (index, _) = vertices.insert_full(corner);
                indices.push(i32::try_from(index).unwrap_or(i32::MAX));
            }
        }

        if skipped > 0 {
            tracing::warn!(object = %object.name, skipped, "skipping non-triangle primitives");
        }

        let has_normals = vertices.iter().all(|(_, _, n)| n.is_some());
        let has_uvs = vertices.iter().all(|(_, t, _)| t.is_some());

        let mut fragment = ObjFragment {
            indices,
            has_normals,
            has_uvs,
            ..Default::default()
        };

        for &(v, t, n) in vertices.iter() {
            let vertex = &object.vertices[v];
            fragment
                .positions
                .extend([vertex.x as f32, vertex.y as f32, vertex.z as f32]);

            if let Some(n) = n.filter(|_| has_normals) {
                let normal = &object.normals[n];
                fragment
                    .normals
                    .extend([normal.x as f32, normal.y as f32, normal.z as f32]);
            }
            if let Some(t) = t.filter(|_| has_uvs) {
                let tex = &object.tex_vertices[t];
                fragment.uvs.extend([tex.u as f32, tex.v as f32]);
            }
        }

        fragment
    }
}

impl Scene {
    /// Loads a Wavefront OBJ file, appending one fragment per geometry group of every object.
    ///
    /// Objects get consecutive object keys starting at `first_object_key`, geometry groups
    /// within an object are numbered by the submesh key. The file is parsed completely
    /// before the first append.
    pub fn append_obj(
        &mut self,
        path: impl AsRef<Path>,
        first_object_key: u32,
    ) -> Result<Vec<GeometryIdx>, ObjLoadError> {
        let content = fs::read_to_string(path.as_ref())?;
        self.append_obj_str(content, first_object_key)
    }

    pub fn append_obj_str(
        &mut self,
        content: String,
        first_object_key: u32,
    ) -> Result<Vec<GeometryIdx>, ObjLoadError> {
        let parsed = wavefront_obj::obj::parse(content)?;

        let mut fragments = Vec::new();
        for (object_key, object) in (first_object_key..).zip(parsed.objects.iter()) {
            for (submesh_key, group) in (0u32..).zip(object.geometry.iter()) {
                let fragment = ObjFragment::from_shapes(object, &group.shapes);
                if !fragment.indices.is_empty() {
                    fragments.push((object_key, submesh_key, object.name.as_str(), fragment));
                }
            }
        }

        let mut appended = Vec::with_capacity(fragments.len());
        for (object_key, submesh_key, name, fragment) in &fragments {
            let index = self.append_geometry(
                &GeometryFragment::builder()
                    .object_key(*object_key)
                    .submesh_key(*submesh_key)
                    .positions(&fragment.positions)
                    .indices(&fragment.indices)
                    .maybe_normals(fragment.has_normals.then_some(fragment.normals.as_slice()))
                    .maybe_uvs(fragment.has_uvs.then_some(fragment.uvs.as_slice()))
                    .debug_label(name)
                    .build(),
            )?;
            appended.push(index);
        }

        tracing::debug!(
            fragments = appended.len(),
            triangles = self.triangle_count(),
            "loaded obj"
        );
        Ok(appended)
    }
}
