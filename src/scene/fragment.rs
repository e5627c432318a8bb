use nalgebra::{Matrix3, Matrix4};
use thiserror::Error;

use crate::geometry::{TexturePoint, Triangle, WorldPoint, WorldVector};

use super::Geometry;

/// Version of the geometry append contract implemented by [`GeometryFragment`].
///
/// Version 1 callers only passed positions and indices, they map onto this
/// version by leaving every optional field unset.
pub const APPEND_CONTRACT_VERSION: u32 = 2;

/// One sub-mesh instance submitted for ingestion.
///
/// Arrays are borrowed only for the duration of the append, the scene keeps copies.
#[derive(Clone, Debug, bon::Builder)]
pub struct GeometryFragment<'a> {
    pub object_key: u32,
    pub submesh_key: u32,

    /// Three floats per vertex, in world space unless `transform` is set.
    pub positions: &'a [f32],
    /// Three vertex indices per triangle.
    pub indices: &'a [i32],

    /// Three floats per vertex.
    pub normals: Option<&'a [f32]>,
    /// Two floats per vertex.
    pub uvs: Option<&'a [f32]>,

    pub debug_label: Option<&'a str>,

    /// Row major local to world matrix, baked into the positions and normals on ingestion.
    pub transform: Option<&'a [f32; 16]>,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Invalid geometry (object {object_key}, submesh {submesh_key}): {kind}")]
pub struct GeometryError {
    pub object_key: u32,
    pub submesh_key: u32,
    pub kind: GeometryErrorKind,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryErrorKind {
    #[error("position array length {0} is not a multiple of 3")]
    RaggedPositions(usize),

    #[error("index array length {0} is not a multiple of 3")]
    RaggedIndices(usize),

    #[error(
        "triangle {triangle}, corner {corner} references vertex {index}, but there are {vertex_count} vertices"
    )]
    IndexOutOfRange {
        triangle: usize,
        corner: usize,
        index: i32,
        vertex_count: usize,
    },

    #[error("expected {expected} normal components, got {actual}")]
    NormalCount { expected: usize, actual: usize },

    #[error("expected {expected} texture coordinate components, got {actual}")]
    UvCount { expected: usize, actual: usize },

    #[error("transform is singular, normals can't be transformed")]
    SingularTransform,
}

impl GeometryFragment<'_> {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Validates the fragment and converts it to owned world space geometry.
    pub(super) fn bake(&self) -> Result<Geometry, GeometryError> {
        self.bake_inner().map_err(|kind| GeometryError {
            object_key: self.object_key,
            submesh_key: self.submesh_key,
            kind,
        })
    }

    fn bake_inner(&self) -> Result<Geometry, GeometryErrorKind> {
        self.validate()?;

        let transform = self.transform.map(|m| Matrix4::from_row_slice(m));

        let positions = self.positions.chunks_exact(3).map(|p| {
            let p = WorldPoint::new(p[0], p[1], p[2]);
            match &transform {
                Some(m) => m.transform_point(&p),
                None => p,
            }
        });

        let normals = match self.normals {
            Some(normals) => {
                let normal_matrix = match &transform {
                    Some(m) => Some(normal_matrix(m).ok_or(GeometryErrorKind::SingularTransform)?),
                    None => None,
                };
                Some(
                    normals
                        .chunks_exact(3)
                        .map(|n| {
                            let n = WorldVector::new(n[0], n[1], n[2]);
                            match &normal_matrix {
                                Some(m) => (m * n)
                                    .try_normalize(0.0)
                                    .unwrap_or_else(WorldVector::zeros),
                                None => n,
                            }
                        })
                        .collect(),
                )
            }
            None => None,
        };

        let uvs = self.uvs.map(|uvs| {
            uvs.chunks_exact(2)
                .map(|uv| TexturePoint::new(uv[0], uv[1]))
                .collect()
        });

        let triangles = self
            .indices
            .chunks_exact(3)
            .map(|t| Triangle::new(t[0] as u32, t[1] as u32, t[2] as u32))
            .collect();

        Ok(Geometry {
            object_key: self.object_key,
            submesh_key: self.submesh_key,
            debug_label: self.debug_label.map(str::to_owned),
            positions: positions.collect(),
            triangles,
            normals,
            uvs,
        })
    }

    fn validate(&self) -> Result<(), GeometryErrorKind> {
        if self.positions.len() % 3 != 0 {
            return Err(GeometryErrorKind::RaggedPositions(self.positions.len()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(GeometryErrorKind::RaggedIndices(self.indices.len()));
        }

        let vertex_count = self.vertex_count();
        for (i, &index) in self.indices.iter().enumerate() {
            if index < 0 || index as usize >= vertex_count {
                return Err(GeometryErrorKind::IndexOutOfRange {
                    triangle: i / 3,
                    corner: i % 3,
                    index,
                    vertex_count,
                });
            }
        }

        if let Some(normals) = self.normals
            && normals.len() != vertex_count * 3
        {
            return Err(GeometryErrorKind::NormalCount {
                expected: vertex_count * 3,
                actual: normals.len(),
            });
        }
        if let Some(uvs) = self.uvs
            && uvs.len() != vertex_count * 2
        {
            return Err(GeometryErrorKind::UvCount {
                expected: vertex_count * 2,
                actual: uvs.len(),
            });
        }

        Ok(())
    }
}

/// Inverse transpose of the linear part, None if it is not invertible.
fn normal_matrix(transform: &Matrix4<f32>) -> Option<Matrix3<f32>> {
    let linear: Matrix3<f32> = transform.fixed_view::<3, 3>(0, 0).into_owned();
    Some(linear.try_inverse()?.transpose())
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::{assert, let_assert};
    use test_case::test_case;

    const QUAD_POSITIONS: [f32; 12] = [
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        1.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, //
    ];
    const QUAD_INDICES: [i32; 6] = [0, 1, 2, 0, 2, 3];
    const QUAD_NORMALS: [f32; 12] = [
        0.0, 0.0, 1.0, //
        0.0, 0.0, 1.0, //
        0.0, 0.0, 1.0, //
        0.0, 0.0, 1.0, //
    ];

    fn quad() -> GeometryFragment<'static> {
        GeometryFragment::builder()
            .object_key(4)
            .submesh_key(2)
            .positions(&QUAD_POSITIONS)
            .indices(&QUAD_INDICES)
            .build()
    }

    #[test]
    fn plain_fragment_is_copied() {
        let fragment = GeometryFragment {
            debug_label: Some("quad"),
            ..quad()
        };
        let_assert!(Ok(geometry) = fragment.bake());
        assert!(geometry.positions.len() == 4);
        assert!(geometry.positions[2] == WorldPoint::new(1.0, 1.0, 0.0));
        assert!(geometry.triangles == vec![Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)]);
        assert!(geometry.normals.is_none());
        assert!(geometry.uvs.is_none());
        assert!(geometry.debug_label.as_deref() == Some("quad"));
    }

    #[test]
    fn ragged_positions() {
        let positions = [0.0; 10];
        let fragment = GeometryFragment {
            positions: &positions,
            ..quad()
        };
        let_assert!(Err(error) = fragment.bake());
        assert!(error.object_key == 4);
        assert!(error.submesh_key == 2);
        assert!(error.kind == GeometryErrorKind::RaggedPositions(10));
    }

    #[test]
    fn ragged_indices() {
        let fragment = GeometryFragment::builder()
            .object_key(1)
            .submesh_key(0)
            .positions(&QUAD_POSITIONS)
            .indices(&QUAD_INDICES[..5])
            .build();
        let_assert!(Err(error) = fragment.bake());
        assert!(error.kind == GeometryErrorKind::RaggedIndices(5));
    }

    #[test_case(4, 1, 1 ; "one past the end")]
    #[test_case(-1, 0, 2 ; "negative")]
    #[test_case(100, 1, 0 ; "far out")]
    fn index_out_of_range(bad: i32, triangle: usize, corner: usize) {
        let mut indices = QUAD_INDICES;
        indices[triangle * 3 + corner] = bad;
        let fragment = GeometryFragment::builder()
            .object_key(1)
            .submesh_key(0)
            .positions(&QUAD_POSITIONS)
            .indices(&indices)
            .build();
        let_assert!(Err(error) = fragment.bake());
        assert!(
            error.kind
                == GeometryErrorKind::IndexOutOfRange {
                    triangle,
                    corner,
                    index: bad,
                    vertex_count: 4
                }
        );
    }

    #[test]
    fn normal_count_mismatch() {
        let fragment = GeometryFragment {
            normals: Some(&QUAD_NORMALS[..9]),
            ..quad()
        };
        let_assert!(Err(error) = fragment.bake());
        assert!(
            error.kind
                == GeometryErrorKind::NormalCount {
                    expected: 12,
                    actual: 9
                }
        );
    }

    #[test]
    fn uv_count_mismatch() {
        let uvs = [0.0; 6];
        let fragment = GeometryFragment {
            uvs: Some(&uvs),
            ..quad()
        };
        let_assert!(Err(error) = fragment.bake());
        assert!(
            error.kind
                == GeometryErrorKind::UvCount {
                    expected: 8,
                    actual: 6
                }
        );
    }

    #[test]
    fn transform_is_baked() {
        #[rustfmt::skip]
        let transform = [
            2.0, 0.0, 0.0, 10.0,
            0.0, 2.0, 0.0, 0.0,
            0.0, 0.0, 2.0, -1.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let fragment = GeometryFragment {
            normals: Some(&QUAD_NORMALS),
            transform: Some(&transform),
            ..quad()
        };
        let_assert!(Ok(geometry) = fragment.bake());
        assert!(geometry.positions[2] == WorldPoint::new(12.0, 2.0, -1.0));
        let_assert!(Some(normals) = &geometry.normals);
        assert!((normals[0] - WorldVector::new(0.0, 0.0, 1.0)).norm() < 1e-6);
    }

    #[test]
    fn normals_use_inverse_transpose() {
        // Non uniform scale along x, a 45 degree normal must tilt toward x
        #[rustfmt::skip]
        let transform = [
            0.5, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let normals = [s, 0.0, s, s, 0.0, s, s, 0.0, s, s, 0.0, s];
        let fragment = GeometryFragment {
            normals: Some(&normals),
            transform: Some(&transform),
            ..quad()
        };
        let_assert!(Ok(geometry) = fragment.bake());
        let_assert!(Some(normals) = &geometry.normals);

        let expected = WorldVector::new(2.0, 0.0, 1.0).normalize();
        assert!((normals[0] - expected).norm() < 1e-6);
    }

    #[test]
    fn singular_transform_with_normals() {
        let mut transform = [0.0; 16];
        transform[15] = 1.0;
        let fragment = GeometryFragment {
            normals: Some(&QUAD_NORMALS),
            transform: Some(&transform),
            ..quad()
        };
        let_assert!(Err(error) = fragment.bake());
        assert!(error.kind == GeometryErrorKind::SingularTransform);

        // Without normals the matrix is only applied to positions
        let fragment = GeometryFragment {
            transform: Some(&transform),
            ..quad()
        };
        let_assert!(Ok(geometry) = fragment.bake());
        assert!(geometry.positions.iter().all(|p| *p == WorldPoint::origin()));
    }
}
