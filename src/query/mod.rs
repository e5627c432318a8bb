mod parallel;

use std::{num::NonZeroUsize, sync::Arc};

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::{
    arena::{Arena, ArenaCharge},
    geometry::{LANES, Ray, RayPacket},
    layout::{IntersectionRecord, LayoutError, RECORD_WORDS, RayRecord, flat},
    scene::{
        Scene, SceneGeometry, SurfacePoint,
        triangle_bvh::{BvhHit, PacketStackCache, StackCache, TriangleBvh},
    },
};

pub use parallel::WorkerCount;

/// How a batch of rays is traversed. Both policies produce bit identical results.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// One ray at a time on the calling thread.
    Scalar,
    /// Packets of 8 rays traversed together, large batches are split across worker threads.
    #[default]
    Vectorized,
}

#[derive(Clone, Debug, bon::Builder)]
pub struct EngineConfig {
    #[builder(default)]
    pub workers: WorkerCount,

    /// Vectorized batches with at least this many rays are split across workers.
    #[builder(default = 4096)]
    pub parallel_threshold: usize,

    /// Rays per block handed to a worker, rounded up to whole packets.
    #[builder(default = NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN))]
    pub block_size: NonZeroUsize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::builder().build()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("Query engine is not set up with a scene")]
    NotReady,

    #[error("Query engine is already set up, release it first")]
    AlreadySetUp,

    #[error("Scene belongs to a different arena than the query engine")]
    ArenaMismatch,

    #[error("Got {rays} rays but room for {intersections} intersections")]
    BatchLengthMismatch { rays: usize, intersections: usize },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Everything built by `setup`, released as a unit.
#[derive(Debug)]
struct Prepared {
    scene: Arc<SceneGeometry>,
    bvh: TriangleBvh,
    _charge: ArenaCharge,
}

/// Builds an acceleration structure over a scene and answers batches of ray queries against it.
#[derive(Debug)]
pub struct QueryEngine {
    arena: Arena,
    config: EngineConfig,
    prepared: Option<Prepared>,
}

impl QueryEngine {
    pub fn new(arena: &Arena) -> QueryEngine {
        Self::with_config(arena, EngineConfig::default())
    }

    pub fn with_config(arena: &Arena, config: EngineConfig) -> QueryEngine {
        QueryEngine {
            arena: arena.clone(),
            config,
            prepared: None,
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.prepared.is_some()
    }

    /// Freezes the scene and builds the acceleration structure over it.
    #[tracing::instrument(skip_all, fields(arena = self.arena.id()))]
    pub fn setup(&mut self, scene: &mut Scene) -> Result<(), QueryError> {
        if self.prepared.is_some() {
            return Err(QueryError::AlreadySetUp);
        }
        if !scene.arena().same_as(&self.arena) {
            return Err(QueryError::ArenaMismatch);
        }

        let geometry = scene.freeze();
        let bvh = TriangleBvh::build(&geometry);
        let charge = self.arena.charge(bvh.heap_size());
        tracing::debug!(
            triangles = bvh.triangle_count(),
            bytes = charge.bytes(),
            "query engine ready"
        );

        self.prepared = Some(Prepared {
            scene: geometry,
            bvh,
            _charge: charge,
        });
        Ok(())
    }

    /// Drops the acceleration structure. The scene stays frozen.
    pub fn release(&mut self) {
        if self.prepared.take().is_some() {
            tracing::debug!(arena = self.arena.id(), "query engine released");
        }
    }

    /// Statistics of the built structure, None before setup.
    pub fn bvh(&self) -> Option<&TriangleBvh> {
        self.prepared.as_ref().map(|p| &p.bvh)
    }

    /// Writes one intersection record per ray, `intersections[i]` answers `rays[i]`.
    #[tracing::instrument(level = "trace", skip_all, fields(rays = rays.len(), ?policy))]
    pub fn run(
        &self,
        rays: &[RayRecord],
        intersections: &mut [IntersectionRecord],
        policy: ExecutionPolicy,
    ) -> Result<(), QueryError> {
        let prepared = self.prepared.as_ref().ok_or(QueryError::NotReady)?;
        if rays.len() != intersections.len() {
            return Err(QueryError::BatchLengthMismatch {
                rays: rays.len(),
                intersections: intersections.len(),
            });
        }

        match policy {
            ExecutionPolicy::Scalar => prepared.run_scalar(rays, intersections),
            ExecutionPolicy::Vectorized => {
                let workers = self.config.workers.resolve();
                if workers > 1 && rays.len() >= self.config.parallel_threshold {
                    let block_size = self.config.block_size.get().next_multiple_of(LANES);
                    let block_size = NonZeroUsize::new(block_size).unwrap_or(NonZeroUsize::MIN);
                    let used = parallel::for_each_block(
                        rays,
                        intersections,
                        block_size,
                        workers,
                        |rays, intersections| prepared.run_packets(rays, intersections),
                    );
                    tracing::trace!(threads = used, "parallel batch finished");
                } else {
                    prepared.run_packets(rays, intersections);
                }
            }
        }

        Ok(())
    }

    /// Convenience wrapper around [`QueryEngine::run`] allocating the output.
    pub fn cast(
        &self,
        rays: &[RayRecord],
        policy: ExecutionPolicy,
    ) -> Result<Vec<IntersectionRecord>, QueryError> {
        let mut intersections = vec![IntersectionRecord::MISS; rays.len()];
        self.run(rays, &mut intersections, policy)?;
        Ok(intersections)
    }

    /// [`QueryEngine::run`] over the flat compatibility encoding.
    pub fn run_flat(
        &self,
        rays: &[f32],
        intersections: &mut [i32],
        policy: ExecutionPolicy,
    ) -> Result<(), QueryError> {
        let rays = flat::rays_from_flat(rays)?;
        if intersections.len() % RECORD_WORDS != 0 {
            return Err(LayoutError::RaggedBatch {
                len: intersections.len(),
                stride: RECORD_WORDS,
            }
            .into());
        }
        if intersections.len() != rays.len() * RECORD_WORDS {
            return Err(QueryError::BatchLengthMismatch {
                rays: rays.len(),
                intersections: intersections.len() / RECORD_WORDS,
            });
        }
        let records = self.cast(rays, policy)?;
        flat::encode_intersections(&records, intersections)?;
        Ok(())
    }

    /// Surface attributes at an intersection returned by this engine.
    pub fn surface_point(
        &self,
        record: &IntersectionRecord,
    ) -> Result<Option<SurfacePoint>, QueryError> {
        let prepared = self.prepared.as_ref().ok_or(QueryError::NotReady)?;
        Ok(prepared.scene.surface_point(record))
    }
}

impl Prepared {
    fn run_scalar(&self, rays: &[RayRecord], intersections: &mut [IntersectionRecord]) {
        let mut stack = StackCache::default();
        for (record, out) in rays.iter().zip(intersections.iter_mut()) {
            let hit = self.bvh.intersect(&Ray::from(record), &mut stack);
            *out = self.record(hit);
        }
    }

    fn run_packets(&self, rays: &[RayRecord], intersections: &mut [IntersectionRecord]) {
        let mut stack = PacketStackCache::default();
        for (records, out) in rays.chunks(LANES).zip(intersections.chunks_mut(LANES)) {
            let rays: ArrayVec<Ray, LANES> = records.iter().map(Ray::from).collect();
            let hits = self.bvh.intersect_packet(&RayPacket::new(&rays), &mut stack);
            for (hit, out) in hits.into_iter().zip(out.iter_mut()) {
                *out = self.record(hit);
            }
        }
    }

    fn record(&self, hit: Option<BvhHit>) -> IntersectionRecord {
        let Some(hit) = hit else {
            return IntersectionRecord::MISS;
        };
        let submesh_key = self
            .scene
            .geometry(hit.triangle.geometry)
            .map_or(0, |geometry| geometry.submesh_key);
        IntersectionRecord::hit(
            hit.t,
            hit.triangle.geometry.raw(),
            submesh_key,
            hit.triangle.triangle,
            hit.uv,
        )
    }
}
