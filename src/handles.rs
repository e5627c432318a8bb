//! Opaque handles over the engine's lifecycle.
//!
//! The registry owns every arena, scene and query engine and hands out generational
//! keys instead of references. A key whose object was destroyed is reported as stale,
//! it is never reused for a different object.

use std::fmt::Display;

use slotmap::{SlotMap, new_key_type};
use thiserror::Error;

use crate::{
    arena::Arena,
    layout::{IntersectionRecord, RayRecord},
    query::{EngineConfig, ExecutionPolicy, QueryEngine, QueryError},
    scene::{GeometryFragment, GeometryIdx, Scene, SceneError},
};

new_key_type! {
    pub struct ArenaHandle;
    pub struct SceneHandle;
    pub struct EngineHandle;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Arena,
    Scene,
    Engine,
}

impl Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HandleKind::Arena => "arena",
            HandleKind::Scene => "scene",
            HandleKind::Engine => "query engine",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandleError {
    #[error("Stale {kind} handle")]
    Stale { kind: HandleKind },

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug)]
struct SceneEntry {
    arena: ArenaHandle,
    scene: Scene,
}

#[derive(Debug)]
struct EngineEntry {
    arena: ArenaHandle,
    engine: QueryEngine,
}

#[derive(Debug, Default)]
pub struct Registry {
    arenas: SlotMap<ArenaHandle, Arena>,
    scenes: SlotMap<SceneHandle, SceneEntry>,
    engines: SlotMap<EngineHandle, EngineEntry>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn create_allocator(&mut self) -> ArenaHandle {
        self.arenas.insert(Arena::new())
    }

    /// Destroys the arena together with every scene and engine created from it.
    pub fn destroy_allocator(&mut self, handle: ArenaHandle) -> Result<(), HandleError> {
        let arena = self.arenas.remove(handle).ok_or(HandleError::Stale {
            kind: HandleKind::Arena,
        })?;

        self.engines.retain(|key, entry| {
            let keep = entry.arena != handle;
            if !keep {
                tracing::warn!(?key, arena = arena.id(), "destroying query engine with its arena");
            }
            keep
        });
        self.scenes.retain(|key, entry| {
            let keep = entry.arena != handle;
            if !keep {
                tracing::warn!(?key, arena = arena.id(), "destroying scene with its arena");
            }
            keep
        });

        debug_assert!(arena.live_objects() == 0);
        Ok(())
    }

    pub fn arena(&self, handle: ArenaHandle) -> Result<&Arena, HandleError> {
        self.arenas.get(handle).ok_or(HandleError::Stale {
            kind: HandleKind::Arena,
        })
    }

    pub fn create_scene(&mut self, arena: ArenaHandle) -> Result<SceneHandle, HandleError> {
        let scene = Scene::new(self.arena(arena)?);
        Ok(self.scenes.insert(SceneEntry { arena, scene }))
    }

    pub fn scene(&self, handle: SceneHandle) -> Result<&Scene, HandleError> {
        Ok(&self.scene_entry(handle)?.scene)
    }

    pub fn append_geometry(
        &mut self,
        scene: SceneHandle,
        fragment: &GeometryFragment,
    ) -> Result<GeometryIdx, HandleError> {
        Ok(self.scene_entry_mut(scene)?.scene.append_geometry(fragment)?)
    }

    pub fn destroy_scene(&mut self, handle: SceneHandle) -> Result<(), HandleError> {
        self.scenes
            .remove(handle)
            .map(drop)
            .ok_or(HandleError::Stale {
                kind: HandleKind::Scene,
            })
    }

    pub fn create_query_engine(
        &mut self,
        arena: ArenaHandle,
        config: EngineConfig,
    ) -> Result<EngineHandle, HandleError> {
        let engine = QueryEngine::with_config(self.arena(arena)?, config);
        Ok(self.engines.insert(EngineEntry { arena, engine }))
    }

    pub fn query_engine(&self, handle: EngineHandle) -> Result<&QueryEngine, HandleError> {
        Ok(&self.engine_entry(handle)?.engine)
    }

    /// Builds the engine's structure over the scene, freezing the scene.
    /// Both must come from the same arena.
    pub fn setup(&mut self, engine: EngineHandle, scene: SceneHandle) -> Result<(), HandleError> {
        let engine_entry = self.engines.get_mut(engine).ok_or(HandleError::Stale {
            kind: HandleKind::Engine,
        })?;
        let scene_entry = self.scenes.get_mut(scene).ok_or(HandleError::Stale {
            kind: HandleKind::Scene,
        })?;
        if engine_entry.arena != scene_entry.arena {
            return Err(QueryError::ArenaMismatch.into());
        }
        Ok(engine_entry.engine.setup(&mut scene_entry.scene)?)
    }

    pub fn run(
        &self,
        engine: EngineHandle,
        rays: &[RayRecord],
        intersections: &mut [IntersectionRecord],
        policy: ExecutionPolicy,
    ) -> Result<(), HandleError> {
        Ok(self
            .engine_entry(engine)?
            .engine
            .run(rays, intersections, policy)?)
    }

    pub fn run_flat(
        &self,
        engine: EngineHandle,
        rays: &[f32],
        intersections: &mut [i32],
        policy: ExecutionPolicy,
    ) -> Result<(), HandleError> {
        Ok(self
            .engine_entry(engine)?
            .engine
            .run_flat(rays, intersections, policy)?)
    }

    /// Drops the engine's built structure, the engine itself stays usable for another setup.
    pub fn release(&mut self, engine: EngineHandle) -> Result<(), HandleError> {
        self.engines
            .get_mut(engine)
            .ok_or(HandleError::Stale {
                kind: HandleKind::Engine,
            })?
            .engine
            .release();
        Ok(())
    }

    pub fn destroy_query_engine(&mut self, handle: EngineHandle) -> Result<(), HandleError> {
        self.engines
            .remove(handle)
            .map(drop)
            .ok_or(HandleError::Stale {
                kind: HandleKind::Engine,
            })
    }

    fn scene_entry(&self, handle: SceneHandle) -> Result<&SceneEntry, HandleError> {
        self.scenes.get(handle).ok_or(HandleError::Stale {
            kind: HandleKind::Scene,
        })
    }

    fn scene_entry_mut(&mut self, handle: SceneHandle) -> Result<&mut SceneEntry, HandleError> {
        self.scenes.get_mut(handle).ok_or(HandleError::Stale {
            kind: HandleKind::Scene,
        })
    }

    fn engine_entry(&self, handle: EngineHandle) -> Result<&EngineEntry, HandleError> {
        self.engines.get(handle).ok_or(HandleError::Stale {
            kind: HandleKind::Engine,
        })
    }
}
