pub mod arena;
pub mod geometry;
pub mod handles;
pub mod layout;
pub mod probe;
pub mod query;
pub mod scene;
mod util;

pub use arena::Arena;
pub use handles::{ArenaHandle, EngineHandle, HandleError, Registry, SceneHandle};
pub use layout::{IntersectionRecord, RayRecord};
pub use probe::SphericalProbe;
pub use query::{EngineConfig, ExecutionPolicy, QueryEngine, QueryError, WorkerCount};
pub use scene::{GeometryFragment, Scene, SceneError};
