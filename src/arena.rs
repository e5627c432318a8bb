use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(0);

/// Accounting anchor for everything the engine allocates.
///
/// Cloning is cheap and yields a handle to the same arena. Scenes and built
/// structures hold an [`ArenaCharge`] for their heap footprint, so the arena always
/// knows how much memory its dependents keep alive. There is no capacity limit,
/// allocation failure aborts the process through the global allocator.
#[derive(Clone, Debug)]
pub struct Arena {
    state: Arc<ArenaState>,
}

#[derive(Debug)]
struct ArenaState {
    id: u64,
    allocated: AtomicUsize,
    peak: AtomicUsize,
    live: AtomicUsize,
}

impl Arena {
    pub fn new() -> Arena {
        let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(id, "creating arena");
        Arena {
            state: Arc::new(ArenaState {
                id,
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Registers a dependent object with the given heap footprint.
    /// The bytes are returned to the arena when the charge is dropped.
    pub fn charge(&self, bytes: usize) -> ArenaCharge {
        self.state.live.fetch_add(1, Ordering::Relaxed);
        self.add(bytes);
        ArenaCharge {
            arena: self.clone(),
            bytes,
        }
    }

    /// Bytes currently charged by live dependents.
    pub fn allocated_bytes(&self) -> usize {
        self.state.allocated.load(Ordering::Relaxed)
    }

    /// Highest value `allocated_bytes` ever reached.
    pub fn peak_bytes(&self) -> usize {
        self.state.peak.load(Ordering::Relaxed)
    }

    /// Number of charges that were not dropped yet.
    pub fn live_objects(&self) -> usize {
        self.state.live.load(Ordering::Relaxed)
    }

    pub fn same_as(&self, other: &Arena) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn add(&self, bytes: usize) {
        let allocated = self.state.allocated.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.state.peak.fetch_max(allocated, Ordering::Relaxed);
    }

    fn sub(&self, bytes: usize) {
        self.state.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// Footprint of one dependent object, released on drop.
#[derive(Debug)]
pub struct ArenaCharge {
    arena: Arena,
    bytes: usize,
}

impl ArenaCharge {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Updates the charged footprint after the owner grew or shrank.
    pub fn resize(&mut self, bytes: usize) {
        if bytes > self.bytes {
            self.arena.add(bytes - self.bytes);
        } else {
            self.arena.sub(self.bytes - bytes);
        }
        self.bytes = bytes;
    }
}

impl Drop for ArenaCharge {
    fn drop(&mut self) {
        self.arena.sub(self.bytes);
        self.arena.state.live.fetch_sub(1, Ordering::Relaxed);
    }
}
