use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
    thread,
};

/// Number of threads processing a batch, the calling thread included.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WorkerCount {
    /// One per logical CPU.
    #[default]
    Auto,
    Manual(NonZeroUsize),
}

impl WorkerCount {
    pub fn resolve(self) -> usize {
        match self {
            WorkerCount::Auto => num_cpus::get().max(1),
            WorkerCount::Manual(count) => count.get(),
        }
    }
}

/// Splits `input` and `output` into matching blocks of `block_size` items and calls `f`
/// on every pair, distributing the blocks over up to `workers` threads.
///
/// The calling thread processes blocks too, so the work completes even if no helper
/// thread can be spawned. Returns the number of threads that took part.
pub fn for_each_block<I, O, F>(
    input: &[I],
    output: &mut [O],
    block_size: NonZeroUsize,
    workers: usize,
    f: F,
) -> usize
where
    I: Sync,
    O: Send,
    F: Fn(&[I], &mut [O]) + Sync,
{
    assert!(input.len() == output.len());

    let block_count = input.len().div_ceil(block_size.get());
    let helpers = workers.min(block_count).saturating_sub(1);

    let blocks = Mutex::new(
        input
            .chunks(block_size.get())
            .zip(output.chunks_mut(block_size.get())),
    );
    let work = || {
        loop {
            let next = blocks.lock().unwrap_or_else(PoisonError::into_inner).next();
            let Some((input, output)) = next else {
                break;
            };
            f(input, output);
        }
    };

    thread::scope(|s| {
        let mut spawned = 0;
        for id in 0..helpers {
            let result = thread::Builder::new()
                .name(format!("raybatch-worker{id}"))
                .spawn_scoped(s, &work);
            match result {
                Ok(_) => spawned += 1,
                Err(error) => {
                    tracing::warn!(%error, spawned, "failed to spawn worker thread, continuing with fewer");
                    break;
                }
            }
        }

        work();
        spawned + 1
    })
}
