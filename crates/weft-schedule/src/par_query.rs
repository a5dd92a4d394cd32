//! Data-parallel iteration over one query.
//!
//! # Execution Model
//!
//! ```text
//! count = world.count_matching(query)       (once)
//! buf   = pool.acquire(count)               (fixed capacity, returned on drop)
//! world.for_each(query, push → buf)         (single-threaded)
//! ┌────────────┬────────────┬─────┬────────────┐
//! │ worker 0   │ worker 1   │ ... │ worker k-1 │   contiguous chunks of buf
//! └────────────┴────────────┴─────┴────────────┘
//!   callback(world.entity(e)) per entity
//! ```
//!
//! Unlike the scheduler, the executor does not isolate failures: a
//! panicking callback propagates to the caller once every worker has
//! stopped.

use std::{
    fmt,
    ops::Deref,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};
use weft_ecs::{Entity, EntityRef, Query, World};

use crate::{config::QueryExecutorConfig, error::SchedulerResult};

/// Buffers kept for reuse.
const MAX_POOLED_BUFFERS: usize = 8;

/// Reusable entity buffers.
#[derive(Default)]
struct BufferPool {
    free: Mutex<Vec<Vec<Entity>>>,
}

impl BufferPool {
    fn acquire(&self, capacity: usize) -> PooledBuffer<'_> {
        let mut buffer = self.free.lock().pop().unwrap_or_default();
        buffer.clear();
        buffer.reserve_exact(capacity);
        PooledBuffer {
            buffer,
            capacity,
            pool: self,
        }
    }

    fn release(&self, mut buffer: Vec<Entity>) {
        buffer.clear();
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(buffer);
        }
    }

    fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

/// Buffer on loan from a [`BufferPool`]; returned when dropped, including
/// during unwinding.
struct PooledBuffer<'a> {
    buffer: Vec<Entity>,
    capacity: usize,
    pool: &'a BufferPool,
}

impl PooledBuffer<'_> {
    /// Append unless the buffer is full. Never reallocates.
    fn push(&mut self, entity: Entity) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(entity);
        }
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [Entity];

    fn deref(&self) -> &[Entity] {
        &self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

/// Executor statistics, derived values computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub queries_executed: u64,
    pub entities_processed: u64,
    pub total_time: Duration,
    /// Workers used by the most recent query (0 if it matched nothing).
    pub last_thread_count: usize,
    /// Sum of workers over all queries.
    pub total_threads: u64,
}

impl QueryStats {
    #[must_use]
    pub fn average_time(&self) -> Duration {
        if self.queries_executed == 0 {
            return Duration::ZERO;
        }
        self.total_time / u32::try_from(self.queries_executed).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn average_entities(&self) -> f64 {
        if self.queries_executed == 0 {
            return 0.0;
        }
        self.entities_processed as f64 / self.queries_executed as f64
    }

    /// Mean workers per query: the speedup over a single thread under
    /// perfect scaling.
    #[must_use]
    pub fn estimated_speedup(&self) -> f64 {
        if self.queries_executed == 0 {
            return 1.0;
        }
        (self.total_threads as f64 / self.queries_executed as f64).max(1.0)
    }
}

/// Splits one query's matches across a worker pool.
pub struct ParallelQueryExecutor {
    config: QueryExecutorConfig,
    pool: ThreadPool,
    buffers: BufferPool,
    stats: Mutex<QueryStats>,
}

impl ParallelQueryExecutor {
    pub fn new(config: QueryExecutorConfig) -> SchedulerResult<Self> {
        let threads = config.resolved_max_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("weft-query-{index}"))
            .build()?;
        debug!(
            "Query executor created with {} threads (min batch {})",
            threads, config.min_batch_size
        );

        Ok(Self {
            config,
            pool,
            buffers: BufferPool::default(),
            stats: Mutex::new(QueryStats::default()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &QueryExecutorConfig {
        &self.config
    }

    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Workers for `count` entities: `min(threads, ceil(count / min_batch))`,
    /// at least one.
    #[must_use]
    pub fn worker_count(&self, count: usize) -> usize {
        let batches = count.div_ceil(self.config.min_batch_size.max(1));
        batches.min(self.max_threads()).max(1)
    }

    /// Invoke `callback` once per matching entity, in parallel.
    pub fn execute_parallel<F>(&self, world: &World, query: &Query, callback: F)
    where
        F: Fn(EntityRef<'_>) + Sync,
    {
        let start = Instant::now();
        let Some(buffer) = self.collect(world, query) else {
            self.record(0, 0, start.elapsed());
            return;
        };

        let workers = self.worker_count(buffer.len());
        let chunk_size = buffer.len().div_ceil(workers);
        let callback = &callback;

        self.pool.scope(|scope| {
            for chunk in buffer.chunks(chunk_size) {
                scope.spawn(move |_| {
                    for &entity in chunk {
                        callback(world.entity(entity));
                    }
                });
            }
        });

        self.record(buffer.len(), workers, start.elapsed());
    }

    /// Like [`execute_parallel`](Self::execute_parallel) with a fallible
    /// callback. After the first error, workers stop picking up entities
    /// and that error is returned.
    pub fn try_execute_parallel<F>(&self, world: &World, query: &Query, callback: F) -> eyre::Result<()>
    where
        F: Fn(EntityRef<'_>) -> eyre::Result<()> + Sync,
    {
        let start = Instant::now();
        let Some(buffer) = self.collect(world, query) else {
            self.record(0, 0, start.elapsed());
            return Ok(());
        };

        let workers = self.worker_count(buffer.len());
        let chunk_size = buffer.len().div_ceil(workers);
        let failed = AtomicBool::new(false);
        let first_error = Mutex::new(None);
        let (callback, failed_ref, first_error_ref) = (&callback, &failed, &first_error);

        self.pool.scope(|scope| {
            for chunk in buffer.chunks(chunk_size) {
                scope.spawn(move |_| {
                    for &entity in chunk {
                        if failed_ref.load(Ordering::Relaxed) {
                            return;
                        }
                        if let Err(report) = callback(world.entity(entity)) {
                            failed_ref.store(true, Ordering::Relaxed);
                            first_error_ref.lock().get_or_insert(report);
                            return;
                        }
                    }
                });
            }
        });

        self.record(buffer.len(), workers, start.elapsed());
        first_error.into_inner().map_or(Ok(()), Err)
    }

    /// Map every matching entity and combine the results.
    ///
    /// Each worker folds its chunk; the partial results are then reduced
    /// on the calling thread in no particular order, so `reduce` must be
    /// associative and commutative. No matches yields `R::default()`.
    pub fn execute_parallel_with_reduce<R, M, Rd>(
        &self,
        world: &World,
        query: &Query,
        map: M,
        reduce: Rd,
    ) -> R
    where
        R: Default + Send,
        M: Fn(EntityRef<'_>) -> R + Sync,
        Rd: Fn(R, R) -> R + Sync,
    {
        let start = Instant::now();
        let Some(buffer) = self.collect(world, query) else {
            self.record(0, 0, start.elapsed());
            return R::default();
        };

        let workers = self.worker_count(buffer.len());
        let chunk_size = buffer.len().div_ceil(workers);
        let partials = SegQueue::new();
        let (map, reduce, partials_ref) = (&map, &reduce, &partials);

        self.pool.scope(|scope| {
            for chunk in buffer.chunks(chunk_size) {
                scope.spawn(move |_| {
                    let partial = chunk
                        .iter()
                        .map(|&entity| map(world.entity(entity)))
                        .reduce(reduce);
                    if let Some(partial) = partial {
                        partials_ref.push(partial);
                    }
                });
            }
        });

        self.record(buffer.len(), workers, start.elapsed());

        let mut result: Option<R> = None;
        while let Some(partial) = partials.pop() {
            result = Some(match result {
                Some(acc) => reduce(acc, partial),
                None => partial,
            });
        }
        result.unwrap_or_default()
    }

    /// Count, then fill a pooled buffer. `None` when nothing matches.
    fn collect(&self, world: &World, query: &Query) -> Option<PooledBuffer<'_>> {
        let count = world.count_matching(query);
        if count == 0 {
            trace!("Parallel query matched no entities");
            return None;
        }

        let mut buffer = self.buffers.acquire(count);
        world.for_each(query, |entity| buffer.push(entity));
        Some(buffer)
    }

    fn record(&self, entities: usize, workers: usize, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.queries_executed += 1;
        stats.entities_processed += entities as u64;
        stats.total_time += elapsed;
        stats.last_thread_count = workers;
        stats.total_threads += workers as u64;
    }

    #[must_use]
    pub fn stats(&self) -> QueryStats {
        *self.stats.lock()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = QueryStats::default();
    }

    /// Buffers currently waiting for reuse.
    #[must_use]
    pub fn pooled_buffers(&self) -> usize {
        self.buffers.pooled()
    }
}

impl fmt::Debug for ParallelQueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelQueryExecutor")
            .field("config", &self.config)
            .field("threads", &self.max_threads())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{AssertUnwindSafe, catch_unwind},
        sync::atomic::AtomicUsize,
    };

    use super::*;

    #[derive(Clone, Copy)]
    struct Value(u64);

    struct Tag;

    fn executor(threads: usize, min_batch: usize) -> ParallelQueryExecutor {
        ParallelQueryExecutor::new(
            QueryExecutorConfig::default()
                .with_max_threads(threads)
                .with_min_batch_size(min_batch),
        )
        .unwrap()
    }

    fn world_with(n: u64) -> World {
        let mut world = World::new();
        for i in 0..n {
            world.spawn(Value(i));
        }
        world
    }

    #[test]
    fn test_worker_count_respects_batches_and_threads() {
        let exec = executor(4, 100);
        assert_eq!(exec.worker_count(0), 1);
        assert_eq!(exec.worker_count(1), 1);
        assert_eq!(exec.worker_count(100), 1);
        assert_eq!(exec.worker_count(101), 2);
        assert_eq!(exec.worker_count(10_000), 4);
    }

    #[test]
    fn test_visits_every_entity_once() {
        let exec = executor(4, 8);
        let world = world_with(500);
        let visited = AtomicUsize::new(0);

        exec.execute_parallel(&world, &Query::new().read::<Value>(), |entity| {
            assert!(entity.has::<Value>());
            visited.fetch_add(1, Ordering::Relaxed);
        });

        assert_eq!(visited.load(Ordering::Relaxed), 500);
        let stats = exec.stats();
        assert_eq!(stats.queries_executed, 1);
        assert_eq!(stats.entities_processed, 500);
        assert_eq!(stats.last_thread_count, 4);
        assert!((stats.estimated_speedup() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_writes_through_entity_refs() {
        let exec = executor(3, 4);
        let world = world_with(64);

        exec.execute_parallel(&world, &Query::new().write::<Value>(), |entity| {
            if let Some(mut value) = entity.try_get_mut::<Value>() {
                value.0 *= 2;
            }
        });

        let total = exec.execute_parallel_with_reduce(
            &world,
            &Query::new().read::<Value>(),
            |entity| entity.try_get::<Value>().map_or(0, |v| v.0),
            |a, b| a + b,
        );
        assert_eq!(total, 2 * (0..64).sum::<u64>());
    }

    #[test]
    fn test_zero_matches_records_empty_execution() {
        let exec = executor(2, 1);
        let world = world_with(10);
        let query = Query::new().with::<Tag>();

        exec.execute_parallel(&world, &query, |_| panic!("no entity should match"));
        let sum = exec.execute_parallel_with_reduce(&world, &query, |_| 1_u64, |a, b| a + b);

        assert_eq!(sum, 0);
        let stats = exec.stats();
        assert_eq!(stats.queries_executed, 2);
        assert_eq!(stats.entities_processed, 0);
        assert_eq!(stats.last_thread_count, 0);
    }

    #[test]
    fn test_first_error_is_returned() {
        let exec = executor(2, 1);
        let world = world_with(20);

        let result = exec.try_execute_parallel(&world, &Query::new().read::<Value>(), |entity| {
            let value = entity.get::<Value>()?;
            if value.0 == 7 {
                eyre::bail!("bad value {}", value.0);
            }
            Ok(())
        });

        assert_eq!(result.unwrap_err().to_string(), "bad value 7");
    }

    #[test]
    fn test_buffer_returns_to_pool_after_panic() {
        let exec = executor(2, 1);
        let world = world_with(16);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            exec.execute_parallel(&world, &Query::new().read::<Value>(), |_| {
                panic!("callback failure");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(exec.pooled_buffers(), 1);
        assert_eq!(exec.stats().queries_executed, 0);
    }

    #[test]
    fn test_reset_clears_stats() {
        let exec = executor(1, 1);
        let world = world_with(3);
        exec.execute_parallel(&world, &Query::new(), |_| {});
        assert_eq!(exec.stats().entities_processed, 3);

        exec.reset_stats();
        assert_eq!(exec.stats(), QueryStats::default());
        assert_eq!(exec.stats().average_time(), Duration::ZERO);
    }
}
