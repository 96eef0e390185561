use crate::error::{ConfigError, split_evenly};
use crate::generator::{OpGen, worker_seed};
use crate::pool::ThreadPool;
use crate::stats::{Measurement, RunResult, latency_histogram, merge};
use crate::store::{Codec, Store, StoreManager};
use crate::strategy::{RunContext, Strategy, drive};
use anyhow::Result;
use log::debug;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// One connection per worker thread
    #[default]
    PerWorker,
    /// All workers take turns on one connection
    Shared,
    /// Workers check a connection out of a pool of at most `size` for every operation
    Pool { size: u32 },
}

/// `count` OS threads, each issuing its share one operation at a time.
pub struct Threads {
    pub count: u64,
    pub connection: ConnectionMode,
    pub codec: Codec,
}

impl Strategy for Threads {
    fn degree(&self) -> u64 {
        self.count
    }

    fn degree_name(&self) -> &'static str {
        "num_threads"
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn describe(&self, total: u64) -> String {
        format!(
            "multithreaded_test(num_threads = {}, total_commands = {}, connection = {:?}, fast_codec = {})",
            self.count,
            total,
            self.connection,
            self.codec == Codec::Fast
        )
    }

    fn summary(&self, result: &RunResult) -> String {
        format!("Threads: {}, TPS: {}", self.count, result.tps_display())
    }

    fn execute(&self, ctx: &RunContext<'_>, total: u64) -> Result<Measurement> {
        let per_worker = split_evenly(total, self.count, self.degree_name())?;
        let gens = (0..self.count)
            .map(|i| OpGen::new(ctx.params, worker_seed(ctx.seed, i)))
            .collect::<Result<Vec<_>>>()?;

        let (elapsed, hists) = match self.connection {
            ConnectionMode::PerWorker => {
                let stores = (0..self.count)
                    .map(|_| ctx.connector.connect())
                    .collect::<Result<Vec<_>>>()?;
                debug!("opened {} connections", stores.len());
                std::thread::scope(|s| {
                    let mut pool = ThreadPool::new(s);
                    let start = ctx.clock.now();
                    for (i, (mut store, mut opgen)) in stores.into_iter().zip(gens).enumerate() {
                        pool.spawn(format!("worker-{i}"), move || {
                            let mut hist = latency_histogram()?;
                            drive(&mut opgen, per_worker, &mut hist, |op| store.apply(op))?;
                            Ok(hist)
                        })?;
                    }
                    debug!("started {} worker threads", pool.len());
                    let hists = pool.join()?;
                    Ok::<_, anyhow::Error>((ctx.clock.now().saturating_sub(start), hists))
                })?
            }
            ConnectionMode::Shared => {
                let shared: Mutex<Box<dyn Store>> = Mutex::new(ctx.connector.connect()?);
                std::thread::scope(|s| {
                    let mut pool = ThreadPool::new(s);
                    let start = ctx.clock.now();
                    for (i, mut opgen) in gens.into_iter().enumerate() {
                        let shared = &shared;
                        pool.spawn(format!("worker-{i}"), move || {
                            let mut hist = latency_histogram()?;
                            drive(&mut opgen, per_worker, &mut hist, |op| {
                                shared.lock().unwrap_or_else(|e| e.into_inner()).apply(op)
                            })?;
                            Ok(hist)
                        })?;
                    }
                    debug!("started {} worker threads", pool.len());
                    let hists = pool.join()?;
                    Ok::<_, anyhow::Error>((ctx.clock.now().saturating_sub(start), hists))
                })?
            }
            ConnectionMode::Pool { size } => {
                if size == 0 {
                    return Err(ConfigError::ZeroDegree { what: "pool_size" }.into());
                }
                let pool = r2d2::Pool::builder()
                    .max_size(size)
                    .min_idle(Some(0))
                    .test_on_check_out(false)
                    .build(StoreManager::new(ctx.connector.share()))?;
                std::thread::scope(|s| {
                    let mut workers = ThreadPool::new(s);
                    let start = ctx.clock.now();
                    for (i, mut opgen) in gens.into_iter().enumerate() {
                        let pool = &pool;
                        workers.spawn(format!("worker-{i}"), move || {
                            let mut hist = latency_histogram()?;
                            drive(&mut opgen, per_worker, &mut hist, |op| pool.get()?.apply(op))?;
                            Ok(hist)
                        })?;
                    }
                    debug!("started {} worker threads on a pool of {size}", workers.len());
                    let hists = workers.join()?;
                    Ok::<_, anyhow::Error>((ctx.clock.now().saturating_sub(start), hists))
                })?
            }
        };

        Ok(Measurement {
            elapsed,
            latency: merge(hists)?,
        })
    }
}
