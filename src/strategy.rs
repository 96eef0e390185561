pub mod bounded;
pub mod per_call;
pub mod pipeline;
pub mod processes;
pub mod threads;

use crate::generator::{OpGen, Operation, WorkloadParams};
use crate::stats::{Clock, Measurement, RunResult, record_since};
use crate::store::{Codec, Connector};
use anyhow::Result;
use clap::ValueEnum;
use hdrhistogram::Histogram;
use std::time::Instant;

pub use bounded::Bounded;
pub use per_call::PerCall;
pub use pipeline::Pipeline;
pub use processes::{Processes, WorkerLauncher};
pub use threads::{ConnectionMode, Threads};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    Pipeline,
    Threads,
    Processes,
    PerCall,
    Bounded,
}

impl StrategyKind {
    /// The name accepted by `--strategy`.
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Pipeline => "pipeline",
            StrategyKind::Threads => "threads",
            StrategyKind::Processes => "processes",
            StrategyKind::PerCall => "per-call",
            StrategyKind::Bounded => "bounded",
        }
    }
}

/// Everything a strategy may touch during a run.
pub struct RunContext<'a> {
    pub connector: &'a dyn Connector,
    pub params: &'a WorkloadParams,
    pub clock: &'a dyn Clock,
    /// Base seed; workers derive their own from it. `None` means fresh entropy.
    pub seed: Option<u64>,
}

/// A way of driving `total` operations against the store.
pub trait Strategy {
    /// Concurrency degree. `total` must be a multiple of it.
    fn degree(&self) -> u64;
    /// Name of the degree in configuration errors, e.g. `num_threads`
    fn degree_name(&self) -> &'static str;
    /// Codec the run's connections must be built with
    fn codec(&self) -> Codec {
        Codec::Fast
    }
    /// Parameter listing for the start line
    fn describe(&self, total: u64) -> String;
    /// Completion line
    fn summary(&self, result: &RunResult) -> String;

    /// Runs the timed phase. Connection setup that is not part of the
    /// measured behaviour happens before the clock starts.
    fn execute(&self, ctx: &RunContext<'_>, total: u64) -> Result<Measurement>;
}

/// Issues `count` operations one at a time through `apply`, timing each call.
pub fn drive(
    opgen: &mut OpGen,
    count: u64,
    hist: &mut Histogram<u64>,
    mut apply: impl FnMut(Operation) -> Result<()>,
) -> Result<()> {
    for _ in 0..count {
        let op = opgen.next_op();
        let start = Instant::now();
        apply(op)?;
        record_since(hist, start);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn small_params() -> WorkloadParams {
    WorkloadParams {
        get_keyspace: 125,
        set_keyspace: 100,
        ..Default::default()
    }
}
