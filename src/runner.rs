use crate::error::{ConfigError, split_evenly};
use crate::generator::{WorkloadParams, worker_seed};
use crate::stats::{Clock, RunResult};
use crate::store::{BatchMode, Codec, Target, get_connector};
use crate::strategy::{
    Bounded, ConnectionMode, PerCall, Pipeline, Processes, RunContext, Strategy, StrategyKind, Threads,
    WorkerLauncher,
};
use crate::warmup::warmup;
use anyhow::{Context, Result};
use log::{debug, info};
use std::io::Write;

/// Warmup draws its payload sizes from a seed no worker uses.
const WARMUP_STREAM: u64 = u64::MAX;

/// One entry of the run matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub kind: StrategyKind,
    pub degree: u64,
    pub total: u64,
    pub transaction: bool,
    pub codec: Codec,
    pub connection: ConnectionMode,
}

impl Scenario {
    pub fn new(kind: StrategyKind, degree: u64, total: u64) -> Self {
        Scenario {
            kind,
            degree,
            total,
            transaction: true,
            codec: Codec::Fast,
            connection: ConnectionMode::PerWorker,
        }
    }

    pub fn pipeline(size: u64, total: u64) -> Self {
        Scenario::new(StrategyKind::Pipeline, size, total)
    }

    pub fn threads(count: u64, total: u64) -> Self {
        Scenario::new(StrategyKind::Threads, count, total)
    }

    pub fn processes(count: u64, total: u64) -> Self {
        Scenario::new(StrategyKind::Processes, count, total)
    }

    pub fn per_call(total: u64) -> Self {
        Scenario::new(StrategyKind::PerCall, 1, total)
    }

    pub fn bounded(in_flight: u64, total: u64) -> Self {
        Scenario::new(StrategyKind::Bounded, in_flight, total)
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn without_transaction(mut self) -> Self {
        self.transaction = false;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionMode) -> Self {
        self.connection = connection;
        self
    }

    /// Divides the operation count by `scale` for shorter runs.
    pub fn scaled(mut self, scale: u64) -> Result<Self, ConfigError> {
        self.total = split_evenly(self.total, scale, "scale").map_err(|_| ConfigError::Scale {
            total: self.total,
            scale,
        })?;
        Ok(self)
    }
}

/// The fixed matrix executed by a plain invocation, in order.
pub fn default_matrix() -> Vec<Scenario> {
    let pipelines = [(3, 6_000_000), (10, 10_000_000), (100, 20_000_000), (1000, 20_000_000)];
    let mut matrix = Vec::new();
    matrix.extend(pipelines.iter().map(|&(s, n)| Scenario::pipeline(s, n)));
    matrix.extend(
        pipelines
            .iter()
            .map(|&(s, n)| Scenario::pipeline(s, n).with_codec(Codec::Generic)),
    );
    matrix.extend(
        pipelines
            .iter()
            .map(|&(s, n)| Scenario::pipeline(s, n).without_transaction()),
    );
    matrix.extend(
        [(2, 5_000_000), (3, 9_000_000), (10, 9_000_000)]
            .iter()
            .map(|&(c, n)| Scenario::threads(c, n)),
    );
    matrix.extend(
        [(20, 10), (100, 10), (100, 50)].iter().map(|&(c, size)| {
            Scenario::threads(c, 10_000_000).with_connection(ConnectionMode::Pool { size })
        }),
    );
    matrix.extend(
        [
            (2, 9_000_000),
            (3, 9_000_000),
            (10, 15_000_000),
            (20, 15_000_000),
            (30, 15_000_000),
            (100, 15_000_000),
        ]
        .iter()
        .map(|&(c, n)| Scenario::processes(c, n)),
    );
    matrix.push(Scenario::per_call(5000));
    matrix.extend(
        [1, 2, 10, 100, 1000]
            .iter()
            .map(|&b| Scenario::bounded(b, 3_000_000)),
    );
    matrix
}

/// Runs scenarios one after another against a single target.
pub struct Runner<'a> {
    pub target: &'a Target,
    pub params: &'a WorkloadParams,
    pub clock: &'a dyn Clock,
    pub launcher: WorkerLauncher,
    pub warmup_batch: usize,
    pub seed: Option<u64>,
}

impl Runner<'_> {
    pub fn strategy(&self, s: &Scenario) -> Box<dyn Strategy> {
        match s.kind {
            StrategyKind::Pipeline => Box::new(Pipeline {
                size: s.degree,
                mode: if s.transaction {
                    BatchMode::Transaction
                } else {
                    BatchMode::Pipeline
                },
                codec: s.codec,
            }),
            StrategyKind::Threads => Box::new(Threads {
                count: s.degree,
                connection: s.connection,
                codec: s.codec,
            }),
            StrategyKind::Processes => Box::new(Processes {
                count: s.degree,
                launcher: self.launcher.clone(),
                codec: s.codec,
            }),
            StrategyKind::PerCall => Box::new(PerCall { codec: s.codec }),
            StrategyKind::Bounded => Box::new(Bounded {
                in_flight: s.degree,
                codec: s.codec,
            }),
        }
    }

    pub fn run(&self, s: &Scenario, out: &mut impl Write) -> Result<RunResult> {
        let strategy = self.strategy(s);
        let connector = get_connector(self.target, strategy.codec())?;
        info!("target: {}", connector.describe());
        let ctx = RunContext {
            connector: connector.as_ref(),
            params: self.params,
            clock: self.clock,
            seed: self.seed,
        };
        let result = run_strategy(strategy.as_ref(), &ctx, s.total, self.warmup_batch, out)?;
        if let Some(report) = connector.report() {
            debug!("store: {report}");
        }
        Ok(result)
    }

    /// Stops at the first failing scenario; later ones never start.
    pub fn run_all(&self, scenarios: &[Scenario], out: &mut impl Write) -> Result<Vec<RunResult>> {
        info!("running {} scenarios", scenarios.len());
        scenarios
            .iter()
            .map(|s| {
                self.run(s, out)
                    .with_context(|| format!("{:?} x{} failed", s.kind, s.degree))
            })
            .collect()
    }
}

/// Validate, warm up, execute and report a single run.
pub fn run_strategy(
    strategy: &dyn Strategy,
    ctx: &RunContext<'_>,
    total: u64,
    warmup_batch: usize,
    out: &mut impl Write,
) -> Result<RunResult> {
    ctx.params.validate()?;
    split_evenly(total, strategy.degree(), strategy.degree_name())?;

    warmup(
        ctx.connector,
        ctx.params,
        warmup_batch,
        worker_seed(ctx.seed, WARMUP_STREAM),
    )?;

    writeln!(out, "starting {}", strategy.describe(total))?;
    let result = RunResult::new(total, strategy.execute(ctx, total)?);
    writeln!(out, "{}", strategy.summary(&result))?;
    writeln!(out, "  {result}")?;
    out.flush()?;
    Ok(result)
}
