use crate::error::split_evenly;
use crate::generator::{OpGen, WorkloadParams, worker_seed};
use crate::pool::ProcessPool;
use crate::stats::{Measurement, RunResult, latency_histogram, merge};
use crate::store::{Codec, Connector};
use crate::strategy::{RunContext, Strategy, drive};
use anyhow::{Context, Result, anyhow, bail};
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use log::debug;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

/// Builds the command line for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerLauncher {
    /// `args` go before the `worker` subcommand and must carry the store target
    /// and workload options.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        WorkerLauncher {
            program: program.into(),
            args,
        }
    }

    pub fn current_exe(args: Vec<OsString>) -> Result<Self> {
        let program = std::env::current_exe().context("locate current executable")?;
        Ok(WorkerLauncher::new(program, args))
    }

    pub fn command(&self, ops: u64, seed: u64, codec: Codec) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("worker")
            .arg("--ops")
            .arg(ops.to_string())
            .arg("--seed")
            .arg(seed.to_string());
        if codec == Codec::Generic {
            cmd.arg("--slow-codec");
        }
        cmd
    }
}

/// `count` child processes, each with its own connection.
pub struct Processes {
    pub count: u64,
    pub launcher: WorkerLauncher,
    /// Forwarded to every worker; the parent never connects
    pub codec: Codec,
}

impl Strategy for Processes {
    fn degree(&self) -> u64 {
        self.count
    }

    fn degree_name(&self) -> &'static str {
        "num_processes"
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn describe(&self, total: u64) -> String {
        format!(
            "multiprocess_test(num_processes = {}, total_commands = {}, fast_codec = {})",
            self.count,
            total,
            self.codec == Codec::Fast
        )
    }

    fn summary(&self, result: &RunResult) -> String {
        format!("Processes {}, TPS: {}", self.count, result.tps_display())
    }

    fn execute(&self, ctx: &RunContext<'_>, total: u64) -> Result<Measurement> {
        let per_worker = split_evenly(total, self.count, self.degree_name())?;
        let commands: Vec<Command> = (0..self.count)
            .map(|i| {
                self.launcher
                    .command(per_worker, worker_seed(ctx.seed, i), self.codec)
            })
            .collect();

        let mut pool = ProcessPool::default();
        let start = ctx.clock.now();
        for cmd in commands {
            pool.spawn(cmd)?;
        }
        debug!("spawned {} worker processes", pool.len());
        let outputs = pool.join()?;
        let elapsed = ctx.clock.now().saturating_sub(start);

        let latency = merge(
            outputs
                .iter()
                .map(|out| decode_report(out))
                .collect::<Result<Vec<_>>>()?,
        )?;
        if latency.len() != total {
            bail!(
                "workers reported {} operations, expected {}",
                latency.len(),
                total
            );
        }
        Ok(Measurement { elapsed, latency })
    }
}

/// Body of a worker process: own connection, own generator, histogram to `out`.
pub fn run_worker(
    connector: &dyn Connector,
    params: &WorkloadParams,
    ops: u64,
    seed: u64,
    out: &mut impl Write,
) -> Result<()> {
    let mut store = connector.connect()?;
    let mut opgen = OpGen::new(params, seed)?;
    let mut hist = latency_histogram()?;
    drive(&mut opgen, ops, &mut hist, |op| store.apply(op))?;
    V2Serializer::new()
        .serialize(&hist, out)
        .map_err(|e| anyhow!("encode worker report: {e:?}"))?;
    out.flush()?;
    Ok(())
}

fn decode_report(mut bytes: &[u8]) -> Result<Histogram<u64>> {
    Deserializer::new()
        .deserialize(&mut bytes)
        .map_err(|e| anyhow!("decode worker report: {e:?}"))
}
