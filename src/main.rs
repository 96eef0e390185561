mod error;
mod generator;
mod pool;
mod runner;
mod stats;
mod store;
mod strategy;
mod warmup;

use crate::error::ConfigError;
use crate::generator::WorkloadParams;
use crate::runner::{Runner, Scenario, default_matrix};
use crate::stats::MonotonicClock;
use crate::store::{Backend, Codec, Target, get_connector};
use crate::strategy::processes::run_worker;
use crate::strategy::{ConnectionMode, StrategyKind, WorkerLauncher};
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ffi::OsString;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    workload: WorkloadArgs,

    /// Defaults to `matrix`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct TargetArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 6379)]
    port: u16,

    #[arg(long, value_enum, default_value_t = Backend::Redis)]
    backend: Backend,
}

#[derive(Args)]
struct WorkloadArgs {
    #[arg(long, default_value_t = generator::DEFAULT_GET_KEYSPACE)]
    get_keyspace: u64,

    #[arg(long, default_value_t = generator::DEFAULT_SET_KEYSPACE)]
    set_keyspace: u64,

    #[arg(long, default_value_t = generator::DEFAULT_READ_PROBABILITY)]
    read_probability: f64,

    #[arg(long, default_value_t = generator::DEFAULT_PAYLOAD_MEAN)]
    payload_mean: f64,

    #[arg(long, default_value_t = generator::DEFAULT_PAYLOAD_STDDEV)]
    payload_stddev: f64,

    /// Smallest payload ever sent
    #[arg(long, default_value_t = generator::DEFAULT_PAYLOAD_MIN)]
    payload_min: usize,

    /// Payloads are at most this minus one bytes
    #[arg(long, default_value_t = generator::DEFAULT_PAYLOAD_BUFFER)]
    payload_buffer: usize,

    #[arg(long, default_value_t = warmup::DEFAULT_WARMUP_BATCH)]
    warmup_batch: usize,

    /// Base seed for reproducible workloads
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the built-in scenario matrix
    Matrix {
        #[arg(long, value_enum)]
        only: Option<StrategyKind>,

        /// Divide every operation count by this
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        scale: u64,
    },
    /// Run a single scenario
    Run(RunArgs),
    /// Process-pool child; prints its latency report to stdout
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        ops: u64,

        #[arg(long)]
        seed: u64,

        #[arg(long)]
        slow_codec: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_enum)]
    strategy: StrategyKind,

    /// Pipeline size, thread count, process count or in-flight bound [default: 1]
    #[arg(short, long)]
    concurrency: Option<u64>,

    #[arg(short = 'n', long)]
    total: u64,

    /// Pipeline only: send batches without MULTI/EXEC
    #[arg(long)]
    no_transaction: bool,

    /// Decode replies through the generic value codec
    #[arg(long)]
    slow_codec: bool,

    /// Threads only: how workers get their connections [default: per-worker]
    #[arg(long, value_enum)]
    connection: Option<ConnectionArg>,

    /// Upper bound on pooled connections
    #[arg(
        long,
        required_if_eq("connection", "pool"),
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pool_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConnectionArg {
    PerWorker,
    Shared,
    Pool,
}

impl RunArgs {
    /// Rejects options the chosen strategy would silently ignore.
    fn scenario(&self) -> Result<Scenario, ConfigError> {
        let kind = self.strategy;
        let unsupported = |option| ConfigError::Unsupported {
            option,
            with: format!("--strategy {}", kind.name()),
        };
        if kind == StrategyKind::PerCall && self.concurrency.is_some_and(|c| c != 1) {
            return Err(unsupported("--concurrency"));
        }
        if self.no_transaction && kind != StrategyKind::Pipeline {
            return Err(unsupported("--no-transaction"));
        }
        if kind != StrategyKind::Threads {
            if self.connection.is_some() {
                return Err(unsupported("--connection"));
            }
            if self.pool_size.is_some() {
                return Err(unsupported("--pool-size"));
            }
        }
        let connection = match (self.connection.unwrap_or(ConnectionArg::PerWorker), self.pool_size) {
            (ConnectionArg::Pool, Some(size)) => ConnectionMode::Pool { size },
            (ConnectionArg::Pool, None) => {
                return Err(ConfigError::ZeroDegree { what: "pool_size" });
            }
            (_, Some(_)) => {
                return Err(ConfigError::Unsupported {
                    option: "--pool-size",
                    with: "a connection mode other than pool".to_owned(),
                });
            }
            (ConnectionArg::PerWorker, None) => ConnectionMode::PerWorker,
            (ConnectionArg::Shared, None) => ConnectionMode::Shared,
        };

        let mut scenario = Scenario::new(kind, self.concurrency.unwrap_or(1), self.total)
            .with_connection(connection);
        if self.no_transaction {
            scenario = scenario.without_transaction();
        }
        if self.slow_codec {
            scenario = scenario.with_codec(Codec::Generic);
        }
        Ok(scenario)
    }
}

impl TargetArgs {
    fn target(&self) -> Target {
        Target {
            backend: self.backend,
            host: self.host.clone(),
            port: self.port,
        }
    }
}

impl WorkloadArgs {
    fn params(&self) -> WorkloadParams {
        WorkloadParams {
            get_keyspace: self.get_keyspace,
            set_keyspace: self.set_keyspace,
            read_probability: self.read_probability,
            payload_mean: self.payload_mean,
            payload_stddev: self.payload_stddev,
            payload_min: self.payload_min,
            payload_buffer: self.payload_buffer,
        }
    }
}

/// Options a worker process needs to rebuild the parent's target and workload.
fn worker_args(target: &TargetArgs, params: &WorkloadParams) -> Vec<OsString> {
    let backend = match target.backend {
        Backend::Redis => "redis",
        Backend::Memory => "memory",
    };
    [
        ("--host", target.host.clone()),
        ("--port", target.port.to_string()),
        ("--backend", backend.to_owned()),
        ("--get-keyspace", params.get_keyspace.to_string()),
        ("--set-keyspace", params.set_keyspace.to_string()),
        ("--read-probability", params.read_probability.to_string()),
        ("--payload-mean", params.payload_mean.to_string()),
        ("--payload-stddev", params.payload_stddev.to_string()),
        ("--payload-min", params.payload_min.to_string()),
        ("--payload-buffer", params.payload_buffer.to_string()),
    ]
    .into_iter()
    .flat_map(|(k, v)| [OsString::from(k), OsString::from(v)])
    .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let params = cli.workload.params();
    params.validate()?;
    let target = cli.target.target();

    let command = cli.command.unwrap_or(Command::Matrix {
        only: None,
        scale: 1,
    });
    if let Command::Worker {
        ops,
        seed,
        slow_codec,
    } = command
    {
        let codec = if slow_codec {
            Codec::Generic
        } else {
            Codec::Fast
        };
        let connector = get_connector(&target, codec)?;
        return run_worker(connector.as_ref(), &params, ops, seed, &mut std::io::stdout().lock());
    }

    let clock = MonotonicClock::default();
    let runner = Runner {
        target: &target,
        params: &params,
        clock: &clock,
        launcher: WorkerLauncher::current_exe(worker_args(&cli.target, &params))?,
        warmup_batch: cli.workload.warmup_batch,
        seed: cli.workload.seed,
    };
    let mut out = std::io::stdout().lock();

    match command {
        Command::Matrix { only, scale } => {
            let scenarios = default_matrix()
                .into_iter()
                .filter(|s| only.is_none_or(|k| s.kind == k))
                .map(|s| s.scaled(scale))
                .collect::<Result<Vec<_>, _>>()?;
            runner.run_all(&scenarios, &mut out)?;
        }
        Command::Run(args) => {
            runner.run(&args.scenario()?, &mut out)?;
        }
        Command::Worker { .. } => unreachable!("handled above"),
    }
    Ok(())
}
