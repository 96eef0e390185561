use crate::generator::{OpGen, worker_seed};
use crate::stats::{Measurement, RunResult, latency_histogram, record_since};
use crate::store::Codec;
use crate::strategy::{RunContext, Strategy};
use anyhow::Result;
use std::time::Instant;

/// Sequential; opens a fresh connection for every operation. Latency includes the connect.
pub struct PerCall {
    pub codec: Codec,
}

impl Strategy for PerCall {
    fn degree(&self) -> u64 {
        1
    }

    fn degree_name(&self) -> &'static str {
        "connections"
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn describe(&self, total: u64) -> String {
        format!(
            "new connection per command test(total_commands = {total}, fast_codec = {})",
            self.codec == Codec::Fast
        )
    }

    fn summary(&self, result: &RunResult) -> String {
        format!(
            "New connection for every command TPS: {}",
            result.tps_display()
        )
    }

    fn execute(&self, ctx: &RunContext<'_>, total: u64) -> Result<Measurement> {
        let mut opgen = OpGen::new(ctx.params, worker_seed(ctx.seed, 0))?;
        let mut latency = latency_histogram()?;

        let start = ctx.clock.now();
        for _ in 0..total {
            let op = opgen.next_op();
            let t = Instant::now();
            let mut store = ctx.connector.connect()?;
            store.apply(op)?;
            drop(store);
            record_since(&mut latency, t);
        }
        let elapsed = ctx.clock.now().saturating_sub(start);

        Ok(Measurement { elapsed, latency })
    }
}
