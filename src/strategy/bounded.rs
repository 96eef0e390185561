use crate::error::split_evenly;
use crate::generator::{OpGen, worker_seed};
use crate::stats::{Measurement, RunResult, latency_histogram, record_since};
use crate::store::Codec;
use crate::strategy::{RunContext, Strategy};
use anyhow::Result;
use std::collections::VecDeque;
use std::time::Instant;

const MAX_WINDOW_RESERVE: u64 = 1 << 16;

/// Single connection with up to `in_flight` requests outstanding at once.
/// A new request goes out as soon as the oldest reply comes back.
pub struct Bounded {
    pub in_flight: u64,
    pub codec: Codec,
}

impl Strategy for Bounded {
    fn degree(&self) -> u64 {
        self.in_flight
    }

    fn degree_name(&self) -> &'static str {
        "bound"
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn describe(&self, total: u64) -> String {
        format!(
            "bounded_concurrency_test(bound = {}, total_commands = {}, fast_codec = {})",
            self.in_flight,
            total,
            self.codec == Codec::Fast
        )
    }

    fn summary(&self, result: &RunResult) -> String {
        format!("Bound: {}, TPS: {}", self.in_flight, result.tps_display())
    }

    fn execute(&self, ctx: &RunContext<'_>, total: u64) -> Result<Measurement> {
        split_evenly(total, self.in_flight, self.degree_name())?;
        let mut store = ctx.connector.connect()?;
        let mut opgen = OpGen::new(ctx.params, worker_seed(ctx.seed, 0))?;
        let mut latency = latency_histogram()?;
        // send time of every outstanding request, oldest first
        let mut window = VecDeque::with_capacity(self.in_flight.min(MAX_WINDOW_RESERVE) as usize);
        let mut sent = 0;

        let start = ctx.clock.now();
        while sent < total || !window.is_empty() {
            while sent < total && (window.len() as u64) < self.in_flight {
                let op = opgen.next_op();
                let t = Instant::now();
                store.submit(op)?;
                window.push_back(t);
                sent += 1;
            }
            store.complete()?;
            if let Some(t) = window.pop_front() {
                record_since(&mut latency, t);
            }
        }
        let elapsed = ctx.clock.now().saturating_sub(start);

        Ok(Measurement { elapsed, latency })
    }
}
