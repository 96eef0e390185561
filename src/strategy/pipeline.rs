use crate::error::split_evenly;
use crate::generator::{OpGen, worker_seed};
use crate::stats::{Measurement, RunResult, latency_histogram, record_since};
use crate::store::{BatchMode, Codec};
use crate::strategy::{RunContext, Strategy};
use anyhow::Result;
use std::time::Instant;

const MAX_BATCH_RESERVE: u64 = 1 << 16;

/// Single connection; `size` operations per round trip.
pub struct Pipeline {
    pub size: u64,
    pub mode: BatchMode,
    pub codec: Codec,
}

impl Strategy for Pipeline {
    fn degree(&self) -> u64 {
        self.size
    }

    fn degree_name(&self) -> &'static str {
        "pipeline_size"
    }

    fn codec(&self) -> Codec {
        self.codec
    }

    fn describe(&self, total: u64) -> String {
        format!(
            "pipeline_test(pipeline_size = {}, total_commands = {}, fast_codec = {}, transaction = {})",
            self.size,
            total,
            self.codec == Codec::Fast,
            self.mode == BatchMode::Transaction
        )
    }

    fn summary(&self, result: &RunResult) -> String {
        format!("Pipeline Size: {}, TPS: {}", self.size, result.tps_display())
    }

    fn execute(&self, ctx: &RunContext<'_>, total: u64) -> Result<Measurement> {
        let batches = split_evenly(total, self.size, self.degree_name())?;
        let mut store = ctx.connector.connect()?;
        let mut opgen = OpGen::new(ctx.params, worker_seed(ctx.seed, 0))?;
        let mut latency = latency_histogram()?;
        // split_evenly guarantees size <= total; cap anyway so a huge size never reserves up front
        let mut batch = Vec::with_capacity(self.size.min(MAX_BATCH_RESERVE) as usize);

        let start = ctx.clock.now();
        for _ in 0..batches {
            batch.clear();
            batch.extend((0..self.size).map(|_| opgen.next_op()));
            let sent = Instant::now();
            store.execute_batch(&batch, self.mode)?;
            record_since(&mut latency, sent);
        }
        let elapsed = ctx.clock.now().saturating_sub(start);

        Ok(Measurement { elapsed, latency })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::stats::testing::ManualClock;
    use crate::store::MemoryConnector;
    use crate::strategy::small_params;
    use std::time::Duration;

    fn pipeline(size: u64, mode: BatchMode) -> Pipeline {
        Pipeline {
            size,
            mode,
            codec: Codec::Fast,
        }
    }

    #[test]
    fn sends_total_in_equal_batches() {
        let c = MemoryConnector::new(Codec::Fast);
        let params = small_params();
        let clock = ManualClock::new([Duration::ZERO, Duration::from_secs(2)]);
        let ctx = RunContext {
            connector: &c,
            params: &params,
            clock: &clock,
            seed: Some(3),
        };
        let m = pipeline(4, BatchMode::Pipeline).execute(&ctx, 20).unwrap();
        assert_eq!(m.elapsed, Duration::from_secs(2));
        assert_eq!(m.latency.len(), 5);
        assert_eq!(c.stats().ops(), 20);
        assert_eq!(c.stats().batches(), vec![(4, BatchMode::Pipeline); 5]);
        assert_eq!(c.stats().ops_per_connection(), vec![20]);
    }

    #[test]
    fn transaction_flag_reaches_store() {
        let c = MemoryConnector::new(Codec::Fast);
        let params = small_params();
        let clock = ManualClock::new([Duration::ZERO]);
        let ctx = RunContext {
            connector: &c,
            params: &params,
            clock: &clock,
            seed: None,
        };
        pipeline(5, BatchMode::Transaction).execute(&ctx, 10).unwrap();
        assert!(
            c.stats()
                .batches()
                .iter()
                .all(|(n, mode)| *n == 5 && *mode == BatchMode::Transaction)
        );
    }

    #[test]
    fn uneven_total_fails_before_connecting() {
        let c = MemoryConnector::new(Codec::Fast);
        let params = small_params();
        let clock = ManualClock::new([Duration::ZERO]);
        let ctx = RunContext {
            connector: &c,
            params: &params,
            clock: &clock,
            seed: None,
        };
        let err = pipeline(3, BatchMode::Pipeline).execute(&ctx, 7).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::NotDivisible {
                total: 7,
                degree: 3,
                what: "pipeline_size"
            })
        );
        assert_eq!(c.stats().ops(), 0);
        assert!(c.stats().ops_per_connection().is_empty());
    }

    #[test]
    fn oversized_pipeline_is_rejected_without_allocating() {
        let c = MemoryConnector::new(Codec::Fast);
        let params = small_params();
        let clock = ManualClock::new([Duration::ZERO]);
        let ctx = RunContext {
            connector: &c,
            params: &params,
            clock: &clock,
            seed: None,
        };
        let err = pipeline(u64::MAX, BatchMode::Pipeline)
            .execute(&ctx, 0)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DegreeExceedsTotal {
                total: 0,
                degree: u64::MAX,
                what: "pipeline_size"
            })
        );
        assert!(c.stats().ops_per_connection().is_empty());
    }

    #[test]
    fn describe_lists_flags() {
        let p = Pipeline {
            size: 10,
            mode: BatchMode::Pipeline,
            codec: Codec::Generic,
        };
        assert_eq!(
            p.describe(100),
            "pipeline_test(pipeline_size = 10, total_commands = 100, fast_codec = false, transaction = false)"
        );
    }
}
