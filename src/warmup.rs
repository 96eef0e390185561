use crate::generator::{OpGen, Operation, WorkloadParams, payload};
use crate::store::{BatchMode, Connector};
use anyhow::Result;
use log::info;
use std::time::{Duration, Instant};
use thousands::Separable;

pub const DEFAULT_WARMUP_BATCH: usize = 1000;

/// Clears the store, then writes every key in `1..=set_keyspace` in pipelined batches.
///
/// Runs on its own connection and is never part of a timed window.
pub fn warmup(
    connector: &dyn Connector,
    params: &WorkloadParams,
    batch_size: usize,
    seed: u64,
) -> Result<Duration> {
    info!("starting warmup");
    let start = Instant::now();
    let mut store = connector.connect()?;
    store.flush_all()?;

    let batch_size = batch_size.max(1);
    let mut opgen = OpGen::new(params, seed)?;
    let mut batch = Vec::with_capacity(batch_size);
    for key in 1..=params.set_keyspace {
        batch.push(Operation::Set(key, payload(opgen.next_payload_size())));
        if batch.len() == batch_size {
            store.execute_batch(&batch, BatchMode::Pipeline)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        store.execute_batch(&batch, BatchMode::Pipeline)?;
    }

    let elapsed = start.elapsed();
    info!(
        "completed warmup: {} keys in {:.1?}",
        params.set_keyspace.separate_with_underscores(),
        elapsed
    );
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Codec, MemoryConnector};

    fn params(set_keyspace: u64) -> WorkloadParams {
        WorkloadParams {
            get_keyspace: set_keyspace * 2,
            set_keyspace,
            ..Default::default()
        }
    }

    #[test]
    fn writes_every_key_once() {
        let c = MemoryConnector::new(Codec::Fast);
        warmup(&c, &params(100), DEFAULT_WARMUP_BATCH, 1).unwrap();
        assert_eq!(c.stats().sets(), 100);
        assert_eq!(c.stats().gets(), 0);
        assert_eq!(c.keys(), (1..=100).collect::<Vec<u64>>());
        assert!(
            c.stats()
                .batches()
                .iter()
                .all(|(n, mode)| *n <= 1000 && *mode == BatchMode::Pipeline)
        );
        for key in 1..=100 {
            let len = c.value_len(key).unwrap();
            assert!((2..3000).contains(&len));
        }
    }

    #[test]
    fn flushes_partial_last_batch() {
        let c = MemoryConnector::new(Codec::Fast);
        warmup(&c, &params(2_500), 1000, 1).unwrap();
        let sizes: Vec<usize> = c.stats().batches().iter().map(|(n, _)| *n).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(c.keys().len(), 2_500);

        let c = MemoryConnector::new(Codec::Fast);
        warmup(&c, &params(2_000), 1000, 1).unwrap();
        assert_eq!(c.stats().batches().len(), 2);
    }

    #[test]
    fn clears_previous_state() {
        let c = MemoryConnector::new(Codec::Fast);
        c.connect().unwrap().set(999_999, payload(4)).unwrap();
        warmup(&c, &params(10), 3, 1).unwrap();
        assert_eq!(c.stats().flushes(), 1);
        assert_eq!(c.keys(), (1..=10).collect::<Vec<u64>>());
    }
}
