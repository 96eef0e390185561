use crate::error::ConfigError;
use anyhow::Result;
use rand::distr::Distribution;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng, random};
use rand_distr::Normal;

/// Upper bound for the configurable payload buffer length.
pub const MAX_PAYLOAD_BUFFER: usize = 1 << 20;

/// Every payload is a prefix of this buffer, so operations never own their bytes.
static PAYLOAD: [u8; MAX_PAYLOAD_BUFFER] = [b'0'; MAX_PAYLOAD_BUFFER];

pub const DEFAULT_GET_KEYSPACE: u64 = 3_750_000;
pub const DEFAULT_SET_KEYSPACE: u64 = 3_000_000;
pub const DEFAULT_READ_PROBABILITY: f64 = 0.8;
pub const DEFAULT_PAYLOAD_MEAN: f64 = 1024.0;
pub const DEFAULT_PAYLOAD_STDDEV: f64 = 400.0;
pub const DEFAULT_PAYLOAD_MIN: usize = 2;
/// Smallest accepted `payload_min`; zero-length values are never sent.
pub const MIN_PAYLOAD_FLOOR: usize = 1;
pub const DEFAULT_PAYLOAD_BUFFER: usize = 3000;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadParams {
    /// Reads draw keys from `1..=get_keyspace`
    pub get_keyspace: u64,
    /// Writes (and warmup) draw keys from `1..=set_keyspace`
    pub set_keyspace: u64,
    /// Fraction of operations that are GETs
    pub read_probability: f64,
    pub payload_mean: f64,
    pub payload_stddev: f64,
    /// Clamp floor for payload sizes
    pub payload_min: usize,
    /// Payload sizes are clamped to `payload_buffer - 1`
    pub payload_buffer: usize,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        WorkloadParams {
            get_keyspace: DEFAULT_GET_KEYSPACE,
            set_keyspace: DEFAULT_SET_KEYSPACE,
            read_probability: DEFAULT_READ_PROBABILITY,
            payload_mean: DEFAULT_PAYLOAD_MEAN,
            payload_stddev: DEFAULT_PAYLOAD_STDDEV,
            payload_min: DEFAULT_PAYLOAD_MIN,
            payload_buffer: DEFAULT_PAYLOAD_BUFFER,
        }
    }
}

impl WorkloadParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.read_probability) {
            return Err(ConfigError::InvalidReadProbability(self.read_probability));
        }
        if self.get_keyspace == 0 {
            return Err(ConfigError::EmptyKeyspace { what: "GET" });
        }
        if self.set_keyspace == 0 {
            return Err(ConfigError::EmptyKeyspace { what: "SET" });
        }
        if self.get_keyspace < self.set_keyspace {
            return Err(ConfigError::KeyspaceOrder {
                get: self.get_keyspace,
                set: self.set_keyspace,
            });
        }
        if self.payload_buffer > MAX_PAYLOAD_BUFFER
            || self.payload_min < MIN_PAYLOAD_FLOOR
            || self.payload_min >= self.payload_buffer
        {
            return Err(ConfigError::PayloadBounds {
                min: self.payload_min,
                max: self.payload_buffer,
            });
        }
        if !self.payload_stddev.is_finite() || self.payload_stddev < 0.0 {
            return Err(ConfigError::PayloadStdDev(self.payload_stddev));
        }
        Ok(())
    }
}

/// A single synthetic call against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get(u64),
    Set(u64, &'static [u8]),
}

/// Returns the first `size` bytes of the shared payload buffer.
pub fn payload(size: usize) -> &'static [u8] {
    &PAYLOAD[..size.min(MAX_PAYLOAD_BUFFER)]
}

/// Picks the seed for worker `index`: derived from `base` when given, fresh entropy otherwise.
pub fn worker_seed(base: Option<u64>, index: u64) -> u64 {
    match base {
        Some(b) => b.wrapping_add(index),
        None => random(),
    }
}

/// Operation generator. One per worker; nothing is shared between instances.
pub struct OpGen {
    params: WorkloadParams,
    normal: Normal<f64>,
    rng: SmallRng,
}

impl OpGen {
    pub fn new(params: &WorkloadParams, seed: u64) -> Result<Self> {
        let normal = Normal::new(params.payload_mean, params.payload_stddev)?;
        Ok(OpGen {
            params: params.clone(),
            normal,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    pub fn next_set_key(&mut self) -> u64 {
        self.rng.random_range(1..=self.params.set_keyspace)
    }

    pub fn next_get_key(&mut self) -> u64 {
        self.rng.random_range(1..=self.params.get_keyspace)
    }

    pub fn next_payload_size(&mut self) -> usize {
        // `as` truncates toward zero and saturates, so negative draws land on the floor
        let drawn = self.normal.sample(&mut self.rng) as i64;
        let floor = drawn.max(self.params.payload_min as i64) as usize;
        floor.min(self.params.payload_buffer - 1)
    }

    pub fn should_read(&mut self) -> bool {
        self.rng.random::<f64>() < self.params.read_probability
    }

    pub fn next_op(&mut self) -> Operation {
        if self.should_read() {
            Operation::Get(self.next_get_key())
        } else {
            let key = self.next_set_key();
            Operation::Set(key, payload(self.next_payload_size()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: usize = 100_000;

    fn gen_with(params: WorkloadParams) -> OpGen {
        OpGen::new(&params, 42).unwrap()
    }

    #[test]
    fn keys_stay_in_keyspace() {
        for (get, set) in [(1, 1), (10, 7), (3_750_000, 3_000_000)] {
            let mut g = gen_with(WorkloadParams {
                get_keyspace: get,
                set_keyspace: set,
                ..Default::default()
            });
            for _ in 0..SAMPLES {
                let k = g.next_get_key();
                assert!((1..=get).contains(&k), "get key {k} outside 1..={get}");
                let k = g.next_set_key();
                assert!((1..=set).contains(&k), "set key {k} outside 1..={set}");
            }
        }
    }

    #[test]
    fn small_keyspace_hits_both_ends() {
        let mut g = gen_with(WorkloadParams {
            get_keyspace: 5,
            set_keyspace: 5,
            ..Default::default()
        });
        let seen: std::collections::HashSet<u64> = (0..1_000).map(|_| g.next_set_key()).collect();
        assert!(seen.contains(&1));
        assert!(seen.contains(&5));
    }

    #[test]
    fn payload_sizes_are_clamped() {
        let params = WorkloadParams::default();
        let mut g = gen_with(params.clone());
        let mut sum = 0u64;
        for _ in 0..SAMPLES {
            let s = g.next_payload_size();
            assert!(s >= 2, "payload {s} below floor");
            assert!(s <= params.payload_buffer - 1, "payload {s} above ceiling");
            sum += s as u64;
        }
        let mean = sum as f64 / SAMPLES as f64;
        assert!((mean - 1024.0).abs() < 10.0, "mean {mean}");
    }

    #[test]
    fn wide_distribution_hits_both_clamps() {
        let mut g = gen_with(WorkloadParams {
            payload_stddev: 5_000.0,
            ..Default::default()
        });
        let sizes: Vec<usize> = (0..SAMPLES).map(|_| g.next_payload_size()).collect();
        assert!(sizes.iter().all(|s| (2..=2999).contains(s)));
        assert!(sizes.contains(&2));
        assert!(sizes.contains(&2999));
    }

    #[test]
    fn read_ratio_is_close_to_probability() {
        let mut g = gen_with(WorkloadParams::default());
        let reads = (0..SAMPLES).filter(|_| g.should_read()).count();
        let ratio = reads as f64 / SAMPLES as f64;
        assert!((ratio - 0.8).abs() < 0.01, "ratio {ratio}");
    }

    #[test]
    fn next_op_respects_extremes() {
        let mut all_reads = gen_with(WorkloadParams {
            read_probability: 1.0,
            ..Default::default()
        });
        assert!((0..1_000).all(|_| matches!(all_reads.next_op(), Operation::Get(_))));

        let mut all_writes = gen_with(WorkloadParams {
            read_probability: 0.0,
            ..Default::default()
        });
        for _ in 0..1_000 {
            match all_writes.next_op() {
                Operation::Set(k, p) => {
                    assert!((1..=DEFAULT_SET_KEYSPACE).contains(&k));
                    assert!(p.len() >= 2 && p.iter().all(|b| *b == b'0'));
                }
                op => panic!("unexpected {op:?}"),
            }
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let params = WorkloadParams::default();
        let mut a = OpGen::new(&params, 7).unwrap();
        let mut b = OpGen::new(&params, 7).unwrap();
        for _ in 0..100 {
            assert_eq!(a.next_op(), b.next_op());
        }
        assert_eq!(worker_seed(Some(10), 3), 13);
    }

    #[test]
    fn validate_rejects_bad_params() {
        assert!(WorkloadParams::default().validate().is_ok());
        let bad = |p: WorkloadParams| p.validate().unwrap_err();
        assert_eq!(
            bad(WorkloadParams {
                read_probability: 1.5,
                ..Default::default()
            }),
            ConfigError::InvalidReadProbability(1.5)
        );
        assert_eq!(
            bad(WorkloadParams {
                set_keyspace: 0,
                ..Default::default()
            }),
            ConfigError::EmptyKeyspace { what: "SET" }
        );
        assert_eq!(
            bad(WorkloadParams {
                get_keyspace: 10,
                set_keyspace: 20,
                ..Default::default()
            }),
            ConfigError::KeyspaceOrder { get: 10, set: 20 }
        );
        assert_eq!(
            bad(WorkloadParams {
                payload_min: 3000,
                ..Default::default()
            }),
            ConfigError::PayloadBounds { min: 3000, max: 3000 }
        );
        assert_eq!(
            bad(WorkloadParams {
                payload_min: 0,
                ..Default::default()
            }),
            ConfigError::PayloadBounds { min: 0, max: 3000 }
        );
        assert!(
            WorkloadParams {
                payload_min: 1,
                ..Default::default()
            }
            .validate()
            .is_ok()
        );
    }
}
