use anyhow::{Result, anyhow};
use hdrhistogram::Histogram;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use thousands::Separable;

/// Source of timestamps for the measurement window.
pub trait Clock: Sync {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Latency histogram in microseconds, up to one minute per call.
pub fn latency_histogram() -> Result<Histogram<u64>> {
    Ok(Histogram::new_with_bounds(1, 60_000_000, 3)?)
}

pub fn record_since(hist: &mut Histogram<u64>, start: Instant) {
    hist.saturating_record(start.elapsed().as_micros() as u64);
}

pub fn merge(hists: impl IntoIterator<Item = Histogram<u64>>) -> Result<Histogram<u64>> {
    let mut merged = latency_histogram()?;
    for h in hists {
        merged
            .add(h)
            .map_err(|e| anyhow!("merge latency histograms: {e:?}"))?;
    }
    Ok(merged)
}

/// What a strategy hands back from its timed phase.
#[derive(Debug)]
pub struct Measurement {
    pub elapsed: Duration,
    pub latency: Histogram<u64>,
}

/// Outcome of one completed run. Never mutated after construction.
#[derive(Debug)]
pub struct RunResult {
    total_ops: u64,
    elapsed: Duration,
    latency: Histogram<u64>,
}

impl RunResult {
    pub fn new(total_ops: u64, m: Measurement) -> Self {
        RunResult {
            total_ops,
            elapsed: m.elapsed,
            latency: m.latency,
        }
    }

    pub fn tps(&self) -> f64 {
        if self.elapsed.is_zero() {
            0.0
        } else {
            self.total_ops as f64 / self.elapsed.as_secs_f64()
        }
    }

    pub fn tps_display(&self) -> String {
        format!("{:.2}", self.tps())
    }
}

impl Display for RunResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let percentile = |q: f64| -> String {
            if self.latency.is_empty() {
                "-".into()
            } else {
                self.latency.value_at_quantile(q).separate_with_underscores()
            }
        };
        write!(
            f,
            "duration: {:.3?} | ops: {} | p50: {} µs | p99: {} µs | p99.9: {} µs",
            self.elapsed,
            self.total_ops.separate_with_underscores(),
            percentile(0.50),
            percentile(0.99),
            percentile(0.999)
        )
    }
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out queued timestamps; repeats the last one once drained.
    pub struct ManualClock {
        ticks: Mutex<(VecDeque<Duration>, Duration)>,
    }

    impl ManualClock {
        pub fn new(ticks: impl IntoIterator<Item = Duration>) -> Self {
            ManualClock {
                ticks: Mutex::new((ticks.into_iter().collect(), Duration::ZERO)),
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            let mut guard = self.ticks.lock().unwrap_or_else(|e| e.into_inner());
            let (queue, last) = &mut *guard;
            if let Some(t) = queue.pop_front() {
                *last = t;
            }
            *last
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(total: u64, elapsed: Duration) -> RunResult {
        RunResult::new(
            total,
            Measurement {
                elapsed,
                latency: latency_histogram().unwrap(),
            },
        )
    }

    #[test]
    fn throughput_is_ops_over_seconds() {
        let r = result(1000, Duration::from_secs(2));
        assert_eq!(r.tps(), 500.0);
        assert_eq!(r.tps_display(), "500.00");
        assert_eq!(result(10, Duration::from_millis(3)).tps_display(), "3333.33");
    }

    #[test]
    fn zero_duration_reports_zero() {
        assert_eq!(result(10, Duration::ZERO).tps_display(), "0.00");
    }

    #[test]
    fn detail_line_formats_percentiles() {
        let mut latency = latency_histogram().unwrap();
        latency.record(1500).unwrap();
        let r = RunResult::new(
            12_000,
            Measurement {
                elapsed: Duration::from_secs(1),
                latency,
            },
        );
        let line = r.to_string();
        assert!(line.contains("ops: 12_000"), "{line}");
        assert!(line.contains("p50: 1_50"), "{line}");
        assert!(result(1, Duration::from_secs(1)).to_string().contains("p99: - µs"));
    }

    #[test]
    fn manual_clock_replays_ticks() {
        let c = testing::ManualClock::new([Duration::ZERO, Duration::from_secs(2)]);
        assert_eq!(c.now(), Duration::ZERO);
        assert_eq!(c.now(), Duration::from_secs(2));
        assert_eq!(c.now(), Duration::from_secs(2));
    }
}
