use thiserror::Error;

/// Problems with a run's configuration. Always detected before the store is touched.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("total_commands ({total}) is not divisible by {what} ({degree})")]
    NotDivisible {
        total: u64,
        degree: u64,
        what: &'static str,
    },

    #[error("{what} must be at least 1")]
    ZeroDegree { what: &'static str },

    #[error("{what} ({degree}) must not exceed total_commands ({total})")]
    DegreeExceedsTotal {
        total: u64,
        degree: u64,
        what: &'static str,
    },

    #[error("{option} has no effect with {with}")]
    Unsupported {
        option: &'static str,
        with: String,
    },

    #[error("read probability must be within [0, 1], got {0}")]
    InvalidReadProbability(f64),

    #[error("{what} keyspace must contain at least one key")]
    EmptyKeyspace { what: &'static str },

    #[error("GET keyspace ({get}) must not be smaller than SET keyspace ({set})")]
    KeyspaceOrder { get: u64, set: u64 },

    #[error("payload bounds are invalid: min {min}, buffer length {max}")]
    PayloadBounds { min: usize, max: usize },

    #[error("payload stddev must be finite and non-negative, got {0}")]
    PayloadStdDev(f64),

    #[error("total_commands ({total}) is not divisible by scale ({scale})")]
    Scale { total: u64, scale: u64 },
}

/// Splits `total` evenly across `degree` workers, or refuses.
pub fn split_evenly(total: u64, degree: u64, what: &'static str) -> Result<u64, ConfigError> {
    if degree == 0 {
        return Err(ConfigError::ZeroDegree { what });
    }
    if degree > total {
        return Err(ConfigError::DegreeExceedsTotal {
            total,
            degree,
            what,
        });
    }
    if total % degree != 0 {
        return Err(ConfigError::NotDivisible {
            total,
            degree,
            what,
        });
    }
    Ok(total / degree)
}
