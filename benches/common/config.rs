use std::env;

/// Configuration for benchmarks, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Simulated database latency in milliseconds (from DB_LATENCY_MS env var, defaults to 20)
    pub db_latency_ms: u64,

    /// Sample size for benchmarks (from BENCH_SAMPLE_SIZE env var, defaults to 100)
    pub sample_size: usize,

    /// Number of distinct keys per workload (from BENCH_KEYS env var, defaults to 1000)
    pub num_keys: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            db_latency_ms: env::var("DB_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            sample_size: env::var("BENCH_SAMPLE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            num_keys: env::var("BENCH_KEYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark Configuration:");
        eprintln!("  DB Latency: {}ms", config.db_latency_ms);
        eprintln!("  Sample Size: {}", config.sample_size);
        eprintln!("  Keys: {}", config.num_keys);
        config
    }
}
