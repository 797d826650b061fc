use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub score: u32,
}

impl BenchUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("User {}", id),
            email: format!("user{}@example.com", id),
            score: (id % 1000) as u32,
        }
    }
}

/// Simulated database with configurable latency
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<String, BenchUser>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_users: usize, latency_ms: u64) -> Self {
        let mut data = HashMap::new();
        for i in 0..num_users {
            data.insert(format!("user:{}", i), BenchUser::new(i as u64));
        }

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<BenchUser> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
        self.data.get(key).cloned()
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }
}
