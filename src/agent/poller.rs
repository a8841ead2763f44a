use std::time::Instant;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::StoreResult;
use crate::model::MetricRecord;
use crate::storage::Store;

/// Counter bumped once per poll.
pub const POLL_COUNT: &str = "PollCount";
/// Gauge set to a fresh random number on every poll.
pub const RANDOM_VALUE: &str = "RandomValue";
/// Gauge holding seconds since the agent started.
pub const UPTIME: &str = "Uptime";

/// Samples the agent's runtime values and folds them into a store through
/// the ordinary `update_counter` / `update_gauge` calls.
pub struct Poller {
    rng: Mutex<StdRng>,
    started: Instant,
}

impl Poller {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            started: Instant::now(),
        }
    }

    /// One batch of readings. `PollCount` is a delta, the rest are levels.
    pub fn sample(&self) -> Vec<MetricRecord> {
        let random = self.rng.lock().gen::<f64>();
        vec![
            MetricRecord::counter(POLL_COUNT, 1),
            MetricRecord::gauge(RANDOM_VALUE, random),
            MetricRecord::gauge(UPTIME, self.started.elapsed().as_secs_f64()),
        ]
    }

    /// Take one sample and apply it to `store`.
    pub async fn poll(&self, store: &dyn Store) -> StoreResult<()> {
        for reading in self.sample() {
            store.apply(&reading).await?;
        }
        Ok(())
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}
