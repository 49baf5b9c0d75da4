//! The observation window: a dual rolling map used exclusively to
//! compute adaptive sample-rate advice for the admin server. It is not part
//! of the counter/gauge/timer aggregation state.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

const SWAP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Default, Clone, Copy)]
struct Counts {
    seen: u64,
    submitted: u64,
}

/// A single observed event, as published by the ingester.
pub struct Observation {
    pub bucket: String,
    pub sampling: f64,
}

/// A request for the ideal sample rate of one bucket, with a reply slot.
/// The window task only ever writes to `reply`; all connection I/O for the
/// admin protocol stays in the admin task.
pub struct SampleRateRequest {
    pub bucket: String,
    pub reply: oneshot::Sender<f64>,
}

pub struct ObservationWindow {
    max_timers_per_s: f64,
    cur: HashMap<String, Counts>,
    prev: HashMap<String, Counts>,
    swap_ts: Instant,
}

impl ObservationWindow {
    pub fn new(max_timers_per_s: f64) -> Self {
        Self {
            max_timers_per_s,
            cur: HashMap::new(),
            prev: HashMap::new(),
            swap_ts: Instant::now(),
        }
    }

    fn observe(&mut self, bucket: &str, sampling: f64) {
        let entry = self.cur.entry(bucket.to_string()).or_default();
        entry.seen += 1;
        entry.submitted += (1.0 / sampling).round() as u64;
    }

    fn swap(&mut self) {
        self.prev = std::mem::take(&mut self.cur);
        self.swap_ts = Instant::now();
    }

    /// The ideal-sample-rate computation, exposed directly for unit tests
    /// so the math can be pinned down without driving the task loop.
    fn ideal_sample_rate(&self, bucket: &str) -> f64 {
        let elapsed = self.swap_ts.elapsed().as_secs_f64() + 10.0;
        let total_submitted = self.cur.get(bucket).map(|c| c.submitted).unwrap_or(0)
            + self.prev.get(bucket).map(|c| c.submitted).unwrap_or(0);
        let rate_per_s = total_submitted as f64 / elapsed;
        if rate_per_s <= self.max_timers_per_s {
            1.0
        } else {
            self.max_timers_per_s / rate_per_s
        }
    }

    /// Runs the window's event loop until both channels close. Multiplexes
    /// the 10s swap tick, event observations, and sample-rate requests.
    pub async fn run(
        mut self,
        mut observations_rx: mpsc::Receiver<Observation>,
        mut requests_rx: mpsc::Receiver<SampleRateRequest>,
    ) {
        let mut swap_tick = tokio::time::interval(SWAP_INTERVAL);
        swap_tick.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                _ = swap_tick.tick() => {
                    self.swap();
                    debug!("observation window swapped");
                }
                obs = observations_rx.recv() => {
                    match obs {
                        Some(obs) => self.observe(&obs.bucket, obs.sampling),
                        None => break,
                    }
                }
                req = requests_rx.recv() => {
                    match req {
                        Some(req) => {
                            let rate = self.ideal_sample_rate(&req.bucket);
                            let _ = req.reply.send(rate);
                        }
                        None => break,
                    }
                }
            }
        }
    }
}
