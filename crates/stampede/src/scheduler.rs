//! Completion-driven fixed-slot run scheduler
//!
//! The scheduler owns `num_nodes` slots, each bound to one simulated node
//! identity. Launches are spaced `ceil(interval / num_nodes)` apart so one
//! interval starts exactly `num_nodes` runs, evenly spread. A slot is
//! relaunched only when its previous run signals completion, which makes
//! the slot count itself the admission control: at most `num_nodes` runs
//! are ever in flight, and a hung run starves only its own slot.

use crate::config::Config;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// How long to wait for a completion before logging backpressure.
const BUSY_WAIT: Duration = Duration::from_millis(100);

/// One scheduler slot's node identity.
#[derive(Debug, Clone)]
pub struct Runner {
    /// Node name this slot currently simulates
    pub node_name: String,
    /// Whether the identity's next run is its first
    pub first_run: bool,
}

/// Fixed-capacity concurrent run scheduler.
pub struct Scheduler {
    num_nodes: usize,
    interval_minutes: u64,
    replacement_rate: f64,
    runs_per_node: u32,
    prefix: String,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            num_nodes: config.num_nodes,
            interval_minutes: config.interval,
            replacement_rate: config.node_replacement_rate,
            runs_per_node: config.runs,
            prefix: config.node_name_prefix.clone(),
        }
    }

    /// Target spacing between successive launches: the interval divided
    /// evenly across the fleet, rounded up to the next nanosecond.
    pub fn launch_spacing(interval_minutes: u64, num_nodes: usize) -> Duration {
        let interval = Duration::from_secs(interval_minutes * 60);
        Duration::from_nanos((interval.as_nanos() as f64 / num_nodes as f64).ceil() as u64)
    }

    /// Drive the fleet until every slot has used its run quota (forever
    /// when the quota is 0).
    ///
    /// `launch` must start the slot's run without blocking and arrange for
    /// the slot index to be sent on the completion channel when the run
    /// finishes.
    pub async fn run<F>(&self, launch: F)
    where
        F: Fn(Runner, usize, mpsc::Sender<usize>),
    {
        let delay = Self::launch_spacing(self.interval_minutes, self.num_nodes);
        tracing::info!(delay = ?delay, "Delay between converge launches");

        let (done_tx, mut done_rx) = mpsc::channel::<usize>(self.num_nodes);

        let mut next_node_index = 0usize;
        let mut slots: Vec<Runner> = Vec::with_capacity(self.num_nodes);
        for slot in 0..self.num_nodes {
            slots.push(self.fresh_runner(&mut next_node_index));
            // Seed one completion per slot so every slot launches once.
            // Capacity equals the slot count, so this never blocks.
            let _ = done_tx.send(slot).await;
        }

        let quota = (self.runs_per_node > 0).then_some(self.runs_per_node);
        let mut launches_left: Vec<Option<u32>> = vec![quota; self.num_nodes];
        let mut exhausted_slots = 0usize;
        let mut timed_out = false;

        loop {
            if !timed_out {
                sleep(delay).await;
            }
            match timeout(BUSY_WAIT, done_rx.recv()).await {
                Ok(Some(slot)) => {
                    timed_out = false;

                    if let Some(left) = &mut launches_left[slot] {
                        if *left == 0 {
                            exhausted_slots += 1;
                            if exhausted_slots == self.num_nodes {
                                break;
                            }
                            continue;
                        }
                        *left -= 1;
                    }

                    if rand::thread_rng().gen::<f64>() < self.replacement_rate {
                        slots[slot] = self.fresh_runner(&mut next_node_index);
                    }
                    launch(slots[slot].clone(), slot, done_tx.clone());
                    slots[slot].first_run = false;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        slots = self.num_nodes,
                        "All slots busy, waiting for a run to complete before the next launch. The server may be responding slowly"
                    );
                    timed_out = true;
                }
            }
        }
    }

    fn fresh_runner(&self, next_node_index: &mut usize) -> Runner {
        let runner = Runner {
            node_name: format!("{}-{}", self.prefix, next_node_index),
            first_run: true,
        };
        *next_node_index += 1;
        runner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn scheduler(num_nodes: usize, runs: u32, replacement_rate: f64) -> Scheduler {
        Scheduler {
            num_nodes,
            interval_minutes: 1,
            replacement_rate,
            runs_per_node: runs,
            prefix: "load".to_string(),
        }
    }

    #[test]
    fn spacing_divides_the_interval_evenly() {
        assert_eq!(
            Scheduler::launch_spacing(30, 30),
            Duration::from_secs(60)
        );
        assert_eq!(
            Scheduler::launch_spacing(30, 1800),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn spacing_rounds_up_to_the_next_nanosecond() {
        // 60s over 7 slots does not divide evenly
        let spacing = Scheduler::launch_spacing(1, 7);
        assert_eq!(spacing, Duration::from_nanos(8_571_428_572));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn quota_bounds_total_launches_and_concurrency() {
        let scheduler = scheduler(3, 4, 0.0);
        let launches = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let (launches_ref, in_flight_ref, max_ref) =
            (launches.clone(), in_flight.clone(), max_in_flight.clone());
        scheduler
            .run(move |_runner, slot, done| {
                launches_ref.fetch_add(1, Ordering::SeqCst);
                let current = in_flight_ref.fetch_add(1, Ordering::SeqCst) + 1;
                max_ref.fetch_max(current, Ordering::SeqCst);

                let in_flight = in_flight_ref.clone();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = done.send(slot).await;
                });
            })
            .await;

        assert_eq!(launches.load(Ordering::SeqCst), 12);
        assert!(max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn certain_replacement_rotates_node_identities() {
        let scheduler = scheduler(1, 3, 1.0);
        let names = Arc::new(Mutex::new(Vec::new()));

        let names_ref = names.clone();
        scheduler
            .run(move |runner, slot, done| {
                let names = names_ref.clone();
                tokio::spawn(async move {
                    names.lock().await.push((runner.node_name, runner.first_run));
                    let _ = done.send(slot).await;
                });
            })
            .await;

        let seen = names.lock().await;
        // every launch replaced the identity, so each run is a first run
        // with a new monotonic name
        assert_eq!(
            *seen,
            vec![
                ("load-1".to_string(), true),
                ("load-2".to_string(), true),
                ("load-3".to_string(), true),
            ]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn zero_replacement_reuses_the_same_identity() {
        let scheduler = scheduler(1, 3, 0.0);
        let names = Arc::new(Mutex::new(Vec::new()));

        let names_ref = names.clone();
        scheduler
            .run(move |runner, slot, done| {
                let names = names_ref.clone();
                tokio::spawn(async move {
                    names.lock().await.push((runner.node_name, runner.first_run));
                    let _ = done.send(slot).await;
                });
            })
            .await;

        let seen = names.lock().await;
        assert_eq!(
            *seen,
            vec![
                ("load-0".to_string(), true),
                ("load-0".to_string(), false),
                ("load-0".to_string(), false),
            ]
        );
    }
}
