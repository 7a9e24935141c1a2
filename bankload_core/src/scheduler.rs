//! Stage-driven VU scheduling.
//!
//! Each scenario owns a [`VuSchedule`] describing how many VUs should be
//! alive at any moment. A [`ScenarioScheduler`] samples that schedule on a
//! fixed tick, spawns VU tasks while the target rises and retires the most
//! recently spawned ones while it falls. Retirement is cooperative: a VU
//! only checks its flag between iterations, so an in-flight call is never
//! cut short.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::executor::{ExecutorProfile, OperationExecutor};
use crate::selector::WorkflowSelector;

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageShape {
    /// Linear move from the previous target
    Ramp,
    /// Jump to the target and hold it
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
    pub shape: StageShape,
}

impl Stage {
    pub fn ramp(duration: Duration, target: usize) -> Self {
        Self {
            duration,
            target,
            shape: StageShape::Ramp,
        }
    }

    pub fn constant(duration: Duration, target: usize) -> Self {
        Self {
            duration,
            target,
            shape: StageShape::Constant,
        }
    }
}

/// Target VU count over a scenario's own timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VuSchedule {
    start_vus: usize,
    stages: Vec<Stage>,
}

impl VuSchedule {
    pub fn ramping(start_vus: usize, stages: Vec<Stage>) -> Self {
        Self { start_vus, stages }
    }

    pub fn constant(vus: usize, duration: Duration) -> Self {
        Self {
            start_vus: vus,
            stages: vec![Stage::constant(duration, vus)],
        }
    }

    pub fn start_vus(&self) -> usize {
        self.start_vus
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    pub fn max_target(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .fold(self.start_vus, usize::max)
    }

    /// Interpolated target at `elapsed` since the scenario started.
    /// Zero once every stage has run.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return match stage.shape {
                    StageShape::Constant => stage.target,
                    StageShape::Ramp => {
                        let progress = (elapsed - stage_start).as_secs_f64()
                            / stage.duration.as_secs_f64();
                        let delta = stage.target as f64 - from as f64;
                        (from as f64 + delta * progress).floor().max(0.0) as usize
                    }
                };
            }
            from = stage.target;
            stage_start = stage_end;
        }

        0
    }

    /// True once the schedule is winding down to zero: inside a final ramp
    /// to zero, or past the last stage.
    pub fn is_draining(&self, elapsed: Duration) -> bool {
        let total = self.total_duration();
        if elapsed >= total {
            return true;
        }
        match self.stages.last() {
            Some(last) => last.target == 0 && elapsed >= total - last.duration,
            None => true,
        }
    }

    /// Same shape, every stage duration multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            start_vus: self.start_vus,
            stages: self
                .stages
                .iter()
                .map(|stage| Stage {
                    duration: stage.duration.mul_f64(factor),
                    ..*stage
                })
                .collect(),
        }
    }
}

/// Everything needed to run one named scenario.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    /// Delay relative to the start of the run
    pub start_offset: Duration,
    pub schedule: VuSchedule,
    pub selector: WorkflowSelector,
    pub profile: ExecutorProfile,
    /// Base seed for per-VU generators; entropy when unset
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    Pending,
    Ramping,
    Draining,
    Done,
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioPhase::Pending => "pending",
            ScenarioPhase::Ramping => "ramping",
            ScenarioPhase::Draining => "draining",
            ScenarioPhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioStatus {
    pub phase: ScenarioPhase,
    pub target: usize,
    pub active: usize,
    pub retiring: usize,
    pub spawned: usize,
    pub iterations: u64,
}

impl ScenarioStatus {
    /// VUs still running, including retiring ones finishing their iteration.
    pub fn live(&self) -> usize {
        self.active + self.retiring
    }

    fn pending() -> Self {
        Self {
            phase: ScenarioPhase::Pending,
            target: 0,
            active: 0,
            retiring: 0,
            spawned: 0,
            iterations: 0,
        }
    }
}

/// Live, shared view of every scenario's progress.
#[derive(Clone, Default)]
pub struct RunStatus {
    scenarios: Arc<RwLock<BTreeMap<String, ScenarioStatus>>>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scenario: &str) -> Option<ScenarioStatus> {
        self.scenarios.read().get(scenario).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ScenarioStatus> {
        self.scenarios.read().clone()
    }

    pub fn total_active(&self) -> usize {
        self.scenarios.read().values().map(|s| s.active).sum()
    }

    /// Every VU task still alive across scenarios, retiring ones included.
    pub fn total_live(&self) -> usize {
        self.scenarios.read().values().map(ScenarioStatus::live).sum()
    }

    pub fn all_done(&self) -> bool {
        self.scenarios
            .read()
            .values()
            .all(|s| s.phase == ScenarioPhase::Done)
    }

    fn set(&self, scenario: &str, status: ScenarioStatus) {
        self.scenarios.write().insert(scenario.to_string(), status);
    }
}

/// Requests an early, orderly end of the run. Every scenario treats a stop
/// as a target of zero and drains its VUs.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so this only returns once stopped
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Final numbers for one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub name: String,
    pub iterations: u64,
    pub peak_vus: usize,
    pub spawned: usize,
}

struct Vu {
    id: usize,
    retire: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Drives one scenario's VUs along its schedule.
pub struct ScenarioScheduler {
    plan: ScenarioPlan,
    executor: OperationExecutor,
    selector: Arc<WorkflowSelector>,
    status: RunStatus,
    stop: StopHandle,
    tick: Duration,
    iterations: Arc<AtomicU64>,
}

impl ScenarioScheduler {
    pub fn new(
        plan: ScenarioPlan,
        executor: &OperationExecutor,
        status: RunStatus,
        stop: StopHandle,
    ) -> Self {
        let executor = executor.with_profile(plan.profile.clone());
        let selector = Arc::new(plan.selector.clone());
        status.set(&plan.name, ScenarioStatus::pending());
        Self {
            plan,
            executor,
            selector,
            status,
            stop,
            tick: DEFAULT_TICK,
            iterations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run the scenario to completion. `run_start` anchors the start offset.
    pub async fn run(self, run_start: Instant) -> ScenarioSummary {
        let name = self.plan.name.clone();
        let start = run_start + self.plan.start_offset;
        let total = self.plan.schedule.total_duration();

        tokio::select! {
            _ = tokio::time::sleep_until(start) => {}
            _ = self.stop.stopped() => {}
        }
        if self.stop.is_stopped() && Instant::now() < start {
            tracing::info!("Scenario '{}' stopped before it started", name);
            self.publish(ScenarioPhase::Done, 0, 0, 0, 0);
            return self.summary(0, 0);
        }

        tracing::info!(
            "Scenario '{}' started: {} stages over {:.0}s, up to {} VUs",
            name,
            self.plan.schedule.stages().len(),
            total.as_secs_f64(),
            self.plan.schedule.max_target()
        );

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut active: Vec<Vu> = Vec::new();
        let mut retiring: Vec<Vu> = Vec::new();
        let mut spawned = 0usize;
        let mut peak = 0usize;

        loop {
            ticker.tick().await;

            let elapsed = start.elapsed();
            let finished = self.stop.is_stopped() || elapsed >= total;
            let target = if finished {
                0
            } else {
                self.plan.schedule.target_at(elapsed)
            };

            // a VU that ended on its own (panic) frees its slot
            let (ended, alive): (Vec<Vu>, Vec<Vu>) =
                active.into_iter().partition(|vu| vu.task.is_finished());
            active = alive;
            for vu in ended {
                self.reap(vu).await;
            }

            while active.len() < target {
                active.push(self.spawn_vu(spawned));
                spawned += 1;
            }
            while active.len() > target {
                if let Some(vu) = active.pop() {
                    vu.retire.store(true, Ordering::Relaxed);
                    retiring.push(vu);
                }
            }
            peak = peak.max(active.len());

            let (done, still): (Vec<Vu>, Vec<Vu>) =
                retiring.into_iter().partition(|vu| vu.task.is_finished());
            retiring = still;
            for vu in done {
                self.reap(vu).await;
            }

            let phase = if finished || self.plan.schedule.is_draining(elapsed) {
                ScenarioPhase::Draining
            } else {
                ScenarioPhase::Ramping
            };
            self.publish(phase, target, active.len(), retiring.len(), spawned);

            if finished {
                break;
            }
        }

        tracing::info!("Scenario '{}' draining {} VUs", name, retiring.len());
        while let Some(vu) = retiring.pop() {
            self.reap(vu).await;
            self.publish(ScenarioPhase::Draining, 0, 0, retiring.len(), spawned);
        }

        self.publish(ScenarioPhase::Done, 0, 0, 0, spawned);
        let summary = self.summary(peak, spawned);
        tracing::info!(
            "Scenario '{}' done: {} iterations, peak {} VUs",
            name,
            summary.iterations,
            summary.peak_vus
        );
        summary
    }

    fn spawn_vu(&self, id: usize) -> Vu {
        let retire = Arc::new(AtomicBool::new(false));
        let mut rng = match self.plan.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };

        let executor = self.executor.clone();
        let selector = Arc::clone(&self.selector);
        let iterations = Arc::clone(&self.iterations);
        let flag = Arc::clone(&retire);

        let task = tokio::spawn(async move {
            while !flag.load(Ordering::Relaxed) {
                executor.iterate(&selector, &mut rng).await;
                iterations.fetch_add(1, Ordering::Relaxed);
            }
        });

        Vu { id, retire, task }
    }

    async fn reap(&self, vu: Vu) {
        if let Err(err) = vu.task.await {
            log_join_error(&self.plan.name, vu.id, err);
        }
    }

    fn publish(
        &self,
        phase: ScenarioPhase,
        target: usize,
        active: usize,
        retiring: usize,
        spawned: usize,
    ) {
        self.status.set(
            &self.plan.name,
            ScenarioStatus {
                phase,
                target,
                active,
                retiring,
                spawned,
                iterations: self.iterations.load(Ordering::Relaxed),
            },
        );
    }

    fn summary(&self, peak_vus: usize, spawned: usize) -> ScenarioSummary {
        ScenarioSummary {
            name: self.plan.name.clone(),
            iterations: self.iterations.load(Ordering::Relaxed),
            peak_vus,
            spawned,
        }
    }
}

fn log_join_error(scenario: &str, vu: usize, err: JoinError) {
    if err.is_panic() {
        tracing::error!("Scenario '{}': VU {} panicked: {}", scenario, vu, err);
    } else {
        tracing::warn!("Scenario '{}': VU {} was cancelled", scenario, vu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_ramp_interpolates_from_start_vus() {
        let schedule = VuSchedule::ramping(0, vec![Stage::ramp(secs(10), 10)]);
        assert_eq!(schedule.target_at(Duration::ZERO), 0);
        assert_eq!(schedule.target_at(secs(5)), 5);
        assert_eq!(schedule.target_at(Duration::from_millis(9_999)), 9);
        assert_eq!(schedule.target_at(secs(10)), 0);
    }

    #[test]
    fn test_multi_stage_profile() {
        // 2m -> 10, hold 5m, 2m -> 20
        let schedule = VuSchedule::ramping(
            0,
            vec![
                Stage::ramp(secs(120), 10),
                Stage::ramp(secs(300), 10),
                Stage::ramp(secs(120), 20),
            ],
        );
        assert_eq!(schedule.target_at(secs(60)), 5);
        assert_eq!(schedule.target_at(secs(120)), 10);
        assert_eq!(schedule.target_at(secs(400)), 10);
        assert_eq!(schedule.target_at(secs(480)), 15);
        assert_eq!(schedule.total_duration(), secs(540));
        assert_eq!(schedule.max_target(), 20);
    }

    #[test]
    fn test_ramp_down_and_drain_detection() {
        let schedule = VuSchedule::ramping(
            5,
            vec![Stage::ramp(secs(10), 10), Stage::ramp(secs(10), 0)],
        );
        assert_eq!(schedule.target_at(Duration::ZERO), 5);
        assert_eq!(schedule.target_at(secs(15)), 5);
        assert!(!schedule.is_draining(secs(9)));
        assert!(schedule.is_draining(secs(10)));
        assert!(schedule.is_draining(secs(25)));
    }

    #[test]
    fn test_constant_schedule_holds_then_ends() {
        let schedule = VuSchedule::constant(15, secs(600));
        assert_eq!(schedule.target_at(Duration::ZERO), 15);
        assert_eq!(schedule.target_at(secs(599)), 15);
        assert_eq!(schedule.target_at(secs(600)), 0);
        assert!(!schedule.is_draining(secs(300)));
    }

    #[test]
    fn test_zero_length_stage_jumps() {
        let schedule = VuSchedule::ramping(
            0,
            vec![Stage::ramp(Duration::ZERO, 8), Stage::ramp(secs(10), 8)],
        );
        assert_eq!(schedule.target_at(Duration::ZERO), 8);
        assert_eq!(schedule.target_at(secs(5)), 8);
    }

    #[test]
    fn test_scaled_schedule() {
        let schedule = VuSchedule::ramping(0, vec![Stage::ramp(secs(60), 10)]).scaled(0.5);
        assert_eq!(schedule.total_duration(), secs(30));
        assert_eq!(schedule.target_at(secs(15)), 5);
    }

    #[tokio::test]
    async fn test_stop_handle_resolves() {
        let stop = StopHandle::new();
        assert!(!stop.is_stopped());
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.stopped().await })
        };
        stop.stop();
        waiter.await.unwrap();
        assert!(stop.is_stopped());
    }
}
