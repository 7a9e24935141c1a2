//! A complete run: provisioning, concurrent scenarios, final verdict.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::api::BankApi;
use crate::executor::OperationExecutor;
use crate::http::HttpExecutor;
use crate::identity::IdentityPool;
use crate::metrics::{MetricsAggregator, MetricsSink, MetricsSnapshot};
use crate::provision::{ProvisionReport, SetupProvisioner};
use crate::scheduler::{
    RunStatus, ScenarioPlan, ScenarioScheduler, ScenarioSummary, StopHandle, DEFAULT_TICK,
};
use crate::threshold::{ThresholdEvaluator, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupPlan {
    pub count: usize,
    pub prefix: String,
    pub slot_delay: Duration,
    pub seed: Option<u64>,
}

/// Validated description of a whole run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub setup: Option<SetupPlan>,
    pub scenarios: Vec<ScenarioPlan>,
    pub thresholds: ThresholdEvaluator,
}

impl RunPlan {
    /// Time from the first scenario start to the last scenario end.
    pub fn total_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(|scenario| scenario.start_offset + scenario.schedule.total_duration())
            .max()
            .unwrap_or_default()
    }

    /// Compress (or stretch) every scenario timeline by `factor`.
    pub fn scale_time(&mut self, factor: f64) {
        for scenario in &mut self.scenarios {
            scenario.start_offset = scenario.start_offset.mul_f64(factor);
            scenario.schedule = scenario.schedule.scaled(factor);
        }
    }

    /// Give every unseeded scenario (and provisioning) a seed derived from `seed`.
    pub fn seed_all(&mut self, seed: u64) {
        if let Some(setup) = &mut self.setup {
            setup.seed.get_or_insert(seed);
        }
        for (index, scenario) in self.scenarios.iter_mut().enumerate() {
            let derived = seed.wrapping_add((index as u64 + 1) * 1_000_003);
            scenario.seed.get_or_insert(derived);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub provisioning: Option<ProvisionReport>,
    pub scenarios: Vec<ScenarioSummary>,
    pub snapshot: MetricsSnapshot,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

/// Owns the shared state of one run and drives it to completion.
pub struct LoadRun {
    plan: RunPlan,
    executor: OperationExecutor,
    metrics: MetricsAggregator,
    status: RunStatus,
    stop: StopHandle,
    tick: Duration,
}

impl LoadRun {
    pub fn new(http: Arc<dyn HttpExecutor>, plan: RunPlan) -> Self {
        let metrics = MetricsAggregator::new();
        let sink: Arc<dyn MetricsSink> = Arc::new(metrics.clone());
        let api = BankApi::new(http, Arc::clone(&sink));
        let executor = OperationExecutor::new(api, IdentityPool::new(), sink);

        Self {
            plan,
            executor,
            metrics,
            status: RunStatus::new(),
            stop: StopHandle::new(),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn metrics(&self) -> MetricsAggregator {
        self.metrics.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.status.clone()
    }

    pub fn pool(&self) -> IdentityPool {
        self.executor.pool().clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub async fn execute(self) -> RunReport {
        let started = Instant::now();

        let provisioning = match &self.plan.setup {
            Some(setup) if !self.stop.is_stopped() => {
                let provisioner = SetupProvisioner::new(self.executor.clone(), setup.prefix.clone())
                    .with_slot_delay(setup.slot_delay)
                    .with_seed(setup.seed)
                    .with_stop(self.stop.clone());
                Some(provisioner.run(setup.count).await)
            }
            _ => None,
        };

        let run_start = Instant::now();
        tracing::info!(
            "Starting {} scenario(s), expected duration {:.0}s",
            self.plan.scenarios.len(),
            self.plan.total_duration().as_secs_f64()
        );

        let handles: Vec<_> = self
            .plan
            .scenarios
            .iter()
            .cloned()
            .map(|plan| {
                let name = plan.name.clone();
                let scheduler =
                    ScenarioScheduler::new(plan, &self.executor, self.status.clone(), self.stop.clone())
                        .with_tick(self.tick);
                (name, tokio::spawn(scheduler.run(run_start)))
            })
            .collect();

        let mut scenarios = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(summary) => scenarios.push(summary),
                Err(err) => tracing::error!("Scenario '{}' task failed: {}", name, err),
            }
        }

        let snapshot = self.metrics.snapshot();
        let verdict = self.plan.thresholds.evaluate(&snapshot);
        tracing::info!(
            "Run finished in {:.1}s, thresholds {}",
            started.elapsed().as_secs_f64(),
            if verdict.pass { "passed" } else { "FAILED" }
        );

        RunReport {
            provisioning,
            scenarios,
            snapshot,
            verdict,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationType, WeightTable};
    use crate::scheduler::{Stage, VuSchedule};
    use crate::selector::WorkflowSelector;

    fn scenario(name: &str, offset: u64, stages: Vec<Stage>) -> ScenarioPlan {
        ScenarioPlan {
            name: name.to_string(),
            start_offset: Duration::from_secs(offset),
            schedule: VuSchedule::ramping(0, stages),
            selector: WorkflowSelector::new(
                WeightTable::new([(OperationType::HealthCheck, 1.0)]).unwrap(),
            ),
            profile: Default::default(),
            seed: None,
        }
    }

    fn plan() -> RunPlan {
        RunPlan {
            setup: Some(SetupPlan {
                count: 3,
                prefix: "loaduser".to_string(),
                slot_delay: Duration::ZERO,
                seed: None,
            }),
            scenarios: vec![
                scenario("a", 0, vec![Stage::ramp(Duration::from_secs(60), 5)]),
                scenario("b", 60, vec![Stage::ramp(Duration::from_secs(120), 5)]),
            ],
            thresholds: ThresholdEvaluator::default(),
        }
    }

    #[test]
    fn test_total_duration_accounts_for_offsets() {
        assert_eq!(plan().total_duration(), Duration::from_secs(180));
    }

    #[test]
    fn test_scale_time_compresses_offsets_and_stages() {
        let mut plan = plan();
        plan.scale_time(0.5);
        assert_eq!(plan.scenarios[1].start_offset, Duration::from_secs(30));
        assert_eq!(plan.total_duration(), Duration::from_secs(90));
    }

    #[test]
    fn test_seed_all_keeps_explicit_seeds() {
        let mut plan = plan();
        plan.scenarios[0].seed = Some(5);
        plan.seed_all(42);
        assert_eq!(plan.setup.as_ref().unwrap().seed, Some(42));
        assert_eq!(plan.scenarios[0].seed, Some(5));
        assert!(plan.scenarios[1].seed.is_some());
        assert_ne!(plan.scenarios[1].seed, Some(42));
    }
}
