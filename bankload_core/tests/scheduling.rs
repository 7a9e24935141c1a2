mod common;

use std::sync::Arc;
use std::time::Duration;

use bankload_core::{
    names, BankApi, DurationRange, ExecutorProfile, IdentityPool, LoadRun, MetricsAggregator,
    MetricsSink, OperationExecutor, OperationType, RunPlan, RunStatus, ScenarioPhase,
    ScenarioPlan, ScenarioScheduler, SetupPlan, Stage, StopHandle, ThinkTime, ThresholdEvaluator,
    ThresholdRule, VuSchedule, WeightTable, WorkflowSelector,
};
use common::FakeBank;
use tokio::time::Instant;

fn executor(bank: &FakeBank) -> (OperationExecutor, MetricsAggregator) {
    let metrics = MetricsAggregator::new();
    let sink: Arc<dyn MetricsSink> = Arc::new(metrics.clone());
    let api = BankApi::new(Arc::new(bank.clone()), Arc::clone(&sink));
    (OperationExecutor::new(api, IdentityPool::new(), sink), metrics)
}

fn scenario(
    name: &str,
    schedule: VuSchedule,
    weights: &[(OperationType, f64)],
    start_offset: Duration,
) -> ScenarioPlan {
    ScenarioPlan {
        name: name.to_string(),
        start_offset,
        schedule,
        selector: WorkflowSelector::new(WeightTable::new(weights.iter().copied()).unwrap()),
        profile: ExecutorProfile {
            think_time: ThinkTime::new(
                DurationRange::new(Duration::from_millis(50), Duration::from_millis(100)).unwrap(),
            ),
            ..ExecutorProfile::default()
        },
        seed: Some(17),
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn test_active_vus_follow_the_ramp() {
    let bank = FakeBank::new();
    let (executor, _) = executor(&bank);
    let schedule = VuSchedule::ramping(
        0,
        vec![
            Stage::ramp(secs(30), 10),
            Stage::ramp(secs(20), 10),
            Stage::ramp(secs(30), 0),
        ],
    );
    let plan = scenario(
        "ramp",
        schedule.clone(),
        &[(OperationType::HealthCheck, 1.0)],
        Duration::ZERO,
    );
    let status = RunStatus::new();

    let start = Instant::now();
    let task = tokio::spawn(
        ScenarioScheduler::new(plan, &executor, status.clone(), StopHandle::new()).run(start),
    );

    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let elapsed = start.elapsed();
        assert!(elapsed < secs(120), "scenario never finished");

        let current = status.get("ramp").unwrap();
        if current.phase == ScenarioPhase::Done {
            break;
        }

        assert!(
            current.active <= schedule.target_at(elapsed) + 1,
            "{} active at {:?}, target {}",
            current.active,
            elapsed,
            schedule.target_at(elapsed)
        );
        if elapsed > secs(31) && elapsed < secs(49) {
            assert_eq!(current.active, 10, "hold stage at {:?}", elapsed);
            assert_eq!(current.phase, ScenarioPhase::Ramping);
        }
        if elapsed > secs(51) && elapsed < secs(80) {
            assert_eq!(current.phase, ScenarioPhase::Draining);
        }
    }

    let summary = task.await.unwrap();
    assert_eq!(summary.peak_vus, 10);
    assert!(summary.iterations > 0);

    let done = status.get("ramp").unwrap();
    assert_eq!((done.active, done.retiring), (0, 0));
    assert!(bank.paths().iter().all(|p| p == "/health"));
}

#[tokio::test(start_paused = true)]
async fn test_live_vus_stay_within_ramp_down_slack() {
    let bank = FakeBank::new();
    let (executor, _) = executor(&bank);
    // 20 VUs retire over 10s, two per second
    let schedule = VuSchedule::ramping(20, vec![Stage::ramp(secs(10), 0)]);
    let think = secs(1);
    let mut plan = scenario(
        "ramp_down",
        schedule.clone(),
        &[(OperationType::HealthCheck, 1.0)],
        Duration::ZERO,
    );
    plan.profile.think_time = ThinkTime::new(DurationRange::fixed(think));

    // a retiring VU lives at most one iteration (think plus request) and one
    // tick; one more VU for the scheduler's tick lag
    let retire_rate = 2.0;
    let window = think.as_secs_f64() + 0.2;
    let slack = (retire_rate * window).ceil() as usize + 2;

    let status = RunStatus::new();
    let start = Instant::now();
    let task = tokio::spawn(
        ScenarioScheduler::new(plan, &executor, status.clone(), StopHandle::new()).run(start),
    );

    let mut most_retiring = 0;
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let elapsed = start.elapsed();
        assert!(elapsed < secs(30), "scenario never finished");

        let current = status.get("ramp_down").unwrap();
        if current.phase == ScenarioPhase::Done {
            assert_eq!(current.live(), 0);
            break;
        }

        let target = schedule.target_at(elapsed);
        assert!(
            current.live() <= target + slack,
            "{} live ({} retiring) at {:?}, target {}",
            current.live(),
            current.retiring,
            elapsed,
            target
        );
        assert_eq!(status.total_live(), current.live());
        most_retiring = most_retiring.max(current.retiring);
    }

    task.await.unwrap();
    // retiring VUs really are counted while they finish their think time
    assert!(most_retiring > 0);
    assert_eq!(status.total_live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_offset_keeps_scenario_pending() {
    let bank = FakeBank::new();
    let (executor, _) = executor(&bank);
    let plan = scenario(
        "late",
        VuSchedule::constant(3, secs(5)),
        &[(OperationType::HealthCheck, 1.0)],
        secs(10),
    );
    let status = RunStatus::new();

    let start = Instant::now();
    let task = tokio::spawn(
        ScenarioScheduler::new(plan, &executor, status.clone(), StopHandle::new()).run(start),
    );

    tokio::time::sleep(secs(5)).await;
    assert_eq!(status.get("late").unwrap().phase, ScenarioPhase::Pending);
    assert!(bank.requests().is_empty());

    tokio::time::sleep(secs(7)).await;
    let running = status.get("late").unwrap();
    assert_eq!(running.phase, ScenarioPhase::Ramping);
    assert_eq!(running.active, 3);

    let summary = task.await.unwrap();
    assert_eq!(summary.peak_vus, 3);
    assert!(start.elapsed() >= secs(15));
}

#[tokio::test(start_paused = true)]
async fn test_stop_drains_every_vu() {
    let bank = FakeBank::new();
    let (executor, _) = executor(&bank);
    let plan = scenario(
        "soak",
        VuSchedule::constant(5, secs(3_600)),
        &[(OperationType::HealthCheck, 1.0)],
        Duration::ZERO,
    );
    let status = RunStatus::new();
    let stop = StopHandle::new();

    let task = tokio::spawn(
        ScenarioScheduler::new(plan, &executor, status.clone(), stop.clone()).run(Instant::now()),
    );

    tokio::time::sleep(secs(2)).await;
    assert_eq!(status.total_active(), 5);
    stop.stop();

    let summary = tokio::time::timeout(secs(5), task)
        .await
        .expect("stopped scenario drains promptly")
        .unwrap();
    assert_eq!(summary.spawned, 5);
    assert!(status.all_done());
}

fn banking_plan(thresholds: &[(&str, &str)]) -> RunPlan {
    let rules = thresholds
        .iter()
        .map(|(metric, expr)| ThresholdRule::parse(*metric, expr).unwrap())
        .collect();

    RunPlan {
        setup: Some(SetupPlan {
            count: 4,
            prefix: "loaduser".to_string(),
            slot_delay: Duration::from_millis(100),
            seed: None,
        }),
        scenarios: vec![
            scenario(
                "banking",
                VuSchedule::ramping(0, vec![Stage::ramp(secs(5), 4), Stage::ramp(secs(10), 4)]),
                &[
                    (OperationType::ListAccounts, 50.0),
                    (OperationType::Transfer, 30.0),
                    (OperationType::Payment, 20.0),
                ],
                Duration::ZERO,
            ),
            scenario(
                "read_heavy",
                VuSchedule::constant(2, secs(5)),
                &[
                    (OperationType::HealthCheck, 1.0),
                    (OperationType::ListAccounts, 1.0),
                ],
                secs(3),
            ),
        ],
        thresholds: ThresholdEvaluator::new(rules),
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_run_passes_thresholds() {
    let bank = FakeBank::new();
    let run = LoadRun::new(
        Arc::new(bank.clone()),
        banking_plan(&[
            ("http_req_duration", "p(95)<500"),
            ("http_req_failed", "rate<0.01"),
            ("http_reqs", "count>10"),
            // rate uses the paused clock: about 15s, not the few real milliseconds
            ("http_reqs", "rate>1"),
            ("http_reqs", "rate<1000"),
            ("checks", "rate>0.99"),
        ]),
    );
    let pool = run.pool();
    let status = run.status();

    let report = run.execute().await;

    assert_eq!(report.provisioning.as_ref().unwrap().created, 4);
    assert_eq!(pool.size(), 4);
    assert_eq!(report.scenarios.len(), 2);
    assert!(status.all_done());
    assert!(
        report.verdict.pass,
        "violations: {:?}",
        report.verdict.violations().collect::<Vec<_>>()
    );
    assert!(report.snapshot.get(names::ITERATIONS).is_some());
    assert!(bank
        .transactions()
        .iter()
        .all(|tx| tx["from_account_id"] != tx["to_account_id"]));
}

#[tokio::test(start_paused = true)]
async fn test_breached_threshold_fails_the_run() {
    let bank = FakeBank::new();
    // the fake bank answers in exactly 5ms
    let report = LoadRun::new(
        Arc::new(bank),
        banking_plan(&[
            ("http_req_duration", "p(95)<5"),
            ("http_req_failed", "rate<0.01"),
        ]),
    )
    .execute()
    .await;

    assert!(!report.verdict.pass);
    let violations: Vec<_> = report.verdict.violations().collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule.metric, "http_req_duration");
    let observed = violations[0].observed.unwrap();
    assert!((observed - 5.0).abs() < 1e-9);
}
