//! Built-in run profiles, mirroring the smoke, load, spike and full k6 suites.

use std::collections::BTreeMap;
use std::time::Duration;

use bankload_core::config::RunConfig;
use bankload_core::{
    AmountRange, ConfigError, DurationRange, ExecutorProfile, OperationType, RunPlan,
    ScenarioPlan, SetupPlan, Stage, ThinkTime, ThresholdEvaluator, ThresholdRule, VuSchedule,
    WeightTable, WorkflowSelector,
};

use crate::cli::Profile;

/// Build the plan for a built-in profile. `None` for `custom`.
pub fn built_in(profile: &Profile) -> Option<Result<RunPlan, ConfigError>> {
    match profile {
        Profile::Smoke => Some(smoke_profile()),
        Profile::Load => Some(load_profile()),
        Profile::Spike => Some(spike_profile()),
        Profile::Full => Some(full_profile()),
        Profile::Custom(_) => None,
    }
}

/// Lower a custom configuration. Files without thresholds get the defaults.
pub fn from_config(mut config: RunConfig) -> Result<RunPlan, ConfigError> {
    if config.thresholds.is_empty() {
        config.thresholds = default_thresholds();
    }
    config.into_plan()
}

/// Thresholds applied when a configuration names none.
pub fn default_thresholds() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "http_req_duration".to_string(),
            vec!["p(95)<500".to_string(), "p(99)<1000".to_string()],
        ),
        ("http_req_failed".to_string(), vec!["rate<0.01".to_string()]),
        ("http_reqs".to_string(), vec!["rate>100".to_string()]),
    ])
}

/// Smoke profile: is the API alive and behaving?
///
/// - 1 VU for 1 minute
/// - registers its own users, no provisioning
/// - p95 < 500ms, < 1% failed requests
pub fn smoke_profile() -> Result<RunPlan, ConfigError> {
    let schedule = VuSchedule::ramping(
        0,
        vec![Stage::ramp(secs(30), 1), Stage::ramp(secs(30), 1)],
    );
    let weights = [
        (OperationType::Register, 40.0),
        (OperationType::HealthCheck, 20.0),
        (OperationType::ListAccounts, 40.0),
    ];
    let profile = executor_profile(fixed(secs(1)), AmountRange::default(), "user");

    Ok(RunPlan {
        setup: None,
        scenarios: vec![scenario("smoke", Duration::ZERO, schedule, &weights, profile)?],
        thresholds: thresholds(&[
            ("http_req_duration", "p(95)<500"),
            ("http_req_failed", "rate<0.01"),
        ])?,
    })
}

/// Load profile: typical traffic over ~18 minutes.
///
/// - 20 provisioned users
/// - 10 VUs, hold, 20, 50, 30, then down to 0
/// - list accounts and transfer 10..60 between users, 1-3s think time
/// - p95 < 800ms, < 5% failed, > 50 req/s
pub fn load_profile() -> Result<RunPlan, ConfigError> {
    let schedule = VuSchedule::ramping(
        0,
        vec![
            Stage::ramp(mins(2), 10),
            Stage::ramp(mins(5), 10),
            Stage::ramp(mins(2), 20),
            Stage::ramp(mins(5), 50),
            Stage::ramp(mins(2), 30),
            Stage::ramp(mins(2), 0),
        ],
    );
    let weights = [
        (OperationType::ListAccounts, 50.0),
        (OperationType::Transfer, 50.0),
    ];
    let profile = executor_profile(
        DurationRange::new(secs(1), secs(3))?,
        AmountRange::new(10.0, 60.0)?,
        "loaduser",
    );

    Ok(RunPlan {
        setup: Some(setup(20, "loaduser")),
        scenarios: vec![scenario("load", Duration::ZERO, schedule, &weights, profile)?],
        thresholds: thresholds(&[
            ("http_req_duration", "p(95)<800"),
            ("http_req_failed", "rate<0.05"),
            ("http_reqs", "rate>50"),
        ])?,
    })
}

/// Spike profile: sudden burst to 300 VUs.
///
/// - 30 provisioned users
/// - 10 VUs, 200 in 30s, 300 for a minute, back to 10, then 0
/// - health, list and transfer 5..25 in equal parts, 0.3s think time
/// - p99 < 3s, < 20% failed
pub fn spike_profile() -> Result<RunPlan, ConfigError> {
    let schedule = VuSchedule::ramping(
        0,
        vec![
            Stage::ramp(secs(10), 10),
            Stage::ramp(secs(30), 200),
            Stage::ramp(mins(1), 300),
            Stage::ramp(secs(10), 10),
            Stage::ramp(secs(30), 10),
            Stage::ramp(secs(10), 0),
        ],
    );
    let weights = [
        (OperationType::HealthCheck, 1.0),
        (OperationType::ListAccounts, 1.0),
        (OperationType::Transfer, 1.0),
    ];
    let profile = executor_profile(
        fixed(Duration::from_millis(300)),
        AmountRange::new(5.0, 25.0)?,
        "spikeuser",
    );

    Ok(RunPlan {
        setup: Some(setup(30, "spikeuser")),
        scenarios: vec![scenario("spike", Duration::ZERO, schedule, &weights, profile)?],
        thresholds: thresholds(&[
            ("http_req_duration", "p(99)<3000"),
            ("http_req_failed", "rate<0.20"),
        ])?,
    })
}

/// Full profile: three concurrent scenarios sharing one identity pool.
///
/// - user_registration: up to 5 VUs registering users, 2-5s think time
/// - banking_operations: starts at 1m, up to 45 VUs listing accounts,
///   paying and transferring 10..40
/// - read_heavy: starts at 2m, 15 constant VUs on health and accounts
/// - p95 < 1s, < 5% failed
pub fn full_profile() -> Result<RunPlan, ConfigError> {
    let registration = scenario(
        "user_registration",
        Duration::ZERO,
        VuSchedule::ramping(
            0,
            vec![
                Stage::ramp(mins(1), 3),
                Stage::ramp(mins(3), 5),
                Stage::ramp(mins(1), 0),
            ],
        ),
        &[(OperationType::Register, 1.0)],
        executor_profile(
            DurationRange::new(secs(2), secs(5))?,
            AmountRange::default(),
            "fulluser",
        ),
    )?;

    let banking = scenario(
        "banking_operations",
        mins(1),
        VuSchedule::ramping(
            0,
            vec![
                Stage::ramp(mins(2), 10),
                Stage::ramp(mins(5), 45),
                Stage::ramp(mins(2), 10),
                Stage::ramp(mins(2), 0),
            ],
        ),
        &[
            (OperationType::ListAccounts, 50.0),
            (OperationType::Payment, 30.0),
            (OperationType::Transfer, 20.0),
        ],
        executor_profile(
            DurationRange::new(secs(1), secs(3))?,
            AmountRange::new(10.0, 40.0)?,
            "fulluser",
        ),
    )?;

    let read_heavy = scenario(
        "read_heavy",
        mins(2),
        VuSchedule::constant(15, mins(10)),
        &[
            (OperationType::HealthCheck, 50.0),
            (OperationType::ListAccounts, 50.0),
        ],
        executor_profile(
            DurationRange::new(Duration::from_millis(500), Duration::from_millis(1_500))?,
            AmountRange::default(),
            "fulluser",
        ),
    )?;

    Ok(RunPlan {
        setup: None,
        scenarios: vec![registration, banking, read_heavy],
        thresholds: thresholds(&[
            ("http_req_duration", "p(95)<1000"),
            ("http_req_failed", "rate<0.05"),
        ])?,
    })
}

fn scenario(
    name: &str,
    start_offset: Duration,
    schedule: VuSchedule,
    weights: &[(OperationType, f64)],
    profile: ExecutorProfile,
) -> Result<ScenarioPlan, ConfigError> {
    Ok(ScenarioPlan {
        name: name.to_string(),
        start_offset,
        schedule,
        selector: WorkflowSelector::new(WeightTable::new(weights.iter().copied())?),
        profile,
        seed: None,
    })
}

fn executor_profile(think: DurationRange, amounts: AmountRange, prefix: &str) -> ExecutorProfile {
    ExecutorProfile {
        think_time: ThinkTime::new(think),
        amounts,
        user_prefix: prefix.to_string(),
    }
}

fn setup(count: usize, prefix: &str) -> SetupPlan {
    SetupPlan {
        count,
        prefix: prefix.to_string(),
        slot_delay: bankload_core::provision::DEFAULT_SLOT_DELAY,
        seed: None,
    }
}

fn thresholds(rules: &[(&str, &str)]) -> Result<ThresholdEvaluator, ConfigError> {
    let rules = rules
        .iter()
        .map(|(metric, expression)| ThresholdRule::parse(*metric, expression))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ThresholdEvaluator::new(rules))
}

fn fixed(duration: Duration) -> DurationRange {
    DurationRange::fixed(duration)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_built_in_profile_builds() {
        for profile in [Profile::Smoke, Profile::Load, Profile::Spike, Profile::Full] {
            let plan = built_in(&profile).unwrap().unwrap();
            assert!(!plan.scenarios.is_empty(), "{} has no scenarios", profile.name());
            assert!(!plan.thresholds.rules().is_empty());
        }
    }

    #[test]
    fn test_load_profile_timeline() {
        let plan = load_profile().unwrap();
        assert_eq!(plan.total_duration(), mins(18));
        assert_eq!(plan.scenarios[0].schedule.max_target(), 50);
        assert_eq!(plan.setup.as_ref().unwrap().count, 20);
    }

    #[test]
    fn test_full_profile_offsets() {
        let plan = full_profile().unwrap();
        let offsets: Vec<_> = plan
            .scenarios
            .iter()
            .map(|s| (s.name.as_str(), s.start_offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("user_registration", Duration::ZERO),
                ("banking_operations", mins(1)),
                ("read_heavy", mins(2)),
            ]
        );
        assert_eq!(plan.total_duration(), mins(12));
    }

    #[test]
    fn test_custom_config_gets_default_thresholds() {
        let config = RunConfig::from_json(
            r#"{ "scenarios": { "ping": {
                "executor": "constant-vus", "vus": 1, "duration": "10s",
                "weights": { "health_check": 1 } } } }"#,
        )
        .unwrap();
        let plan = from_config(config).unwrap();
        assert_eq!(plan.thresholds.rules().len(), 4);
    }
}
