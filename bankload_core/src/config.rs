//! File-based run configuration.
//!
//! A [`RunConfig`] is the JSON form of a run: optional provisioning, named
//! scenarios and thresholds. It is validated and lowered into a [`RunPlan`]
//! before any traffic is sent.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::executor::{AmountRange, DurationRange, ExecutorProfile, ThinkTime};
use crate::operation::{OperationType, WeightTable};
use crate::provision::DEFAULT_SLOT_DELAY;
use crate::run::{RunPlan, SetupPlan};
use crate::scheduler::{ScenarioPlan, Stage, VuSchedule};
use crate::selector::WorkflowSelector;
use crate::threshold::{ThresholdEvaluator, ThresholdRule};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub setup: Option<SetupConfig>,
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    /// metric name -> threshold expressions, e.g. `"p(95)<500"`
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    pub count: usize,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_slot_delay", deserialize_with = "deserialize_duration")]
    pub slot_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    #[serde(flatten)]
    pub executor: ExecutorConfig,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub start_time: Duration,
    /// operation name -> relative weight
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub think_time: Option<ThinkTimeConfig>,
    #[serde(default)]
    pub amount: Option<AmountRange>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Prefix for users registered by this scenario's VUs
    #[serde(default)]
    pub user_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "executor", rename_all = "kebab-case")]
pub enum ExecutorConfig {
    RampingVus {
        #[serde(default)]
        start_vus: usize,
        stages: Vec<StageConfig>,
    },
    ConstantVus {
        vus: usize,
        #[serde(deserialize_with = "deserialize_duration")]
        duration: Duration,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    pub target: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub min: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkTimeConfig {
    #[serde(deserialize_with = "deserialize_duration")]
    pub min: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max: Duration,
    #[serde(default)]
    pub per_operation: BTreeMap<String, RangeConfig>,
}

fn default_prefix() -> String {
    "loaduser".to_string()
}

fn default_slot_delay() -> Duration {
    DEFAULT_SLOT_DELAY
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check everything that can be checked without sending a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clone().into_plan().map(|_| ())
    }

    /// Validate and lower into an executable plan.
    pub fn into_plan(self) -> Result<RunPlan, ConfigError> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::MissingField("scenarios".to_string()));
        }

        let setup = self.setup.map(|setup| SetupPlan {
            count: setup.count,
            prefix: setup.prefix,
            slot_delay: setup.slot_delay,
            seed: None,
        });

        let scenarios = self
            .scenarios
            .into_iter()
            .map(|(name, scenario)| scenario.into_plan(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rules = Vec::new();
        for (metric, expressions) in &self.thresholds {
            for expression in expressions {
                rules.push(ThresholdRule::parse(metric.as_str(), expression)?);
            }
        }

        Ok(RunPlan {
            setup,
            scenarios,
            thresholds: ThresholdEvaluator::new(rules),
        })
    }
}

impl ScenarioConfig {
    fn into_plan(self, name: String) -> Result<ScenarioPlan, ConfigError> {
        let invalid =
            |reason: String| ConfigError::Invalid(format!("scenario '{}': {}", name, reason));

        let schedule = match self.executor {
            ExecutorConfig::RampingVus { start_vus, stages } => {
                if stages.is_empty() {
                    return Err(invalid("ramping-vus needs at least one stage".to_string()));
                }
                let stages = stages
                    .into_iter()
                    .map(|stage| Stage::ramp(stage.duration, stage.target))
                    .collect();
                VuSchedule::ramping(start_vus, stages)
            }
            ExecutorConfig::ConstantVus { vus, duration } => {
                if duration.is_zero() {
                    return Err(invalid("constant-vus needs a non-zero duration".to_string()));
                }
                VuSchedule::constant(vus, duration)
            }
        };

        let weights = self
            .weights
            .iter()
            .map(|(op, weight)| parse_operation(op).map(|op| (op, *weight)))
            .collect::<Result<Vec<_>, _>>()?;
        let table = WeightTable::new(weights).map_err(|err| invalid(err.to_string()))?;

        let mut profile = ExecutorProfile::default();
        if let Some(think) = self.think_time {
            let mut think_time = ThinkTime::new(DurationRange::new(think.min, think.max)?);
            for (op, range) in think.per_operation {
                let range = DurationRange::new(range.min, range.max)?;
                think_time = think_time.with_override(parse_operation(&op)?, range);
            }
            profile.think_time = think_time;
        }
        if let Some(amount) = self.amount {
            profile.amounts = AmountRange::new(amount.min, amount.max)?;
        }
        if let Some(prefix) = self.user_prefix {
            if prefix.is_empty() {
                return Err(invalid("user_prefix must not be empty".to_string()));
            }
            profile.user_prefix = prefix;
        }

        Ok(ScenarioPlan {
            name,
            start_offset: self.start_time,
            schedule,
            selector: WorkflowSelector::new(table),
            profile,
            seed: self.seed,
        })
    }
}

fn parse_operation(name: &str) -> Result<OperationType, ConfigError> {
    name.parse().map_err(ConfigError::Invalid)
}

/// Parse `"500ms"`, `"30s"`, `"2m"`, `"1h"` or a composite like `"1m30s"`.
/// A bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let err = |reason: &str| ConfigError::Duration {
        value: text.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(err("empty duration"));
    }
    if let Ok(secs) = trimmed.parse::<f64>() {
        return seconds(secs).ok_or_else(|| err("must be a finite, non-negative number"));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| err("missing unit"))?;
        if number_len == 0 {
            return Err(err("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| err("invalid number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(err("unknown unit, expected ms, s, m or h")),
        };
        rest = &rest[unit_len..];

        total += seconds(value * scale).ok_or_else(|| err("out of range"))?;
    }
    Ok(total)
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration like \"30s\" or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
            seconds(value).ok_or_else(|| E::custom("duration must be finite and non-negative"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
