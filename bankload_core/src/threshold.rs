//! Threshold rules and the pass/fail verdict.
//!
//! Rules use the k6 expression syntax: `p(95)<500`, `rate<0.01`,
//! `rate>100`, `avg<=200`.

use std::fmt;
use std::time::Duration;

use crate::error::ThresholdParseError;
use crate::metrics::{percentile, MetricsSnapshot, SeriesSnapshot};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregator {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Rate,
    Count,
}

impl Aggregator {
    fn parse(text: &str) -> Result<Self, String> {
        match text {
            "avg" => Ok(Aggregator::Avg),
            "min" => Ok(Aggregator::Min),
            "max" => Ok(Aggregator::Max),
            "med" => Ok(Aggregator::Med),
            "rate" => Ok(Aggregator::Rate),
            "count" => Ok(Aggregator::Count),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregator '{}'", other))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile '{}'", inner))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {} is outside 0..=100", p));
                }
                Ok(Aggregator::Percentile(p))
            }
        }
    }

    /// Apply to one metric. `None` when the metric kind does not support
    /// this aggregator or there is nothing to aggregate yet.
    pub fn apply(self, series: &SeriesSnapshot, elapsed: Duration) -> Option<f64> {
        match (self, series) {
            (_, SeriesSnapshot::Trend(sorted)) if sorted.is_empty() => None,
            (Aggregator::Avg, SeriesSnapshot::Trend(sorted)) => {
                Some(sorted.iter().sum::<f64>() / sorted.len() as f64)
            }
            (Aggregator::Min, SeriesSnapshot::Trend(sorted)) => sorted.first().copied(),
            (Aggregator::Max, SeriesSnapshot::Trend(sorted)) => sorted.last().copied(),
            (Aggregator::Med, SeriesSnapshot::Trend(sorted)) => percentile(sorted, 50.0),
            (Aggregator::Percentile(p), SeriesSnapshot::Trend(sorted)) => percentile(sorted, p),
            (Aggregator::Count, SeriesSnapshot::Trend(sorted)) => Some(sorted.len() as f64),

            (Aggregator::Rate, SeriesSnapshot::Rate { hits, total }) if *total > 0 => {
                Some(*hits as f64 / *total as f64)
            }
            (Aggregator::Count, SeriesSnapshot::Rate { total, .. }) => Some(*total as f64),

            (Aggregator::Count, SeriesSnapshot::Counter { sum, .. }) => Some(*sum),
            (Aggregator::Rate, SeriesSnapshot::Counter { sum, .. }) => {
                let secs = elapsed.as_secs_f64();
                (secs > 0.0).then(|| *sum / secs)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Avg => f.write_str("avg"),
            Aggregator::Min => f.write_str("min"),
            Aggregator::Max => f.write_str("max"),
            Aggregator::Med => f.write_str("med"),
            Aggregator::Percentile(p) => write!(f, "p({})", p),
            Aggregator::Rate => f.write_str("rate"),
            Aggregator::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparator {
    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
            Comparator::Eq => observed == bound,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub metric: String,
    pub aggregator: Aggregator,
    pub comparator: Comparator,
    pub bound: f64,
}

impl ThresholdRule {
    pub fn new(
        metric: impl Into<String>,
        aggregator: Aggregator,
        comparator: Comparator,
        bound: f64,
    ) -> Self {
        Self {
            metric: metric.into(),
            aggregator,
            comparator,
            bound,
        }
    }

    /// Parse a k6-style expression such as `p(95)<500` for `metric`.
    pub fn parse(metric: impl Into<String>, expression: &str) -> Result<Self, ThresholdParseError> {
        let metric = metric.into();
        let fail = |reason: String| ThresholdParseError {
            metric: metric.clone(),
            expression: expression.to_string(),
            reason,
        };

        let split = expression
            .find(|c: char| c == '<' || c == '>' || c == '=')
            .ok_or_else(|| fail("missing comparator '<', '>' or '=='".to_string()))?;
        let (left, right) = expression.split_at(split);
        let (comparator, right) = if let Some(rest) = right.strip_prefix("<=") {
            (Comparator::Le, rest)
        } else if let Some(rest) = right.strip_prefix(">=") {
            (Comparator::Ge, rest)
        } else if let Some(rest) = right.strip_prefix("==") {
            (Comparator::Eq, rest)
        } else if let Some(rest) = right.strip_prefix('<') {
            (Comparator::Lt, rest)
        } else if let Some(rest) = right.strip_prefix('>') {
            (Comparator::Gt, rest)
        } else {
            return Err(fail("'=' is not a comparator, use '=='".to_string()));
        };

        let aggregator = Aggregator::parse(left.trim()).map_err(fail)?;
        let bound: f64 = right
            .trim()
            .parse()
            .map_err(|_| fail(format!("invalid bound '{}'", right.trim())))?;
        if !bound.is_finite() {
            return Err(fail("bound must be finite".to_string()));
        }

        Ok(Self {
            metric,
            aggregator,
            comparator,
            bound,
        })
    }

    /// The rule's expression without the metric name, e.g. `p(95)<500`.
    pub fn expression(&self) -> String {
        format!("{}{}{}", self.aggregator, self.comparator.symbol(), self.bound)
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule: ThresholdRule,
    /// `None` when the metric had no data for this aggregator
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub pass: bool,
    pub outcomes: Vec<RuleOutcome>,
}

impl Verdict {
    pub fn violations(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed)
    }
}

/// Evaluates a fixed rule set against metric snapshots.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
}

impl ThresholdEvaluator {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// A run passes only when every rule holds. A rule whose metric has no
    /// data fails.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Verdict {
        let outcomes: Vec<RuleOutcome> = self
            .rules
            .iter()
            .map(|rule| {
                let observed = snapshot
                    .get(&rule.metric)
                    .and_then(|series| rule.aggregator.apply(series, snapshot.elapsed));
                let passed = observed
                    .map(|value| rule.comparator.holds(value, rule.bound))
                    .unwrap_or(false);
                RuleOutcome {
                    rule: rule.clone(),
                    observed,
                    passed,
                }
            })
            .collect();

        Verdict {
            pass: outcomes.iter().all(|outcome| outcome.passed),
            outcomes,
        }
    }
}
