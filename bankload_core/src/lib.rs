//! Load-generation core for exercising a banking HTTP API.
//!
//! The crate ramps simulated users (VUs) through timed stages, shares a pool
//! of provisioned identities between them, drives each VU through weighted
//! banking workflows and turns the resulting metrics into a pass/fail
//! verdict.
//!
//! Transport and reporting live outside the crate: callers plug in an
//! [`HttpExecutor`] and read results from the [`MetricsAggregator`].

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod operation;
pub mod provision;
pub mod run;
pub mod scheduler;
pub mod selector;
pub mod threshold;

pub use api::{BankApi, Call, TransactionKind, TransactionOutcome};
pub use config::RunConfig;
pub use error::{
    ConfigError, IdentityError, PoolError, StepError, ThresholdParseError, TransportError,
};
pub use executor::{AmountRange, DurationRange, ExecutorProfile, OperationExecutor, ThinkTime};
pub use http::{HttpExecutor, HttpRequest, HttpResponse, Method};
pub use identity::{Credentials, Identity, IdentityPool};
pub use metrics::{names, MetricsAggregator, MetricsSink, MetricsSnapshot, Sample, SeriesSnapshot};
pub use operation::{OperationResult, OperationType, WeightTable};
pub use provision::{ProvisionReport, SetupProvisioner};
pub use run::{LoadRun, RunPlan, RunReport, SetupPlan};
pub use scheduler::{
    RunStatus, ScenarioPhase, ScenarioPlan, ScenarioScheduler, ScenarioStatus, ScenarioSummary,
    Stage, StageShape, StopHandle, VuSchedule,
};
pub use selector::WorkflowSelector;
pub use threshold::{Aggregator, Comparator, ThresholdEvaluator, ThresholdRule, Verdict};
