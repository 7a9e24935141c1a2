//! Operation executor - maps each operation type onto its HTTP call sequence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::api::{BankApi, Call, TransactionKind, TransactionRequest};
use crate::error::{ConfigError, StepError};
use crate::identity::{Credentials, Identity, IdentityPool};
use crate::metrics::{names, MetricsSink, Sample};
use crate::operation::{OperationResult, OperationType};
use crate::selector::WorkflowSelector;

/// Uniform range of durations, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationRange {
    pub min: Duration,
    pub max: Duration,
}

impl DurationRange {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::Invalid(format!(
                "range minimum {:?} exceeds maximum {:?}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn fixed(value: Duration) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let secs = rng.gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Pause between iterations, with optional per-operation ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinkTime {
    default: DurationRange,
    overrides: BTreeMap<OperationType, DurationRange>,
}

impl ThinkTime {
    pub fn new(default: DurationRange) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, operation: OperationType, range: DurationRange) -> Self {
        self.overrides.insert(operation, range);
        self
    }

    pub fn range_for(&self, operation: OperationType) -> DurationRange {
        self.overrides
            .get(&operation)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn sample<R: Rng + ?Sized>(&self, operation: OperationType, rng: &mut R) -> Duration {
        self.range_for(operation).sample(rng)
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self::new(DurationRange::fixed(Duration::from_secs(1)))
    }
}

/// Transaction amounts, drawn uniformly and rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: f64,
    pub max: f64,
}

impl AmountRange {
    pub fn new(min: f64, max: f64) -> Result<Self, ConfigError> {
        if !min.is_finite() || !max.is_finite() || min < 0.01 || min > max {
            return Err(ConfigError::Invalid(format!(
                "amount range {}..{} must satisfy 0.01 <= min <= max",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let raw = if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        };
        ((raw * 100.0).round() / 100.0).max(0.01)
    }
}

impl Default for AmountRange {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 100.0,
        }
    }
}

/// Per-scenario knobs for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorProfile {
    pub think_time: ThinkTime,
    pub amounts: AmountRange,
    /// Username prefix for identities registered during the run
    pub user_prefix: String,
}

impl Default for ExecutorProfile {
    fn default() -> Self {
        Self {
            think_time: ThinkTime::default(),
            amounts: AmountRange::default(),
            user_prefix: "user".to_string(),
        }
    }
}

/// Where a register → login → create-account chain stopped.
#[derive(Debug, Clone)]
pub struct OnboardingFailure {
    pub step: OperationType,
    pub error: StepError,
}

/// Result of an onboarding chain: the head step's result plus the identity
/// it materialized, if every step succeeded.
#[derive(Debug, Clone)]
pub struct Onboarding {
    pub head: OperationResult,
    pub outcome: Result<Arc<Identity>, OnboardingFailure>,
}

/// Runs operations against the API on behalf of one scenario's VUs.
///
/// Cheap to clone; all clones share the same pool, API client and sink.
#[derive(Clone)]
pub struct OperationExecutor {
    api: BankApi,
    pool: IdentityPool,
    sink: Arc<dyn MetricsSink>,
    profile: Arc<ExecutorProfile>,
}

impl OperationExecutor {
    pub fn new(api: BankApi, pool: IdentityPool, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            api,
            pool,
            sink,
            profile: Arc::new(ExecutorProfile::default()),
        }
    }

    /// Same pool, API and sink, different scenario settings.
    pub fn with_profile(&self, profile: ExecutorProfile) -> Self {
        Self {
            profile: Arc::new(profile),
            ..self.clone()
        }
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    pub fn profile(&self) -> &ExecutorProfile {
        &self.profile
    }

    /// One VU iteration: select, execute, record, then think.
    pub async fn iterate<R: Rng + Send>(
        &self,
        selector: &WorkflowSelector,
        rng: &mut R,
    ) -> Option<OperationResult> {
        let operation = selector.select(&self.pool, rng);
        let result = self.execute(operation, rng).await;
        self.sink.record(Sample::counter(names::ITERATIONS, 1.0));

        let pause = self.profile.think_time.sample(operation, rng);
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pause).await;
        }
        result
    }

    /// Run one operation. `None` means the pool could not supply the
    /// identities it needs and nothing was sent.
    pub async fn execute<R: Rng + Send>(
        &self,
        operation: OperationType,
        rng: &mut R,
    ) -> Option<OperationResult> {
        let result = match operation {
            OperationType::Register => {
                let credentials = Credentials::generate(&self.profile.user_prefix, 0, rng);
                self.onboard(&credentials).await.head
            }
            OperationType::Login => {
                let identity = self.pool.random_pick(rng)?;
                self.login_and_open(identity.id(), &identity.credentials())
                    .await
                    .0
            }
            OperationType::CreateAccount => {
                let identity = self.pool.random_pick(rng)?;
                self.open_account(identity.id(), &identity.credentials(), identity.token())
                    .await
                    .0
            }
            OperationType::ListAccounts => {
                let identity = self.pool.random_pick(rng)?;
                let call = self.api.list_accounts(identity.token()).await;
                self.report(OperationType::ListAccounts, &call)
            }
            OperationType::Transfer | OperationType::Payment => {
                let from = self.pool.random_pick(rng)?;
                let Some(to) = self.pool.pick_other(from.account_id(), rng) else {
                    tracing::debug!("No counterpart for {}, skipping iteration", operation);
                    return None;
                };
                let kind = if operation == OperationType::Transfer {
                    TransactionKind::Transfer
                } else {
                    TransactionKind::Payment
                };
                let amount = self.profile.amounts.sample(rng);
                self.transact(&from, &to, amount, kind).await
            }
            OperationType::HealthCheck => {
                let call = self.api.health().await;
                self.report(OperationType::HealthCheck, &call)
            }
        };
        Some(result)
    }

    /// Move `amount` from one identity's account to another's.
    pub async fn transact(
        &self,
        from: &Identity,
        to: &Identity,
        amount: f64,
        kind: TransactionKind,
    ) -> OperationResult {
        let operation = match kind {
            TransactionKind::Transfer => OperationType::Transfer,
            TransactionKind::Payment => OperationType::Payment,
        };
        let request = TransactionRequest {
            from_account_id: from.account_id().to_string(),
            to_account_id: to.account_id().to_string(),
            amount,
            kind,
        };
        let call = self.api.transact(from.token(), &request).await;
        self.report(operation, &call)
    }

    /// Register fresh credentials, log in and open an account. On success the
    /// new identity is already in the pool.
    pub async fn onboard(&self, credentials: &Credentials) -> Onboarding {
        let call = self.api.register(credentials).await;
        let head = self.report(OperationType::Register, &call);

        let outcome = match call.outcome {
            Ok(user_id) => self.login_and_open(&user_id, credentials).await.1,
            Err(error) => Err(OnboardingFailure {
                step: OperationType::Register,
                error,
            }),
        };

        Onboarding { head, outcome }
    }

    async fn login_and_open(
        &self,
        user_id: &str,
        credentials: &Credentials,
    ) -> (OperationResult, Result<Arc<Identity>, OnboardingFailure>) {
        let call = self.api.login(credentials).await;
        let result = self.report(OperationType::Login, &call);

        let outcome = match call.outcome {
            Ok(token) => self.open_account(user_id, credentials, &token).await.1,
            Err(error) => Err(OnboardingFailure {
                step: OperationType::Login,
                error,
            }),
        };

        (result, outcome)
    }

    async fn open_account(
        &self,
        user_id: &str,
        credentials: &Credentials,
        token: &str,
    ) -> (OperationResult, Result<Arc<Identity>, OnboardingFailure>) {
        let call = self.api.create_account(token).await;
        let result = self.report(OperationType::CreateAccount, &call);

        let outcome = call
            .outcome
            .and_then(|account_id| {
                let identity = Identity::new(
                    user_id,
                    &credentials.username,
                    &credentials.password,
                    token,
                    account_id,
                )?;
                let identity = Arc::new(identity);
                self.pool.add(Identity::clone(&identity))?;
                Ok(identity)
            })
            .map_err(|error| OnboardingFailure {
                step: OperationType::CreateAccount,
                error,
            });

        if let Err(failure) = &outcome {
            if matches!(failure.error, StepError::Pool(_) | StepError::Identity(_)) {
                tracing::warn!("Could not add identity to pool: {}", failure.error);
            }
        }

        (result, outcome)
    }

    fn report<T>(&self, operation: OperationType, call: &Call<T>) -> OperationResult {
        let result = OperationResult {
            operation,
            latency: call.latency,
            http_status: call.status,
            success: call.outcome.is_ok(),
        };
        tracing::debug!(
            "{} -> {:?} in {:?} (success: {})",
            operation,
            call.status,
            call.latency,
            result.success
        );
        self.sink.record_operation(&result);
        result
    }
}
