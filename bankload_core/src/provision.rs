//! One-time identity provisioning before the scenarios start.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;

use crate::error::StepError;
use crate::executor::OperationExecutor;
use crate::identity::{Credentials, IdentityPool};
use crate::operation::OperationType;
use crate::scheduler::StopHandle;

pub const DEFAULT_SLOT_DELAY: Duration = Duration::from_millis(100);

/// A slot that did not produce an identity.
#[derive(Debug, Clone)]
pub struct SlotFailure {
    pub slot: usize,
    pub step: OperationType,
    pub error: StepError,
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    /// Slots actually started; fewer than requested after a stop
    pub attempted: usize,
    pub created: usize,
    pub failures: Vec<SlotFailure>,
    pub elapsed: Duration,
}

/// Registers users one slot at a time and fills the shared pool.
pub struct SetupProvisioner {
    executor: OperationExecutor,
    prefix: String,
    slot_delay: Duration,
    seed: Option<u64>,
    stop: StopHandle,
}

impl SetupProvisioner {
    pub fn new(executor: OperationExecutor, prefix: impl Into<String>) -> Self {
        Self {
            executor,
            prefix: prefix.into(),
            slot_delay: DEFAULT_SLOT_DELAY,
            seed: None,
            stop: StopHandle::new(),
        }
    }

    pub fn with_slot_delay(mut self, slot_delay: Duration) -> Self {
        self.slot_delay = slot_delay;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Abandon the remaining slots once `stop` fires.
    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Run `count` slots sequentially. A failing step skips only its slot.
    pub async fn run(&self, count: usize) -> ProvisionReport {
        let started = Instant::now();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut report = ProvisionReport::default();

        tracing::info!("Provisioning {} identities (prefix '{}')", count, self.prefix);

        for slot in 0..count {
            if slot > 0 && !self.slot_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.slot_delay) => {}
                    _ = self.stop.stopped() => {}
                }
            }
            if self.stop.is_stopped() {
                tracing::info!("Provisioning stopped after {} of {} slots", slot, count);
                break;
            }
            report.attempted += 1;

            let credentials = Credentials::generate(&self.prefix, slot as u64, &mut rng);
            match self.executor.onboard(&credentials).await.outcome {
                Ok(identity) => {
                    report.created += 1;
                    tracing::debug!(
                        "Slot {}: provisioned {} with account {}",
                        slot,
                        identity.username(),
                        identity.account_id()
                    );
                }
                Err(failure) => {
                    tracing::warn!(
                        "Slot {}: {} failed, skipping: {}",
                        slot,
                        failure.step,
                        failure.error
                    );
                    report.failures.push(SlotFailure {
                        slot,
                        step: failure.step,
                        error: failure.error,
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            "Provisioning finished: {}/{} identities in {:.1}s",
            report.created,
            count,
            report.elapsed.as_secs_f64()
        );
        report
    }

    /// Convenience wrapper returning the populated pool.
    pub async fn provision(&self, count: usize) -> IdentityPool {
        self.run(count).await;
        self.executor.pool().clone()
    }
}
