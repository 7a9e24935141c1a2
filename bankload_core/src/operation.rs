//! Operation types, their preconditions and weight tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One unit of simulated user behaviour.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Register,
    Login,
    CreateAccount,
    ListAccounts,
    Transfer,
    Payment,
    HealthCheck,
}

impl OperationType {
    pub const ALL: [OperationType; 7] = [
        OperationType::Register,
        OperationType::Login,
        OperationType::CreateAccount,
        OperationType::ListAccounts,
        OperationType::Transfer,
        OperationType::Payment,
        OperationType::HealthCheck,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OperationType::Register => "register",
            OperationType::Login => "login",
            OperationType::CreateAccount => "create_account",
            OperationType::ListAccounts => "list_accounts",
            OperationType::Transfer => "transfer",
            OperationType::Payment => "payment",
            OperationType::HealthCheck => "health_check",
        }
    }

    /// Identities that must already be in the pool before this operation can run.
    ///
    /// Pool entries have pairwise distinct accounts, so two entries are
    /// enough for a transfer between different accounts.
    pub fn min_pool_size(self) -> usize {
        match self {
            OperationType::Register | OperationType::HealthCheck => 0,
            OperationType::Login | OperationType::CreateAccount | OperationType::ListAccounts => 1,
            OperationType::Transfer | OperationType::Payment => 2,
        }
    }

    pub fn is_ready(self, pool_size: usize) -> bool {
        pool_size >= self.min_pool_size()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("unknown operation type '{}'", s))
    }
}

/// Outcome of one executed operation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub operation: OperationType,
    pub latency: Duration,
    /// `None` when the request never got a response
    pub http_status: Option<u16>,
    pub success: bool,
}

/// Static relative weights used by the workflow selector.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    entries: Vec<(OperationType, f64)>,
}

impl WeightTable {
    pub fn new(
        entries: impl IntoIterator<Item = (OperationType, f64)>,
    ) -> Result<Self, ConfigError> {
        let mut merged: BTreeMap<OperationType, f64> = BTreeMap::new();
        for (operation, weight) in entries {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "weight for {} must be a finite number >= 0, got {}",
                    operation, weight
                )));
            }
            *merged.entry(operation).or_default() += weight;
        }

        if !merged.values().any(|weight| *weight > 0.0) {
            return Err(ConfigError::Invalid(
                "weight table needs at least one positive weight".to_string(),
            ));
        }

        Ok(Self {
            entries: merged.into_iter().collect(),
        })
    }

    pub fn entries(&self) -> &[(OperationType, f64)] {
        &self.entries
    }

    pub fn weight(&self, operation: OperationType) -> f64 {
        self.entries
            .iter()
            .find(|(op, _)| *op == operation)
            .map(|(_, weight)| *weight)
            .unwrap_or(0.0)
    }
}
