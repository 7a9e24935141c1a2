//! Weighted choice of the next operation, gated by pool preconditions.

use rand::Rng;

use crate::identity::IdentityPool;
use crate::operation::{OperationType, WeightTable};

/// Picks the next operation for a VU from a static weight table.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSelector {
    table: WeightTable,
}

impl WorkflowSelector {
    pub fn new(table: WeightTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    pub fn select<R: Rng + ?Sized>(&self, pool: &IdentityPool, rng: &mut R) -> OperationType {
        self.select_for(pool.size(), rng)
    }

    /// Weighted draw over the operations runnable with `pool_size` identities.
    /// Falls back to a health check when nothing is eligible.
    pub fn select_for<R: Rng + ?Sized>(&self, pool_size: usize, rng: &mut R) -> OperationType {
        let eligible = || {
            self.table
                .entries()
                .iter()
                .filter(move |(op, weight)| *weight > 0.0 && op.is_ready(pool_size))
        };

        let total: f64 = eligible().map(|(_, weight)| weight).sum();
        if total <= 0.0 {
            return OperationType::HealthCheck;
        }

        let mut roll = rng.gen_range(0.0..total);
        let mut last = OperationType::HealthCheck;
        for (op, weight) in eligible() {
            if roll < *weight {
                return *op;
            }
            roll -= weight;
            last = *op;
        }
        // float drift past the final bucket
        last
    }
}
