//! Load-generator host stats, so a saturated client is not mistaken for a slow API.

use std::sync::Arc;

use parking_lot::RwLock;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

#[derive(Debug, Clone, Default)]
pub struct SystemMetrics {
    pub cpu_usage: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
}

#[derive(Clone)]
pub struct SystemMonitor {
    system: Arc<RwLock<System>>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );

        Self {
            system: Arc::new(RwLock::new(system)),
        }
    }

    /// Refresh and read CPU and memory usage.
    pub fn sample(&self) -> SystemMetrics {
        let mut system = self.system.write();
        system.refresh_cpu_all();
        system.refresh_memory();

        SystemMetrics {
            cpu_usage: system.global_cpu_usage(),
            memory_used_mb: system.used_memory() / 1024 / 1024,
            memory_total_mb: system.total_memory() / 1024 / 1024,
        }
    }
}
