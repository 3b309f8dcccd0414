//! Resource gate: decides whether local generation may run at all.
//!
//! Generation on small boards is only safe when the host has enough memory
//! both in total and right now. An unreadable memory signal counts as
//! constrained.

use sysinfo::System;
use tracing::debug;

use crate::config::GateConfig;

/// Point-in-time memory reading, in KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_kb: u64,
    pub available_kb: u64,
}

/// Source of host memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Current reading, or `None` if the signal cannot be read.
    fn snapshot(&self) -> Option<MemorySnapshot>;
}

/// Reads memory through `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        // sysinfo reports zero when it could not read the platform source.
        if total == 0 {
            return None;
        }
        Some(MemorySnapshot {
            total_kb: total / 1024,
            available_kb: sys.available_memory() / 1024,
        })
    }
}

/// Resource gate with thresholds and an operator override.
pub struct ResourceGate {
    config: GateConfig,
    probe: Box<dyn MemoryProbe>,
}

impl ResourceGate {
    pub fn new(config: GateConfig) -> Self {
        Self::with_probe(config, Box::new(SystemMemoryProbe))
    }

    pub fn with_probe(config: GateConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self { config, probe }
    }

    /// True when generation must not run.
    pub fn is_constrained(&self) -> bool {
        if self.config.ignore_check {
            return false;
        }

        let Some(snapshot) = self.probe.snapshot() else {
            debug!("Memory signal unreadable, treating host as constrained");
            return true;
        };

        let constrained = snapshot.total_kb < self.config.min_total_kb
            || snapshot.available_kb < self.config.min_available_kb;
        if constrained {
            debug!(
                total_kb = snapshot.total_kb,
                available_kb = snapshot.available_kb,
                min_total_kb = self.config.min_total_kb,
                min_available_kb = self.config.min_available_kb,
                "Host memory below generation thresholds"
            );
        }
        constrained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Option<MemorySnapshot>);

    impl MemoryProbe for FixedProbe {
        fn snapshot(&self) -> Option<MemorySnapshot> {
            self.0
        }
    }

    fn gate(snapshot: Option<MemorySnapshot>, ignore_check: bool) -> ResourceGate {
        ResourceGate::with_probe(
            GateConfig {
                ignore_check,
                ..GateConfig::default()
            },
            Box::new(FixedProbe(snapshot)),
        )
    }

    fn mem(total_kb: u64, available_kb: u64) -> Option<MemorySnapshot> {
        Some(MemorySnapshot {
            total_kb,
            available_kb,
        })
    }

    #[test]
    fn roomy_host_is_not_constrained() {
        assert!(!gate(mem(1_000_000, 600_000), false).is_constrained());
    }

    #[test]
    fn small_total_is_constrained() {
        assert!(gate(mem(512_000, 400_000), false).is_constrained());
    }

    #[test]
    fn low_available_is_constrained() {
        assert!(gate(mem(1_000_000, 100_000), false).is_constrained());
    }

    #[test]
    fn thresholds_are_inclusive_floors() {
        assert!(!gate(mem(700_000, 250_000), false).is_constrained());
        assert!(gate(mem(699_999, 250_000), false).is_constrained());
    }

    #[test]
    fn unreadable_signal_is_constrained() {
        assert!(gate(None, false).is_constrained());
    }

    #[test]
    fn override_bypasses_everything() {
        assert!(!gate(None, true).is_constrained());
        assert!(!gate(mem(1, 1), true).is_constrained());
    }
}
