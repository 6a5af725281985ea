//! Resource sampling for voluntary worker recycling.
//!
//! A worker samples memory usage once after authenticating and again after
//! every operation. When usage has grown by more than
//! [`RecyclePolicy::growth_points`] percentage points over that baseline it
//! asks to be replaced (`will_exit`).

use std::fs;
use tracing::debug;

/// Source of a memory-usage reading, as a percentage of what is available.
pub trait ResourceProbe: Send + Sync {
    fn usage_percent(&self) -> Option<u32>;
}

/// Resident set size of this process relative to total system memory,
/// from `/proc`. Returns `None` where `/proc` is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl ResourceProbe for ProcessMemoryProbe {
    fn usage_percent(&self) -> Option<u32> {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let resident = kilobytes_field(&status, "VmRSS:")?;
        let total = kilobytes_field(&meminfo, "MemTotal:")?;
        if total == 0 {
            return None;
        }
        let percent = resident.saturating_mul(100) / total;
        debug!(resident_kb = resident, total_kb = total, percent, "memory sample");
        u32::try_from(percent).ok()
    }
}

fn kilobytes_field(contents: &str, field: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

/// When a worker should ask to be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclePolicy {
    pub enabled: bool,
    pub growth_points: u32,
}

impl RecyclePolicy {
    pub const DEFAULT_GROWTH_POINTS: u32 = 32;

    /// Recycling off. Used for in-process workers, where a restart would
    /// reset state shared with the host.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            growth_points: Self::DEFAULT_GROWTH_POINTS,
        }
    }

    pub fn should_recycle(&self, baseline: Option<u32>, current: Option<u32>) -> bool {
        match (self.enabled, baseline, current) {
            (true, Some(baseline), Some(current)) => {
                current > baseline.saturating_add(self.growth_points)
            }
            _ => false,
        }
    }
}

impl Default for RecyclePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            growth_points: Self::DEFAULT_GROWTH_POINTS,
        }
    }
}
