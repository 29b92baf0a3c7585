// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: hardware collaborator seam
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
pub use crate::freq_table::Relation;

/// Name of a governed clock domain ("little", "big", "gpu", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Cumulative time accounting for one load unit (a CPU, or a GPU as a whole).
/// All fields are microseconds since an arbitrary epoch and never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleStats {
    pub wall_us: u64,
    pub idle_us: u64,
    pub iowait_us: u64,
    pub nice_us: u64,
}

/// Everything the controller needs from the hardware.
///
/// Implementations must be callable from several sampling threads at once.
pub trait Platform: Send + Sync {
    fn current_frequency(&self, domain: &DomainId) -> Result<u32>;
    fn min_frequency(&self, domain: &DomainId) -> Result<u32>;
    /// Hardware maximum, not reduced by any ceiling.
    fn max_frequency(&self, domain: &DomainId) -> Result<u32>;

    /// Ask for `target_khz`, rounded by `relation`. Returns the achieved
    /// frequency.
    fn request_frequency(&self, domain: &DomainId, target_khz: u32, relation: Relation)
        -> Result<u32>;

    /// Upper bound published by a throttler (a QoS max lock). Governor
    /// requests above it are clipped by the platform.
    fn set_frequency_ceiling(&self, domain: &DomainId, ceiling_khz: u32) -> Result<()>;

    fn idle_stats(&self, unit: usize) -> Result<IdleStats>;

    fn read_temperature_c(&self, zone: &str) -> Result<i32>;
    fn read_battery_mv(&self) -> Result<i32>;

    /// Queue the delayed backup poweroff.
    fn emergency_poweroff(&self) -> Result<()>;
    fn orderly_poweroff(&self, force: bool) -> Result<()>;
}
