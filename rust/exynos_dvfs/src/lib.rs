// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: closed-loop DVFS governors and thermal/battery throttling
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-domain load governors (conservative, conservative-step, ondemand)
//! choose clock frequencies from measured utilization, while thermal and
//! battery throttlers cap those choices and drive the emergency poweroff.
//! Everything talks to hardware through [`Platform`]; [`SimPlatform`] is an
//! in-memory implementation for tests and the `dvfsd` tool.

pub mod config;
pub mod controller;
pub mod cpu_list;
pub mod error;
pub mod freq_table;
pub mod fvmap;
pub mod governor;
pub mod load;
pub mod platform;
pub mod presets;
pub mod scheduler;
pub mod sim;
pub mod stats;
pub mod surface;
pub mod throttle;
pub mod tunables;

pub const NAME: &str = "exynos_dvfs";

pub use config::DvfsConfig;
pub use controller::Controller;
pub use error::DvfsError;
pub use error::Result;
pub use freq_table::ClusterTable;
pub use freq_table::Relation;
pub use fvmap::VoltageMap;
pub use governor::LoadGovernor;
pub use platform::DomainId;
pub use platform::IdleStats;
pub use platform::Platform;
pub use scheduler::SamplingScheduler;
pub use sim::SimPlatform;
pub use stats::Metrics;
pub use stats::StatsCollector;
pub use surface::ControlSurface;
pub use throttle::ThermalBatteryThrottler;
pub use throttle::ThrottleLevel;
pub use tunables::GovernorKind;
pub use tunables::SharedTunables;
pub use tunables::TunableValue;
